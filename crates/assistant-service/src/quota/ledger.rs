use super::{
    INPUT_TOKEN_CREDITS, LITE_INPUT_TOKEN_CREDITS, LITE_OUTPUT_TOKEN_CREDITS,
    MONTHLY_QUOTA_CREDITS, OUTPUT_TOKEN_CREDITS, QUOTA_KEY_TTL,
};
use crate::metrics;
use crate::store::KeyValueStore;
use chrono::{DateTime, Datelike, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

/// `quota:<YYMM>:<userId>`
pub fn user_quota_key(user_id: i64, at: DateTime<Utc>) -> String {
    format!("quota:{:02}{:02}:{}", at.year() % 100, at.month(), user_id)
}

/// `global_quota:<YYMM>:<resourceType>`
pub fn global_quota_key(resource_type: &str, at: DateTime<Utc>) -> String {
    format!("global_quota:{:02}{:02}:{}", at.year() % 100, at.month(), resource_type)
}

/// Credit ledger bound to one user for the lifetime of a session.
///
/// Every operation is a single atomic increment or read against the shared
/// store, so any number of sessions may charge the same user concurrently.
#[derive(Clone)]
pub struct QuotaLedger {
    store: Arc<dyn KeyValueStore>,
    user_id: i64,
    monthly_cap: i64,
}

impl QuotaLedger {
    pub fn new(store: Arc<dyn KeyValueStore>, user_id: i64) -> Self {
        Self::with_cap(store, user_id, MONTHLY_QUOTA_CREDITS)
    }

    pub fn with_cap(store: Arc<dyn KeyValueStore>, user_id: i64, monthly_cap: i64) -> Self {
        Self {
            store,
            user_id,
            monthly_cap,
        }
    }

    pub fn user_id(&self) -> i64 {
        self.user_id
    }

    pub fn monthly_cap(&self) -> i64 {
        self.monthly_cap
    }

    pub async fn charge_credits(&self, credits: i64) -> anyhow::Result<()> {
        self.charge_credits_at(credits, Utc::now()).await
    }

    pub(crate) async fn charge_credits_at(&self, credits: i64, at: DateTime<Utc>) -> anyhow::Result<()> {
        if credits == 0 {
            return Ok(());
        }
        let key = user_quota_key(self.user_id, at);
        let used = self.store.incr_by(&key, credits).await?;
        if credits > 0 && used == credits {
            // First charge this month.
            self.store.expire(&key, QUOTA_KEY_TTL).await?;
        }
        debug!(user_id = self.user_id, credits, used, "charged credits");
        Ok(())
    }

    pub async fn charge_input_tokens(&self, tokens: i64) -> anyhow::Result<i64> {
        let credits = tokens * INPUT_TOKEN_CREDITS;
        self.charge_credits(credits).await?;
        metrics::add_credits("input_tokens", credits);
        Ok(credits)
    }

    pub async fn charge_output_tokens(&self, tokens: i64) -> anyhow::Result<i64> {
        let credits = tokens * OUTPUT_TOKEN_CREDITS;
        self.charge_credits(credits).await?;
        metrics::add_credits("output_tokens", credits);
        Ok(credits)
    }

    /// Charge a call to the lightweight model used for verification.
    pub async fn charge_lite_tokens(&self, input: i64, output: i64) -> anyhow::Result<i64> {
        let credits = input * LITE_INPUT_TOKEN_CREDITS + output * LITE_OUTPUT_TOKEN_CREDITS;
        self.charge_credits(credits).await?;
        metrics::add_credits("lite_tokens", credits);
        Ok(credits)
    }

    /// Returns `(used, remaining)`. `remaining` goes negative once the cap is
    /// exceeded.
    pub async fn get_quota(&self) -> anyhow::Result<(i64, i64)> {
        self.get_quota_at(Utc::now()).await
    }

    pub(crate) async fn get_quota_at(&self, at: DateTime<Utc>) -> anyhow::Result<(i64, i64)> {
        let key = user_quota_key(self.user_id, at);
        let used = match self.store.get(&key).await? {
            None => 0,
            Some(raw) => raw
                .parse::<i64>()
                .map_err(|e| anyhow::anyhow!("corrupt quota record {}: {}", key, e))?,
        };
        Ok((used, self.monthly_cap - used))
    }

    /// Count one use of a pooled resource. Returns whether the pool still
    /// covered this use.
    pub async fn charge_global(&self, resource_type: &str, global_cap: i64) -> anyhow::Result<bool> {
        self.charge_global_at(resource_type, global_cap, Utc::now()).await
    }

    pub(crate) async fn charge_global_at(
        &self,
        resource_type: &str,
        global_cap: i64,
        at: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        let key = global_quota_key(resource_type, at);
        let used = self.store.incr_by(&key, 1).await?;
        if used == 1 {
            self.store.expire(&key, QUOTA_KEY_TTL).await?;
        }
        Ok(used <= global_cap)
    }

    /// Charge the shared pool for `resource_type`, falling back to the
    /// user's own credits once the pool is exhausted for the month.
    pub async fn charge_global_or_user(
        &self,
        resource_type: &str,
        global_cap: i64,
        user_credits: i64,
    ) -> anyhow::Result<()> {
        if self.charge_global(resource_type, global_cap).await? {
            return Ok(());
        }
        warn!(
            user_id = self.user_id,
            resource_type, "global pool exhausted, charging user"
        );
        self.charge_credits(user_credits).await?;
        metrics::add_credits(resource_type, user_credits);
        Ok(())
    }
}
