use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub user_id: i64,
    pub has_subscription: bool,
}

/// Resolves a client bearer token to the account behind it.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, token: &str) -> anyhow::Result<UserInfo>;
}

/// Form-encoded `token=<token>` POST against the account service.
pub struct HttpIdentityResolver {
    client: reqwest::Client,
    url: String,
}

impl HttpIdentityResolver {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), url)
    }

    pub fn with_client(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl IdentityResolver for HttpIdentityResolver {
    async fn resolve(&self, token: &str) -> anyhow::Result<UserInfo> {
        if token.is_empty() {
            return Err(anyhow::anyhow!("no token provided"));
        }
        let response = self
            .client
            .post(&self.url)
            .form(&[("token", token)])
            .send()
            .await
            .map_err(|e| {
                warn!("Error getting user id: {}", e);
                anyhow::anyhow!("user id request failed: {}", e)
            })?;

        if response.status() != reqwest::StatusCode::OK {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!("Error getting user id: {}", status);
            return Err(anyhow::anyhow!("error from user id service: {}", body));
        }

        response
            .json::<UserInfo>()
            .await
            .map_err(|e| anyhow::anyhow!("error decoding user id response: {}", e))
    }
}
