use super::KeyValueStore;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// In-process store. Expired keys are dropped when touched or purged.
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<DashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Time left before `key` expires, if it exists and carries an expiry.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let entry = self.entries.get(key)?;
        if !entry.is_live(now) {
            return None;
        }
        entry.expires_at.map(|at| at.saturating_duration_since(now))
    }

    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| e.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn incr_by(&self, key: &str, delta: i64) -> anyhow::Result<i64> {
        let now = Instant::now();
        // The entry guard holds the shard lock for the whole read-modify-write.
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: "0".to_string(),
            expires_at: None,
        });
        if !entry.is_live(now) {
            entry.value = "0".to_string();
            entry.expires_at = None;
        }
        let current: i64 = entry
            .value
            .parse()
            .map_err(|_| anyhow::anyhow!("value at {} is not an integer", key))?;
        let next = current
            .checked_add(delta)
            .ok_or_else(|| anyhow::anyhow!("increment overflow at {}", key))?;
        entry.value = next.to_string();
        Ok(next)
    }

    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let now = Instant::now();
        let value = match self.entries.get(key) {
            Some(entry) if entry.is_live(now) => return Ok(Some(entry.value.clone())),
            Some(_) => None,
            None => return Ok(None),
        };
        self.entries.remove_if(key, |_, e| !e.is_live(now));
        Ok(value)
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<()> {
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> anyhow::Result<bool> {
        let now = Instant::now();
        match self.entries.get_mut(key) {
            Some(mut entry) if entry.is_live(now) => {
                entry.expires_at = Some(now + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn purge_expired(&self) -> anyhow::Result<usize> {
        let now = Instant::now();
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            let live = entry.is_live(now);
            if !live {
                removed += 1;
            }
            live
        });
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_incr_creates_and_accumulates() {
        let store = MemoryStore::new();
        assert_eq!(store.incr_by("k", 100).await.unwrap(), 100);
        assert_eq!(store.incr_by("k", 250).await.unwrap(), 350);
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("350"));
    }

    #[tokio::test]
    async fn test_incr_on_non_integer_fails() {
        let store = MemoryStore::new();
        store.set_with_ttl("k", "hello", Duration::from_secs(60)).await.unwrap();
        assert!(store.incr_by("k", 1).await.is_err());
    }

    #[tokio::test]
    async fn test_expired_values_disappear() {
        let store = MemoryStore::new();
        store.set_with_ttl("k", "v", Duration::from_millis(10)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_expire_only_applies_to_existing_keys() {
        let store = MemoryStore::new();
        assert!(!store.expire("missing", Duration::from_secs(5)).await.unwrap());

        store.incr_by("k", 1).await.unwrap();
        assert_eq!(store.ttl("k"), None);
        assert!(store.expire("k", Duration::from_secs(5)).await.unwrap());
        let ttl = store.ttl("k").unwrap();
        assert!(ttl <= Duration::from_secs(5) && ttl > Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_concurrent_increments_do_not_lose_updates() {
        let store = MemoryStore::new();
        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..50 {
                    store.incr_by("shared", 2).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(store.get("shared").await.unwrap().as_deref(), Some("1600"));
    }

    #[tokio::test]
    async fn test_purge_drops_untouched_expired_keys() {
        let store = MemoryStore::new();
        for i in 0..1000 {
            store
                .set_with_ttl(&format!("thread:{}", i), "[]", Duration::from_millis(1))
                .await
                .unwrap();
        }
        store.set_with_ttl("thread:keep", "[]", Duration::from_secs(600)).await.unwrap();
        store.incr_by("quota:2401:1", 5).await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.purge_expired().await.unwrap(), 1000);

        assert_eq!(store.entries.len(), 2);
        assert_eq!(store.get("thread:keep").await.unwrap().as_deref(), Some("[]"));
        assert_eq!(store.purge_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sweeper_empties_store_without_reads() {
        let store = MemoryStore::new();
        for i in 0..100 {
            store
                .set_with_ttl(&format!("thread:{}", i), "[]", Duration::from_millis(1))
                .await
                .unwrap();
        }

        let sweeper = crate::store::spawn_sweeper(Arc::new(store.clone()), Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(50)).await;
        sweeper.abort();

        assert_eq!(store.entries.len(), 0);
    }
}
