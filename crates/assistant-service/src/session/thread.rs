use crate::store::KeyValueStore;
use crate::transcript::{PersistedMessage, Transcript};
use crate::widgets::WidgetContext;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub fn thread_key(thread_id: &str) -> String {
    format!("thread:{}", thread_id)
}

/// What is kept of a finished session so the next one can resume it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredThread {
    pub thread_id: String,
    pub messages: Vec<PersistedMessage>,
    #[serde(default)]
    pub context_storage: WidgetContext,
}

impl StoredThread {
    pub fn new(thread_id: &str, transcript: &Transcript, context: &WidgetContext) -> Self {
        Self {
            thread_id: thread_id.to_string(),
            messages: transcript.to_persisted(),
            context_storage: context.clone(),
        }
    }

    /// Accepts both the full record and a bare message list.
    pub fn parse(thread_id: &str, raw: &str) -> anyhow::Result<Self> {
        if let Ok(thread) = serde_json::from_str::<StoredThread>(raw) {
            return Ok(thread);
        }
        let messages: Vec<PersistedMessage> = serde_json::from_str(raw)?;
        Ok(Self {
            thread_id: thread_id.to_string(),
            messages,
            context_storage: WidgetContext::default(),
        })
    }
}

pub async fn load_thread(store: &dyn KeyValueStore, thread_id: &str) -> anyhow::Result<Option<StoredThread>> {
    match store.get(&thread_key(thread_id)).await? {
        Some(raw) => Ok(Some(StoredThread::parse(thread_id, &raw)?)),
        None => Ok(None),
    }
}

pub async fn store_thread(store: &dyn KeyValueStore, thread: &StoredThread, ttl: Duration) -> anyhow::Result<()> {
    let raw = serde_json::to_string(thread)?;
    store.set_with_ttl(&thread_key(&thread.thread_id), &raw, ttl).await
}
