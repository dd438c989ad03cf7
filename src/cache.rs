//! In-process [`RagCache`] keyed by session id.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

use strudel_rag_core::cache::RagCache;
use strudel_rag_core::models::CachedRagResult;

/// Session-keyed retrieval cache held in memory.
///
/// Writes for one key are serialized by the map lock; the last writer wins.
#[derive(Default)]
pub struct InMemoryRagCache {
    entries: RwLock<HashMap<String, CachedRagResult>>,
}

impl InMemoryRagCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl RagCache for InMemoryRagCache {
    async fn get(&self, session_id: &str) -> Result<Option<CachedRagResult>> {
        Ok(self.entries.read().await.get(session_id).cloned())
    }

    async fn set(&self, session_id: &str, result: &CachedRagResult) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(session_id.to_string(), result.clone());
        Ok(())
    }

    async fn clear(&self, session_id: &str) -> Result<()> {
        self.entries.write().await.remove(session_id);
        Ok(())
    }
}
