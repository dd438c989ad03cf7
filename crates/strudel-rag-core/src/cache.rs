//! Per-session RAG cache capability.
//!
//! The cache is a key-value store indexed by session id. Every `set` fully
//! overwrites the previous entry, so a reader never observes a partial or
//! stale mix. Expiry follows the session lifetime; there is no TTL here.

use anyhow::Result;
use async_trait::async_trait;

use crate::models::CachedRagResult;

#[async_trait]
pub trait RagCache: Send + Sync {
    async fn get(&self, session_id: &str) -> Result<Option<CachedRagResult>>;

    async fn set(&self, session_id: &str, result: &CachedRagResult) -> Result<()>;

    async fn clear(&self, session_id: &str) -> Result<()>;
}
