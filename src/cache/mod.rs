//! Volatile "already seen" set consulted before the fetch/decode path.
//!
//! A miss is always safe: the transaction is reprocessed and the sink absorbs
//! the replay. A hit only saves the fetch.

pub mod memory;
pub mod redis;

pub use memory::MemoryDedupCache;
pub use self::redis::RedisDedupCache;

use crate::config::DedupConfig;
use crate::utils::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// TTL-bounded set keyed by `(program_id, signature)`.
#[async_trait]
pub trait DedupCache: Send + Sync {
    async fn contains(&self, program_id: &str, signature: &str) -> Result<bool>;

    async fn insert(&self, program_id: &str, signature: &str) -> Result<()>;
}

pub(crate) fn cache_key(program_id: &str, signature: &str) -> String {
    format!("dedup:{program_id}:{signature}")
}

/// Selects the Redis backend when a URL is configured, the in-process cache
/// otherwise.
///
/// # Errors
///
/// Returns `IndexerError::CacheError` if the Redis server is unreachable.
pub async fn build_dedup_cache(config: &DedupConfig) -> Result<Arc<dyn DedupCache>> {
    let ttl = Duration::from_secs(config.ttl_secs);
    match &config.url {
        Some(url) => Ok(Arc::new(RedisDedupCache::connect(url, ttl).await?)),
        None => Ok(Arc::new(MemoryDedupCache::new(ttl, config.max_capacity))),
    }
}
