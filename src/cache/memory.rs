use super::{cache_key, DedupCache};
use crate::utils::error::Result;
use async_trait::async_trait;
use moka::future::Cache;
use std::time::Duration;

/// In-process dedup cache backed by `moka`.
#[derive(Clone)]
pub struct MemoryDedupCache {
    seen: Cache<String, ()>,
}

impl MemoryDedupCache {
    #[must_use]
    pub fn new(ttl: Duration, max_capacity: u64) -> Self {
        Self {
            seen: Cache::builder()
                .time_to_live(ttl)
                .max_capacity(max_capacity)
                .build(),
        }
    }
}

#[async_trait]
impl DedupCache for MemoryDedupCache {
    async fn contains(&self, program_id: &str, signature: &str) -> Result<bool> {
        Ok(self.seen.get(&cache_key(program_id, signature)).await.is_some())
    }

    async fn insert(&self, program_id: &str, signature: &str) -> Result<()> {
        self.seen.insert(cache_key(program_id, signature), ()).await;
        Ok(())
    }
}
