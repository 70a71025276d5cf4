use super::{cache_key, DedupCache};
use crate::utils::error::Result;
use crate::utils::logging::redact_url;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::time::Duration;

/// Dedup cache shared between processes through Redis.
///
/// Keys are written with `SET key 1 EX ttl` so Redis expires them on its own.
#[derive(Clone)]
pub struct RedisDedupCache {
    conn: ConnectionManager,
    ttl_secs: u64,
}

impl RedisDedupCache {
    /// Opens a managed connection that reconnects on its own.
    ///
    /// # Errors
    ///
    /// Returns `IndexerError::CacheError` if the URL is invalid or the server
    /// cannot be reached.
    pub async fn connect(url: &str, ttl: Duration) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        tracing::info!(url = %redact_url(url), ttl_secs = ttl.as_secs(), "Connected dedup cache");

        Ok(Self {
            conn,
            ttl_secs: ttl.as_secs().max(1),
        })
    }
}

#[async_trait]
impl DedupCache for RedisDedupCache {
    async fn contains(&self, program_id: &str, signature: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let exists: bool = redis::cmd("EXISTS")
            .arg(cache_key(program_id, signature))
            .query_async(&mut conn)
            .await?;
        Ok(exists)
    }

    async fn insert(&self, program_id: &str, signature: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(cache_key(program_id, signature))
            .arg(1)
            .arg("EX")
            .arg(self.ttl_secs)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}
