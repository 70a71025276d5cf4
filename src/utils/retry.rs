//! Retries for ledger reads.
//!
//! Only transport-level failures are retried. A `null` transaction, a bad
//! signature or an undecodable payload is returned to the worker as is, so it
//! can record the failure instead of spinning on it.

use crate::config::RetryConfig;
use crate::utils::error::{IndexerError, Result};
use crate::utils::rpc::RpcProvider;
use async_trait::async_trait;
use solana_client::rpc_response::RpcConfirmedTransactionStatusWithSignature;
use solana_sdk::{commitment_config::CommitmentConfig, pubkey::Pubkey, signature::Signature};
use solana_transaction_status::EncodedConfirmedTransactionWithStatusMeta;
use std::future::Future;
use std::time::Duration;

/// Delay before retry number `retry` (1-based).
///
/// `initial_backoff_ms * backoff_multiplier^(retry - 1)`, capped at
/// `max_backoff_ms`, then scaled into `[0.75, 1.25]` when jitter is on.
#[must_use]
pub fn backoff_delay(cfg: &RetryConfig, retry: u32) -> Duration {
    let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
    let raw = cfg.initial_backoff_ms as f64 * cfg.backoff_multiplier.powi(exponent);
    let mut ms = raw.min(cfg.max_backoff_ms as f64);

    if cfg.jitter {
        ms *= 0.75 + jitter_unit() * 0.5;
    }
    Duration::from_millis(ms as u64)
}

// Sub-second clock noise mapped into [0, 1).
fn jitter_unit() -> f64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or_default();
    f64::from(nanos % 10_000) / 10_000.0
}

/// Whether a ledger read that failed with `err` may succeed if repeated.
#[must_use]
pub fn is_transient(err: &IndexerError) -> bool {
    matches!(
        err,
        IndexerError::RpcError(_) | IndexerError::RpcClientError(_) | IndexerError::ConnectionError(_)
    )
}

/// Runs `op` until it succeeds, fails with a non-transient error, or has
/// been retried `cfg.max_retries` times.
///
/// # Errors
///
/// Returns the first non-transient error unchanged, or
/// [`IndexerError::RetryExhausted`] carrying the last transient error.
pub async fn retry_transient<T, F, Fut>(cfg: &RetryConfig, method: &'static str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut retries = 0u32;
    loop {
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(err) if !is_transient(&err) => return Err(err),
            Err(err) => err,
        };

        if retries >= cfg.max_retries {
            return Err(IndexerError::RetryExhausted {
                attempts: retries + 1,
                last_error: err.to_string(),
            });
        }
        retries += 1;

        let delay = backoff_delay(cfg, retries);
        tracing::warn!(
            method,
            retry = retries,
            max_retries = cfg.max_retries,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %err,
            "Ledger read failed, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}

/// Wraps an [`RpcProvider`] so both ledger reads go through
/// [`retry_transient`].
///
/// ```no_run
/// use energy_indexer::config::RetryConfig;
/// use energy_indexer::utils::retry::RetryingRpcProvider;
/// use energy_indexer::utils::rpc::{DefaultRpcProvider, RpcProvider};
/// use std::sync::Arc;
///
/// let raw = DefaultRpcProvider::new("http://127.0.0.1:8899");
/// let rpc: Arc<dyn RpcProvider> = Arc::new(RetryingRpcProvider::new(raw, RetryConfig::default()));
/// ```
pub struct RetryingRpcProvider<P> {
    inner: P,
    config: RetryConfig,
}

impl<P: RpcProvider> RetryingRpcProvider<P> {
    pub fn new(inner: P, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl<P: RpcProvider> RpcProvider for RetryingRpcProvider<P> {
    async fn get_signatures_for_address(
        &self,
        address: &Pubkey,
        before: Option<Signature>,
        until: Option<Signature>,
        limit: usize,
        commitment: Option<CommitmentConfig>,
    ) -> Result<Vec<RpcConfirmedTransactionStatusWithSignature>> {
        retry_transient(&self.config, "getSignaturesForAddress", || {
            self.inner
                .get_signatures_for_address(address, before, until, limit, commitment)
        })
        .await
    }

    async fn get_transaction(
        &self,
        signature: &Signature,
        commitment: Option<CommitmentConfig>,
    ) -> Result<Option<EncodedConfirmedTransactionWithStatusMeta>> {
        retry_transient(&self.config, "getTransaction", || {
            self.inner.get_transaction(signature, commitment)
        })
        .await
    }
}
