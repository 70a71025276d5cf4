//! JSON-RPC backed [`LedgerSource`].
//!
//! Signature pages and transactions come from the RPC endpoint (through the
//! [`RpcProvider`] passed at construction, typically a
//! [`RetryingRpcProvider`](crate::utils::retry::RetryingRpcProvider)); live
//! notifications come from a [`LogStream`] on the PubSub endpoint.

use crate::config::{CommitmentLevel, IndexerConfig};
use crate::core::decoder::Decoder;
use crate::streams::LogStream;
use crate::types::traits::{LedgerSource, LogSubscription};
use crate::types::transaction::{RawTransaction, SignatureInfo};
use crate::utils::error::{IndexerError, Result};
use crate::utils::retry::RetryingRpcProvider;
use crate::utils::rpc::{DefaultRpcProvider, RpcProvider};
use async_trait::async_trait;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Ledger access over Solana JSON-RPC and PubSub.
///
/// # Example
///
/// ```no_run
/// use energy_indexer::config::CommitmentLevel;
/// use energy_indexer::core::execution::fetcher::RpcLedger;
/// use energy_indexer::utils::rpc::DefaultRpcProvider;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let rpc = DefaultRpcProvider::new("http://127.0.0.1:8899");
/// let ledger = RpcLedger::with_provider(
///     Arc::new(rpc),
///     "ws://127.0.0.1:8900",
///     CommitmentLevel::Confirmed,
///     Duration::from_secs(5),
/// );
/// ```
pub struct RpcLedger {
    rpc: Arc<dyn RpcProvider>,
    commitment: CommitmentConfig,
    decoder: Decoder,
    logs: LogStream,
}

impl RpcLedger {
    /// Builds the ledger from configuration, wrapping the RPC client in the
    /// configured retry policy.
    #[must_use]
    pub fn from_config(config: &IndexerConfig) -> Self {
        let commitment: CommitmentConfig = config.commitment_level.into();
        let raw = DefaultRpcProvider::new_with_commitment(&config.rpc_url, commitment);
        let retrying = RetryingRpcProvider::new(raw, config.retry.clone());
        Self::with_provider(
            Arc::new(retrying),
            config.ws_url.clone(),
            config.commitment_level,
            Duration::from_secs(config.reconnect_delay_secs),
        )
    }

    /// Creates a ledger backed by a custom [`RpcProvider`].
    #[must_use]
    pub fn with_provider(
        rpc: Arc<dyn RpcProvider>,
        ws_url: impl Into<String>,
        commitment: CommitmentLevel,
        reconnect_delay: Duration,
    ) -> Self {
        Self {
            rpc,
            commitment: commitment.into(),
            decoder: Decoder::new(),
            logs: LogStream::new(ws_url, commitment, reconnect_delay),
        }
    }

    fn parse_signature(signature: &str) -> Result<Signature> {
        Signature::from_str(signature)
            .map_err(|e| IndexerError::DecodingError(format!("Invalid signature {signature}: {e}")))
    }
}

#[async_trait]
impl LedgerSource for RpcLedger {
    async fn list_signatures(
        &self,
        program_id: &Pubkey,
        before: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SignatureInfo>> {
        let before = before.map(Self::parse_signature).transpose()?;
        let page = self
            .rpc
            .get_signatures_for_address(program_id, before, None, limit, Some(self.commitment))
            .await?;

        Ok(page
            .into_iter()
            .map(|entry| SignatureInfo {
                signature: entry.signature,
                slot: entry.slot,
                err: entry.err.map(|e| format!("{e:?}")),
                block_time: entry.block_time,
            })
            .collect())
    }

    async fn fetch_transaction(&self, signature: &str) -> Result<Option<RawTransaction>> {
        let sig = Self::parse_signature(signature)?;
        match self.rpc.get_transaction(&sig, Some(self.commitment)).await? {
            Some(encoded) => self.decoder.decode_transaction(&encoded).map(Some),
            None => Ok(None),
        }
    }

    async fn subscribe_logs(&self, program_id: &Pubkey, buffer: usize) -> Result<LogSubscription> {
        self.logs.subscribe(program_id, buffer).await
    }
}
