use async_trait::async_trait;
use serde_json::json;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::RpcTransactionConfig;
use solana_client::rpc_request::RpcRequest;
use solana_client::rpc_response::RpcConfirmedTransactionStatusWithSignature;
use solana_sdk::{commitment_config::CommitmentConfig, pubkey::Pubkey, signature::Signature};
use solana_transaction_status::{EncodedConfirmedTransactionWithStatusMeta, UiTransactionEncoding};

use crate::utils::error::{IndexerError, Result};

/// The JSON-RPC calls the indexer depends on.
#[async_trait]
pub trait RpcProvider: Send + Sync {
    async fn get_signatures_for_address(
        &self,
        address: &Pubkey,
        before: Option<Signature>,
        until: Option<Signature>,
        limit: usize,
        commitment: Option<CommitmentConfig>,
    ) -> Result<Vec<RpcConfirmedTransactionStatusWithSignature>>;

    /// `Ok(None)` when the node answers `null` (unknown or pruned signature).
    async fn get_transaction(
        &self,
        signature: &Signature,
        commitment: Option<CommitmentConfig>,
    ) -> Result<Option<EncodedConfirmedTransactionWithStatusMeta>>;
}

pub struct DefaultRpcProvider {
    client: RpcClient,
}

impl DefaultRpcProvider {
    /// Creates a provider connecting to `rpc_url` with the default commitment level.
    pub fn new(rpc_url: &str) -> Self {
        Self {
            client: RpcClient::new(rpc_url.to_string()),
        }
    }

    /// Creates a provider with a specific commitment configuration.
    pub fn new_with_commitment(rpc_url: &str, commitment: CommitmentConfig) -> Self {
        Self {
            client: RpcClient::new_with_commitment(rpc_url.to_string(), commitment),
        }
    }
}

#[async_trait]
impl RpcProvider for DefaultRpcProvider {
    async fn get_signatures_for_address(
        &self,
        address: &Pubkey,
        before: Option<Signature>,
        until: Option<Signature>,
        limit: usize,
        commitment: Option<CommitmentConfig>,
    ) -> Result<Vec<RpcConfirmedTransactionStatusWithSignature>> {
        let config = solana_client::rpc_client::GetConfirmedSignaturesForAddress2Config {
            before,
            until,
            limit: Some(limit),
            commitment,
        };
        self.client
            .get_signatures_for_address_with_config(address, config)
            .await
            .map_err(|e| IndexerError::RpcClientError(Box::new(e)))
    }

    async fn get_transaction(
        &self,
        signature: &Signature,
        commitment: Option<CommitmentConfig>,
    ) -> Result<Option<EncodedConfirmedTransactionWithStatusMeta>> {
        // `send` keeps a null result distinguishable from a transport error.
        let config = RpcTransactionConfig {
            encoding: Some(UiTransactionEncoding::Json),
            commitment,
            max_supported_transaction_version: Some(0),
        };
        self.client
            .send::<Option<EncodedConfirmedTransactionWithStatusMeta>>(
                RpcRequest::GetTransaction,
                json!([signature.to_string(), config]),
            )
            .await
            .map_err(|e| IndexerError::RpcClientError(Box::new(e)))
    }
}
