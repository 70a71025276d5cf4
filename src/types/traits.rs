//! Trait seams between the workers and their collaborators.
//!
//! The worker only talks to the ledger through [`LedgerSource`] and to the
//! per-program decoding logic through [`TransactionDecoder`], so either side
//! can be replaced by an in-memory double in tests.

use crate::types::records::DomainRecord;
use crate::types::transaction::{LogNotification, RawTransaction, SignatureInfo};
use crate::utils::error::Result;
use async_trait::async_trait;
use solana_sdk::pubkey::Pubkey;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Read access to the ledger for one or more programs.
#[async_trait]
pub trait LedgerSource: Send + Sync {
    /// Lists signatures mentioning `program_id`, most recent first.
    ///
    /// `before` continues a previous page from its oldest signature. An empty
    /// page means the history is exhausted.
    async fn list_signatures(
        &self,
        program_id: &Pubkey,
        before: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SignatureInfo>>;

    /// Fetches a full transaction. `Ok(None)` means the ledger no longer
    /// serves it.
    async fn fetch_transaction(&self, signature: &str) -> Result<Option<RawTransaction>>;

    /// Opens a live log subscription for `program_id`, buffering at most
    /// `buffer` undelivered notifications.
    async fn subscribe_logs(&self, program_id: &Pubkey, buffer: usize)
        -> Result<LogSubscription>;
}

/// Pure decoding of one program's transactions.
///
/// Implementations never panic and never touch storage; malformed or
/// unknown instructions decode to no records.
pub trait TransactionDecoder: Send + Sync {
    /// Program whose instructions this decoder understands.
    fn program_id(&self) -> &str;

    /// Decodes every instruction of `transaction` addressed to this program.
    fn decode(&self, transaction: &RawTransaction) -> Vec<DomainRecord>;
}

/// Handle to a live log subscription.
///
/// Notifications arrive on a bounded channel; dropping or unsubscribing the
/// handle stops the feeding task. A feed that can lose notifications (a
/// socket that reconnects) bumps a resync counter afterwards so the consumer
/// knows to re-read the history it may have missed.
pub struct LogSubscription {
    receiver: mpsc::Receiver<LogNotification>,
    resyncs: Option<watch::Receiver<u64>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl LogSubscription {
    /// Wraps a receiver fed by `task`, which must stop once `cancel` fires.
    #[must_use]
    pub fn new(
        receiver: mpsc::Receiver<LogNotification>,
        cancel: CancellationToken,
        task: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            receiver,
            resyncs: None,
            cancel,
            task,
        }
    }

    /// Attaches the counter the feeding task bumps after a gap.
    #[must_use]
    pub fn with_resyncs(mut self, resyncs: watch::Receiver<u64>) -> Self {
        self.resyncs = Some(resyncs);
        self
    }

    /// A handle on the resync counter, if the feed has one.
    #[must_use]
    pub fn resyncs(&self) -> Option<watch::Receiver<u64>> {
        self.resyncs.clone()
    }

    /// Waits for the next notification. `None` once the feed has ended.
    pub async fn recv(&mut self) -> Option<LogNotification> {
        self.receiver.recv().await
    }

    /// Stops the feed and waits for the feeding task to exit.
    pub async fn unsubscribe(mut self) {
        self.cancel.cancel();
        self.receiver.close();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "log subscription task ended abnormally");
            }
        }
    }
}

impl Drop for LogSubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
