//! In-memory doubles shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use energy_indexer::cache::MemoryDedupCache;
use energy_indexer::decoders::instruction_discriminator;
use energy_indexer::storage::{CheckpointCursor, ErrorLogEntry, ProgramCheckpoint, Sink, WorkerStatus};
use energy_indexer::types::transaction::{LogNotification, RawInstruction, RawTransaction, SignatureInfo};
use energy_indexer::{
    DomainRecord, IndexerError, LedgerSource, LogSubscription, ProgramKind, ProgramSpec, Result,
};
use solana_sdk::pubkey::Pubkey;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

pub const REGISTRY_ID: &str = "3aF9FmyFuGzg4i1TCyySLQM1zWK8UUQyFALxo2f236ye";
pub const TRADING_ID: &str = "GTuRUUwCfvmqW7knqQtzQLMCy61p4UKUrdT5ssVgZbat";

pub fn spec(name: &str, id: &str) -> ProgramSpec {
    ProgramSpec {
        program_id: id.parse().unwrap(),
        name: name.to_string(),
        kind: name.parse::<ProgramKind>().unwrap(),
    }
}

pub fn account(n: u8) -> String {
    bs58::encode([n; 32]).into_string()
}

pub fn ix_data(name: &str, args: impl borsh::BorshSerialize) -> Vec<u8> {
    let mut data = instruction_discriminator(name).to_vec();
    data.extend(borsh::to_vec(&args).unwrap());
    data
}

pub fn transaction(
    signature: &str,
    slot: u64,
    program_id: &str,
    data: Vec<u8>,
    accounts: Vec<String>,
) -> RawTransaction {
    RawTransaction {
        signature: signature.to_string(),
        slot,
        block_time: Some(1_700_000_000 + i64::try_from(slot).unwrap()),
        instructions: vec![RawInstruction {
            index: 0,
            program_id: program_id.to_string(),
            accounts,
            data,
            inner: false,
        }],
        logs: Vec::new(),
        err: None,
    }
}

/// `register_user` for the user account `account(user)`.
pub fn register_user(signature: &str, slot: u64, user: u8) -> RawTransaction {
    transaction(
        signature,
        slot,
        REGISTRY_ID,
        ix_data("register_user", (0u8, 13.75f64, 100.5f64)),
        vec![account(user), account(9), account(user + 100), account(0)],
    )
}

pub fn dedup_cache() -> Arc<MemoryDedupCache> {
    Arc::new(MemoryDedupCache::new(Duration::from_secs(60), 1_000))
}

/// Ledger double: a newest-first signature history, fetchable transactions
/// and a live feed the test can push into.
#[derive(Default)]
pub struct MemoryLedger {
    history: Mutex<Vec<SignatureInfo>>,
    transactions: Mutex<HashMap<String, RawTransaction>>,
    failing_fetches: Mutex<HashSet<String>>,
    fetches: Mutex<Vec<String>>,
    calls: Mutex<Vec<&'static str>>,
    live: Mutex<Option<mpsc::Sender<LogNotification>>>,
    resyncs: Mutex<Option<watch::Sender<u64>>>,
    landing: Mutex<Option<RawTransaction>>,
    pub fail_listing: Mutex<bool>,
    pub fail_subscribe: Mutex<bool>,
}

impl MemoryLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Appends to the history; within a slot the latest addition is newest.
    pub fn add(&self, tx: RawTransaction) {
        self.list(SignatureInfo {
            signature: tx.signature.clone(),
            slot: tx.slot,
            err: tx.err.clone(),
            block_time: tx.block_time,
        });
        self.transactions
            .lock()
            .unwrap()
            .insert(tx.signature.clone(), tx);
    }

    /// Lists the signature without serving the transaction (pruned ledger).
    pub fn add_pruned(&self, signature: &str, slot: u64) {
        self.list(SignatureInfo {
            signature: signature.to_string(),
            slot,
            err: None,
            block_time: None,
        });
    }

    fn list(&self, info: SignatureInfo) {
        let mut history = self.history.lock().unwrap();
        let at = history
            .iter()
            .position(|s| s.slot <= info.slot)
            .unwrap_or(history.len());
        history.insert(at, info);
    }

    /// Lands `tx` right after the first signature page is served, notifying
    /// the live feed if one is open at that moment.
    pub fn land_during_listing(&self, tx: RawTransaction) {
        *self.landing.lock().unwrap() = Some(tx);
    }

    /// Ledger calls in order: `list`, `fetch` or `subscribe`.
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    /// Signals the subscriber that the feed reconnected.
    pub fn simulate_reconnect(&self) {
        self.resyncs
            .lock()
            .unwrap()
            .as_ref()
            .expect("no live subscription")
            .send_modify(|generation| *generation += 1);
    }

    pub fn fail_fetch(&self, signature: &str) {
        self.failing_fetches
            .lock()
            .unwrap()
            .insert(signature.to_string());
    }

    pub fn heal_fetch(&self, signature: &str) {
        self.failing_fetches.lock().unwrap().remove(signature);
    }

    pub fn fetches(&self) -> Vec<String> {
        self.fetches.lock().unwrap().clone()
    }

    pub fn is_live(&self) -> bool {
        self.live.lock().unwrap().is_some()
    }

    /// Delivers a live notification; the transaction must already be added.
    pub async fn push_live(&self, signature: &str, slot: u64, err: Option<&str>) {
        let sender = self
            .live
            .lock()
            .unwrap()
            .clone()
            .expect("no live subscription");
        sender
            .send(LogNotification {
                signature: signature.to_string(),
                slot,
                err: err.map(str::to_string),
            })
            .await
            .unwrap();
    }
}

#[async_trait]
impl LedgerSource for MemoryLedger {
    async fn list_signatures(
        &self,
        _program_id: &Pubkey,
        before: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SignatureInfo>> {
        self.calls.lock().unwrap().push("list");
        if *self.fail_listing.lock().unwrap() {
            return Err(IndexerError::RpcError("503 Service Unavailable".into()));
        }
        let page: Vec<SignatureInfo> = {
            let history = self.history.lock().unwrap();
            let start = match before {
                Some(sig) => history
                    .iter()
                    .position(|s| s.signature == sig)
                    .map_or(history.len(), |i| i + 1),
                None => 0,
            };
            history.iter().skip(start).take(limit).cloned().collect()
        };

        let landed = self.landing.lock().unwrap().take();
        if let Some(tx) = landed {
            let notification = LogNotification {
                signature: tx.signature.clone(),
                slot: tx.slot,
                err: None,
            };
            self.add(tx);
            if let Some(sender) = self.live.lock().unwrap().as_ref() {
                sender.try_send(notification).unwrap();
            }
        }
        Ok(page)
    }

    async fn fetch_transaction(&self, signature: &str) -> Result<Option<RawTransaction>> {
        self.calls.lock().unwrap().push("fetch");
        self.fetches.lock().unwrap().push(signature.to_string());
        if self.failing_fetches.lock().unwrap().contains(signature) {
            return Err(IndexerError::RetryExhausted {
                attempts: 4,
                last_error: "timed out".into(),
            });
        }
        Ok(self.transactions.lock().unwrap().get(signature).cloned())
    }

    async fn subscribe_logs(&self, _program_id: &Pubkey, buffer: usize) -> Result<LogSubscription> {
        self.calls.lock().unwrap().push("subscribe");
        if *self.fail_subscribe.lock().unwrap() {
            return Err(IndexerError::ConnectionError("connection refused".into()));
        }
        let (tx, rx) = mpsc::channel(buffer);
        let (resync_tx, resync_rx) = watch::channel(0u64);
        *self.live.lock().unwrap() = Some(tx);
        *self.resyncs.lock().unwrap() = Some(resync_tx);
        Ok(LogSubscription::new(rx, CancellationToken::new(), None).with_resyncs(resync_rx))
    }
}

/// Sink double with the checkpoint rules of the real sink: the checkpoint
/// moves with the records it covers and never backwards.
#[derive(Default)]
pub struct MemorySink {
    pub checkpoints: Mutex<HashMap<String, ProgramCheckpoint>>,
    pub records: Mutex<Vec<(String, DomainRecord)>>,
    pub errors: Mutex<Vec<ErrorLogEntry>>,
    pub statuses: Mutex<Vec<(String, WorkerStatus)>>,
    failing_signatures: Mutex<HashSet<String>>,
    pub fail_checkpoint_load: Mutex<bool>,
}

impl MemorySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_persist_for(&self, signature: &str) {
        self.failing_signatures
            .lock()
            .unwrap()
            .insert(signature.to_string());
    }

    pub fn heal_persist_for(&self, signature: &str) {
        self.failing_signatures.lock().unwrap().remove(signature);
    }

    pub fn checkpoint(&self, program_id: &str) -> Option<ProgramCheckpoint> {
        self.checkpoints.lock().unwrap().get(program_id).cloned()
    }

    pub fn height(&self, program_id: &str) -> u64 {
        self.checkpoint(program_id)
            .map_or(0, |c| c.last_processed_height)
    }

    pub fn records_for(&self, program_id: &str) -> Vec<DomainRecord> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| p == program_id)
            .map(|(_, r)| r.clone())
            .collect()
    }

    pub fn signatures_for(&self, program_id: &str) -> Vec<String> {
        self.records_for(program_id)
            .iter()
            .map(|r| r.provenance().signature.clone())
            .collect()
    }

    pub fn last_status(&self, program_id: &str) -> Option<WorkerStatus> {
        self.statuses
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(p, _)| p == program_id)
            .map(|(_, s)| *s)
    }
}

#[async_trait]
impl Sink for MemorySink {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn load_checkpoint(&self, program_id: &str, program_name: &str) -> Result<ProgramCheckpoint> {
        if *self.fail_checkpoint_load.lock().unwrap() {
            return Err(IndexerError::InternalError("database unreachable".into()));
        }
        Ok(self
            .checkpoints
            .lock()
            .unwrap()
            .entry(program_id.to_string())
            .or_insert_with(|| ProgramCheckpoint::initial(program_id, program_name))
            .clone())
    }

    async fn persist(
        &self,
        program_id: &str,
        records: &[DomainRecord],
        cursor: Option<&CheckpointCursor>,
    ) -> Result<()> {
        let failing = self.failing_signatures.lock().unwrap();
        if records
            .iter()
            .any(|r| failing.contains(&r.provenance().signature))
        {
            return Err(IndexerError::InternalError("deadlock detected".into()));
        }
        drop(failing);

        self.records.lock().unwrap().extend(
            records
                .iter()
                .map(|r| (program_id.to_string(), r.clone())),
        );
        if let Some(cursor) = cursor {
            let mut checkpoints = self.checkpoints.lock().unwrap();
            if let Some(cp) = checkpoints.get_mut(program_id) {
                if cp.last_processed_height <= cursor.height {
                    cp.last_processed_height = cursor.height;
                    cp.last_processed_signature = Some(cursor.signature.clone());
                }
            }
        }
        Ok(())
    }

    async fn set_status(&self, program_id: &str, status: WorkerStatus) -> Result<()> {
        self.statuses
            .lock()
            .unwrap()
            .push((program_id.to_string(), status));
        if let Some(cp) = self.checkpoints.lock().unwrap().get_mut(program_id) {
            cp.status = status;
        }
        Ok(())
    }

    async fn record_error(&self, entry: &ErrorLogEntry) -> Result<()> {
        self.errors.lock().unwrap().push(entry.clone());
        Ok(())
    }
}
