//! Per-program worker: backfill, then live indexing with periodic catch-up
//! walks, one signature at a time.

use crate::cache::DedupCache;
use crate::config::{IndexerConfig, ProgramSpec};
use crate::core::backfill::BackfillEngine;
use crate::storage::{CheckpointCursor, ErrorLogEntry, Sink, WorkerStatus};
use crate::types::events::{SkipReason, WorkerEvent};
use crate::types::records::DomainRecord;
use crate::types::traits::{LedgerSource, LogSubscription, TransactionDecoder};
use crate::types::transaction::RawTransaction;
use crate::utils::error::{IndexerError, Result};
use crate::utils::logging::{self, log_error, log_transaction, LogLevel};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Tunables shared by every worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSettings {
    pub page_size: usize,
    pub stats_interval: Duration,
    pub live_buffer: usize,
    /// Period of the history walk a live worker runs to pick up anything the
    /// feed did not deliver.
    pub catchup_interval: Duration,
}

impl WorkerSettings {
    #[must_use]
    pub fn from_config(config: &IndexerConfig) -> Self {
        Self {
            page_size: config.backfill_page_size,
            stats_interval: Duration::from_secs(config.stats_interval_secs),
            live_buffer: config.live_buffer,
            catchup_interval: Duration::from_secs(config.catchup_interval_secs),
        }
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            page_size: 100,
            stats_interval: Duration::from_secs(30),
            live_buffer: 1024,
            catchup_interval: Duration::from_secs(60),
        }
    }
}

/// Result of one `process_transaction` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Records (possibly none) were persisted.
    Processed { slot: u64, records: usize },
    Skipped(SkipReason),
    /// An `error_log` row was written and the checkpoint held.
    Failed(String),
}

/// Summary of one history walk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackfillReport {
    pub collected: usize,
    pub processed: usize,
    /// Signatures that failed; the checkpoint stays below the first of them.
    pub failed: usize,
    /// Set when listing failed or the walk was cancelled.
    pub aborted: bool,
}

/// Indexes exactly one program.
///
/// Every signature goes through the same single-flight path, whether it
/// comes from a history walk or the live feed. Only history walks move the
/// checkpoint: a walk sees every signature above it in ledger order, so the
/// checkpoint never passes a signature that was not indexed. Live
/// deliveries persist their records immediately and are folded into the
/// checkpoint by the next walk, which runs after every feed resync and on
/// `catchup_interval`.
///
/// Within a walk, the first failure freezes the checkpoint; later
/// signatures are still indexed, and the next walk revisits the failed one.
pub struct ProgramWorker {
    spec: ProgramSpec,
    program_id: String,
    ledger: Arc<dyn LedgerSource>,
    sink: Arc<dyn Sink>,
    cache: Arc<dyn DedupCache>,
    decoder: Arc<dyn TransactionDecoder>,
    events: mpsc::Sender<WorkerEvent>,
    settings: WorkerSettings,
    cancellation_token: CancellationToken,
    checkpoint_height: u64,
    checkpoint_signature: Option<String>,
    started_at: Instant,
}

/// Whether a processed signature may move the checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cursor {
    Advance,
    Hold,
}

impl ProgramWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        spec: ProgramSpec,
        ledger: Arc<dyn LedgerSource>,
        sink: Arc<dyn Sink>,
        cache: Arc<dyn DedupCache>,
        decoder: Arc<dyn TransactionDecoder>,
        events: mpsc::Sender<WorkerEvent>,
        settings: WorkerSettings,
        cancellation_token: CancellationToken,
    ) -> Self {
        let program_id = spec.program_id.to_string();
        Self {
            spec,
            program_id,
            ledger,
            sink,
            cache,
            decoder,
            events,
            settings,
            cancellation_token,
            checkpoint_height: 0,
            checkpoint_signature: None,
            started_at: Instant::now(),
        }
    }

    #[must_use]
    pub fn program_name(&self) -> &str {
        &self.spec.name
    }

    /// Height of the last checkpoint this worker persisted or loaded.
    #[must_use]
    pub fn checkpoint_height(&self) -> u64 {
        self.checkpoint_height
    }

    /// Runs the whole lifecycle until cancelled.
    ///
    /// A startup failure is reported as [`WorkerEvent::Fatal`] and ends only
    /// this worker.
    pub async fn run(mut self) {
        let mut subscription = match self.start().await {
            Ok(subscription) => subscription,
            Err(e) => {
                log_error(&format!("{} worker failed to start", self.spec.name), &e.to_string());
                if let Err(status_err) = self.sink.set_status(&self.program_id, WorkerStatus::Failed).await {
                    log_error("Failed to record worker status", &status_err.to_string());
                }
                self.emit(WorkerEvent::Fatal {
                    program: self.spec.name.clone(),
                    error: e.to_string(),
                })
                .await;
                return;
            }
        };

        self.run_live(&mut subscription).await;
        self.stop(subscription).await;
    }

    /// Loads the checkpoint, opens the live subscription, then walks the
    /// history up to the head.
    ///
    /// The subscription is opened first so anything landing during the walk
    /// is buffered on the feed instead of falling between the two.
    ///
    /// # Errors
    ///
    /// Fails when the checkpoint cannot be loaded or the subscription cannot
    /// be opened. A backfill failure is not an error; the worker still goes
    /// live and the next walk retries from the same checkpoint.
    pub async fn start(&mut self) -> Result<LogSubscription> {
        self.started_at = Instant::now();
        let checkpoint = self
            .sink
            .load_checkpoint(&self.program_id, &self.spec.name)
            .await?;
        self.checkpoint_height = checkpoint.last_processed_height;
        self.checkpoint_signature = checkpoint.last_processed_signature;

        logging::log_startup(&self.spec.name, &self.program_id, self.checkpoint_height);

        self.sink
            .set_status(&self.program_id, WorkerStatus::Backfilling)
            .await?;
        let subscription = self
            .ledger
            .subscribe_logs(&self.spec.program_id, self.settings.live_buffer)
            .await?;

        let report = self.backfill().await;
        tracing::info!(
            program = %self.spec.name,
            collected = report.collected,
            processed = report.processed,
            failed = report.failed,
            aborted = report.aborted,
            checkpoint_height = self.checkpoint_height,
            "Backfill finished"
        );

        self.sink.set_status(&self.program_id, WorkerStatus::Live).await?;
        self.emit(WorkerEvent::Ready {
            program: self.spec.name.clone(),
            checkpoint_height: self.checkpoint_height,
        })
        .await;

        Ok(subscription)
    }

    /// Replays every signature newer than the checkpoint, oldest first,
    /// advancing the checkpoint up to the first failure.
    pub async fn backfill(&mut self) -> BackfillReport {
        let started = Instant::now();
        let engine = BackfillEngine::new(
            self.ledger.clone(),
            self.spec.program_id,
            self.settings.page_size,
            self.cancellation_token.clone(),
        );

        let pending = match engine
            .collect(self.checkpoint_height, self.checkpoint_signature.as_deref())
            .await
        {
            Ok(pending) => pending,
            Err(e) => {
                log_error(
                    &format!("{} backfill aborted while listing signatures", self.spec.name),
                    &e.to_string(),
                );
                return BackfillReport {
                    aborted: true,
                    ..BackfillReport::default()
                };
            }
        };

        let mut report = BackfillReport {
            collected: pending.len(),
            ..BackfillReport::default()
        };

        let mut cursor = Cursor::Advance;
        for info in pending {
            if self.cancellation_token.is_cancelled() {
                report.aborted = true;
                break;
            }
            let outcome = self
                .process_signature(&info.signature, Some(info.slot), info.err.as_deref(), cursor)
                .await;
            if let ProcessOutcome::Failed(_) = outcome {
                report.failed += 1;
                cursor = Cursor::Hold;
            } else {
                report.processed += 1;
            }
        }

        logging::log_batch(
            &self.spec.name,
            report.processed,
            report.collected,
            u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        );
        report
    }

    /// Processes live notifications until cancelled or the feed ends,
    /// walking the history again after every resync and on the catch-up
    /// interval.
    pub async fn run_live(&mut self, subscription: &mut LogSubscription) {
        let period = self.settings.stats_interval;
        let mut stats = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        let period = self.settings.catchup_interval;
        let mut catchup = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        catchup.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut resyncs = subscription.resyncs();
        let token = self.cancellation_token.clone();

        loop {
            tokio::select! {
                biased;
                () = token.cancelled() => break,
                () = resync_signal(&mut resyncs) => {
                    logging::log(
                        LogLevel::Info,
                        &format!("{} live feed resynced, catching up", self.spec.name),
                    );
                    self.catch_up().await;
                }
                _ = catchup.tick() => self.catch_up().await,
                _ = stats.tick() => {
                    self.emit(WorkerEvent::Stats {
                        program: self.spec.name.clone(),
                        checkpoint_height: self.checkpoint_height,
                        uptime: self.started_at.elapsed(),
                    })
                    .await;
                }
                notification = subscription.recv() => {
                    let Some(notification) = notification else {
                        logging::log(
                            LogLevel::Warning,
                            &format!("{} live feed ended", self.spec.name),
                        );
                        break;
                    };
                    self.process_signature(
                        &notification.signature,
                        Some(notification.slot),
                        notification.err.as_deref(),
                        Cursor::Hold,
                    )
                    .await;
                }
            }
        }
    }

    async fn catch_up(&mut self) {
        let report = self.backfill().await;
        if report.collected > 0 || report.aborted {
            tracing::debug!(
                program = %self.spec.name,
                collected = report.collected,
                failed = report.failed,
                aborted = report.aborted,
                checkpoint_height = self.checkpoint_height,
                "Catch-up walk finished"
            );
        }
    }

    /// Unsubscribes and records the stopped status. Any in-flight
    /// transaction has already completed when this runs.
    pub async fn stop(&mut self, subscription: LogSubscription) {
        subscription.unsubscribe().await;
        if let Err(e) = self
            .sink
            .set_status(&self.program_id, WorkerStatus::Stopped)
            .await
        {
            log_error("Failed to record worker status", &e.to_string());
        }
        logging::log(LogLevel::Info, &format!("{} worker stopped", self.spec.name));
        self.emit(WorkerEvent::Stopped {
            program: self.spec.name.clone(),
        })
        .await;
    }

    /// Dedup, fetch, decode, persist, then remember the signature.
    ///
    /// Used for signatures learned outside a history walk, so the records
    /// are persisted but the checkpoint is left for the next walk.
    pub async fn process_transaction(&mut self, signature: &str) -> ProcessOutcome {
        self.process_signature(signature, None, None, Cursor::Hold).await
    }

    async fn process_signature(
        &mut self,
        signature: &str,
        slot_hint: Option<u64>,
        ledger_err: Option<&str>,
        cursor: Cursor,
    ) -> ProcessOutcome {
        if self.seen(signature).await {
            // already indexed; a walk still moves the checkpoint over it
            if let (Cursor::Advance, Some(slot)) = (cursor, slot_hint) {
                if let Err(e) = self.persist(signature, slot, &[], cursor).await {
                    return self.fail(signature, &e, None).await;
                }
            }
            return self.skipped(signature, SkipReason::Duplicate).await;
        }

        if let (Some(err), Some(slot)) = (ledger_err, slot_hint) {
            tracing::debug!(program = %self.spec.name, signature, error = err, "Skipping failed transaction");
            return match self.persist(signature, slot, &[], cursor).await {
                Ok(()) => {
                    self.remember(signature).await;
                    self.skipped(signature, SkipReason::FailedOnChain).await
                }
                Err(e) => self.fail(signature, &e, None).await,
            };
        }

        let transaction = match self.ledger.fetch_transaction(signature).await {
            Ok(Some(tx)) => tx,
            Ok(None) => {
                let err = IndexerError::TransactionNotFound(signature.to_string());
                logging::log(
                    LogLevel::Warning,
                    &format!("{}: {err}", self.spec.name),
                );
                return self.fail(signature, &err, None).await;
            }
            Err(e) => return self.fail(signature, &e, None).await,
        };

        let records = self.decoder.decode(&transaction);
        if let Err(e) = self.persist(signature, transaction.slot, &records, cursor).await {
            return self.fail(signature, &e, Some(&transaction)).await;
        }
        self.remember(signature).await;

        log_transaction(&self.spec.name, signature, transaction.slot, records.len());
        self.emit(WorkerEvent::Processed {
            program: self.spec.name.clone(),
            signature: signature.to_string(),
            slot: transaction.slot,
            records: records.len(),
        })
        .await;

        ProcessOutcome::Processed {
            slot: transaction.slot,
            records: records.len(),
        }
    }

    async fn persist(
        &mut self,
        signature: &str,
        slot: u64,
        records: &[DomainRecord],
        cursor: Cursor,
    ) -> Result<()> {
        let cursor = (cursor == Cursor::Advance).then(|| CheckpointCursor {
            height: slot,
            signature: signature.to_string(),
        });
        if records.is_empty() && cursor.is_none() {
            return Ok(());
        }
        self.sink
            .persist(&self.program_id, records, cursor.as_ref())
            .await?;
        // mirrors the sink's guard: same height moves to the later signature
        if cursor.is_some() && slot >= self.checkpoint_height {
            self.checkpoint_height = slot;
            self.checkpoint_signature = Some(signature.to_string());
        }
        Ok(())
    }

    async fn seen(&self, signature: &str) -> bool {
        match self.cache.contains(&self.program_id, signature).await {
            Ok(hit) => hit,
            Err(e) => {
                log_error("Dedup cache lookup failed", &e.to_string());
                false
            }
        }
    }

    async fn remember(&self, signature: &str) {
        if let Err(e) = self.cache.insert(&self.program_id, signature).await {
            log_error("Dedup cache insert failed", &e.to_string());
        }
    }

    async fn skipped(&self, signature: &str, reason: SkipReason) -> ProcessOutcome {
        self.emit(WorkerEvent::Skipped {
            program: self.spec.name.clone(),
            signature: signature.to_string(),
            reason,
        })
        .await;
        ProcessOutcome::Skipped(reason)
    }

    async fn fail(
        &mut self,
        signature: &str,
        error: &IndexerError,
        transaction: Option<&RawTransaction>,
    ) -> ProcessOutcome {
        let message = error.to_string();
        log_error(&format!("{} failed on {signature}", self.spec.name), &message);

        let entry = ErrorLogEntry {
            signature: signature.to_string(),
            program_id: self.program_id.clone(),
            message: format!("{}: {message}", error.kind()),
            raw_payload: transaction.map(RawTransaction::to_payload),
        };
        if let Err(e) = self.sink.record_error(&entry).await {
            log_error("Failed to write error_log row", &e.to_string());
        }

        self.emit(WorkerEvent::Failed {
            program: self.spec.name.clone(),
            signature: signature.to_string(),
            error: message.clone(),
        })
        .await;
        ProcessOutcome::Failed(message)
    }

    async fn emit(&self, event: WorkerEvent) {
        // the supervisor may already be gone during shutdown
        let _ = self.events.send(event).await;
    }
}

/// Resolves on the next resync; never resolves for feeds without one.
async fn resync_signal(resyncs: &mut Option<watch::Receiver<u64>>) {
    if let Some(rx) = resyncs {
        if rx.changed().await.is_ok() {
            return;
        }
    }
    *resyncs = None;
    std::future::pending::<()>().await;
}
