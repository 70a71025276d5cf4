//! Spawns one worker per program and aggregates what they report.
//!
//! Workers never share counters; they send [`WorkerEvent`]s over a channel
//! and the supervisor folds them into per-program [`WorkerCounters`], which
//! are published on a `watch` channel for operational tooling.

use crate::cache::DedupCache;
use crate::config::{IndexerConfig, ProgramSpec};
use crate::core::execution::{ProgramWorker, WorkerSettings};
use crate::decoders::build_decoder;
use crate::storage::Sink;
use crate::types::events::WorkerEvent;
use crate::types::traits::LedgerSource;
use crate::utils::logging::{self, log_error, LogLevel};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

const EVENT_BUFFER: usize = 1024;

/// Aggregated view of one worker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerCounters {
    pub ready: bool,
    pub processed: u64,
    pub skipped: u64,
    pub errors: u64,
    pub checkpoint_height: u64,
    pub uptime: Duration,
    pub stopped: bool,
    /// Startup error that ended the worker.
    pub fatal: Option<String>,
}

impl WorkerCounters {
    /// Folds one event into the counters.
    pub fn apply(&mut self, event: &WorkerEvent) {
        match event {
            WorkerEvent::Ready {
                checkpoint_height, ..
            } => {
                self.ready = true;
                self.checkpoint_height = self.checkpoint_height.max(*checkpoint_height);
            }
            WorkerEvent::Processed { .. } => self.processed += 1,
            WorkerEvent::Skipped { .. } => self.skipped += 1,
            WorkerEvent::Failed { .. } => self.errors += 1,
            WorkerEvent::Stats {
                checkpoint_height,
                uptime,
                ..
            } => {
                self.checkpoint_height = self.checkpoint_height.max(*checkpoint_height);
                self.uptime = *uptime;
            }
            WorkerEvent::Stopped { .. } => {
                self.ready = false;
                self.stopped = true;
            }
            WorkerEvent::Fatal { error, .. } => {
                self.ready = false;
                self.fatal = Some(error.clone());
            }
        }
    }
}

/// Snapshot of every worker's counters, keyed by program name.
pub type CounterSnapshot = BTreeMap<String, WorkerCounters>;

pub struct Supervisor {
    workers: Vec<ProgramWorker>,
    settings: WorkerSettings,
    events_tx: mpsc::Sender<WorkerEvent>,
    events_rx: mpsc::Receiver<WorkerEvent>,
    counters: watch::Sender<CounterSnapshot>,
    cancellation_token: CancellationToken,
}

impl Supervisor {
    #[must_use]
    pub fn new(settings: WorkerSettings, cancellation_token: CancellationToken) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let (counters, _) = watch::channel(CounterSnapshot::new());
        Self {
            workers: Vec::new(),
            settings,
            events_tx,
            events_rx,
            counters,
            cancellation_token,
        }
    }

    /// Builds a supervisor with one worker per configured program, all sharing
    /// the same ledger, sink and dedup cache.
    #[must_use]
    pub fn from_config(
        config: &IndexerConfig,
        ledger: Arc<dyn LedgerSource>,
        sink: Arc<dyn Sink>,
        cache: Arc<dyn DedupCache>,
        cancellation_token: CancellationToken,
    ) -> Self {
        let mut supervisor = Self::new(WorkerSettings::from_config(config), cancellation_token);
        for spec in &config.programs {
            supervisor.add_program(spec.clone(), ledger.clone(), sink.clone(), cache.clone());
        }
        supervisor
    }

    /// Registers a program with the decoder its name selects.
    pub fn add_program(
        &mut self,
        spec: ProgramSpec,
        ledger: Arc<dyn LedgerSource>,
        sink: Arc<dyn Sink>,
        cache: Arc<dyn DedupCache>,
    ) {
        let decoder = build_decoder(&spec);
        self.counters.send_modify(|snapshot| {
            snapshot.entry(spec.name.clone()).or_default();
        });
        self.workers.push(ProgramWorker::new(
            spec,
            ledger,
            sink,
            cache,
            decoder,
            self.events_tx.clone(),
            self.settings.clone(),
            self.cancellation_token.child_token(),
        ));
    }

    /// Live counters, updated as events arrive.
    #[must_use]
    pub fn counters(&self) -> watch::Receiver<CounterSnapshot> {
        self.counters.subscribe()
    }

    /// Runs every worker to completion and returns the final counters.
    ///
    /// Returns once all workers have stopped, either through the cancellation
    /// token or because they failed to start.
    pub async fn run(self) -> CounterSnapshot {
        let Self {
            workers,
            settings,
            events_tx,
            mut events_rx,
            counters,
            cancellation_token: _,
        } = self;

        logging::log(
            LogLevel::Info,
            &format!("Starting {} program workers", workers.len()),
        );
        let mut tasks = JoinSet::new();
        for worker in workers {
            tasks.spawn(worker.run());
        }
        // workers hold the remaining senders; the channel closes when all exit
        drop(events_tx);

        let period = settings.stats_interval;
        let mut report = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        loop {
            tokio::select! {
                event = events_rx.recv() => {
                    let Some(event) = event else { break };
                    Self::log_event(&event);
                    counters.send_modify(|snapshot| {
                        snapshot
                            .entry(event.program().to_string())
                            .or_default()
                            .apply(&event);
                    });
                }
                _ = report.tick() => Self::log_counters(&counters.borrow()),
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                log_error("Program worker task ended abnormally", &e.to_string());
            }
        }

        let final_counters = counters.borrow().clone();
        Self::log_counters(&final_counters);
        final_counters
    }

    fn log_event(event: &WorkerEvent) {
        match event {
            WorkerEvent::Ready {
                program,
                checkpoint_height,
            } => tracing::info!(program = %program, checkpoint_height, "Worker ready"),
            WorkerEvent::Failed {
                program,
                signature,
                error,
            } => tracing::warn!(program = %program, signature = %signature, error = %error, "Transaction failed"),
            WorkerEvent::Fatal { program, error } => {
                log_error(&format!("{program} worker is down"), error);
            }
            WorkerEvent::Stopped { program } => {
                tracing::info!(program = %program, "Worker stopped");
            }
            WorkerEvent::Processed { .. } | WorkerEvent::Skipped { .. } | WorkerEvent::Stats { .. } => {}
        }
    }

    fn log_counters(snapshot: &CounterSnapshot) {
        for (program, c) in snapshot {
            tracing::info!(
                program = %program,
                ready = c.ready,
                processed = c.processed,
                skipped = c.skipped,
                errors = c.errors,
                checkpoint_height = c.checkpoint_height,
                uptime_secs = c.uptime.as_secs(),
                "Worker stats"
            );
        }
    }
}

/// Resolves on Ctrl+C or, on Unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log_error("Failed to listen for Ctrl+C", &e.to_string());
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log_error("Failed to listen for SIGTERM", &e.to_string());
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => logging::log(LogLevel::Info, "Received Ctrl+C, shutting down..."),
        () = terminate => logging::log(LogLevel::Info, "Received SIGTERM, shutting down..."),
    }
}
