//! Messages sent from program workers to the supervisor.

use std::time::Duration;

/// Progress and health events emitted by a program worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    /// Backfill finished and the live subscription is open.
    Ready {
        program: String,
        checkpoint_height: u64,
    },
    /// A transaction was persisted.
    Processed {
        program: String,
        signature: String,
        slot: u64,
        records: usize,
    },
    /// A transaction was skipped (dedup hit or failed on chain).
    Skipped {
        program: String,
        signature: String,
        reason: SkipReason,
    },
    /// A transaction could not be indexed; an `error_log` row was written.
    Failed {
        program: String,
        signature: String,
        error: String,
    },
    /// Periodic worker heartbeat.
    Stats {
        program: String,
        checkpoint_height: u64,
        uptime: Duration,
    },
    /// The worker drained and released its resources.
    Stopped { program: String },
    /// The worker could not start and exited.
    Fatal { program: String, error: String },
}

impl WorkerEvent {
    /// Name of the program that emitted the event.
    #[must_use]
    pub fn program(&self) -> &str {
        match self {
            WorkerEvent::Ready { program, .. }
            | WorkerEvent::Processed { program, .. }
            | WorkerEvent::Skipped { program, .. }
            | WorkerEvent::Failed { program, .. }
            | WorkerEvent::Stats { program, .. }
            | WorkerEvent::Stopped { program }
            | WorkerEvent::Fatal { program, .. } => program,
        }
    }
}

/// Why a signature produced no work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Already seen within the dedup TTL.
    Duplicate,
    /// The ledger reported an execution error.
    FailedOnChain,
}
