//! Relational sink and checkpoint store.
//!
//! Workers write through the [`Sink`] trait: domain records and the checkpoint
//! cursor that protects them are persisted in one database transaction, so a
//! crash can never leave a checkpoint ahead of its records.

pub mod postgres;
mod schema;

pub use postgres::PostgresSink;

use crate::types::records::DomainRecord;
use crate::utils::error::{IndexerError, Result};
use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;

/// Lifecycle state of a program worker, stored with its checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerStatus {
    #[default]
    Starting,
    Backfilling,
    Live,
    Stopped,
    Failed,
}

impl WorkerStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            WorkerStatus::Starting => "starting",
            WorkerStatus::Backfilling => "backfilling",
            WorkerStatus::Live => "live",
            WorkerStatus::Stopped => "stopped",
            WorkerStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkerStatus {
    type Err = IndexerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "starting" => Ok(WorkerStatus::Starting),
            "backfilling" => Ok(WorkerStatus::Backfilling),
            "live" => Ok(WorkerStatus::Live),
            "stopped" => Ok(WorkerStatus::Stopped),
            "failed" => Ok(WorkerStatus::Failed),
            other => Err(IndexerError::DecodingError(format!(
                "Unknown worker status '{other}'"
            ))),
        }
    }
}

/// Durable per-program cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramCheckpoint {
    pub program_id: String,
    pub program_name: String,
    /// Never decreases.
    pub last_processed_height: u64,
    pub last_processed_signature: Option<String>,
    pub status: WorkerStatus,
}

impl ProgramCheckpoint {
    /// Zero-valued checkpoint created the first time a program is indexed.
    #[must_use]
    pub fn initial(program_id: impl Into<String>, program_name: impl Into<String>) -> Self {
        Self {
            program_id: program_id.into(),
            program_name: program_name.into(),
            last_processed_height: 0,
            last_processed_signature: None,
            status: WorkerStatus::Starting,
        }
    }
}

/// Position to advance the checkpoint to, written with the records it covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointCursor {
    pub height: u64,
    pub signature: String,
}

/// A transaction that could not be indexed.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorLogEntry {
    pub signature: String,
    pub program_id: String,
    pub message: String,
    /// The fetched transaction, when the failure happened after the fetch.
    pub raw_payload: Option<serde_json::Value>,
}

/// Idempotent write API shared by all workers.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Creates tables and indexes if they do not exist.
    async fn initialize(&self) -> Result<()>;

    /// Returns the checkpoint for `program_id`, creating a zero-valued one if
    /// the program has never been indexed.
    async fn load_checkpoint(&self, program_id: &str, program_name: &str)
        -> Result<ProgramCheckpoint>;

    /// Writes `records` and, when `cursor` is set, advances the checkpoint, all
    /// in one transaction.
    ///
    /// Mutable entities are merged by provenance, append-only entities are
    /// inserted once per `(signature, instruction_index)`, and the checkpoint
    /// only moves forward.
    async fn persist(
        &self,
        program_id: &str,
        records: &[DomainRecord],
        cursor: Option<&CheckpointCursor>,
    ) -> Result<()>;

    async fn set_status(&self, program_id: &str, status: WorkerStatus) -> Result<()>;

    /// Appends a row to `error_log`.
    async fn record_error(&self, entry: &ErrorLogEntry) -> Result<()>;
}
