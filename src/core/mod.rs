pub mod backfill;
pub mod decoder;
pub mod execution;
pub mod supervisor;

pub use backfill::BackfillEngine;
pub use execution::{ProgramWorker, RpcLedger};
pub use supervisor::{Supervisor, WorkerCounters};
