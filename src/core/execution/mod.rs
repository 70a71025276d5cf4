pub mod fetcher;
pub mod worker;

pub use fetcher::RpcLedger;
pub use worker::{BackfillReport, ProcessOutcome, ProgramWorker, WorkerSettings};
