//! Ledger-side data shapes shared by the sources, decoders and workers.

use serde::{Deserialize, Serialize};

/// One entry of a `listSignatures` page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureInfo {
    pub signature: String,
    /// Slot the transaction landed in.
    pub slot: u64,
    /// Execution error reported by the ledger, if the transaction failed.
    pub err: Option<String>,
    pub block_time: Option<i64>,
}

/// A live notification delivered by `subscribeLogs`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogNotification {
    pub signature: String,
    pub slot: u64,
    pub err: Option<String>,
}

/// An instruction with its program id and account keys resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawInstruction {
    /// Position in the flattened instruction list (outer, then its inner).
    pub index: u32,
    pub program_id: String,
    pub accounts: Vec<String>,
    pub data: Vec<u8>,
    /// `true` for instructions invoked through CPI.
    pub inner: bool,
}

/// A fetched transaction reduced to what the decoders consume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTransaction {
    pub signature: String,
    pub slot: u64,
    pub block_time: Option<i64>,
    pub instructions: Vec<RawInstruction>,
    pub logs: Vec<String>,
    /// Execution error, if the transaction failed on chain.
    pub err: Option<String>,
}

impl RawTransaction {
    /// Instructions addressed to `program_id`, in execution order.
    pub fn instructions_for<'a>(
        &'a self,
        program_id: &'a str,
    ) -> impl Iterator<Item = &'a RawInstruction> + 'a {
        self.instructions
            .iter()
            .filter(move |ix| ix.program_id == program_id)
    }

    /// Compact JSON rendering stored with `error_log` rows.
    #[must_use]
    pub fn to_payload(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
