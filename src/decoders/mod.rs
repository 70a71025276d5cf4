//! Per-program transaction decoders.
//!
//! Each program has a closed instruction enum parsed from the 8-byte Anchor
//! sighash prefix and Borsh-encoded arguments, and a decoder that projects
//! recognised instructions into [`DomainRecord`]s. Decoding is pure: the
//! worker persists whatever comes back.

pub mod energy_token;
pub mod governance;
pub mod oracle;
pub mod registry;
pub mod trading;

use crate::config::{ProgramKind, ProgramSpec};
use crate::types::records::{DomainRecord, Provenance};
use crate::types::traits::TransactionDecoder;
use crate::types::transaction::{RawInstruction, RawTransaction};
use borsh::BorshDeserialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Length of an Anchor instruction or event discriminator.
pub const DISCRIMINATOR_LEN: usize = 8;

/// Why an instruction payload produced no instruction.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("payload of {0} bytes is shorter than a discriminator")]
    MissingDiscriminator(usize),

    #[error("unknown discriminator {0:?}")]
    UnknownDiscriminator([u8; DISCRIMINATOR_LEN]),

    #[error("malformed arguments for {instruction}: {reason}")]
    MalformedArgs {
        instruction: &'static str,
        reason: String,
    },
}

/// `sha256("<namespace>:<name>")[..8]`.
#[must_use]
pub fn sighash(namespace: &str, name: &str) -> [u8; DISCRIMINATOR_LEN] {
    let digest = Sha256::digest(format!("{namespace}:{name}").as_bytes());
    let mut out = [0u8; DISCRIMINATOR_LEN];
    out.copy_from_slice(&digest[..DISCRIMINATOR_LEN]);
    out
}

/// Discriminator of the Anchor instruction `name` (snake case).
#[must_use]
pub fn instruction_discriminator(name: &str) -> [u8; DISCRIMINATOR_LEN] {
    sighash("global", name)
}

/// Discriminator of the Anchor event `name` (type name).
#[must_use]
pub fn event_discriminator(name: &str) -> [u8; DISCRIMINATOR_LEN] {
    sighash("event", name)
}

/// Instruction names and their discriminators, hashed once per process.
pub(crate) struct DiscriminatorTable {
    entries: Vec<([u8; DISCRIMINATOR_LEN], &'static str)>,
}

impl DiscriminatorTable {
    pub(crate) fn new(names: &[&'static str]) -> Self {
        Self {
            entries: names
                .iter()
                .map(|name| (instruction_discriminator(name), *name))
                .collect(),
        }
    }

    /// Splits `data` into the instruction name and its argument bytes.
    pub(crate) fn split<'a>(&self, data: &'a [u8]) -> Result<(&'static str, &'a [u8]), DecodeError> {
        if data.len() < DISCRIMINATOR_LEN {
            return Err(DecodeError::MissingDiscriminator(data.len()));
        }
        let (head, args) = data.split_at(DISCRIMINATOR_LEN);
        self.entries
            .iter()
            .find(|(d, _)| d == head)
            .map(|(_, name)| (*name, args))
            .ok_or_else(|| {
                let mut d = [0u8; DISCRIMINATOR_LEN];
                d.copy_from_slice(head);
                DecodeError::UnknownDiscriminator(d)
            })
    }
}

/// Borsh-decodes instruction arguments, tolerating trailing bytes.
pub(crate) fn args<T: BorshDeserialize>(
    instruction: &'static str,
    mut bytes: &[u8],
) -> Result<T, DecodeError> {
    T::deserialize(&mut bytes).map_err(|e| DecodeError::MalformedArgs {
        instruction,
        reason: e.to_string(),
    })
}

/// One instruction being projected, with its transaction-level context.
pub struct InstructionContext<'a> {
    pub transaction: &'a RawTransaction,
    pub instruction: &'a RawInstruction,
}

impl InstructionContext<'_> {
    /// Account at position `i` of the instruction's account list.
    #[must_use]
    pub fn account(&self, i: usize) -> Option<String> {
        self.instruction.accounts.get(i).cloned()
    }

    #[must_use]
    pub fn provenance(&self) -> Provenance {
        Provenance {
            block_height: self.transaction.slot,
            signature: self.transaction.signature.clone(),
            instruction_index: self.instruction.index,
            block_time: self.transaction.block_time,
        }
    }

    #[must_use]
    pub fn block_time(&self) -> Option<i64> {
        self.transaction.block_time
    }
}

/// Parses every instruction of `transaction` addressed to `program_id` and
/// hands the recognised ones to `project`.
///
/// Failed transactions decode to nothing. Unknown discriminators are logged at
/// warn, truncated or malformed payloads at debug.
pub(crate) fn decode_instructions<I, P, F>(
    program: &str,
    program_id: &str,
    transaction: &RawTransaction,
    parse: P,
    mut project: F,
) -> Vec<DomainRecord>
where
    P: Fn(&[u8]) -> Result<I, DecodeError>,
    F: FnMut(I, &InstructionContext<'_>) -> Vec<DomainRecord>,
{
    if transaction.err.is_some() {
        return Vec::new();
    }

    let mut records = Vec::new();
    for instruction in transaction.instructions_for(program_id) {
        match parse(&instruction.data) {
            Ok(ix) => {
                let ctx = InstructionContext {
                    transaction,
                    instruction,
                };
                records.extend(project(ix, &ctx));
            }
            Err(e @ DecodeError::UnknownDiscriminator(_)) => {
                tracing::warn!(
                    program,
                    signature = %transaction.signature,
                    instruction_index = instruction.index,
                    error = %e,
                    "Unrecognised instruction"
                );
            }
            Err(e) => {
                tracing::debug!(
                    program,
                    signature = %transaction.signature,
                    instruction_index = instruction.index,
                    error = %e,
                    "Skipping undecodable instruction"
                );
            }
        }
    }
    records
}

/// Logs an instruction whose account list is too short to project.
pub(crate) fn missing_accounts(program: &str, instruction: &str, ctx: &InstructionContext<'_>) {
    tracing::debug!(
        program,
        instruction,
        signature = %ctx.transaction.signature,
        accounts = ctx.instruction.accounts.len(),
        "Instruction is missing accounts"
    );
}

/// Builds the decoder selected by `spec.kind`.
#[must_use]
pub fn build_decoder(spec: &ProgramSpec) -> Arc<dyn TransactionDecoder> {
    let program_id = spec.program_id.to_string();
    match spec.kind {
        ProgramKind::Registry => Arc::new(registry::RegistryDecoder::new(program_id)),
        ProgramKind::Trading => Arc::new(trading::TradingDecoder::new(program_id)),
        ProgramKind::Oracle => Arc::new(oracle::OracleDecoder::new(program_id)),
        ProgramKind::Governance => Arc::new(governance::GovernanceDecoder::new(program_id)),
        ProgramKind::EnergyToken => Arc::new(energy_token::EnergyTokenDecoder::new(program_id)),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Anchor instruction data: discriminator followed by Borsh args.
    pub fn ix_data(name: &str, args: impl borsh::BorshSerialize) -> Vec<u8> {
        let mut data = instruction_discriminator(name).to_vec();
        data.extend(borsh::to_vec(&args).unwrap());
        data
    }

    pub fn account(n: u8) -> String {
        bs58::encode([n; 32]).into_string()
    }

    pub fn transaction(program_id: &str, data: Vec<u8>, accounts: Vec<String>) -> RawTransaction {
        RawTransaction {
            signature: "sig-1".to_string(),
            slot: 100,
            block_time: Some(1_700_000_000),
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
}
