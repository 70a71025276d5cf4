//! Transaction normalisation for `energy-indexer`.
//!
//! Turns the RPC's encoded transaction into a [`RawTransaction`] (program ids
//! and account keys resolved, instruction data base58-decoded, CPI calls
//! flattened after their parent) and parses log messages into
//! program-attributed events.

use crate::types::transaction::{RawInstruction, RawTransaction};
use crate::utils::error::{IndexerError, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use solana_transaction_status::option_serializer::OptionSerializer;
use solana_transaction_status::{
    EncodedConfirmedTransactionWithStatusMeta, EncodedTransaction, UiCompiledInstruction,
    UiInstruction, UiMessage, UiParsedInstruction,
};

/// Kind of a parsed log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    ProgramInvoke,
    ProgramData,
    ProgramLog,
}

/// A log line attributed to the program that emitted it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedEvent {
    pub event_type: EventType,
    pub program_id: Option<String>,
    pub data: Option<String>,
}

/// Stateless transaction decoder.
#[derive(Debug, Default, Clone, Copy)]
pub struct Decoder;

impl Decoder {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Parses event logs from a transaction.
    ///
    /// Maintains a program stack so `Program data:` and `Program log:` lines
    /// are attributed to the program executing at that depth.
    #[must_use]
    pub fn parse_event_logs(&self, logs: &[String]) -> Vec<ParsedEvent> {
        let mut events = Vec::new();
        let mut program_stack: Vec<String> = Vec::new();

        for log in logs {
            if log.contains(" invoke [") {
                if let Some(program_id) = Self::extract_program_id(log) {
                    program_stack.push(program_id.clone());
                    events.push(ParsedEvent {
                        event_type: EventType::ProgramInvoke,
                        program_id: Some(program_id),
                        data: None,
                    });
                }
                continue;
            }

            if log.ends_with(" success") || log.contains(" failed") {
                if Self::extract_program_id(log).is_some() {
                    program_stack.pop();
                }
                continue;
            }

            if let Some(stripped) = log.strip_prefix("Program data: ") {
                events.push(ParsedEvent {
                    event_type: EventType::ProgramData,
                    program_id: program_stack.last().cloned(),
                    data: Some(stripped.to_string()),
                });
                continue;
            }

            if let Some(stripped) = log.strip_prefix("Program log: ") {
                events.push(ParsedEvent {
                    event_type: EventType::ProgramLog,
                    program_id: program_stack.last().cloned(),
                    data: Some(stripped.to_string()),
                });
            }
        }

        events
    }

    /// Base64-decoded `Program data:` payloads emitted by `program_id`.
    ///
    /// Lines that are not valid base64 are dropped.
    #[must_use]
    pub fn program_data(&self, logs: &[String], program_id: &str) -> Vec<Vec<u8>> {
        self.parse_event_logs(logs)
            .into_iter()
            .filter(|e| {
                e.event_type == EventType::ProgramData && e.program_id.as_deref() == Some(program_id)
            })
            .filter_map(|e| e.data.and_then(|d| BASE64.decode(d.trim()).ok()))
            .collect()
    }

    /// Extracts the program id from `Program <id> invoke [n]` / `Program <id> success`.
    fn extract_program_id(log: &str) -> Option<String> {
        let mut parts = log.split_whitespace();
        match (parts.next(), parts.next()) {
            (Some("Program"), Some(id)) if bs58::decode(id).into_vec().is_ok_and(|b| b.len() == 32) => {
                Some(id.to_string())
            }
            _ => None,
        }
    }

    /// Normalises an RPC transaction.
    ///
    /// # Errors
    ///
    /// Returns `IndexerError::DecodingError` if the transaction is not JSON
    /// encoded, has no signature, or references an account index that does
    /// not exist.
    pub fn decode_transaction(
        &self,
        transaction: &EncodedConfirmedTransactionWithStatusMeta,
    ) -> Result<RawTransaction> {
        let EncodedTransaction::Json(ui_tx) = &transaction.transaction.transaction else {
            return Err(IndexerError::DecodingError(
                "Transaction is not JSON encoded".to_string(),
            ));
        };

        let signature = ui_tx.signatures.first().cloned().ok_or_else(|| {
            IndexerError::DecodingError("Transaction has no signatures".to_string())
        })?;

        let meta = transaction.transaction.meta.as_ref();

        let logs = match meta.map(|m| &m.log_messages) {
            Some(OptionSerializer::Some(logs)) => logs.clone(),
            _ => Vec::new(),
        };

        let err = meta.and_then(|m| m.err.as_ref()).map(|e| format!("{e:?}"));

        let inner_sets = match meta.map(|m| &m.inner_instructions) {
            Some(OptionSerializer::Some(sets)) => sets.as_slice(),
            _ => &[],
        };

        let mut instructions = Vec::new();
        let mut next_index = 0u32;

        match &ui_tx.message {
            UiMessage::Raw(raw) => {
                let mut keys = raw.account_keys.clone();
                if let Some(OptionSerializer::Some(loaded)) = meta.map(|m| &m.loaded_addresses) {
                    keys.extend(loaded.writable.iter().cloned());
                    keys.extend(loaded.readonly.iter().cloned());
                }

                for (outer_pos, compiled) in raw.instructions.iter().enumerate() {
                    instructions.push(Self::resolve_compiled(compiled, &keys, next_index, false)?);
                    next_index += 1;

                    for set in inner_sets.iter().filter(|s| usize::from(s.index) == outer_pos) {
                        for inner in &set.instructions {
                            if let Some(ix) = Self::resolve_ui(inner, &keys, next_index, true)? {
                                instructions.push(ix);
                                next_index += 1;
                            }
                        }
                    }
                }
            }
            UiMessage::Parsed(parsed) => {
                let keys: Vec<String> = parsed
                    .account_keys
                    .iter()
                    .map(|k| k.pubkey.clone())
                    .collect();

                for (outer_pos, ui_ix) in parsed.instructions.iter().enumerate() {
                    if let Some(ix) = Self::resolve_ui(ui_ix, &keys, next_index, false)? {
                        instructions.push(ix);
                        next_index += 1;
                    }
                    for set in inner_sets.iter().filter(|s| usize::from(s.index) == outer_pos) {
                        for inner in &set.instructions {
                            if let Some(ix) = Self::resolve_ui(inner, &keys, next_index, true)? {
                                instructions.push(ix);
                                next_index += 1;
                            }
                        }
                    }
                }
            }
        }

        Ok(RawTransaction {
            signature,
            slot: transaction.slot,
            block_time: transaction.block_time,
            instructions,
            logs,
            err,
        })
    }

    fn resolve_ui(
        instruction: &UiInstruction,
        keys: &[String],
        index: u32,
        inner: bool,
    ) -> Result<Option<RawInstruction>> {
        match instruction {
            UiInstruction::Compiled(compiled) => {
                Self::resolve_compiled(compiled, keys, index, inner).map(Some)
            }
            UiInstruction::Parsed(UiParsedInstruction::PartiallyDecoded(partial)) => {
                Ok(Some(RawInstruction {
                    index,
                    program_id: partial.program_id.clone(),
                    accounts: partial.accounts.clone(),
                    data: bs58::decode(&partial.data).into_vec().unwrap_or_default(),
                    inner,
                }))
            }
            // fully parsed instructions belong to native programs
            UiInstruction::Parsed(UiParsedInstruction::Parsed(_)) => Ok(None),
        }
    }

    fn resolve_compiled(
        compiled: &UiCompiledInstruction,
        keys: &[String],
        index: u32,
        inner: bool,
    ) -> Result<RawInstruction> {
        let key = |i: usize| {
            keys.get(i).cloned().ok_or_else(|| {
                IndexerError::DecodingError(format!("Invalid account index: {i}"))
            })
        };

        Ok(RawInstruction {
            index,
            program_id: key(usize::from(compiled.program_id_index))?,
            accounts: compiled
                .accounts
                .iter()
                .map(|a| key(usize::from(*a)))
                .collect::<Result<Vec<_>>>()?,
            data: bs58::decode(&compiled.data).into_vec().unwrap_or_default(),
            inner,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const PROGRAM: &str = "GTuRUUwCfvmqW7knqQtzQLMCy61p4UKUrdT5ssVgZbat";
    const TOKEN: &str = "8jTDw36yCQyYdr9hTtve5D5bFuQdaJ6f3WbdM4iGPHuq";

    fn encoded(value: serde_json::Value) -> EncodedConfirmedTransactionWithStatusMeta {
        serde_json::from_value(value).expect("fixture must deserialize")
    }

    fn fixture(err: serde_json::Value) -> EncodedConfirmedTransactionWithStatusMeta {
        encoded(json!({
            "slot": 42,
            "blockTime": 1_700_000_000,
            "transaction": {
                "signatures": ["5h6xBEauJ3PK6rJ9pG4Q8Xc6rJ9pG4Q8Xc6rJ9pG4Q8Xc6rJ9pG4Q8Xc6rJ9pG4Q8Xc6rJ9pG4Q8Xc"],
                "message": {
                    "header": {
                        "numRequiredSignatures": 1,
                        "numReadonlySignedAccounts": 0,
                        "numReadonlyUnsignedAccounts": 2
                    },
                    "accountKeys": [
                        "4Nd1mBQtrMJVYVfKf2PJy9NZUZdTAsp7D4xWLs4gDB4T",
                        "9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin",
                        PROGRAM,
                        TOKEN
                    ],
                    "recentBlockhash": "11111111111111111111111111111111",
                    "instructions": [
                        { "programIdIndex": 2, "accounts": [1, 0], "data": "3Bxs4h24hBtQy9rw", "stackHeight": null }
                    ]
                }
            },
            "meta": {
                "err": err,
                "status": { "Ok": null },
                "fee": 5000,
                "preBalances": [10, 0, 1, 1],
                "postBalances": [5, 0, 1, 1],
                "innerInstructions": [
                    { "index": 0, "instructions": [
                        { "programIdIndex": 3, "accounts": [0], "data": "2", "stackHeight": 2 }
                    ] }
                ],
                "logMessages": [
                    format!("Program {PROGRAM} invoke [1]"),
                    "Program log: Instruction: MatchOrders",
                    format!("Program {TOKEN} invoke [2]"),
                    "Program data: AQID",
                    format!("Program {TOKEN} success"),
                    "Program data: BAUG",
                    format!("Program {PROGRAM} success")
                ],
                "preTokenBalances": [],
                "postTokenBalances": [],
                "rewards": []
            }
        }))
    }

    #[test]
    fn test_decode_transaction_flattens_inner_instructions() -> Result<()> {
        let raw = Decoder::new().decode_transaction(&fixture(serde_json::Value::Null))?;

        assert_eq!(raw.slot, 42);
        assert_eq!(raw.block_time, Some(1_700_000_000));
        assert!(raw.err.is_none());
        assert_eq!(raw.instructions.len(), 2);

        let outer = &raw.instructions[0];
        assert_eq!(outer.index, 0);
        assert_eq!(outer.program_id, PROGRAM);
        assert!(!outer.inner);
        assert_eq!(
            outer.accounts,
            vec![
                "9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin".to_string(),
                "4Nd1mBQtrMJVYVfKf2PJy9NZUZdTAsp7D4xWLs4gDB4T".to_string()
            ]
        );
        assert_eq!(outer.data, bs58::decode("3Bxs4h24hBtQy9rw").into_vec().unwrap());

        let inner = &raw.instructions[1];
        assert_eq!(inner.index, 1);
        assert_eq!(inner.program_id, TOKEN);
        assert!(inner.inner);
        Ok(())
    }

    #[test]
    fn test_decode_transaction_keeps_execution_error() -> Result<()> {
        let raw = Decoder::new()
            .decode_transaction(&fixture(json!({ "InstructionError": [0, { "Custom": 6001 }] })))?;
        assert!(raw.err.is_some());
        Ok(())
    }

    #[test]
    fn test_program_data_attributed_by_stack() {
        let raw = Decoder::new()
            .decode_transaction(&fixture(serde_json::Value::Null))
            .unwrap();
        let decoder = Decoder::new();

        assert_eq!(decoder.program_data(&raw.logs, PROGRAM), vec![vec![4, 5, 6]]);
        assert_eq!(decoder.program_data(&raw.logs, TOKEN), vec![vec![1, 2, 3]]);
    }

    #[test]
    fn test_parse_event_logs() {
        let logs = vec![
            "Program 11111111111111111111111111111111 invoke [1]".to_string(),
            "Program log: Instruction: Transfer".to_string(),
            "Program data: SGVsbG8gV29ybGQ=".to_string(),
            "Program 11111111111111111111111111111111 success".to_string(),
        ];

        let events = Decoder::new().parse_event_logs(&logs);
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].event_type, EventType::ProgramInvoke);
        assert_eq!(events[2].event_type, EventType::ProgramData);
        assert_eq!(
            events[2].program_id.as_deref(),
            Some("11111111111111111111111111111111")
        );
    }

    #[test]
    fn test_invalid_account_index_is_an_error() {
        let mut tx = fixture(serde_json::Value::Null);
        if let EncodedTransaction::Json(ui) = &mut tx.transaction.transaction {
            if let UiMessage::Raw(raw) = &mut ui.message {
                raw.instructions[0].program_id_index = 9;
            }
        }
        assert!(matches!(
            Decoder::new().decode_transaction(&tx),
            Err(IndexerError::DecodingError(_))
        ));
    }
}
