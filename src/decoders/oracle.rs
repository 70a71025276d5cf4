//! Price oracle: gateway-submitted meter readings and market clearing triggers.

use super::{args, decode_instructions, missing_accounts, DecodeError, DiscriminatorTable, InstructionContext};
use crate::types::records::{DomainRecord, MarketSnapshotRecord, MeterReadingRecord, ReadingSource};
use crate::types::traits::TransactionDecoder;
use crate::types::transaction::RawTransaction;
use std::sync::OnceLock;

const PROGRAM: &str = "oracle";

const INSTRUCTIONS: &[&str] = &[
    "initialize",
    "submit_meter_reading",
    "trigger_market_clearing",
    "update_oracle_status",
    "update_api_gateway",
    "update_validation_config",
    "add_backup_oracle",
    "remove_backup_oracle",
];

fn table() -> &'static DiscriminatorTable {
    static TABLE: OnceLock<DiscriminatorTable> = OnceLock::new();
    TABLE.get_or_init(|| DiscriminatorTable::new(INSTRUCTIONS))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OracleInstruction {
    SubmitMeterReading {
        meter_id: String,
        energy_produced: u64,
        energy_consumed: u64,
        reading_timestamp: i64,
    },
    TriggerMarketClearing,
    /// Configuration instructions; recognised, never projected.
    Admin(&'static str),
}

impl OracleInstruction {
    /// Parses raw instruction data.
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] for unknown discriminators and malformed arguments.
    pub fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        let (name, rest) = table().split(data)?;
        Ok(match name {
            "submit_meter_reading" => {
                let (meter_id, energy_produced, energy_consumed, reading_timestamp) =
                    args(name, rest)?;
                Self::SubmitMeterReading {
                    meter_id,
                    energy_produced,
                    energy_consumed,
                    reading_timestamp,
                }
            }
            "trigger_market_clearing" => Self::TriggerMarketClearing,
            admin => Self::Admin(admin),
        })
    }
}

pub struct OracleDecoder {
    program_id: String,
}

impl OracleDecoder {
    #[must_use]
    pub fn new(program_id: impl Into<String>) -> Self {
        Self {
            program_id: program_id.into(),
        }
    }

    fn project(ix: OracleInstruction, ctx: &InstructionContext<'_>) -> Vec<DomainRecord> {
        match ix {
            OracleInstruction::SubmitMeterReading {
                meter_id,
                energy_produced,
                energy_consumed,
                reading_timestamp,
            } => vec![DomainRecord::MeterReading(MeterReadingRecord {
                meter_address: None,
                meter_id: Some(meter_id),
                source: ReadingSource::Oracle,
                energy_generated: energy_produced,
                energy_consumed,
                reading_timestamp,
                provenance: ctx.provenance(),
            })],
            OracleInstruction::TriggerMarketClearing => match ctx.account(0) {
                // account 0 is the oracle data account, not a trading market
                Some(oracle) => vec![DomainRecord::MarketSnapshot(MarketSnapshotRecord {
                    market: None,
                    source_account: oracle,
                    supply: None,
                    demand: None,
                    congestion_factor: None,
                    last_trade_price: None,
                    taken_at: ctx.block_time(),
                    provenance: ctx.provenance(),
                })],
                None => {
                    missing_accounts(PROGRAM, "trigger_market_clearing", ctx);
                    Vec::new()
                }
            },
            OracleInstruction::Admin(_) => Vec::new(),
        }
    }
}

impl TransactionDecoder for OracleDecoder {
    fn program_id(&self) -> &str {
        &self.program_id
    }

    fn decode(&self, transaction: &RawTransaction) -> Vec<DomainRecord> {
        decode_instructions(
            PROGRAM,
            &self.program_id,
            transaction,
            OracleInstruction::parse,
            Self::project,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoders::test_support::{account, ix_data, transaction};

    const PROGRAM_ID: &str = "ACeKwdMK1sma3EPnxy7bvgC5yMwy8tg7ZUJvaogC9YfR";

    #[test]
    fn test_submit_meter_reading_keys_by_meter_id() {
        let data = ix_data(
            "submit_meter_reading",
            ("AMI-42".to_string(), 900u64, 300u64, 1_700_000_000i64),
        );
        let tx = transaction(PROGRAM_ID, data, vec![account(1), account(2)]);

        let records = OracleDecoder::new(PROGRAM_ID).decode(&tx);
        let DomainRecord::MeterReading(reading) = &records[0] else {
            panic!("expected reading");
        };
        assert_eq!(reading.meter_id.as_deref(), Some("AMI-42"));
        assert_eq!(reading.meter_address, None);
        assert_eq!(reading.source, ReadingSource::Oracle);
        assert_eq!(reading.energy_generated, 900);
    }

    #[test]
    fn test_market_clearing_snapshot_names_oracle_account() {
        let tx = transaction(
            PROGRAM_ID,
            ix_data("trigger_market_clearing", ()),
            vec![account(1), account(2)],
        );

        let records = OracleDecoder::new(PROGRAM_ID).decode(&tx);
        let DomainRecord::MarketSnapshot(snapshot) = &records[0] else {
            panic!("expected snapshot");
        };
        assert_eq!(snapshot.market, None);
        assert_eq!(snapshot.source_account, account(1));
        assert_eq!(snapshot.taken_at, Some(1_700_000_000));
    }

    #[test]
    fn test_config_updates_are_not_projected() {
        let tx = transaction(
            PROGRAM_ID,
            ix_data("update_oracle_status", true),
            vec![account(1), account(2)],
        );
        assert_eq!(
            OracleInstruction::parse(&tx.instructions[0].data),
            Ok(OracleInstruction::Admin("update_oracle_status"))
        );
        assert!(OracleDecoder::new(PROGRAM_ID).decode(&tx).is_empty());
    }

    #[test]
    fn test_string_length_past_payload_is_rejected() {
        let mut data = crate::decoders::instruction_discriminator("submit_meter_reading").to_vec();
        data.extend(500u32.to_le_bytes());
        data.extend(b"short");
        let tx = transaction(PROGRAM_ID, data, vec![account(1)]);
        assert!(OracleDecoder::new(PROGRAM_ID).decode(&tx).is_empty());
    }
}
