//! Identity registry: participants, meters and registry-attested readings.

use super::{args, decode_instructions, missing_accounts, DecodeError, DiscriminatorTable, InstructionContext};
use crate::types::records::{
    DomainRecord, IdentityRecord, MeterReadingRecord, MeterRecord, MeterStatus, MeterType,
    ReadingSource, UserStatus, UserType,
};
use crate::types::traits::TransactionDecoder;
use crate::types::transaction::RawTransaction;
use std::sync::OnceLock;

const PROGRAM: &str = "registry";

const INSTRUCTIONS: &[&str] = &[
    "initialize",
    "set_oracle_authority",
    "register_user",
    "update_user_status",
    "register_meter",
    "update_meter_reading",
    "set_meter_status",
    "deactivate_meter",
    "settle_meter_balance",
    "settle_and_mint_tokens",
    "is_valid_user",
    "is_valid_meter",
    "get_unsettled_balance",
];

fn table() -> &'static DiscriminatorTable {
    static TABLE: OnceLock<DiscriminatorTable> = OnceLock::new();
    TABLE.get_or_init(|| DiscriminatorTable::new(INSTRUCTIONS))
}

/// Instructions of the registry program.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryInstruction {
    Initialize,
    SetOracleAuthority,
    RegisterUser {
        user_type: UserType,
        latitude: f64,
        longitude: f64,
    },
    UpdateUserStatus {
        status: UserStatus,
    },
    RegisterMeter {
        meter_id: String,
        meter_type: MeterType,
    },
    UpdateMeterReading {
        energy_generated: u64,
        energy_consumed: u64,
        reading_timestamp: i64,
    },
    SetMeterStatus {
        status: MeterStatus,
    },
    DeactivateMeter,
    SettleMeterBalance,
    SettleAndMintTokens,
    /// Read-only checks; they change no account.
    View(&'static str),
}

fn variant<T>(instruction: &'static str, value: Option<T>, index: u8) -> Result<T, DecodeError> {
    value.ok_or_else(|| DecodeError::MalformedArgs {
        instruction,
        reason: format!("enum index {index} out of range"),
    })
}

impl RegistryInstruction {
    /// Snake-case instruction name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Initialize => "initialize",
            Self::SetOracleAuthority => "set_oracle_authority",
            Self::RegisterUser { .. } => "register_user",
            Self::UpdateUserStatus { .. } => "update_user_status",
            Self::RegisterMeter { .. } => "register_meter",
            Self::UpdateMeterReading { .. } => "update_meter_reading",
            Self::SetMeterStatus { .. } => "set_meter_status",
            Self::DeactivateMeter => "deactivate_meter",
            Self::SettleMeterBalance => "settle_meter_balance",
            Self::SettleAndMintTokens => "settle_and_mint_tokens",
            Self::View(name) => *name,
        }
    }

    /// Parses raw instruction data.
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] for unknown discriminators and malformed arguments.
    pub fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        let (name, rest) = table().split(data)?;
        Ok(match name {
            "initialize" => Self::Initialize,
            "set_oracle_authority" => Self::SetOracleAuthority,
            "register_user" => {
                let (user_type, latitude, longitude): (u8, f64, f64) = args(name, rest)?;
                Self::RegisterUser {
                    user_type: variant(name, UserType::from_index(user_type), user_type)?,
                    latitude,
                    longitude,
                }
            }
            "update_user_status" => {
                let status: u8 = args(name, rest)?;
                Self::UpdateUserStatus {
                    status: variant(name, UserStatus::from_index(status), status)?,
                }
            }
            "register_meter" => {
                let (meter_id, meter_type): (String, u8) = args(name, rest)?;
                Self::RegisterMeter {
                    meter_id,
                    meter_type: variant(name, MeterType::from_index(meter_type), meter_type)?,
                }
            }
            "update_meter_reading" => {
                let (energy_generated, energy_consumed, reading_timestamp): (u64, u64, i64) =
                    args(name, rest)?;
                Self::UpdateMeterReading {
                    energy_generated,
                    energy_consumed,
                    reading_timestamp,
                }
            }
            "set_meter_status" => {
                let status: u8 = args(name, rest)?;
                Self::SetMeterStatus {
                    status: variant(name, MeterStatus::from_index(status), status)?,
                }
            }
            "deactivate_meter" => Self::DeactivateMeter,
            "settle_meter_balance" => Self::SettleMeterBalance,
            "settle_and_mint_tokens" => Self::SettleAndMintTokens,
            view => Self::View(view),
        })
    }
}

/// Decoder for the registry program.
pub struct RegistryDecoder {
    program_id: String,
}

impl RegistryDecoder {
    #[must_use]
    pub fn new(program_id: impl Into<String>) -> Self {
        Self {
            program_id: program_id.into(),
        }
    }

    fn meter(ctx: &InstructionContext<'_>, address: String) -> MeterRecord {
        MeterRecord {
            address,
            owner: None,
            meter_id: None,
            meter_type: None,
            status: None,
            registered_at: None,
            settled: false,
            provenance: ctx.provenance(),
        }
    }

    fn identity(ctx: &InstructionContext<'_>, address: String) -> IdentityRecord {
        IdentityRecord {
            address,
            owner: None,
            user_type: None,
            latitude: None,
            longitude: None,
            status: None,
            registered_at: None,
            provenance: ctx.provenance(),
        }
    }

    fn project(ix: RegistryInstruction, ctx: &InstructionContext<'_>) -> Vec<DomainRecord> {
        if matches!(
            ix,
            RegistryInstruction::Initialize
                | RegistryInstruction::SetOracleAuthority
                | RegistryInstruction::View(_)
        ) {
            return Vec::new();
        }
        let name = ix.name();

        let record = match ix {
            RegistryInstruction::Initialize
            | RegistryInstruction::SetOracleAuthority
            | RegistryInstruction::View(_) => None,
            RegistryInstruction::RegisterUser {
                user_type,
                latitude,
                longitude,
            } => ctx.account(0).map(|address| {
                DomainRecord::Identity(IdentityRecord {
                    owner: ctx.account(2),
                    user_type: Some(user_type),
                    latitude: Some(latitude),
                    longitude: Some(longitude),
                    status: Some(UserStatus::Active),
                    registered_at: ctx.block_time(),
                    ..Self::identity(ctx, address)
                })
            }),
            RegistryInstruction::UpdateUserStatus { status } => ctx.account(1).map(|address| {
                DomainRecord::Identity(IdentityRecord {
                    status: Some(status),
                    ..Self::identity(ctx, address)
                })
            }),
            RegistryInstruction::RegisterMeter {
                meter_id,
                meter_type,
            } => ctx.account(0).map(|address| {
                DomainRecord::Meter(MeterRecord {
                    owner: ctx.account(3),
                    meter_id: Some(meter_id),
                    meter_type: Some(meter_type),
                    status: Some(MeterStatus::Active),
                    registered_at: ctx.block_time(),
                    ..Self::meter(ctx, address)
                })
            }),
            RegistryInstruction::UpdateMeterReading {
                energy_generated,
                energy_consumed,
                reading_timestamp,
            } => ctx.account(1).map(|address| {
                DomainRecord::MeterReading(MeterReadingRecord {
                    meter_address: Some(address),
                    meter_id: None,
                    source: ReadingSource::Registry,
                    energy_generated,
                    energy_consumed,
                    reading_timestamp,
                    provenance: ctx.provenance(),
                })
            }),
            RegistryInstruction::SetMeterStatus { status } => ctx.account(1).map(|address| {
                DomainRecord::Meter(MeterRecord {
                    status: Some(status),
                    ..Self::meter(ctx, address)
                })
            }),
            RegistryInstruction::DeactivateMeter => ctx.account(0).map(|address| {
                DomainRecord::Meter(MeterRecord {
                    status: Some(MeterStatus::Inactive),
                    ..Self::meter(ctx, address)
                })
            }),
            RegistryInstruction::SettleMeterBalance | RegistryInstruction::SettleAndMintTokens => {
                ctx.account(0).map(|address| {
                    DomainRecord::Meter(MeterRecord {
                        owner: ctx.account(1),
                        settled: true,
                        ..Self::meter(ctx, address)
                    })
                })
            }
        };

        match record {
            Some(record) => vec![record],
            None => {
                missing_accounts(PROGRAM, name, ctx);
                Vec::new()
            }
        }
    }
}

impl TransactionDecoder for RegistryDecoder {
    fn program_id(&self) -> &str {
        &self.program_id
    }

    fn decode(&self, transaction: &RawTransaction) -> Vec<DomainRecord> {
        decode_instructions(
            PROGRAM,
            &self.program_id,
            transaction,
            RegistryInstruction::parse,
            Self::project,
        )
    }
}
