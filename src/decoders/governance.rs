//! Governance program: renewable-energy certificate lifecycle.

use super::{args, decode_instructions, missing_accounts, DecodeError, DiscriminatorTable, InstructionContext};
use crate::types::records::{
    CertificateRecord, CertificateStatus, DomainRecord, GovernanceConfigRecord,
};
use crate::types::traits::TransactionDecoder;
use crate::types::transaction::RawTransaction;
use std::sync::OnceLock;

const PROGRAM: &str = "governance";

// Limits `initialize_poa` writes before any `update_erc_limits`.
const DEFAULT_MIN_ENERGY_AMOUNT: u64 = 100;
const DEFAULT_MAX_ERC_AMOUNT: u64 = 1_000_000;
const DEFAULT_ERC_VALIDITY_PERIOD: i64 = 31_536_000;

const INSTRUCTIONS: &[&str] = &[
    "initialize_poa",
    "emergency_pause",
    "emergency_unpause",
    "issue_erc",
    "validate_erc_for_trading",
    "update_governance_config",
    "set_maintenance_mode",
    "update_erc_limits",
    "update_authority_info",
    "get_governance_stats",
    "revoke_erc",
    "transfer_erc",
    "propose_authority_change",
    "approve_authority_change",
    "cancel_authority_change",
    "set_oracle_authority",
];

fn table() -> &'static DiscriminatorTable {
    static TABLE: OnceLock<DiscriminatorTable> = OnceLock::new();
    TABLE.get_or_init(|| DiscriminatorTable::new(INSTRUCTIONS))
}

/// Instructions of the governance program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GovernanceInstruction {
    InitializePoa,
    UpdateErcLimits {
        min_energy_amount: u64,
        max_erc_amount: u64,
        erc_validity_period: i64,
    },
    IssueErc {
        certificate_id: String,
        energy_amount: u64,
        renewable_source: String,
        validation_data: String,
    },
    ValidateErcForTrading,
    RevokeErc {
        reason: String,
    },
    TransferErc,
    /// Pause switches, authority rotation and config updates.
    Admin(&'static str),
}

impl GovernanceInstruction {
    /// Parses raw instruction data.
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] for unknown discriminators and malformed arguments.
    pub fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        let (name, rest) = table().split(data)?;
        Ok(match name {
            "initialize_poa" => Self::InitializePoa,
            "update_erc_limits" => {
                let (min_energy_amount, max_erc_amount, erc_validity_period) = args(name, rest)?;
                Self::UpdateErcLimits {
                    min_energy_amount,
                    max_erc_amount,
                    erc_validity_period,
                }
            }
            "issue_erc" => {
                let (certificate_id, energy_amount, renewable_source, validation_data) =
                    args(name, rest)?;
                Self::IssueErc {
                    certificate_id,
                    energy_amount,
                    renewable_source,
                    validation_data,
                }
            }
            "validate_erc_for_trading" => Self::ValidateErcForTrading,
            "revoke_erc" => Self::RevokeErc {
                reason: args(name, rest)?,
            },
            "transfer_erc" => Self::TransferErc,
            admin => Self::Admin(admin),
        })
    }
}

/// Decoder for the governance program.
///
/// Certificates are keyed by their account (position 1 in every certificate
/// instruction); follow-up instructions carry only the fields they change.
/// The PoA config account (position 0) carries the validity period the sink
/// uses to stamp `expires_at` on issue.
pub struct GovernanceDecoder {
    program_id: String,
}

impl GovernanceDecoder {
    #[must_use]
    pub fn new(program_id: impl Into<String>) -> Self {
        Self {
            program_id: program_id.into(),
        }
    }

    fn certificate(ctx: &InstructionContext<'_>, address: String) -> CertificateRecord {
        CertificateRecord {
            address,
            certificate_id: None,
            owner: None,
            authority: None,
            meter_address: None,
            energy_amount: None,
            renewable_source: None,
            validation_data: None,
            status: None,
            validated_for_trading: None,
            revocation_reason: None,
            issued_at: None,
            poa_config: None,
            provenance: ctx.provenance(),
        }
    }

    fn config(ix: &GovernanceInstruction, ctx: &InstructionContext<'_>) -> Vec<DomainRecord> {
        let Some(address) = ctx.account(0) else {
            missing_accounts(PROGRAM, "poa config instruction", ctx);
            return Vec::new();
        };
        let (min_energy_amount, max_erc_amount, erc_validity_period, authority) = match *ix {
            GovernanceInstruction::UpdateErcLimits {
                min_energy_amount,
                max_erc_amount,
                erc_validity_period,
            } => (min_energy_amount, max_erc_amount, erc_validity_period, None),
            _ => (
                DEFAULT_MIN_ENERGY_AMOUNT,
                DEFAULT_MAX_ERC_AMOUNT,
                DEFAULT_ERC_VALIDITY_PERIOD,
                ctx.account(1),
            ),
        };
        vec![DomainRecord::GovernanceConfig(GovernanceConfigRecord {
            address,
            authority,
            min_energy_amount: Some(min_energy_amount),
            max_erc_amount: Some(max_erc_amount),
            erc_validity_period: Some(erc_validity_period),
            provenance: ctx.provenance(),
        })]
    }

    fn project(ix: GovernanceInstruction, ctx: &InstructionContext<'_>) -> Vec<DomainRecord> {
        match ix {
            GovernanceInstruction::Admin(_) => return Vec::new(),
            GovernanceInstruction::InitializePoa | GovernanceInstruction::UpdateErcLimits { .. } => {
                return Self::config(&ix, ctx)
            }
            _ => {}
        }
        let Some(address) = ctx.account(1) else {
            missing_accounts(PROGRAM, "certificate instruction", ctx);
            return Vec::new();
        };
        let base = Self::certificate(ctx, address);

        let record = match ix {
            GovernanceInstruction::IssueErc {
                certificate_id,
                energy_amount,
                renewable_source,
                validation_data,
            } => CertificateRecord {
                certificate_id: Some(certificate_id),
                // the issuing authority holds the certificate until it is transferred
                owner: ctx.account(3),
                authority: ctx.account(3),
                meter_address: ctx.account(2),
                energy_amount: Some(energy_amount),
                renewable_source: Some(renewable_source),
                validation_data: Some(validation_data),
                status: Some(CertificateStatus::Valid),
                validated_for_trading: Some(false),
                issued_at: ctx.block_time(),
                poa_config: ctx.account(0),
                ..base
            },
            GovernanceInstruction::ValidateErcForTrading => CertificateRecord {
                validated_for_trading: Some(true),
                ..base
            },
            GovernanceInstruction::RevokeErc { reason } => CertificateRecord {
                status: Some(CertificateStatus::Revoked),
                validated_for_trading: Some(false),
                revocation_reason: Some(reason),
                ..base
            },
            GovernanceInstruction::TransferErc => CertificateRecord {
                owner: ctx.account(3),
                ..base
            },
            GovernanceInstruction::InitializePoa
            | GovernanceInstruction::UpdateErcLimits { .. }
            | GovernanceInstruction::Admin(_) => return Vec::new(),
        };

        vec![DomainRecord::Certificate(record)]
    }
}

impl TransactionDecoder for GovernanceDecoder {
    fn program_id(&self) -> &str {
        &self.program_id
    }

    fn decode(&self, transaction: &RawTransaction) -> Vec<DomainRecord> {
        decode_instructions(
            PROGRAM,
            &self.program_id,
            transaction,
            GovernanceInstruction::parse,
            Self::project,
        )
    }
}
