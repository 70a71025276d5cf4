//! Energy token program: mints, transfers and burns.

use super::{args, decode_instructions, missing_accounts, DecodeError, DiscriminatorTable, InstructionContext};
use crate::types::records::{DomainRecord, TokenTransferRecord, TransferKind, BURN_SENTINEL, MINT_SENTINEL};
use crate::types::traits::TransactionDecoder;
use crate::types::transaction::RawTransaction;
use std::sync::OnceLock;

const PROGRAM: &str = "energy_token";

const INSTRUCTIONS: &[&str] = &[
    "initialize",
    "create_token_mint",
    "initialize_token",
    "add_rec_validator",
    "mint_to_wallet",
    "mint_tokens_direct",
    "transfer_tokens",
    "burn_tokens",
];

fn table() -> &'static DiscriminatorTable {
    static TABLE: OnceLock<DiscriminatorTable> = OnceLock::new();
    TABLE.get_or_init(|| DiscriminatorTable::new(INSTRUCTIONS))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnergyTokenInstruction {
    MintToWallet { amount: u64 },
    MintTokensDirect { amount: u64 },
    TransferTokens { amount: u64 },
    BurnTokens { amount: u64 },
    Admin(&'static str),
}

impl EnergyTokenInstruction {
    /// Parses raw instruction data.
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] for unknown discriminators and malformed arguments.
    pub fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        let (name, rest) = table().split(data)?;
        Ok(match name {
            "mint_to_wallet" => Self::MintToWallet {
                amount: args(name, rest)?,
            },
            "mint_tokens_direct" => Self::MintTokensDirect {
                amount: args(name, rest)?,
            },
            "transfer_tokens" => Self::TransferTokens {
                amount: args(name, rest)?,
            },
            "burn_tokens" => Self::BurnTokens {
                amount: args(name, rest)?,
            },
            admin => Self::Admin(admin),
        })
    }
}

/// Account positions of a token movement. `None` means a sentinel side.
struct Layout {
    name: &'static str,
    kind: TransferKind,
    from: Option<usize>,
    to: Option<usize>,
    mint: usize,
    authority: usize,
}

const MINT_TO_WALLET: Layout = Layout {
    name: "mint_to_wallet",
    kind: TransferKind::Mint,
    from: None,
    to: Some(2),
    mint: 0,
    authority: 4,
};
const MINT_TOKENS_DIRECT: Layout = Layout {
    name: "mint_tokens_direct",
    kind: TransferKind::Mint,
    from: None,
    to: Some(2),
    mint: 1,
    authority: 3,
};
const TRANSFER_TOKENS: Layout = Layout {
    name: "transfer_tokens",
    kind: TransferKind::Transfer,
    from: Some(0),
    to: Some(1),
    mint: 2,
    authority: 3,
};
const BURN_TOKENS: Layout = Layout {
    name: "burn_tokens",
    kind: TransferKind::Burn,
    from: Some(2),
    to: None,
    mint: 1,
    authority: 3,
};

pub struct EnergyTokenDecoder {
    program_id: String,
}

impl EnergyTokenDecoder {
    #[must_use]
    pub fn new(program_id: impl Into<String>) -> Self {
        Self {
            program_id: program_id.into(),
        }
    }

    fn side(ctx: &InstructionContext<'_>, position: Option<usize>, sentinel: &str) -> Option<String> {
        match position {
            Some(i) => ctx.account(i),
            None => Some(sentinel.to_string()),
        }
    }

    fn project(ix: EnergyTokenInstruction, ctx: &InstructionContext<'_>) -> Vec<DomainRecord> {
        let (layout, amount) = match ix {
            EnergyTokenInstruction::MintToWallet { amount } => (&MINT_TO_WALLET, amount),
            EnergyTokenInstruction::MintTokensDirect { amount } => (&MINT_TOKENS_DIRECT, amount),
            EnergyTokenInstruction::TransferTokens { amount } => (&TRANSFER_TOKENS, amount),
            EnergyTokenInstruction::BurnTokens { amount } => (&BURN_TOKENS, amount),
            EnergyTokenInstruction::Admin(_) => return Vec::new(),
        };

        let from = Self::side(ctx, layout.from, MINT_SENTINEL);
        let to = Self::side(ctx, layout.to, BURN_SENTINEL);
        let (Some(from_account), Some(to_account)) = (from, to) else {
            missing_accounts(PROGRAM, layout.name, ctx);
            return Vec::new();
        };

        vec![DomainRecord::TokenTransfer(TokenTransferRecord {
            from_account,
            to_account,
            mint: ctx.account(layout.mint),
            authority: ctx.account(layout.authority),
            amount,
            kind: layout.kind,
            provenance: ctx.provenance(),
        })]
    }
}

impl TransactionDecoder for EnergyTokenDecoder {
    fn program_id(&self) -> &str {
        &self.program_id
    }

    fn decode(&self, transaction: &RawTransaction) -> Vec<DomainRecord> {
        decode_instructions(
            PROGRAM,
            &self.program_id,
            transaction,
            EnergyTokenInstruction::parse,
            Self::project,
        )
    }
}
