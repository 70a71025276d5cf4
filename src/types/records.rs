//! Typed domain records produced by the program decoders.
//!
//! Every record carries [`Provenance`]; the sink uses `block_height` to reject
//! stale writes and `(signature, instruction_index)` to deduplicate
//! append-only rows.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Sentinel counterparty for mints.
pub const MINT_SENTINEL: &str = "MINT";
/// Sentinel counterparty for burns.
pub const BURN_SENTINEL: &str = "BURN";

/// Where and when a record was observed on the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    /// Slot of the transaction.
    pub block_height: u64,
    /// Transaction signature.
    pub signature: String,
    /// Ordinal of the instruction inside the transaction.
    pub instruction_index: u32,
    /// Block time, when the ledger reports it.
    pub block_time: Option<i64>,
}

macro_rules! record_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $label:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            /// Column value stored in the database.
            #[must_use]
            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }

            /// Maps a Borsh variant index to the enum.
            #[must_use]
            pub fn from_index(index: u8) -> Option<Self> {
                [$($name::$variant),+].get(index as usize).copied()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

record_enum!(
    /// Registered participant type.
    UserType { Prosumer => "prosumer", Consumer => "consumer" }
);
record_enum!(
    /// Participant status.
    UserStatus { Active => "active", Suspended => "suspended", Inactive => "inactive" }
);
record_enum!(
    /// Physical meter type.
    MeterType { Solar => "solar", Wind => "wind", Battery => "battery", Grid => "grid" }
);
record_enum!(
    /// Meter lifecycle status.
    MeterStatus { Active => "active", Inactive => "inactive", Maintenance => "maintenance" }
);
record_enum!(
    /// Order side. Index order follows the on-chain `OrderType`.
    OrderSide { Sell => "sell", Buy => "buy" }
);
record_enum!(
    /// Order lifecycle status.
    OrderStatus {
        Active => "active",
        PartiallyFilled => "partially_filled",
        Completed => "completed",
        Cancelled => "cancelled",
        Expired => "expired",
    }
);
record_enum!(
    /// Certificate status.
    CertificateStatus { Valid => "valid", Expired => "expired", Revoked => "revoked", Pending => "pending" }
);
record_enum!(
    /// Token movement kind.
    TransferKind { Mint => "mint", Transfer => "transfer", Burn => "burn" }
);
record_enum!(
    /// Which program reported a meter reading.
    ReadingSource { Registry => "registry", Oracle => "oracle" }
);
record_enum!(
    /// What happened to an order in a periodic auction batch.
    AuctionAction { Submit => "submit", Cancel => "cancel" }
);

/// Registered participant, keyed by its user account address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub address: String,
    pub owner: Option<String>,
    pub user_type: Option<UserType>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub status: Option<UserStatus>,
    pub registered_at: Option<i64>,
    pub provenance: Provenance,
}

/// Registered meter, keyed by its meter account address.
///
/// Cumulative totals and the settlement watermark are derived by the sink
/// from stored readings; `settled` only marks that a settlement happened at
/// this record's height.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeterRecord {
    pub address: String,
    pub owner: Option<String>,
    pub meter_id: Option<String>,
    pub meter_type: Option<MeterType>,
    pub status: Option<MeterStatus>,
    pub registered_at: Option<i64>,
    pub settled: bool,
    pub provenance: Provenance,
}

/// Immutable meter reading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeterReadingRecord {
    /// Meter account, known for registry readings.
    pub meter_address: Option<String>,
    /// Physical meter id, known for oracle readings.
    pub meter_id: Option<String>,
    pub source: ReadingSource,
    pub energy_generated: u64,
    pub energy_consumed: u64,
    pub reading_timestamp: i64,
    pub provenance: Provenance,
}

/// Order book entry, keyed by its order account address.
///
/// Filled and remaining quantities are derived by the sink from trades.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub address: String,
    pub order_id: Option<u64>,
    pub market: Option<String>,
    pub owner: Option<String>,
    pub side: Option<OrderSide>,
    pub quantity: Option<u64>,
    pub price: Option<u64>,
    pub status: Option<OrderStatus>,
    pub created_at: Option<i64>,
    pub provenance: Provenance,
}

/// Executed trade, append-only.
///
/// Book trades name both orders. Batch legs and auction settlements move
/// value without order accounts, so those leave the orders unset; a batch
/// numbers its matches with `leg`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub market: Option<String>,
    /// Auction batch account, for trades cleared by a periodic auction.
    pub auction_batch: Option<String>,
    pub leg: u32,
    pub buy_order: Option<String>,
    pub sell_order: Option<String>,
    pub buyer: Option<String>,
    pub seller: Option<String>,
    pub amount: u64,
    pub price: Option<u64>,
    pub total_value: Option<u64>,
    pub fee_amount: Option<u64>,
    pub wheeling_charge: Option<u64>,
    pub executed_at: Option<i64>,
    pub provenance: Provenance,
}

/// Renewable-energy certificate, keyed by its certificate account address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRecord {
    pub address: String,
    pub certificate_id: Option<String>,
    pub owner: Option<String>,
    pub authority: Option<String>,
    pub meter_address: Option<String>,
    pub energy_amount: Option<u64>,
    pub renewable_source: Option<String>,
    pub validation_data: Option<String>,
    pub status: Option<CertificateStatus>,
    pub validated_for_trading: Option<bool>,
    pub revocation_reason: Option<String>,
    pub issued_at: Option<i64>,
    /// Governance config in force at issuance; the sink derives `expires_at`
    /// from its validity period.
    pub poa_config: Option<String>,
    pub provenance: Provenance,
}

/// Governance limits, keyed by the config account address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernanceConfigRecord {
    pub address: String,
    pub authority: Option<String>,
    pub min_energy_amount: Option<u64>,
    pub max_erc_amount: Option<u64>,
    /// Seconds a newly issued certificate stays valid.
    pub erc_validity_period: Option<i64>,
    pub provenance: Provenance,
}

/// Order placed in or withdrawn from an auction batch, append-only.
///
/// Auction orders live inside the batch account, so there is no per-order
/// address to upsert; `order_index` is the position a cancel refers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuctionOrderRecord {
    pub batch: String,
    pub authority: Option<String>,
    pub action: AuctionAction,
    pub side: Option<OrderSide>,
    pub price: Option<u64>,
    pub amount: Option<u64>,
    pub order_index: Option<u32>,
    pub provenance: Provenance,
}

/// Token movement, append-only. Mints and burns use the sentinel counterparties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenTransferRecord {
    pub from_account: String,
    pub to_account: String,
    pub mint: Option<String>,
    pub authority: Option<String>,
    pub amount: u64,
    pub kind: TransferKind,
    pub provenance: Provenance,
}

/// Point-in-time market view, append-only.
///
/// `source_account` is the account whose state the snapshot describes: the
/// market for trades, the pricing config or oracle account otherwise. Only
/// market snapshots set `market`, and only for those does the sink derive
/// best bid/ask and resting volumes from open orders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketSnapshotRecord {
    pub market: Option<String>,
    pub source_account: String,
    pub supply: Option<u64>,
    pub demand: Option<u64>,
    pub congestion_factor: Option<u16>,
    pub last_trade_price: Option<u64>,
    pub taken_at: Option<i64>,
    pub provenance: Provenance,
}

/// One decoded, typed projection of on-chain activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entity", rename_all = "snake_case")]
pub enum DomainRecord {
    Identity(IdentityRecord),
    Meter(MeterRecord),
    MeterReading(MeterReadingRecord),
    Order(OrderRecord),
    Trade(TradeRecord),
    Certificate(CertificateRecord),
    TokenTransfer(TokenTransferRecord),
    MarketSnapshot(MarketSnapshotRecord),
    GovernanceConfig(GovernanceConfigRecord),
    AuctionOrder(AuctionOrderRecord),
}

impl DomainRecord {
    /// Provenance of the wrapped record.
    #[must_use]
    pub fn provenance(&self) -> &Provenance {
        match self {
            DomainRecord::Identity(r) => &r.provenance,
            DomainRecord::Meter(r) => &r.provenance,
            DomainRecord::MeterReading(r) => &r.provenance,
            DomainRecord::Order(r) => &r.provenance,
            DomainRecord::Trade(r) => &r.provenance,
            DomainRecord::Certificate(r) => &r.provenance,
            DomainRecord::TokenTransfer(r) => &r.provenance,
            DomainRecord::MarketSnapshot(r) => &r.provenance,
            DomainRecord::GovernanceConfig(r) => &r.provenance,
            DomainRecord::AuctionOrder(r) => &r.provenance,
        }
    }

    /// Entity name, matching the table it lands in.
    #[must_use]
    pub fn entity(&self) -> &'static str {
        match self {
            DomainRecord::Identity(_) => "identity",
            DomainRecord::Meter(_) => "meter",
            DomainRecord::MeterReading(_) => "meter_reading",
            DomainRecord::Order(_) => "order",
            DomainRecord::Trade(_) => "trade",
            DomainRecord::Certificate(_) => "certificate",
            DomainRecord::TokenTransfer(_) => "token_transfer",
            DomainRecord::MarketSnapshot(_) => "market_snapshot",
            DomainRecord::GovernanceConfig(_) => "governance_config",
            DomainRecord::AuctionOrder(_) => "auction_order",
        }
    }

    /// `true` for entities that are inserted once and never updated.
    #[must_use]
    pub fn is_append_only(&self) -> bool {
        matches!(
            self,
            DomainRecord::MeterReading(_)
                | DomainRecord::Trade(_)
                | DomainRecord::TokenTransfer(_)
                | DomainRecord::MarketSnapshot(_)
                | DomainRecord::AuctionOrder(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_from_index() {
        assert_eq!(OrderSide::from_index(0), Some(OrderSide::Sell));
        assert_eq!(OrderSide::from_index(1), Some(OrderSide::Buy));
        assert_eq!(OrderSide::from_index(2), None);
        assert_eq!(MeterType::from_index(3), Some(MeterType::Grid));
        assert_eq!(OrderStatus::PartiallyFilled.as_str(), "partially_filled");
    }

    #[test]
    fn test_append_only_classification() {
        let provenance = Provenance {
            block_height: 1,
            signature: "sig".into(),
            instruction_index: 0,
            block_time: None,
        };
        let trade = DomainRecord::Trade(TradeRecord {
            market: None,
            auction_batch: None,
            leg: 0,
            buy_order: Some("b".into()),
            sell_order: Some("s".into()),
            buyer: None,
            seller: None,
            amount: 5,
            price: None,
            total_value: None,
            fee_amount: None,
            wheeling_charge: None,
            executed_at: None,
            provenance: provenance.clone(),
        });
        assert!(trade.is_append_only());
        assert_eq!(trade.entity(), "trade");

        let order = DomainRecord::Order(OrderRecord {
            address: "o".into(),
            order_id: None,
            market: None,
            owner: None,
            side: None,
            quantity: None,
            price: None,
            status: Some(OrderStatus::Cancelled),
            created_at: None,
            provenance,
        });
        assert!(!order.is_append_only());
        assert_eq!(order.provenance().block_height, 1);

        let cancel = DomainRecord::AuctionOrder(AuctionOrderRecord {
            batch: "batch".into(),
            authority: None,
            action: AuctionAction::Cancel,
            side: None,
            price: None,
            amount: None,
            order_index: Some(3),
            provenance: provenance_at(2),
        });
        assert!(cancel.is_append_only());
        assert_eq!(cancel.entity(), "auction_order");
    }

    fn provenance_at(height: u64) -> Provenance {
        Provenance {
            block_height: height,
            signature: "sig".into(),
            instruction_index: 0,
            block_time: None,
        }
    }
}
