//! Trading program: order book, matched trades, batch and auction
//! settlement, and market snapshots.
//!
//! Trade instructions carry only the matched amount; counterparties, clearing
//! price and fees come from the `OrderMatched` event the program emits for
//! the same pair of orders. Auction settlements are enriched the same way
//! from `AuctionSettled`.

use super::{
    args, decode_instructions, event_discriminator, missing_accounts, DecodeError,
    DiscriminatorTable, InstructionContext, DISCRIMINATOR_LEN,
};
use crate::core::decoder::Decoder;
use crate::types::records::{
    AuctionAction, AuctionOrderRecord, DomainRecord, MarketSnapshotRecord, OrderRecord, OrderSide,
    OrderStatus, TradeRecord,
};
use crate::types::traits::TransactionDecoder;
use crate::types::transaction::RawTransaction;
use borsh::BorshDeserialize;
use std::sync::OnceLock;

const PROGRAM: &str = "trading";

const INSTRUCTIONS: &[&str] = &[
    "initialize",
    "initialize_market",
    "update_market_params",
    "create_sell_order",
    "create_buy_order",
    "match_orders",
    "cancel_order",
    "execute_batch",
    "execute_atomic_settlement",
    "configure_payment_token",
    "create_stablecoin_sell_order",
    "create_stablecoin_buy_order",
    "execute_stablecoin_settlement",
    "initialize_auction",
    "submit_auction_order",
    "resolve_auction",
    "execute_settlement",
    "cancel_auction_order",
    "initialize_pricing_config",
    "update_market_data",
    "create_price_snapshot",
    "update_batch_config",
];

fn table() -> &'static DiscriminatorTable {
    static TABLE: OnceLock<DiscriminatorTable> = OnceLock::new();
    TABLE.get_or_init(|| DiscriminatorTable::new(INSTRUCTIONS))
}

fn order_matched_discriminator() -> &'static [u8; DISCRIMINATOR_LEN] {
    static DISCRIMINATOR: OnceLock<[u8; DISCRIMINATOR_LEN]> = OnceLock::new();
    DISCRIMINATOR.get_or_init(|| event_discriminator("OrderMatched"))
}

fn auction_settled_discriminator() -> &'static [u8; DISCRIMINATOR_LEN] {
    static DISCRIMINATOR: OnceLock<[u8; DISCRIMINATOR_LEN]> = OnceLock::new();
    DISCRIMINATOR.get_or_init(|| event_discriminator("AuctionSettled"))
}

/// Instructions of the trading program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TradingInstruction {
    Initialize,
    InitializeMarket,
    UpdateMarketParams,
    CreateSellOrder {
        order_id: u64,
        amount: u64,
        price: u64,
    },
    CreateBuyOrder {
        order_id: u64,
        amount: u64,
        max_price: u64,
    },
    MatchOrders {
        amount: u64,
    },
    CancelOrder,
    /// Up to four matches settled together; the vectors run in parallel.
    ExecuteBatch {
        amount: Vec<u64>,
        price: Vec<u64>,
        wheeling_charge: Vec<u64>,
    },
    ExecuteAtomicSettlement {
        amount: u64,
        price: u64,
        wheeling_charge: u64,
    },
    CreateStablecoinOrder {
        side: OrderSide,
        energy_amount: u64,
        price: u64,
        payment_token: u8,
    },
    ExecuteStablecoinSettlement {
        amount: u64,
        exchange_rate: u64,
    },
    SubmitAuctionOrder {
        price: u64,
        amount: u64,
        is_bid: bool,
    },
    ExecuteSettlement {
        bid_order_idx: u32,
        ask_order_idx: u32,
        settle_amount: u64,
    },
    CancelAuctionOrder {
        order_idx: u32,
    },
    UpdateMarketData {
        supply: u64,
        demand: u64,
        congestion_factor: u16,
    },
    CreatePriceSnapshot {
        timestamp: i64,
    },
    /// Payment, auction-batch and pricing setup.
    Admin(&'static str),
}

impl TradingInstruction {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Initialize => "initialize",
            Self::InitializeMarket => "initialize_market",
            Self::UpdateMarketParams => "update_market_params",
            Self::CreateSellOrder { .. } => "create_sell_order",
            Self::CreateBuyOrder { .. } => "create_buy_order",
            Self::MatchOrders { .. } => "match_orders",
            Self::CancelOrder => "cancel_order",
            Self::ExecuteBatch { .. } => "execute_batch",
            Self::ExecuteAtomicSettlement { .. } => "execute_atomic_settlement",
            Self::CreateStablecoinOrder {
                side: OrderSide::Sell,
                ..
            } => "create_stablecoin_sell_order",
            Self::CreateStablecoinOrder { .. } => "create_stablecoin_buy_order",
            Self::ExecuteStablecoinSettlement { .. } => "execute_stablecoin_settlement",
            Self::SubmitAuctionOrder { .. } => "submit_auction_order",
            Self::ExecuteSettlement { .. } => "execute_settlement",
            Self::CancelAuctionOrder { .. } => "cancel_auction_order",
            Self::UpdateMarketData { .. } => "update_market_data",
            Self::CreatePriceSnapshot { .. } => "create_price_snapshot",
            Self::Admin(name) => *name,
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
            "initialize_market" => Self::InitializeMarket,
            "update_market_params" => Self::UpdateMarketParams,
            "create_sell_order" => {
                let (order_id, amount, price) = args(name, rest)?;
                Self::CreateSellOrder {
                    order_id,
                    amount,
                    price,
                }
            }
            "create_buy_order" => {
                let (order_id, amount, max_price) = args(name, rest)?;
                Self::CreateBuyOrder {
                    order_id,
                    amount,
                    max_price,
                }
            }
            "match_orders" => Self::MatchOrders {
                amount: args(name, rest)?,
            },
            "cancel_order" => Self::CancelOrder,
            "execute_batch" => {
                let (amount, price, wheeling_charge) = args(name, rest)?;
                Self::ExecuteBatch {
                    amount,
                    price,
                    wheeling_charge,
                }
            }
            "execute_atomic_settlement" => {
                let (amount, price, wheeling_charge) = args(name, rest)?;
                Self::ExecuteAtomicSettlement {
                    amount,
                    price,
                    wheeling_charge,
                }
            }
            "create_stablecoin_sell_order" | "create_stablecoin_buy_order" => {
                let (energy_amount, price, payment_token) = args(name, rest)?;
                Self::CreateStablecoinOrder {
                    side: if name == "create_stablecoin_sell_order" {
                        OrderSide::Sell
                    } else {
                        OrderSide::Buy
                    },
                    energy_amount,
                    price,
                    payment_token,
                }
            }
            "execute_stablecoin_settlement" => {
                let (amount, exchange_rate) = args(name, rest)?;
                Self::ExecuteStablecoinSettlement {
                    amount,
                    exchange_rate,
                }
            }
            "submit_auction_order" => {
                let (price, amount, is_bid) = args(name, rest)?;
                Self::SubmitAuctionOrder {
                    price,
                    amount,
                    is_bid,
                }
            }
            "execute_settlement" => {
                let (bid_order_idx, ask_order_idx, settle_amount) = args(name, rest)?;
                Self::ExecuteSettlement {
                    bid_order_idx,
                    ask_order_idx,
                    settle_amount,
                }
            }
            "cancel_auction_order" => Self::CancelAuctionOrder {
                order_idx: args(name, rest)?,
            },
            "update_market_data" => {
                let (supply, demand, congestion_factor) = args(name, rest)?;
                Self::UpdateMarketData {
                    supply,
                    demand,
                    congestion_factor,
                }
            }
            "create_price_snapshot" => Self::CreatePriceSnapshot {
                timestamp: args(name, rest)?,
            },
            admin => Self::Admin(admin),
        })
    }
}

fn key(bytes: &[u8; 32]) -> String {
    bs58::encode(bytes).into_string()
}

/// Strips `discriminator` from an event payload and Borsh-decodes the rest.
fn decode_event<T: BorshDeserialize>(data: &[u8], discriminator: &[u8; DISCRIMINATOR_LEN]) -> Option<T> {
    if data.len() < DISCRIMINATOR_LEN {
        return None;
    }
    let (head, mut body) = data.split_at(DISCRIMINATOR_LEN);
    if head != discriminator {
        return None;
    }
    T::deserialize(&mut body).ok()
}

/// `OrderMatched` event payload.
#[derive(Debug, Clone, PartialEq, Eq, BorshDeserialize)]
pub struct OrderMatched {
    pub sell_order: [u8; 32],
    pub buy_order: [u8; 32],
    pub seller: [u8; 32],
    pub buyer: [u8; 32],
    pub amount: u64,
    pub price: u64,
    pub total_value: u64,
    pub fee_amount: u64,
    pub timestamp: i64,
}

impl OrderMatched {
    /// Decodes an event from a `Program data:` payload, if it is one.
    #[must_use]
    pub fn from_program_data(data: &[u8]) -> Option<Self> {
        decode_event(data, order_matched_discriminator())
    }
}

/// `AuctionSettled` event payload.
#[derive(Debug, Clone, PartialEq, Eq, BorshDeserialize)]
pub struct AuctionSettled {
    pub batch_id: u64,
    pub buyer: [u8; 32],
    pub seller: [u8; 32],
    pub amount: u64,
    pub price: u64,
    pub total_value: u64,
    pub timestamp: i64,
}

impl AuctionSettled {
    #[must_use]
    pub fn from_program_data(data: &[u8]) -> Option<Self> {
        decode_event(data, auction_settled_discriminator())
    }
}

/// Events not yet attached to an instruction.
struct PendingEvents {
    matched: Vec<Option<OrderMatched>>,
    settled: Vec<Option<AuctionSettled>>,
}

impl PendingEvents {
    fn new(payloads: &[Vec<u8>]) -> Self {
        Self {
            matched: payloads
                .iter()
                .map(|data| OrderMatched::from_program_data(data))
                .filter(Option::is_some)
                .collect(),
            settled: payloads
                .iter()
                .map(|data| AuctionSettled::from_program_data(data))
                .filter(Option::is_some)
                .collect(),
        }
    }

    fn take_match(&mut self, buy_order: &str, sell_order: &str) -> Option<OrderMatched> {
        self.matched
            .iter_mut()
            .find(|slot| {
                slot.as_ref().is_some_and(|e| {
                    key(&e.buy_order) == buy_order && key(&e.sell_order) == sell_order
                })
            })
            .and_then(Option::take)
    }

    fn take_settlement(&mut self, buyer: &str, seller: &str) -> Option<AuctionSettled> {
        self.settled
            .iter_mut()
            .find(|slot| {
                slot.as_ref()
                    .is_some_and(|e| key(&e.buyer) == buyer && key(&e.seller) == seller)
            })
            .and_then(Option::take)
    }
}

/// Decoder for the trading program.
pub struct TradingDecoder {
    program_id: String,
    logs: Decoder,
}

impl TradingDecoder {
    #[must_use]
    pub fn new(program_id: impl Into<String>) -> Self {
        Self {
            program_id: program_id.into(),
            logs: Decoder::new(),
        }
    }

    fn order(
        ctx: &InstructionContext<'_>,
        address: String,
        status: OrderStatus,
    ) -> OrderRecord {
        OrderRecord {
            address,
            order_id: None,
            market: ctx.account(0),
            owner: None,
            side: None,
            quantity: None,
            price: None,
            status: Some(status),
            created_at: None,
            provenance: ctx.provenance(),
        }
    }

    fn snapshot(
        ctx: &InstructionContext<'_>,
        source_account: String,
        market: Option<String>,
    ) -> MarketSnapshotRecord {
        MarketSnapshotRecord {
            market,
            source_account,
            supply: None,
            demand: None,
            congestion_factor: None,
            last_trade_price: None,
            taken_at: ctx.block_time(),
            provenance: ctx.provenance(),
        }
    }

    fn blank_trade(ctx: &InstructionContext<'_>, amount: u64) -> TradeRecord {
        TradeRecord {
            market: None,
            auction_batch: None,
            leg: 0,
            buy_order: None,
            sell_order: None,
            buyer: None,
            seller: None,
            amount,
            price: None,
            total_value: None,
            fee_amount: None,
            wheeling_charge: None,
            executed_at: ctx.block_time(),
            provenance: ctx.provenance(),
        }
    }

    fn last_trade(ctx: &InstructionContext<'_>, market: String, price: Option<u64>) -> DomainRecord {
        DomainRecord::MarketSnapshot(MarketSnapshotRecord {
            last_trade_price: price,
            ..Self::snapshot(ctx, market.clone(), Some(market))
        })
    }

    fn trade(
        ctx: &InstructionContext<'_>,
        amount: u64,
        price: Option<u64>,
        wheeling_charge: Option<u64>,
        events: &mut PendingEvents,
    ) -> Option<Vec<DomainRecord>> {
        let market = ctx.account(0)?;
        let buy_order = ctx.account(1)?;
        let sell_order = ctx.account(2)?;
        let event = events.take_match(&buy_order, &sell_order);

        let base = Self::blank_trade(ctx, amount);
        let trade = TradeRecord {
            market: Some(market.clone()),
            buyer: event.as_ref().map(|e| key(&e.buyer)),
            seller: event.as_ref().map(|e| key(&e.seller)),
            amount: event.as_ref().map_or(amount, |e| e.amount),
            price: event.as_ref().map(|e| e.price).or(price),
            total_value: event.as_ref().map(|e| e.total_value),
            fee_amount: event.as_ref().map(|e| e.fee_amount),
            wheeling_charge,
            executed_at: event.as_ref().map(|e| e.timestamp).or(base.executed_at),
            buy_order: Some(buy_order),
            sell_order: Some(sell_order),
            ..base
        };

        let snapshot = Self::last_trade(ctx, market, trade.price);
        Some(vec![DomainRecord::Trade(trade), snapshot])
    }

    fn batch(
        ctx: &InstructionContext<'_>,
        amount: &[u64],
        price: &[u64],
        wheeling_charge: &[u64],
    ) -> Option<Vec<DomainRecord>> {
        let market = ctx.account(0)?;
        let mut records: Vec<DomainRecord> = amount
            .iter()
            .zip(price)
            .zip(wheeling_charge)
            .enumerate()
            .map(|(leg, ((&amount, &price), &wheeling))| {
                DomainRecord::Trade(TradeRecord {
                    market: Some(market.clone()),
                    leg: u32::try_from(leg).unwrap_or(u32::MAX),
                    price: Some(price),
                    total_value: Some(amount.saturating_mul(price)),
                    wheeling_charge: Some(wheeling),
                    ..Self::blank_trade(ctx, amount)
                })
            })
            .collect();

        let last_price = records.iter().rev().find_map(|r| match r {
            DomainRecord::Trade(t) => t.price,
            _ => None,
        });
        if last_price.is_some() {
            records.push(Self::last_trade(ctx, market, last_price));
        }
        Some(records)
    }

    fn auction_settlement(
        ctx: &InstructionContext<'_>,
        settle_amount: u64,
        events: &mut PendingEvents,
    ) -> Option<Vec<DomainRecord>> {
        let batch = ctx.account(0)?;
        let buyer = ctx.account(7)?;
        let seller = ctx.account(8)?;
        let event = events.take_settlement(&buyer, &seller);

        let base = Self::blank_trade(ctx, settle_amount);
        Some(vec![DomainRecord::Trade(TradeRecord {
            auction_batch: Some(batch),
            amount: event.as_ref().map_or(settle_amount, |e| e.amount),
            price: event.as_ref().map(|e| e.price),
            total_value: event.as_ref().map(|e| e.total_value),
            executed_at: event.as_ref().map(|e| e.timestamp).or(base.executed_at),
            buyer: Some(buyer),
            seller: Some(seller),
            ..base
        })])
    }

    fn auction_order(
        ctx: &InstructionContext<'_>,
        action: AuctionAction,
    ) -> Option<AuctionOrderRecord> {
        Some(AuctionOrderRecord {
            batch: ctx.account(0)?,
            authority: ctx.account(4),
            action,
            side: None,
            price: None,
            amount: None,
            order_index: None,
            provenance: ctx.provenance(),
        })
    }

    fn project(
        ix: TradingInstruction,
        ctx: &InstructionContext<'_>,
        events: &mut PendingEvents,
    ) -> Vec<DomainRecord> {
        let name = ix.name();
        let projected = match ix {
            TradingInstruction::Initialize
            | TradingInstruction::InitializeMarket
            | TradingInstruction::UpdateMarketParams
            | TradingInstruction::Admin(_) => return Vec::new(),
            TradingInstruction::CreateSellOrder {
                order_id,
                amount,
                price,
            } => ctx.account(1).map(|address| {
                vec![DomainRecord::Order(OrderRecord {
                    order_id: Some(order_id),
                    owner: ctx.account(3),
                    side: Some(OrderSide::Sell),
                    quantity: Some(amount),
                    price: Some(price),
                    created_at: ctx.block_time(),
                    ..Self::order(ctx, address, OrderStatus::Active)
                })]
            }),
            TradingInstruction::CreateBuyOrder {
                order_id,
                amount,
                max_price,
            } => ctx.account(1).map(|address| {
                vec![DomainRecord::Order(OrderRecord {
                    order_id: Some(order_id),
                    owner: ctx.account(2),
                    side: Some(OrderSide::Buy),
                    quantity: Some(amount),
                    price: Some(max_price),
                    created_at: ctx.block_time(),
                    ..Self::order(ctx, address, OrderStatus::Active)
                })]
            }),
            TradingInstruction::CreateStablecoinOrder {
                side,
                energy_amount,
                price,
                payment_token: _,
            } => ctx.account(1).map(|address| {
                vec![DomainRecord::Order(OrderRecord {
                    owner: ctx.account(4),
                    side: Some(side),
                    quantity: Some(energy_amount),
                    price: Some(price),
                    created_at: ctx.block_time(),
                    ..Self::order(ctx, address, OrderStatus::Active)
                })]
            }),
            TradingInstruction::CancelOrder => ctx.account(1).map(|address| {
                vec![DomainRecord::Order(Self::order(
                    ctx,
                    address,
                    OrderStatus::Cancelled,
                ))]
            }),
            TradingInstruction::MatchOrders { amount } => {
                Self::trade(ctx, amount, None, None, events)
            }
            TradingInstruction::ExecuteAtomicSettlement {
                amount,
                price,
                wheeling_charge,
            } => Self::trade(ctx, amount, Some(price), Some(wheeling_charge), events),
            // the exchange rate converts the payment leg only; the energy price is the sell order's
            TradingInstruction::ExecuteStablecoinSettlement { amount, .. } => {
                Self::trade(ctx, amount, None, None, events)
            }
            TradingInstruction::ExecuteBatch {
                amount,
                price,
                wheeling_charge,
            } => Self::batch(ctx, &amount, &price, &wheeling_charge),
            TradingInstruction::SubmitAuctionOrder {
                price,
                amount,
                is_bid,
            } => Self::auction_order(ctx, AuctionAction::Submit).map(|order| {
                vec![DomainRecord::AuctionOrder(AuctionOrderRecord {
                    side: Some(if is_bid { OrderSide::Buy } else { OrderSide::Sell }),
                    price: Some(price),
                    amount: Some(amount),
                    ..order
                })]
            }),
            TradingInstruction::CancelAuctionOrder { order_idx } => {
                Self::auction_order(ctx, AuctionAction::Cancel).map(|order| {
                    vec![DomainRecord::AuctionOrder(AuctionOrderRecord {
                        order_index: Some(order_idx),
                        ..order
                    })]
                })
            }
            TradingInstruction::ExecuteSettlement { settle_amount, .. } => {
                Self::auction_settlement(ctx, settle_amount, events)
            }
            TradingInstruction::UpdateMarketData {
                supply,
                demand,
                congestion_factor,
            } => ctx.account(0).map(|pricing_config| {
                vec![DomainRecord::MarketSnapshot(MarketSnapshotRecord {
                    supply: Some(supply),
                    demand: Some(demand),
                    congestion_factor: Some(congestion_factor),
                    ..Self::snapshot(ctx, pricing_config, None)
                })]
            }),
            TradingInstruction::CreatePriceSnapshot { timestamp } => {
                ctx.account(0).map(|pricing_config| {
                    vec![DomainRecord::MarketSnapshot(MarketSnapshotRecord {
                        taken_at: Some(timestamp),
                        ..Self::snapshot(ctx, pricing_config, None)
                    })]
                })
            }
        };

        projected.unwrap_or_else(|| {
            missing_accounts(PROGRAM, name, ctx);
            Vec::new()
        })
    }
}

impl TransactionDecoder for TradingDecoder {
    fn program_id(&self) -> &str {
        &self.program_id
    }

    fn decode(&self, transaction: &RawTransaction) -> Vec<DomainRecord> {
        let mut events =
            PendingEvents::new(&self.logs.program_data(&transaction.logs, &self.program_id));

        decode_instructions(
            PROGRAM,
            &self.program_id,
            transaction,
            TradingInstruction::parse,
            |ix, ctx| Self::project(ix, ctx, &mut events),
        )
    }
}
