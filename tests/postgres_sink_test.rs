//! Runs against a real PostgreSQL, so every test is ignored by default.
//!
//! ```text
//! DATABASE_URL=postgresql://localhost/energy_test \
//!     cargo test --test postgres_sink_test -- --ignored
//! ```
//!
//! With `--ignored` and no `DATABASE_URL` the tests fail instead of passing
//! without touching a database.

use energy_indexer::storage::{CheckpointCursor, ErrorLogEntry, PostgresSink, Sink};
use energy_indexer::types::records::{
    AuctionAction, AuctionOrderRecord, CertificateRecord, CertificateStatus,
    GovernanceConfigRecord, IdentityRecord, MarketSnapshotRecord, MeterReadingRecord, MeterRecord,
    OrderRecord, OrderSide, OrderStatus, Provenance, ReadingSource, TradeRecord, UserStatus,
    UserType,
};
use energy_indexer::DomainRecord;
use solana_sdk::signature::{Keypair, Signer};
use sqlx::Row;

async fn sink() -> PostgresSink {
    dotenvy::dotenv().ok();
    let url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must point at a scratch database for the ignored postgres tests");
    let sink = PostgresSink::new(&url, 2).await.expect("connect");
    sink.initialize().await.expect("initialize");
    sink
}

fn address() -> String {
    Keypair::new().pubkey().to_string()
}

fn provenance(height: u64, signature: &str, index: u32) -> Provenance {
    Provenance {
        block_height: height,
        signature: signature.to_string(),
        instruction_index: index,
        block_time: Some(1_700_000_000),
    }
}

fn identity(key: &str, height: u64, owner: &str, status: UserStatus) -> DomainRecord {
    DomainRecord::Identity(IdentityRecord {
        address: key.to_string(),
        owner: Some(owner.to_string()),
        user_type: Some(UserType::Prosumer),
        latitude: Some(13.7),
        longitude: Some(100.5),
        status: Some(status),
        registered_at: Some(1_700_000_000),
        provenance: provenance(height, &address(), 0),
    })
}

fn order(key: &str, market: &str, side: OrderSide, quantity: u64, price: u64, height: u64) -> DomainRecord {
    DomainRecord::Order(OrderRecord {
        address: key.to_string(),
        order_id: Some(1),
        market: Some(market.to_string()),
        owner: Some(address()),
        side: Some(side),
        quantity: Some(quantity),
        price: Some(price),
        status: Some(OrderStatus::Active),
        created_at: Some(1_700_000_000),
        provenance: provenance(height, &address(), 0),
    })
}

fn trade(buy: &str, sell: &str, amount: u64, signature: &str, height: u64) -> DomainRecord {
    DomainRecord::Trade(TradeRecord {
        market: None,
        auction_batch: None,
        leg: 0,
        buy_order: Some(buy.to_string()),
        sell_order: Some(sell.to_string()),
        buyer: None,
        seller: None,
        amount,
        price: Some(12),
        total_value: None,
        fee_amount: None,
        wheeling_charge: None,
        executed_at: None,
        provenance: provenance(height, signature, 1),
    })
}

async fn order_row(sink: &PostgresSink, address: &str) -> (i64, Option<i64>, String) {
    let row = sqlx::query("SELECT filled_quantity, remaining_quantity, status FROM orders WHERE address = $1")
        .bind(address)
        .fetch_one(sink.pool())
        .await
        .unwrap();
    (
        row.get("filled_quantity"),
        row.get("remaining_quantity"),
        row.get("status"),
    )
}

#[tokio::test]
#[ignore = "needs DATABASE_URL"]
async fn test_stale_write_does_not_overwrite_newer_row() {
    let sink = sink().await;
    let program = address();
    let user = address();

    sink.persist(&program, &[identity(&user, 20, "owner-new", UserStatus::Active)], None)
        .await
        .unwrap();
    sink.persist(&program, &[identity(&user, 8, "owner-old", UserStatus::Suspended)], None)
        .await
        .unwrap();

    let row = sqlx::query("SELECT owner, status, block_height FROM identities WHERE address = $1")
        .bind(&user)
        .fetch_one(sink.pool())
        .await
        .unwrap();
    assert_eq!(row.get::<String, _>("owner"), "owner-new");
    assert_eq!(row.get::<String, _>("status"), "active");
    assert_eq!(row.get::<i64, _>("block_height"), 20);
}

#[tokio::test]
#[ignore = "needs DATABASE_URL"]
async fn test_replayed_trade_is_inserted_once() {
    let sink = sink().await;
    let program = address();
    let market = address();
    let (buy, sell) = (address(), address());
    let sig = address();

    let records = vec![
        order(&buy, &market, OrderSide::Buy, 100, 12, 10),
        order(&sell, &market, OrderSide::Sell, 100, 11, 10),
        trade(&buy, &sell, 40, &sig, 11),
    ];
    sink.persist(&program, &records, None).await.unwrap();
    sink.persist(&program, &records, None).await.unwrap();

    let count: i64 = sqlx::query("SELECT COUNT(*) AS n FROM trades WHERE signature = $1")
        .bind(&sig)
        .fetch_one(sink.pool())
        .await
        .unwrap()
        .get("n");
    assert_eq!(count, 1);
    assert_eq!(order_row(&sink, &buy).await, (40, Some(60), "partially_filled".to_string()));
}

#[tokio::test]
#[ignore = "needs DATABASE_URL"]
async fn test_trades_drive_order_fill_state() {
    let sink = sink().await;
    let program = address();
    let market = address();
    let (buy, sell) = (address(), address());

    // the trade lands before the sell order it fills
    sink.persist(&program, &[order(&buy, &market, OrderSide::Buy, 100, 12, 10)], None)
        .await
        .unwrap();
    sink.persist(&program, &[trade(&buy, &sell, 40, &address(), 11)], None)
        .await
        .unwrap();
    sink.persist(&program, &[order(&sell, &market, OrderSide::Sell, 40, 11, 9)], None)
        .await
        .unwrap();

    assert_eq!(order_row(&sink, &buy).await, (40, Some(60), "partially_filled".to_string()));
    assert_eq!(order_row(&sink, &sell).await, (40, Some(0), "completed".to_string()));

    sink.persist(&program, &[trade(&buy, &address(), 60, &address(), 12)], None)
        .await
        .unwrap();
    assert_eq!(order_row(&sink, &buy).await, (100, Some(0), "completed".to_string()));
}

#[tokio::test]
#[ignore = "needs DATABASE_URL"]
async fn test_snapshot_derives_book_from_open_orders() {
    let sink = sink().await;
    let program = address();
    let market = address();
    let snapshot_sig = address();

    sink.persist(
        &program,
        &[
            order(&address(), &market, OrderSide::Buy, 30, 12, 5),
            order(&address(), &market, OrderSide::Buy, 20, 10, 5),
            order(&address(), &market, OrderSide::Sell, 50, 15, 5),
        ],
        None,
    )
    .await
    .unwrap();
    sink.persist(
        &program,
        &[DomainRecord::MarketSnapshot(MarketSnapshotRecord {
            market: Some(market.clone()),
            source_account: market.clone(),
            supply: Some(1_000),
            demand: Some(800),
            congestion_factor: Some(110),
            last_trade_price: None,
            taken_at: Some(1_700_000_100),
            provenance: provenance(6, &snapshot_sig, 0),
        })],
        None,
    )
    .await
    .unwrap();

    let row = sqlx::query(
        "SELECT best_bid, best_ask, bid_volume, ask_volume FROM market_snapshots WHERE signature = $1",
    )
    .bind(&snapshot_sig)
    .fetch_one(sink.pool())
    .await
    .unwrap();
    assert_eq!(row.get::<Option<i64>, _>("best_bid"), Some(12));
    assert_eq!(row.get::<Option<i64>, _>("best_ask"), Some(15));
    assert_eq!(row.get::<Option<i64>, _>("bid_volume"), Some(50));
    assert_eq!(row.get::<Option<i64>, _>("ask_volume"), Some(50));
}

#[tokio::test]
#[ignore = "needs DATABASE_URL"]
async fn test_pricing_snapshot_leaves_book_unset() {
    let sink = sink().await;
    let program = address();
    let pricing_config = address();
    let snapshot_sig = address();

    sink.persist(
        &program,
        &[DomainRecord::MarketSnapshot(MarketSnapshotRecord {
            market: None,
            source_account: pricing_config.clone(),
            supply: Some(1_000),
            demand: Some(800),
            congestion_factor: Some(110),
            last_trade_price: None,
            taken_at: Some(1_700_000_100),
            provenance: provenance(6, &snapshot_sig, 0),
        })],
        None,
    )
    .await
    .unwrap();

    let row = sqlx::query(
        "SELECT market, source_account, best_bid, best_ask, bid_volume, ask_volume FROM market_snapshots WHERE signature = $1",
    )
    .bind(&snapshot_sig)
    .fetch_one(sink.pool())
    .await
    .unwrap();
    assert_eq!(row.get::<Option<String>, _>("market"), None);
    assert_eq!(row.get::<String, _>("source_account"), pricing_config);
    assert_eq!(row.get::<Option<i64>, _>("best_bid"), None);
    assert_eq!(row.get::<Option<i64>, _>("best_ask"), None);
    assert_eq!(row.get::<Option<i64>, _>("bid_volume"), None);
    assert_eq!(row.get::<Option<i64>, _>("ask_volume"), None);
}

#[tokio::test]
#[ignore = "needs DATABASE_URL"]
async fn test_batch_legs_are_stored_as_separate_trades() {
    let sink = sink().await;
    let program = address();
    let market = address();
    let sig = address();

    let leg = |leg: u32, amount: u64| {
        DomainRecord::Trade(TradeRecord {
            market: Some(market.clone()),
            auction_batch: None,
            leg,
            buy_order: None,
            sell_order: None,
            buyer: None,
            seller: None,
            amount,
            price: Some(5),
            total_value: Some(amount * 5),
            fee_amount: None,
            wheeling_charge: Some(1),
            executed_at: None,
            provenance: provenance(30, &sig, 0),
        })
    };
    let records = vec![leg(0, 10), leg(1, 20)];
    sink.persist(&program, &records, None).await.unwrap();
    sink.persist(&program, &records, None).await.unwrap();

    let amounts: Vec<i64> = sqlx::query("SELECT amount FROM trades WHERE signature = $1 ORDER BY leg")
        .bind(&sig)
        .fetch_all(sink.pool())
        .await
        .unwrap()
        .iter()
        .map(|row| row.get("amount"))
        .collect();
    assert_eq!(amounts, vec![10, 20]);
}

#[tokio::test]
#[ignore = "needs DATABASE_URL"]
async fn test_auction_orders_are_appended() {
    let sink = sink().await;
    let program = address();
    let batch = address();
    let sig = address();

    let record = DomainRecord::AuctionOrder(AuctionOrderRecord {
        batch: batch.clone(),
        authority: Some(address()),
        action: AuctionAction::Submit,
        side: Some(OrderSide::Sell),
        price: Some(9),
        amount: Some(120),
        order_index: None,
        provenance: provenance(31, &sig, 0),
    });
    sink.persist(&program, &[record.clone()], None).await.unwrap();
    sink.persist(&program, &[record], None).await.unwrap();

    let row = sqlx::query("SELECT COUNT(*) AS n, MAX(side) AS side FROM auction_orders WHERE batch = $1")
        .bind(&batch)
        .fetch_one(sink.pool())
        .await
        .unwrap();
    assert_eq!(row.get::<i64, _>("n"), 1);
    assert_eq!(row.get::<Option<String>, _>("side").as_deref(), Some("sell"));
}

fn poa_config(key: &str, validity: i64, height: u64) -> DomainRecord {
    DomainRecord::GovernanceConfig(GovernanceConfigRecord {
        address: key.to_string(),
        authority: None,
        min_energy_amount: Some(100),
        max_erc_amount: Some(1_000_000),
        erc_validity_period: Some(validity),
        provenance: provenance(height, &address(), 0),
    })
}

fn issued_certificate(key: &str, poa: &str, issued_at: i64, height: u64) -> DomainRecord {
    DomainRecord::Certificate(CertificateRecord {
        address: key.to_string(),
        certificate_id: Some("ERC-1".into()),
        owner: None,
        authority: None,
        meter_address: None,
        energy_amount: Some(500),
        renewable_source: Some("solar".into()),
        validation_data: None,
        status: Some(CertificateStatus::Valid),
        validated_for_trading: Some(false),
        revocation_reason: None,
        issued_at: Some(issued_at),
        poa_config: Some(poa.to_string()),
        provenance: provenance(height, &address(), 0),
    })
}

async fn expires_at(sink: &PostgresSink, certificate: &str) -> Option<i64> {
    sqlx::query("SELECT expires_at FROM certificates WHERE address = $1")
        .bind(certificate)
        .fetch_one(sink.pool())
        .await
        .unwrap()
        .get("expires_at")
}

#[tokio::test]
#[ignore = "needs DATABASE_URL"]
async fn test_certificate_expiry_uses_validity_period_at_issue() {
    let sink = sink().await;
    let program = address();
    let poa = address();
    let (first, second) = (address(), address());

    sink.persist(&program, &[poa_config(&poa, 31_536_000, 1)], None)
        .await
        .unwrap();
    sink.persist(&program, &[issued_certificate(&first, &poa, 1_700_000_000, 2)], None)
        .await
        .unwrap();
    assert_eq!(expires_at(&sink, &first).await, Some(1_731_536_000));

    // a shorter period applies to later issues only
    sink.persist(&program, &[poa_config(&poa, 86_400, 3)], None)
        .await
        .unwrap();
    sink.persist(&program, &[issued_certificate(&second, &poa, 1_700_100_000, 4)], None)
        .await
        .unwrap();
    assert_eq!(expires_at(&sink, &first).await, Some(1_731_536_000));
    assert_eq!(expires_at(&sink, &second).await, Some(1_700_186_400));
}

#[tokio::test]
#[ignore = "needs DATABASE_URL"]
async fn test_certificate_without_known_config_has_no_expiry() {
    let sink = sink().await;
    let certificate = address();

    sink.persist(&address(), &[issued_certificate(&certificate, &address(), 1_700_000_000, 2)], None)
        .await
        .unwrap();
    assert_eq!(expires_at(&sink, &certificate).await, None);
}

#[tokio::test]
#[ignore = "needs DATABASE_URL"]
async fn test_meter_totals_follow_registry_readings() {
    let sink = sink().await;
    let program = address();
    let meter = address();

    let reading = |generated: u64, consumed: u64, height: u64| {
        DomainRecord::MeterReading(MeterReadingRecord {
            meter_address: Some(meter.clone()),
            meter_id: None,
            source: ReadingSource::Registry,
            energy_generated: generated,
            energy_consumed: consumed,
            reading_timestamp: 1_700_000_000,
            provenance: provenance(height, &address(), 0),
        })
    };
    let meter_record = |settled: bool, height: u64| {
        DomainRecord::Meter(MeterRecord {
            address: meter.clone(),
            owner: None,
            meter_id: Some("METER-001".into()),
            meter_type: None,
            status: None,
            registered_at: None,
            settled,
            provenance: provenance(height, &address(), 0),
        })
    };

    sink.persist(&program, &[meter_record(false, 1)], None).await.unwrap();
    sink.persist(&program, &[reading(500, 200, 2), reading(300, 100, 3)], None)
        .await
        .unwrap();
    sink.persist(&program, &[meter_record(true, 4)], None).await.unwrap();
    sink.persist(&program, &[reading(50, 0, 5)], None).await.unwrap();

    let row = sqlx::query(
        "SELECT total_generation, total_consumption, net_generation, settled_height, settled_net_generation FROM meters WHERE address = $1",
    )
    .bind(&meter)
    .fetch_one(sink.pool())
    .await
    .unwrap();
    assert_eq!(row.get::<i64, _>("total_generation"), 850);
    assert_eq!(row.get::<i64, _>("total_consumption"), 300);
    assert_eq!(row.get::<i64, _>("net_generation"), 550);
    assert_eq!(row.get::<Option<i64>, _>("settled_height"), Some(4));
    assert_eq!(row.get::<i64, _>("settled_net_generation"), 500);
}

#[tokio::test]
#[ignore = "needs DATABASE_URL"]
async fn test_checkpoint_moves_forward_only() {
    let sink = sink().await;
    let program = address();

    let initial = sink.load_checkpoint(&program, "registry").await.unwrap();
    assert_eq!(initial.last_processed_height, 0);

    let cursor = |height: u64, signature: &str| CheckpointCursor {
        height,
        signature: signature.to_string(),
    };
    sink.persist(&program, &[], Some(&cursor(15, "s15"))).await.unwrap();
    sink.persist(&program, &[], Some(&cursor(8, "s8"))).await.unwrap();

    let checkpoint = sink.load_checkpoint(&program, "registry").await.unwrap();
    assert_eq!(checkpoint.last_processed_height, 15);
    assert_eq!(checkpoint.last_processed_signature.as_deref(), Some("s15"));
}

#[tokio::test]
#[ignore = "needs DATABASE_URL"]
async fn test_error_log_keeps_raw_payload() {
    let sink = sink().await;
    let program = address();
    let signature = address();

    sink.record_error(&ErrorLogEntry {
        signature: signature.clone(),
        program_id: program.clone(),
        message: "database: deadlock detected".into(),
        raw_payload: Some(serde_json::json!({ "slot": 42 })),
    })
    .await
    .unwrap();

    let row = sqlx::query("SELECT message, raw_payload->>'slot' AS slot FROM error_log WHERE signature = $1")
        .bind(&signature)
        .fetch_one(sink.pool())
        .await
        .unwrap();
    assert_eq!(row.get::<String, _>("message"), "database: deadlock detected");
    assert_eq!(row.get::<Option<String>, _>("slot").as_deref(), Some("42"));
}
