//! PostgreSQL implementation of [`Sink`].

use super::schema::{self, merge_upsert};
use super::{CheckpointCursor, ErrorLogEntry, ProgramCheckpoint, Sink, WorkerStatus};
use crate::types::records::{
    AuctionOrderRecord, CertificateRecord, DomainRecord, GovernanceConfigRecord, IdentityRecord,
    MarketSnapshotRecord, MeterReadingRecord, MeterRecord, OrderRecord, Provenance,
    ReadingSource, TokenTransferRecord, TradeRecord,
};
use crate::utils::error::Result;
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Row, Transaction};
use std::sync::OnceLock;
use std::time::Duration;

type Tx<'a> = Transaction<'a, Postgres>;

fn to_db(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn opt_to_db(value: Option<u64>) -> Option<i64> {
    value.map(to_db)
}

fn from_db(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn identity_sql() -> &'static str {
    static SQL: OnceLock<String> = OnceLock::new();
    SQL.get_or_init(|| {
        merge_upsert(
            "identities",
            &["owner", "user_type", "latitude", "longitude", "status", "registered_at"],
            &[],
        )
    })
}

fn meter_sql() -> &'static str {
    static SQL: OnceLock<String> = OnceLock::new();
    SQL.get_or_init(|| {
        merge_upsert(
            "meters",
            &["owner", "meter_id", "meter_type", "status", "registered_at"],
            &["settled_height"],
        )
    })
}

fn order_sql() -> &'static str {
    static SQL: OnceLock<String> = OnceLock::new();
    SQL.get_or_init(|| {
        merge_upsert(
            "orders",
            &["order_id", "market", "owner", "side", "quantity", "price", "status", "created_at"],
            &[],
        )
    })
}

fn certificate_sql() -> &'static str {
    static SQL: OnceLock<String> = OnceLock::new();
    SQL.get_or_init(|| {
        merge_upsert(
            "certificates",
            &[
                "certificate_id",
                "owner",
                "authority",
                "meter_address",
                "energy_amount",
                "renewable_source",
                "validation_data",
                "status",
                "validated_for_trading",
                "revocation_reason",
                "issued_at",
                "poa_config",
            ],
            &[],
        )
    })
}

fn governance_config_sql() -> &'static str {
    static SQL: OnceLock<String> = OnceLock::new();
    SQL.get_or_init(|| {
        merge_upsert(
            "governance_configs",
            &["authority", "min_energy_amount", "max_erc_amount", "erc_validity_period"],
            &[],
        )
    })
}

// Stamped once: a later change of the validity period does not move it.
const STAMP_EXPIRY: &str = r"
    UPDATE certificates c SET expires_at = c.issued_at + g.erc_validity_period
    FROM governance_configs g
    WHERE c.address = $1
        AND g.address = c.poa_config
        AND c.expires_at IS NULL
        AND c.issued_at IS NOT NULL
        AND g.erc_validity_period IS NOT NULL
";

const REFRESH_ORDER: &str = r"
    UPDATE orders o SET
        filled_quantity = f.filled,
        remaining_quantity = CASE
            WHEN o.quantity IS NULL THEN NULL
            ELSE GREATEST(o.quantity - f.filled, 0)
        END,
        status = CASE
            WHEN o.status IN ('cancelled', 'expired') THEN o.status
            WHEN o.quantity IS NOT NULL AND f.filled >= o.quantity THEN 'completed'
            WHEN f.filled > 0 THEN 'partially_filled'
            ELSE o.status
        END
    FROM (
        SELECT COALESCE(SUM(amount), 0)::BIGINT AS filled
        FROM trades
        WHERE buy_order = $1 OR sell_order = $1
    ) f
    WHERE o.address = $1
";

const REFRESH_METER: &str = r"
    UPDATE meters m SET
        total_generation = r.generated,
        total_consumption = r.consumed,
        net_generation = r.generated - r.consumed,
        settled_net_generation = CASE
            WHEN m.settled_height IS NULL THEN m.settled_net_generation
            ELSE r.settled_net
        END
    FROM (
        SELECT
            COALESCE(SUM(mr.energy_generated), 0)::BIGINT AS generated,
            COALESCE(SUM(mr.energy_consumed), 0)::BIGINT AS consumed,
            COALESCE(SUM(mr.energy_generated - mr.energy_consumed) FILTER (
                WHERE mr.block_height <= (SELECT settled_height FROM meters WHERE address = $1)
            ), 0)::BIGINT AS settled_net
        FROM meter_readings mr
        WHERE mr.meter_address = $1 AND mr.source = 'registry'
    ) r
    WHERE m.address = $1
";

// Book columns are derived for market snapshots only.
const INSERT_SNAPSHOT: &str = r"
    INSERT INTO market_snapshots (
        signature, instruction_index, market, source_account, supply, demand,
        congestion_factor, last_trade_price, taken_at, block_height, block_time,
        best_bid, best_ask, bid_volume, ask_volume
    )
    SELECT $1::TEXT, $2::INTEGER, $3::TEXT, $4::TEXT, $5::BIGINT, $6::BIGINT,
        $7::INTEGER, $8::BIGINT, $9::BIGINT, $10::BIGINT, $11::BIGINT,
        (SELECT MAX(price) FROM orders
            WHERE market = $3 AND side = 'buy' AND status IN ('active', 'partially_filled')),
        (SELECT MIN(price) FROM orders
            WHERE market = $3 AND side = 'sell' AND status IN ('active', 'partially_filled')),
        CASE WHEN $3::TEXT IS NULL THEN NULL ELSE
            (SELECT COALESCE(SUM(remaining_quantity), 0)::BIGINT FROM orders
                WHERE market = $3 AND side = 'buy' AND status IN ('active', 'partially_filled'))
        END,
        CASE WHEN $3::TEXT IS NULL THEN NULL ELSE
            (SELECT COALESCE(SUM(remaining_quantity), 0)::BIGINT FROM orders
                WHERE market = $3 AND side = 'sell' AND status IN ('active', 'partially_filled'))
        END
    ON CONFLICT (signature, instruction_index) DO NOTHING
";

/// PostgreSQL-backed sink.
///
/// # Example
///
/// ```no_run
/// use energy_indexer::storage::{PostgresSink, Sink};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let sink = PostgresSink::new("postgresql://localhost/energy", 10).await?;
/// sink.initialize().await?;
/// # Ok(())
/// # }
/// ```
pub struct PostgresSink {
    pool: PgPool,
}

impl PostgresSink {
    /// Connects a pool of at most `max_connections`.
    ///
    /// # Errors
    ///
    /// Returns `IndexerError::DatabaseError` if the database is unreachable.
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(3))
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn bind_provenance<'q>(
        query: sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments>,
        p: &'q Provenance,
    ) -> sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments> {
        query
            .bind(to_db(p.block_height))
            .bind(&p.signature)
            .bind(i32::try_from(p.instruction_index).unwrap_or(i32::MAX))
            .bind(p.block_time)
    }

    async fn upsert_identity(tx: &mut Tx<'_>, r: &IdentityRecord) -> Result<()> {
        let query = sqlx::query(identity_sql())
            .bind(&r.address)
            .bind(&r.owner)
            .bind(r.user_type.map(|v| v.as_str()))
            .bind(r.latitude)
            .bind(r.longitude)
            .bind(r.status.map(|v| v.as_str()))
            .bind(r.registered_at);
        Self::bind_provenance(query, &r.provenance)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn upsert_meter(tx: &mut Tx<'_>, r: &MeterRecord) -> Result<()> {
        let settled_height = r.settled.then(|| to_db(r.provenance.block_height));
        let query = sqlx::query(meter_sql())
            .bind(&r.address)
            .bind(&r.owner)
            .bind(&r.meter_id)
            .bind(r.meter_type.map(|v| v.as_str()))
            .bind(r.status.map(|v| v.as_str()))
            .bind(r.registered_at)
            .bind(settled_height);
        Self::bind_provenance(query, &r.provenance)
            .execute(&mut **tx)
            .await?;
        Self::refresh_meter(tx, &r.address).await
    }

    async fn refresh_meter(tx: &mut Tx<'_>, address: &str) -> Result<()> {
        sqlx::query(REFRESH_METER)
            .bind(address)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn insert_reading(tx: &mut Tx<'_>, r: &MeterReadingRecord) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO meter_readings (
                signature, instruction_index, meter_address, meter_id, source,
                energy_generated, energy_consumed, reading_timestamp, block_height, block_time
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (signature, instruction_index) DO NOTHING
            ",
        )
        .bind(&r.provenance.signature)
        .bind(i32::try_from(r.provenance.instruction_index).unwrap_or(i32::MAX))
        .bind(&r.meter_address)
        .bind(&r.meter_id)
        .bind(r.source.as_str())
        .bind(to_db(r.energy_generated))
        .bind(to_db(r.energy_consumed))
        .bind(r.reading_timestamp)
        .bind(to_db(r.provenance.block_height))
        .bind(r.provenance.block_time)
        .execute(&mut **tx)
        .await?;

        match (&r.meter_address, r.source) {
            (Some(address), ReadingSource::Registry) => Self::refresh_meter(tx, address).await,
            _ => Ok(()),
        }
    }

    async fn upsert_order(tx: &mut Tx<'_>, r: &OrderRecord) -> Result<()> {
        let query = sqlx::query(order_sql())
            .bind(&r.address)
            .bind(opt_to_db(r.order_id))
            .bind(&r.market)
            .bind(&r.owner)
            .bind(r.side.map(|v| v.as_str()))
            .bind(opt_to_db(r.quantity))
            .bind(opt_to_db(r.price))
            .bind(r.status.map(|v| v.as_str()))
            .bind(r.created_at);
        Self::bind_provenance(query, &r.provenance)
            .execute(&mut **tx)
            .await?;
        Self::refresh_order(tx, &r.address).await
    }

    async fn refresh_order(tx: &mut Tx<'_>, address: &str) -> Result<()> {
        sqlx::query(REFRESH_ORDER)
            .bind(address)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn insert_trade(tx: &mut Tx<'_>, r: &TradeRecord) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO trades (
                signature, instruction_index, leg, market, auction_batch, buy_order, sell_order,
                buyer, seller, amount, price, total_value, fee_amount, wheeling_charge,
                executed_at, block_height, block_time
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            ON CONFLICT (signature, instruction_index, leg) DO NOTHING
            ",
        )
        .bind(&r.provenance.signature)
        .bind(i32::try_from(r.provenance.instruction_index).unwrap_or(i32::MAX))
        .bind(i32::try_from(r.leg).unwrap_or(i32::MAX))
        .bind(&r.market)
        .bind(&r.auction_batch)
        .bind(&r.buy_order)
        .bind(&r.sell_order)
        .bind(&r.buyer)
        .bind(&r.seller)
        .bind(to_db(r.amount))
        .bind(opt_to_db(r.price))
        .bind(opt_to_db(r.total_value))
        .bind(opt_to_db(r.fee_amount))
        .bind(opt_to_db(r.wheeling_charge))
        .bind(r.executed_at)
        .bind(to_db(r.provenance.block_height))
        .bind(r.provenance.block_time)
        .execute(&mut **tx)
        .await?;

        for order in [&r.buy_order, &r.sell_order].into_iter().flatten() {
            Self::refresh_order(tx, order).await?;
        }
        Ok(())
    }

    async fn upsert_certificate(tx: &mut Tx<'_>, r: &CertificateRecord) -> Result<()> {
        let query = sqlx::query(certificate_sql())
            .bind(&r.address)
            .bind(&r.certificate_id)
            .bind(&r.owner)
            .bind(&r.authority)
            .bind(&r.meter_address)
            .bind(opt_to_db(r.energy_amount))
            .bind(&r.renewable_source)
            .bind(&r.validation_data)
            .bind(r.status.map(|v| v.as_str()))
            .bind(r.validated_for_trading)
            .bind(&r.revocation_reason)
            .bind(r.issued_at)
            .bind(&r.poa_config);
        Self::bind_provenance(query, &r.provenance)
            .execute(&mut **tx)
            .await?;

        sqlx::query(STAMP_EXPIRY)
            .bind(&r.address)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn upsert_governance_config(tx: &mut Tx<'_>, r: &GovernanceConfigRecord) -> Result<()> {
        let query = sqlx::query(governance_config_sql())
            .bind(&r.address)
            .bind(&r.authority)
            .bind(opt_to_db(r.min_energy_amount))
            .bind(opt_to_db(r.max_erc_amount))
            .bind(r.erc_validity_period);
        Self::bind_provenance(query, &r.provenance)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn insert_auction_order(tx: &mut Tx<'_>, r: &AuctionOrderRecord) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO auction_orders (
                signature, instruction_index, batch, authority, action, side, price, amount,
                order_index, block_height, block_time
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (signature, instruction_index) DO NOTHING
            ",
        )
        .bind(&r.provenance.signature)
        .bind(i32::try_from(r.provenance.instruction_index).unwrap_or(i32::MAX))
        .bind(&r.batch)
        .bind(&r.authority)
        .bind(r.action.as_str())
        .bind(r.side.map(|v| v.as_str()))
        .bind(opt_to_db(r.price))
        .bind(opt_to_db(r.amount))
        .bind(r.order_index.map(|i| i32::try_from(i).unwrap_or(i32::MAX)))
        .bind(to_db(r.provenance.block_height))
        .bind(r.provenance.block_time)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn insert_transfer(tx: &mut Tx<'_>, r: &TokenTransferRecord) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO token_transfers (
                signature, instruction_index, from_account, to_account, mint, authority,
                amount, kind, block_height, block_time
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (signature, instruction_index) DO NOTHING
            ",
        )
        .bind(&r.provenance.signature)
        .bind(i32::try_from(r.provenance.instruction_index).unwrap_or(i32::MAX))
        .bind(&r.from_account)
        .bind(&r.to_account)
        .bind(&r.mint)
        .bind(&r.authority)
        .bind(to_db(r.amount))
        .bind(r.kind.as_str())
        .bind(to_db(r.provenance.block_height))
        .bind(r.provenance.block_time)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn insert_snapshot(tx: &mut Tx<'_>, r: &MarketSnapshotRecord) -> Result<()> {
        sqlx::query(INSERT_SNAPSHOT)
            .bind(&r.provenance.signature)
            .bind(i32::try_from(r.provenance.instruction_index).unwrap_or(i32::MAX))
            .bind(&r.market)
            .bind(&r.source_account)
            .bind(opt_to_db(r.supply))
            .bind(opt_to_db(r.demand))
            .bind(r.congestion_factor.map(i32::from))
            .bind(opt_to_db(r.last_trade_price))
            .bind(r.taken_at)
            .bind(to_db(r.provenance.block_height))
            .bind(r.provenance.block_time)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn write_record(tx: &mut Tx<'_>, record: &DomainRecord) -> Result<()> {
        match record {
            DomainRecord::Identity(r) => Self::upsert_identity(tx, r).await,
            DomainRecord::Meter(r) => Self::upsert_meter(tx, r).await,
            DomainRecord::MeterReading(r) => Self::insert_reading(tx, r).await,
            DomainRecord::Order(r) => Self::upsert_order(tx, r).await,
            DomainRecord::Trade(r) => Self::insert_trade(tx, r).await,
            DomainRecord::Certificate(r) => Self::upsert_certificate(tx, r).await,
            DomainRecord::TokenTransfer(r) => Self::insert_transfer(tx, r).await,
            DomainRecord::MarketSnapshot(r) => Self::insert_snapshot(tx, r).await,
            DomainRecord::GovernanceConfig(r) => Self::upsert_governance_config(tx, r).await,
            DomainRecord::AuctionOrder(r) => Self::insert_auction_order(tx, r).await,
        }
    }
}

#[async_trait]
impl Sink for PostgresSink {
    async fn initialize(&self) -> Result<()> {
        for statement in schema::STATEMENTS {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn load_checkpoint(
        &self,
        program_id: &str,
        program_name: &str,
    ) -> Result<ProgramCheckpoint> {
        sqlx::query(
            "INSERT INTO program_checkpoint (program_id, program_name) VALUES ($1, $2) ON CONFLICT (program_id) DO NOTHING",
        )
        .bind(program_id)
        .bind(program_name)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query(
            "SELECT program_name, last_processed_height, last_processed_signature, status FROM program_checkpoint WHERE program_id = $1",
        )
        .bind(program_id)
        .fetch_one(&self.pool)
        .await?;

        let status: String = row.try_get("status")?;
        Ok(ProgramCheckpoint {
            program_id: program_id.to_string(),
            program_name: row.try_get("program_name")?,
            last_processed_height: from_db(row.try_get("last_processed_height")?),
            last_processed_signature: row.try_get("last_processed_signature")?,
            status: status.parse().unwrap_or_default(),
        })
    }

    async fn persist(
        &self,
        program_id: &str,
        records: &[DomainRecord],
        cursor: Option<&CheckpointCursor>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for record in records {
            Self::write_record(&mut tx, record).await?;
            tracing::trace!(
                entity = record.entity(),
                append_only = record.is_append_only(),
                height = record.provenance().block_height,
                "Record staged"
            );
        }

        if let Some(cursor) = cursor {
            sqlx::query(
                r"
                UPDATE program_checkpoint
                SET last_processed_height = $2, last_processed_signature = $3, updated_at = NOW()
                WHERE program_id = $1 AND last_processed_height <= $2
                ",
            )
            .bind(program_id)
            .bind(to_db(cursor.height))
            .bind(&cursor.signature)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn set_status(&self, program_id: &str, status: WorkerStatus) -> Result<()> {
        sqlx::query(
            "UPDATE program_checkpoint SET status = $2, updated_at = NOW() WHERE program_id = $1",
        )
        .bind(program_id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_error(&self, entry: &ErrorLogEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO error_log (signature, program_id, message, raw_payload) VALUES ($1, $2, $3, $4::jsonb)",
        )
        .bind(&entry.signature)
        .bind(&entry.program_id)
        .bind(&entry.message)
        .bind(entry.raw_payload.as_ref().map(ToString::to_string))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
