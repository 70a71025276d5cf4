//! DDL for the projection tables.
//!
//! Mutable entities are keyed by on-chain address and carry provenance
//! columns; append-only entities are keyed by `(signature, instruction_index)`
//! (plus `leg` for trades). There are no foreign keys: trades may land before
//! the orders they fill.
//!
//! Every statement is idempotent. The `ALTER` statements bring tables created
//! by earlier releases up to the current shape.

pub(crate) const STATEMENTS: &[&str] = &[
    r"
    CREATE TABLE IF NOT EXISTS identities (
        address TEXT PRIMARY KEY,
        owner TEXT,
        user_type TEXT,
        latitude DOUBLE PRECISION,
        longitude DOUBLE PRECISION,
        status TEXT,
        registered_at BIGINT,
        block_height BIGINT NOT NULL,
        signature TEXT NOT NULL,
        instruction_index INTEGER NOT NULL,
        block_time BIGINT,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS meters (
        address TEXT PRIMARY KEY,
        owner TEXT,
        meter_id TEXT,
        meter_type TEXT,
        status TEXT,
        registered_at BIGINT,
        total_generation BIGINT NOT NULL DEFAULT 0,
        total_consumption BIGINT NOT NULL DEFAULT 0,
        net_generation BIGINT NOT NULL DEFAULT 0,
        settled_height BIGINT,
        settled_net_generation BIGINT NOT NULL DEFAULT 0,
        block_height BIGINT NOT NULL,
        signature TEXT NOT NULL,
        instruction_index INTEGER NOT NULL,
        block_time BIGINT,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS meter_readings (
        signature TEXT NOT NULL,
        instruction_index INTEGER NOT NULL,
        meter_address TEXT,
        meter_id TEXT,
        source TEXT NOT NULL,
        energy_generated BIGINT NOT NULL,
        energy_consumed BIGINT NOT NULL,
        reading_timestamp BIGINT NOT NULL,
        block_height BIGINT NOT NULL,
        block_time BIGINT,
        inserted_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        PRIMARY KEY (signature, instruction_index)
    )
    ",
    "CREATE INDEX IF NOT EXISTS idx_meter_readings_meter ON meter_readings(meter_address)",
    r"
    CREATE TABLE IF NOT EXISTS orders (
        address TEXT PRIMARY KEY,
        order_id BIGINT,
        market TEXT,
        owner TEXT,
        side TEXT,
        quantity BIGINT,
        price BIGINT,
        status TEXT,
        created_at BIGINT,
        filled_quantity BIGINT NOT NULL DEFAULT 0,
        remaining_quantity BIGINT,
        block_height BIGINT NOT NULL,
        signature TEXT NOT NULL,
        instruction_index INTEGER NOT NULL,
        block_time BIGINT,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    ",
    "CREATE INDEX IF NOT EXISTS idx_orders_market ON orders(market, side, status)",
    r"
    CREATE TABLE IF NOT EXISTS trades (
        signature TEXT NOT NULL,
        instruction_index INTEGER NOT NULL,
        leg INTEGER NOT NULL DEFAULT 0,
        market TEXT,
        auction_batch TEXT,
        buy_order TEXT,
        sell_order TEXT,
        buyer TEXT,
        seller TEXT,
        amount BIGINT NOT NULL,
        price BIGINT,
        total_value BIGINT,
        fee_amount BIGINT,
        wheeling_charge BIGINT,
        executed_at BIGINT,
        block_height BIGINT NOT NULL,
        block_time BIGINT,
        inserted_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    ",
    "ALTER TABLE trades ADD COLUMN IF NOT EXISTS leg INTEGER NOT NULL DEFAULT 0",
    "ALTER TABLE trades ADD COLUMN IF NOT EXISTS auction_batch TEXT",
    "ALTER TABLE trades ALTER COLUMN buy_order DROP NOT NULL",
    "ALTER TABLE trades ALTER COLUMN sell_order DROP NOT NULL",
    // a batch writes several legs under one instruction
    "ALTER TABLE trades DROP CONSTRAINT IF EXISTS trades_pkey",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_trades_leg ON trades(signature, instruction_index, leg)",
    "CREATE INDEX IF NOT EXISTS idx_trades_buy_order ON trades(buy_order)",
    "CREATE INDEX IF NOT EXISTS idx_trades_sell_order ON trades(sell_order)",
    r"
    CREATE TABLE IF NOT EXISTS certificates (
        address TEXT PRIMARY KEY,
        certificate_id TEXT,
        owner TEXT,
        authority TEXT,
        meter_address TEXT,
        energy_amount BIGINT,
        renewable_source TEXT,
        validation_data TEXT,
        status TEXT,
        validated_for_trading BOOLEAN,
        revocation_reason TEXT,
        issued_at BIGINT,
        poa_config TEXT,
        expires_at BIGINT,
        block_height BIGINT NOT NULL,
        signature TEXT NOT NULL,
        instruction_index INTEGER NOT NULL,
        block_time BIGINT,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    ",
    "ALTER TABLE certificates ADD COLUMN IF NOT EXISTS poa_config TEXT",
    "ALTER TABLE certificates ADD COLUMN IF NOT EXISTS expires_at BIGINT",
    r"
    CREATE TABLE IF NOT EXISTS governance_configs (
        address TEXT PRIMARY KEY,
        authority TEXT,
        min_energy_amount BIGINT,
        max_erc_amount BIGINT,
        erc_validity_period BIGINT,
        block_height BIGINT NOT NULL,
        signature TEXT NOT NULL,
        instruction_index INTEGER NOT NULL,
        block_time BIGINT,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS token_transfers (
        signature TEXT NOT NULL,
        instruction_index INTEGER NOT NULL,
        from_account TEXT NOT NULL,
        to_account TEXT NOT NULL,
        mint TEXT,
        authority TEXT,
        amount BIGINT NOT NULL,
        kind TEXT NOT NULL,
        block_height BIGINT NOT NULL,
        block_time BIGINT,
        inserted_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        PRIMARY KEY (signature, instruction_index)
    )
    ",
    "CREATE INDEX IF NOT EXISTS idx_token_transfers_from ON token_transfers(from_account)",
    "CREATE INDEX IF NOT EXISTS idx_token_transfers_to ON token_transfers(to_account)",
    r"
    CREATE TABLE IF NOT EXISTS market_snapshots (
        signature TEXT NOT NULL,
        instruction_index INTEGER NOT NULL,
        market TEXT,
        source_account TEXT NOT NULL,
        supply BIGINT,
        demand BIGINT,
        congestion_factor INTEGER,
        last_trade_price BIGINT,
        best_bid BIGINT,
        best_ask BIGINT,
        bid_volume BIGINT,
        ask_volume BIGINT,
        taken_at BIGINT,
        block_height BIGINT NOT NULL,
        block_time BIGINT,
        inserted_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        PRIMARY KEY (signature, instruction_index)
    )
    ",
    "ALTER TABLE market_snapshots ADD COLUMN IF NOT EXISTS source_account TEXT",
    "UPDATE market_snapshots SET source_account = market WHERE source_account IS NULL",
    "ALTER TABLE market_snapshots ALTER COLUMN source_account SET NOT NULL",
    "ALTER TABLE market_snapshots ALTER COLUMN market DROP NOT NULL",
    "ALTER TABLE market_snapshots ALTER COLUMN bid_volume DROP NOT NULL",
    "ALTER TABLE market_snapshots ALTER COLUMN bid_volume DROP DEFAULT",
    "ALTER TABLE market_snapshots ALTER COLUMN ask_volume DROP NOT NULL",
    "ALTER TABLE market_snapshots ALTER COLUMN ask_volume DROP DEFAULT",
    r"
    CREATE TABLE IF NOT EXISTS auction_orders (
        signature TEXT NOT NULL,
        instruction_index INTEGER NOT NULL,
        batch TEXT NOT NULL,
        authority TEXT,
        action TEXT NOT NULL,
        side TEXT,
        price BIGINT,
        amount BIGINT,
        order_index INTEGER,
        block_height BIGINT NOT NULL,
        block_time BIGINT,
        inserted_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        PRIMARY KEY (signature, instruction_index)
    )
    ",
    "CREATE INDEX IF NOT EXISTS idx_auction_orders_batch ON auction_orders(batch)",
    r"
    CREATE TABLE IF NOT EXISTS program_checkpoint (
        program_id TEXT PRIMARY KEY,
        program_name TEXT NOT NULL,
        last_processed_height BIGINT NOT NULL DEFAULT 0,
        last_processed_signature TEXT,
        status TEXT NOT NULL DEFAULT 'starting',
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS error_log (
        id BIGSERIAL PRIMARY KEY,
        signature TEXT NOT NULL,
        program_id TEXT NOT NULL,
        message TEXT NOT NULL,
        raw_payload JSONB,
        occurred_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    ",
    "CREATE INDEX IF NOT EXISTS idx_error_log_program ON error_log(program_id, occurred_at)",
];

/// Builds the provenance-merging upsert for a mutable entity table.
///
/// A record at or above the stored height overwrites every column it carries
/// (NULL binds keep the stored value); a lower record only fills columns that
/// are still NULL. Provenance follows the higher height. Columns listed in
/// `watermarks` keep the maximum ever written.
pub(crate) fn merge_upsert(table: &str, columns: &[&str], watermarks: &[&str]) -> String {
    const PROVENANCE: [&str; 4] = ["block_height", "signature", "instruction_index", "block_time"];

    let all: Vec<&str> = std::iter::once("address")
        .chain(columns.iter().copied())
        .chain(watermarks.iter().copied())
        .chain(PROVENANCE)
        .collect();
    let placeholders: Vec<String> = (1..=all.len()).map(|i| format!("${i}")).collect();

    let newer = "EXCLUDED.block_height >= t.block_height";
    let mut sets: Vec<String> = columns
        .iter()
        .map(|c| {
            format!(
                "{c} = CASE WHEN {newer} THEN COALESCE(EXCLUDED.{c}, t.{c}) ELSE COALESCE(t.{c}, EXCLUDED.{c}) END"
            )
        })
        .collect();
    sets.extend(watermarks.iter().map(|c| {
        format!("{c} = GREATEST(t.{c}, EXCLUDED.{c})")
    }));
    sets.extend(PROVENANCE.iter().map(|c| {
        format!("{c} = CASE WHEN {newer} THEN EXCLUDED.{c} ELSE t.{c} END")
    }));
    sets.push(format!(
        "updated_at = CASE WHEN {newer} THEN NOW() ELSE t.updated_at END"
    ));

    format!(
        "INSERT INTO {table} AS t ({}) VALUES ({}) ON CONFLICT (address) DO UPDATE SET {}",
        all.join(", "),
        placeholders.join(", "),
        sets.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_upsert_shape() {
        let sql = merge_upsert("meters", &["owner", "status"], &["settled_height"]);

        assert!(sql.starts_with(
            "INSERT INTO meters AS t (address, owner, status, settled_height, block_height, signature, instruction_index, block_time) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"
        ));
        assert!(sql.contains(
            "owner = CASE WHEN EXCLUDED.block_height >= t.block_height THEN COALESCE(EXCLUDED.owner, t.owner) ELSE COALESCE(t.owner, EXCLUDED.owner) END"
        ));
        assert!(sql.contains("settled_height = GREATEST(t.settled_height, EXCLUDED.settled_height)"));
        assert!(sql.contains(
            "signature = CASE WHEN EXCLUDED.block_height >= t.block_height THEN EXCLUDED.signature ELSE t.signature END"
        ));
    }

    #[test]
    fn test_upgrades_follow_their_tables() {
        let position = |needle: &str| {
            STATEMENTS
                .iter()
                .position(|s| s.contains(needle))
                .unwrap_or_else(|| panic!("no statement contains {needle}"))
        };

        assert!(position("CREATE TABLE IF NOT EXISTS trades") < position("DROP CONSTRAINT IF EXISTS trades_pkey"));
        assert!(position("DROP CONSTRAINT IF EXISTS trades_pkey") < position("idx_trades_leg"));
        assert!(
            position("CREATE TABLE IF NOT EXISTS market_snapshots")
                < position("SET source_account = market")
        );
        assert!(position("SET source_account = market") < position("source_account SET NOT NULL"));
        assert!(!STATEMENTS
            .iter()
            .any(|s| s.contains("CREATE TABLE") && s.contains("bid_volume BIGINT NOT NULL")));
    }
}
