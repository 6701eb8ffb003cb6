//! Schema migrations for the event store.

use error_stack::Result;
use rusqlite::Connection;
use tracing::info;

use crate::db::SqliteResultExt;
use crate::error::EventStoreError;

/// Applied in order inside one transaction each; `schema_migrations` records
/// how many already ran so reopening an existing database is a no-op.
const MIGRATIONS: &[&str] = &[r#"
    CREATE TABLE blocks (
        chain_id INTEGER NOT NULL,
        hash TEXT NOT NULL,
        number TEXT NOT NULL,
        timestamp TEXT NOT NULL,
        parent_hash TEXT NOT NULL,
        base_fee_per_gas TEXT,
        difficulty TEXT NOT NULL,
        extra_data TEXT NOT NULL,
        gas_limit TEXT NOT NULL,
        gas_used TEXT NOT NULL,
        logs_bloom TEXT NOT NULL,
        miner TEXT NOT NULL,
        mix_hash TEXT NOT NULL,
        nonce TEXT NOT NULL,
        receipts_root TEXT NOT NULL,
        sha3_uncles TEXT NOT NULL,
        size TEXT NOT NULL,
        state_root TEXT NOT NULL,
        total_difficulty TEXT NOT NULL,
        transactions_root TEXT NOT NULL,
        PRIMARY KEY (chain_id, hash)
    );

    CREATE INDEX idx_blocks_number ON blocks (chain_id, number);

    CREATE TABLE transactions (
        chain_id INTEGER NOT NULL,
        hash TEXT NOT NULL,
        block_hash TEXT NOT NULL,
        block_number TEXT NOT NULL,
        transaction_index INTEGER NOT NULL,
        from_address TEXT NOT NULL,
        to_address TEXT,
        input TEXT NOT NULL,
        value TEXT NOT NULL,
        nonce INTEGER NOT NULL,
        gas TEXT NOT NULL,
        v TEXT NOT NULL,
        r TEXT NOT NULL,
        s TEXT NOT NULL,
        tx_type INTEGER NOT NULL,
        gas_price TEXT,
        max_fee_per_gas TEXT,
        max_priority_fee_per_gas TEXT,
        max_fee_per_blob_gas TEXT,
        access_list TEXT,
        blob_versioned_hashes TEXT,
        PRIMARY KEY (chain_id, hash),
        FOREIGN KEY (chain_id, block_hash) REFERENCES blocks (chain_id, hash)
    );

    CREATE INDEX idx_transactions_block ON transactions (chain_id, block_hash);

    CREATE TABLE logs (
        chain_id INTEGER NOT NULL,
        block_hash TEXT NOT NULL,
        log_index INTEGER NOT NULL,
        block_number TEXT NOT NULL,
        transaction_hash TEXT NOT NULL,
        transaction_index INTEGER NOT NULL,
        address TEXT NOT NULL,
        topic0 TEXT,
        topic1 TEXT,
        topic2 TEXT,
        topic3 TEXT,
        data TEXT NOT NULL,
        removed INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (chain_id, block_hash, log_index)
    );

    CREATE INDEX idx_logs_address ON logs (chain_id, address);
    CREATE INDEX idx_logs_topic0 ON logs (chain_id, topic0);
    CREATE INDEX idx_logs_block_number ON logs (chain_id, block_number);

    CREATE TABLE log_filters (
        id TEXT NOT NULL PRIMARY KEY,
        chain_id INTEGER NOT NULL,
        address TEXT,
        topic0 TEXT,
        topic1 TEXT,
        topic2 TEXT,
        topic3 TEXT
    );

    CREATE INDEX idx_log_filters_chain ON log_filters (chain_id);

    CREATE TABLE log_filter_intervals (
        filter_id TEXT NOT NULL REFERENCES log_filters (id),
        start_block TEXT NOT NULL,
        end_block TEXT NOT NULL
    );

    CREATE INDEX idx_log_filter_intervals_filter ON log_filter_intervals (filter_id);

    CREATE TABLE factories (
        id TEXT NOT NULL PRIMARY KEY,
        chain_id INTEGER NOT NULL,
        address TEXT NOT NULL,
        event_selector TEXT NOT NULL,
        child_address_location TEXT NOT NULL
    );

    CREATE INDEX idx_factories_chain ON factories (chain_id);

    CREATE TABLE factory_log_filter_intervals (
        factory_id TEXT NOT NULL REFERENCES factories (id),
        start_block TEXT NOT NULL,
        end_block TEXT NOT NULL
    );

    CREATE INDEX idx_factory_log_filter_intervals_factory
        ON factory_log_filter_intervals (factory_id);

    CREATE TABLE contract_read_results (
        chain_id INTEGER NOT NULL,
        address TEXT NOT NULL,
        block_number TEXT NOT NULL,
        call_data TEXT NOT NULL,
        result TEXT NOT NULL,
        PRIMARY KEY (chain_id, address, block_number, call_data)
    );
    "#];

/// Bring the schema up to date.
pub(crate) fn migrate(conn: &Connection) -> Result<(), EventStoreError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (version INTEGER NOT NULL PRIMARY KEY)",
        [],
    )
    .db_context()?;

    let applied: i64 = conn
        .query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| {
            row.get(0)
        })
        .db_context()?;

    for (version, migration) in MIGRATIONS.iter().enumerate().skip(applied as usize) {
        conn.execute_batch(migration).db_context()?;
        conn.execute(
            "INSERT INTO schema_migrations (version) VALUES (?1)",
            [version as i64],
        )
        .db_context()?;
    }

    if (applied as usize) < MIGRATIONS.len() {
        info!(
            from = applied,
            to = MIGRATIONS.len(),
            "applied schema migrations"
        );
    }

    Ok(())
}
