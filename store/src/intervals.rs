//! The interval ledger: per-filter coverage tracking with merge-on-insert.
//!
//! Log filters and factories share one implementation; they differ only in
//! the table the intervals live in and how coverage queries select the
//! filters whose intervals count. Log filter coverage uses the subsumption
//! relation (narrower filters reuse broader filters' coverage); factory
//! coverage is identity on the factory id.

use alloy_primitives::ChainId;
use error_stack::{Result, ResultExt};
use rusqlite::{params, Connection};
use serde_json::Value;
use tracing::trace;

use emberlog_core::factory::Factory;
use emberlog_core::filter::{LogFilterCriteria, TOPIC_SLOTS};
use emberlog_core::interval::{merge, BlockInterval};

use crate::db::SqliteResultExt;
use crate::error::EventStoreError;
use crate::sql::{address_hex, b256_hex, chain_param, u256_from_hex, u256_hex};

/// The two interval ledgers. Both have `(key, start_block, end_block)` rows.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Ledger {
    LogFilters,
    Factories,
}

impl Ledger {
    fn table(&self) -> &'static str {
        match self {
            Ledger::LogFilters => "log_filter_intervals",
            Ledger::Factories => "factory_log_filter_intervals",
        }
    }

    fn key_column(&self) -> &'static str {
        match self {
            Ledger::LogFilters => "filter_id",
            Ledger::Factories => "factory_id",
        }
    }
}

/// Make sure the `log_filters` row for these criteria exists and return its
/// canonical id.
pub(crate) fn ensure_log_filter(
    conn: &Connection,
    chain_id: ChainId,
    criteria: &LogFilterCriteria,
) -> Result<String, EventStoreError> {
    let id = criteria.filter_id(chain_id);
    let canonical = criteria.canonical_json();

    let slot_text = |value: &Value| -> Option<String> {
        (!value.is_null()).then(|| value.to_string())
    };

    conn.execute(
        "INSERT INTO log_filters (id, chain_id, address, topic0, topic1, topic2, topic3) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
         ON CONFLICT (id) DO NOTHING",
        params![
            id,
            chain_param(chain_id)?,
            slot_text(&canonical["address"]),
            slot_text(&canonical["topics"][0]),
            slot_text(&canonical["topics"][1]),
            slot_text(&canonical["topics"][2]),
            slot_text(&canonical["topics"][3]),
        ],
    )
    .db_context()?;

    Ok(id)
}

/// Make sure the `factories` row exists and return its canonical id.
pub(crate) fn ensure_factory(
    conn: &Connection,
    chain_id: ChainId,
    factory: &Factory,
) -> Result<String, EventStoreError> {
    let id = factory.factory_id(chain_id);

    conn.execute(
        "INSERT INTO factories (id, chain_id, address, event_selector, \
         child_address_location) \
         VALUES (?1, ?2, ?3, ?4, ?5) \
         ON CONFLICT (id) DO NOTHING",
        params![
            id,
            chain_param(chain_id)?,
            address_hex(&factory.address),
            b256_hex(&factory.event_selector),
            factory.child_address_location.to_string(),
        ],
    )
    .db_context()?;

    Ok(id)
}

/// Insert an interval under the given key and re-merge that key's set into
/// its minimal representation, all against the caller's open transaction.
pub(crate) fn insert_and_merge(
    conn: &Connection,
    ledger: Ledger,
    key: &str,
    interval: BlockInterval,
) -> Result<(), EventStoreError> {
    conn.execute(
        &format!(
            "INSERT INTO {} ({}, start_block, end_block) VALUES (?1, ?2, ?3)",
            ledger.table(),
            ledger.key_column(),
        ),
        params![key, u256_hex(&interval.start), u256_hex(&interval.end)],
    )
    .db_context()?;

    let existing = intervals_for_key(conn, ledger, key)?;
    let merged = merge(existing.clone());

    // Counts differ only when something coalesced; otherwise the table
    // already holds exactly the minimal set.
    if merged.len() != existing.len() {
        trace!(
            key,
            from = existing.len(),
            to = merged.len(),
            "coalesced coverage intervals"
        );
        replace_intervals(conn, ledger, key, &merged)?;
    }

    Ok(())
}

pub(crate) fn intervals_for_key(
    conn: &Connection,
    ledger: Ledger,
    key: &str,
) -> Result<Vec<BlockInterval>, EventStoreError> {
    let mut stmt = conn
        .prepare_cached(&format!(
            "SELECT start_block, end_block FROM {} WHERE {} = ?1",
            ledger.table(),
            ledger.key_column(),
        ))
        .db_context()?;

    let rows = stmt
        .query_map([key], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })
        .db_context()?;

    let mut intervals = Vec::new();
    for row in rows {
        let (start, end) = row.db_context()?;
        intervals.push(BlockInterval::new(
            u256_from_hex(&start)?,
            u256_from_hex(&end)?,
        ));
    }
    Ok(intervals)
}

fn replace_intervals(
    conn: &Connection,
    ledger: Ledger,
    key: &str,
    intervals: &[BlockInterval],
) -> Result<(), EventStoreError> {
    conn.execute(
        &format!(
            "DELETE FROM {} WHERE {} = ?1",
            ledger.table(),
            ledger.key_column()
        ),
        [key],
    )
    .db_context()?;

    for interval in intervals {
        conn.execute(
            &format!(
                "INSERT INTO {} ({}, start_block, end_block) VALUES (?1, ?2, ?3)",
                ledger.table(),
                ledger.key_column(),
            ),
            params![key, u256_hex(&interval.start), u256_hex(&interval.end)],
        )
        .db_context()?;
    }

    Ok(())
}

/// Aggregate coverage for a query filter: the union-merge of the intervals of
/// every stored filter the query is a subset of. The subset check runs in the
/// host language because slots are variable-size sets.
pub(crate) fn log_filter_coverage(
    conn: &Connection,
    chain_id: ChainId,
    criteria: &LogFilterCriteria,
) -> Result<Vec<BlockInterval>, EventStoreError> {
    let mut stmt = conn
        .prepare_cached(
            "SELECT id, address, topic0, topic1, topic2, topic3 FROM log_filters \
             WHERE chain_id = ?1",
        )
        .db_context()?;

    let rows = stmt
        .query_map([chain_param(chain_id)?], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<String>>(5)?,
            ))
        })
        .db_context()?;

    let mut intervals = Vec::new();
    for row in rows {
        let (id, address, topic0, topic1, topic2, topic3) = row.db_context()?;
        let stored = criteria_from_columns(address, [topic0, topic1, topic2, topic3])?;
        if criteria.is_subset_of(&stored) {
            intervals.extend(intervals_for_key(conn, Ledger::LogFilters, &id)?);
        }
    }

    Ok(merge(intervals))
}

/// Coverage for a factory. Matching is identity on the factory id: any topic
/// constraints a caller attaches to the query play no role here.
pub(crate) fn factory_coverage(
    conn: &Connection,
    chain_id: ChainId,
    factory: &Factory,
) -> Result<Vec<BlockInterval>, EventStoreError> {
    let id = factory.factory_id(chain_id);
    let intervals = intervals_for_key(conn, Ledger::Factories, &id)?;
    Ok(merge(intervals))
}

fn criteria_from_columns(
    address: Option<String>,
    topics: [Option<String>; TOPIC_SLOTS],
) -> Result<LogFilterCriteria, EventStoreError> {
    let parse = |text: Option<String>| -> Result<Value, EventStoreError> {
        match text {
            None => Ok(Value::Null),
            Some(json) => serde_json::from_str(&json)
                .change_context(EventStoreError::Query)
                .attach_printable("corrupt filter slot column"),
        }
    };

    let address = parse(address)?;
    let [topic0, topic1, topic2, topic3] = topics;
    let topic0 = parse(topic0)?;
    let topic1 = parse(topic1)?;
    let topic2 = parse(topic2)?;
    let topic3 = parse(topic3)?;

    LogFilterCriteria::from_slots(&address, [&topic0, &topic1, &topic2, &topic3])
        .change_context(EventStoreError::Query)
        .attach_printable("stored filter row does not parse")
}
