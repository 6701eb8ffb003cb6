//! Types and queries behind the event replay iterator.
//!
//! The iterator scans the log/block/transaction join in global replay order
//! inside a timestamp window, page by page. Candidate rows come out of the
//! engine; deciding which event sources each row belongs to happens in the
//! host language, where the criteria's set slots and the factory child sets
//! live.

use alloy_primitives::{ChainId, U256};
use error_stack::Result;
use rusqlite::{params, Connection};

use emberlog_core::models::{Block, Log, Transaction};
use emberlog_core::source::{FactorySource, LogFilterSource};

use crate::artifacts::{
    block_from_row, log_from_row, transaction_from_row, BLOCK_COLUMNS, BLOCK_COLUMN_COUNT,
    LOG_COLUMNS, LOG_COLUMN_COUNT, TRANSACTION_COLUMNS,
};
use crate::db::SqliteResultExt;
use crate::error::EventStoreError;
use crate::sql::{prefixed, u256_hex};

/// Default number of events per replay page.
pub const DEFAULT_PAGE_SIZE: usize = 1_000;

/// Selection for [`crate::EventStore::get_log_events`].
#[derive(Debug, Clone)]
pub struct EventFilter {
    /// Inclusive lower bound on the containing block's timestamp.
    pub from_timestamp: U256,
    /// Inclusive upper bound on the containing block's timestamp.
    pub to_timestamp: U256,
    pub log_filters: Vec<LogFilterSource>,
    pub factories: Vec<FactorySource>,
    pub page_size: usize,
}

impl Default for EventFilter {
    fn default() -> Self {
        EventFilter {
            from_timestamp: U256::ZERO,
            to_timestamp: U256::MAX,
            log_filters: Vec::new(),
            factories: Vec::new(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// Position in the global replay order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventCursor {
    pub timestamp: U256,
    pub chain_id: ChainId,
    pub block_number: U256,
    pub log_index: u64,
}

impl EventCursor {
    /// Fixed-width rendering; string comparison equals replay order. Must
    /// stay in sync with the sort-key expression in [`candidate_page`].
    pub(crate) fn sort_key(&self) -> String {
        format!(
            "{}{:016x}{}{:08x}",
            u256_hex(&self.timestamp),
            self.chain_id,
            u256_hex(&self.block_number),
            self.log_index,
        )
    }
}

/// A log together with its containing block and transaction, tagged with the
/// event source it matched. The log's derived id is available as
/// [`Log::id`].
#[derive(Debug, Clone)]
pub struct LogEvent {
    pub source_name: String,
    pub chain_id: ChainId,
    pub log: Log,
    pub block: Block,
    pub transaction: Transaction,
}

/// One page of replayed events. `cursor` is the position of the last event
/// in the page.
#[derive(Debug, Clone)]
pub struct EventPage {
    pub events: Vec<LogEvent>,
    pub cursor: EventCursor,
}

/// A candidate row: one log with its context, before source matching.
pub(crate) struct CandidateRow {
    pub chain_id: ChainId,
    pub log: Log,
    pub block: Block,
    pub transaction: Transaction,
}

/// Up to `page_size` rows of the join past the cursor, in replay order.
///
/// The sort key concatenates the fixed-width hex renderings of
/// `(timestamp, chain_id, block_number, log_index)`, so a single string
/// comparison implements the tuple comparison.
pub(crate) fn candidate_page(
    conn: &Connection,
    chain_ids: &[ChainId],
    from_timestamp: &U256,
    to_timestamp: &U256,
    cursor: Option<&EventCursor>,
    page_size: usize,
) -> Result<Vec<CandidateRow>, EventStoreError> {
    if chain_ids.is_empty() {
        return Ok(Vec::new());
    }

    let chain_list = chain_ids
        .iter()
        .map(|chain_id| chain_id.to_string())
        .collect::<Vec<_>>()
        .join(", ");

    let query = format!(
        "SELECT l.chain_id, {log_columns}, {block_columns}, {transaction_columns} \
         FROM logs l \
         JOIN blocks b ON b.chain_id = l.chain_id AND b.hash = l.block_hash \
         JOIN transactions t ON t.chain_id = l.chain_id AND t.hash = l.transaction_hash \
         WHERE b.timestamp >= ?1 AND b.timestamp <= ?2 \
           AND l.chain_id IN ({chain_list}) \
           AND b.timestamp || printf('%016x', l.chain_id) || b.number \
               || printf('%08x', l.log_index) > ?3 \
         ORDER BY b.timestamp ASC, l.chain_id ASC, b.number ASC, l.log_index ASC \
         LIMIT ?4",
        log_columns = prefixed(LOG_COLUMNS, "l"),
        block_columns = prefixed(BLOCK_COLUMNS, "b"),
        transaction_columns = prefixed(TRANSACTION_COLUMNS, "t"),
    );

    let cursor_key = cursor.map(EventCursor::sort_key).unwrap_or_default();

    let mut stmt = conn.prepare_cached(&query).db_context()?;
    let mut rows = stmt
        .query(params![
            u256_hex(from_timestamp),
            u256_hex(to_timestamp),
            cursor_key,
            page_size as i64,
        ])
        .db_context()?;

    let log_base = 1;
    let block_base = log_base + LOG_COLUMN_COUNT;
    let transaction_base = block_base + BLOCK_COLUMN_COUNT;

    let mut page = Vec::new();
    while let Some(row) = rows.next().db_context()? {
        let chain_id: i64 = row.get(0).db_context()?;
        page.push(CandidateRow {
            chain_id: chain_id as ChainId,
            log: log_from_row(row, log_base)?,
            block: block_from_row(row, block_base)?,
            transaction: transaction_from_row(row, transaction_base)?,
        });
    }

    Ok(page)
}
