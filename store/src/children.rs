//! Queries over factory parent-emission logs.
//!
//! Parent emissions are plain rows in `logs`; these helpers select them by
//! `(address, topic0)` and extract the announced child addresses.

use std::collections::HashMap;

use alloy_primitives::{Address, ChainId, U256};
use error_stack::Result;
use rusqlite::{params, Connection};

use emberlog_core::factory::Factory;
use emberlog_core::filter::TOPIC_SLOTS;

use crate::db::SqliteResultExt;
use crate::error::EventStoreError;
use crate::sql::{
    address_hex, b256_from_hex, b256_hex, bytes_from_hex, chain_param, u256_from_hex, u256_hex,
};

/// One parent-emission log, reduced to what extraction needs.
pub(crate) struct ParentLogRow {
    pub block_number: U256,
    pub log_index: u64,
    pub topics: Vec<alloy_primitives::B256>,
    pub data: alloy_primitives::Bytes,
}

/// One page of parent-emission logs past the cursor, ordered by
/// `(block_number, log_index)`.
pub(crate) fn parent_log_page(
    conn: &Connection,
    chain_id: ChainId,
    factory: &Factory,
    up_to_block: &U256,
    cursor: Option<&(U256, u64)>,
    page_size: usize,
) -> Result<Vec<ParentLogRow>, EventStoreError> {
    let (cursor_block, cursor_index) = match cursor {
        Some((block, index)) => (u256_hex(block), *index as i64),
        None => (u256_hex(&U256::ZERO), -1),
    };

    let mut stmt = conn
        .prepare_cached(
            "SELECT block_number, log_index, topic0, topic1, topic2, topic3, data \
             FROM logs \
             WHERE chain_id = ?1 AND address = ?2 AND topic0 = ?3 AND block_number <= ?4 \
               AND (block_number > ?5 OR (block_number = ?5 AND log_index > ?6)) \
             ORDER BY block_number ASC, log_index ASC \
             LIMIT ?7",
        )
        .db_context()?;

    let rows = stmt
        .query_map(
            params![
                chain_param(chain_id)?,
                address_hex(&factory.address),
                b256_hex(&factory.event_selector),
                u256_hex(up_to_block),
                cursor_block,
                cursor_index,
                page_size as i64,
            ],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, String>(6)?,
                ))
            },
        )
        .db_context()?;

    let mut page = Vec::new();
    for row in rows {
        let (block_number, log_index, topic0, topic1, topic2, topic3, data) = row.db_context()?;

        let mut topics = Vec::with_capacity(TOPIC_SLOTS);
        for topic in [topic0, topic1, topic2, topic3] {
            match topic {
                Some(topic) => topics.push(b256_from_hex(&topic)?),
                None => break,
            }
        }

        page.push(ParentLogRow {
            block_number: u256_from_hex(&block_number)?,
            log_index: log_index as u64,
            topics,
            data: bytes_from_hex(&data)?,
        });
    }

    Ok(page)
}

/// Every child address the factory has announced, mapped to the block number
/// of its first announcement. Used by the replay iterator, which needs the
/// whole set to decide membership per log.
pub(crate) fn child_first_seen(
    conn: &Connection,
    chain_id: ChainId,
    factory: &Factory,
) -> Result<HashMap<Address, U256>, EventStoreError> {
    let mut children = HashMap::new();
    let mut cursor: Option<(U256, u64)> = None;

    loop {
        let page = parent_log_page(conn, chain_id, factory, &U256::MAX, cursor.as_ref(), 1_000)?;
        let Some(last) = page.last() else {
            break;
        };
        cursor = Some((last.block_number, last.log_index));

        for row in &page {
            if let Some(child) = factory.extract_child_address(&row.topics, &row.data) {
                children.entry(child).or_insert(row.block_number);
            }
        }
    }

    Ok(children)
}
