//! Read-through cache for contract call results.

use alloy_primitives::{Address, Bytes, ChainId, U256};
use error_stack::Result;
use rusqlite::{params, Connection, OptionalExtension};

use crate::db::SqliteResultExt;
use crate::error::EventStoreError;
use crate::sql::{address_hex, bytes_from_hex, bytes_hex, chain_param, u256_hex};

/// One cached contract read, keyed by `(chain, contract, block, call data)`.
///
/// The block number is pinned by the caller, typically to the block being
/// indexed when the read happened: identical call data at two block numbers
/// is two distinct entries, preserving historical correctness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractReadResult {
    pub chain_id: ChainId,
    pub address: Address,
    pub block_number: U256,
    pub data: Bytes,
    pub result: Bytes,
}

pub(crate) fn upsert(
    conn: &Connection,
    entry: &ContractReadResult,
) -> Result<(), EventStoreError> {
    conn.execute(
        "INSERT INTO contract_read_results (chain_id, address, block_number, call_data, \
         result) \
         VALUES (?1, ?2, ?3, ?4, ?5) \
         ON CONFLICT (chain_id, address, block_number, call_data) \
         DO UPDATE SET result = excluded.result",
        params![
            chain_param(entry.chain_id)?,
            address_hex(&entry.address),
            u256_hex(&entry.block_number),
            bytes_hex(&entry.data),
            bytes_hex(&entry.result),
        ],
    )
    .db_context()?;

    Ok(())
}

pub(crate) fn get(
    conn: &Connection,
    chain_id: ChainId,
    address: &Address,
    block_number: &U256,
    data: &Bytes,
) -> Result<Option<ContractReadResult>, EventStoreError> {
    let result = conn
        .query_row(
            "SELECT result FROM contract_read_results \
             WHERE chain_id = ?1 AND address = ?2 AND block_number = ?3 AND call_data = ?4",
            params![
                chain_param(chain_id)?,
                address_hex(address),
                u256_hex(block_number),
                bytes_hex(data),
            ],
            |row| row.get::<_, String>(0),
        )
        .optional()
        .db_context()?;

    match result {
        Some(text) => Ok(Some(ContractReadResult {
            chain_id,
            address: *address,
            block_number: *block_number,
            data: data.clone(),
            result: bytes_from_hex(&text)?,
        })),
        None => Ok(None),
    }
}
