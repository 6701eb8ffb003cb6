//! Row codecs and dedup-inserts for chain artifacts.
//!
//! Artifacts are immutable once inserted: re-inserting the same block,
//! transaction or log on its natural key is a no-op. Deletion only happens
//! through the reorg path.

use alloy_primitives::{ChainId, B256};
use error_stack::{Report, Result, ResultExt};
use rusqlite::{params, Connection, Row};

use emberlog_core::filter::TOPIC_SLOTS;
use emberlog_core::models::{Block, Log, Transaction, TransactionData};

use crate::db::SqliteResultExt;
use crate::error::EventStoreError;
use crate::sql::{
    address_from_hex, address_hex, b256_from_hex, b256_hex, bytes_from_hex, bytes_hex,
    chain_param, u256_from_hex, u256_hex, u64_from_hex, u64_hex,
};

pub(crate) const BLOCK_COLUMNS: &str = "hash, number, timestamp, parent_hash, \
    base_fee_per_gas, difficulty, extra_data, gas_limit, gas_used, logs_bloom, miner, \
    mix_hash, nonce, receipts_root, sha3_uncles, size, state_root, total_difficulty, \
    transactions_root";
pub(crate) const BLOCK_COLUMN_COUNT: usize = 19;

pub(crate) const TRANSACTION_COLUMNS: &str = "hash, block_hash, block_number, \
    transaction_index, from_address, to_address, input, value, nonce, gas, v, r, s, \
    tx_type, gas_price, max_fee_per_gas, max_priority_fee_per_gas, max_fee_per_blob_gas, \
    access_list, blob_versioned_hashes";

pub(crate) const LOG_COLUMNS: &str = "block_hash, log_index, block_number, \
    transaction_hash, transaction_index, address, topic0, topic1, topic2, topic3, data, \
    removed";
pub(crate) const LOG_COLUMN_COUNT: usize = 12;

pub(crate) fn upsert_block(
    conn: &Connection,
    chain_id: ChainId,
    block: &Block,
) -> Result<(), EventStoreError> {
    conn.execute(
        "INSERT INTO blocks (chain_id, hash, number, timestamp, parent_hash, \
         base_fee_per_gas, difficulty, extra_data, gas_limit, gas_used, logs_bloom, \
         miner, mix_hash, nonce, receipts_root, sha3_uncles, size, state_root, \
         total_difficulty, transactions_root) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, \
         ?17, ?18, ?19, ?20) \
         ON CONFLICT (chain_id, hash) DO NOTHING",
        params![
            chain_param(chain_id)?,
            b256_hex(&block.hash),
            u256_hex(&block.number),
            u256_hex(&block.timestamp),
            b256_hex(&block.parent_hash),
            block.base_fee_per_gas.as_ref().map(u256_hex),
            u256_hex(&block.difficulty),
            bytes_hex(&block.extra_data),
            u256_hex(&block.gas_limit),
            u256_hex(&block.gas_used),
            bytes_hex(&block.logs_bloom),
            address_hex(&block.miner),
            b256_hex(&block.mix_hash),
            u64_hex(block.nonce),
            b256_hex(&block.receipts_root),
            b256_hex(&block.sha3_uncles),
            u256_hex(&block.size),
            b256_hex(&block.state_root),
            u256_hex(&block.total_difficulty),
            b256_hex(&block.transactions_root),
        ],
    )
    .db_context()?;

    Ok(())
}

pub(crate) fn upsert_transaction(
    conn: &Connection,
    chain_id: ChainId,
    transaction: &Transaction,
) -> Result<(), EventStoreError> {
    let (gas_price, max_fee, max_priority_fee, max_blob_fee, access_list, blob_hashes) =
        match &transaction.data {
            TransactionData::Legacy { gas_price } => (Some(gas_price), None, None, None, None, None),
            TransactionData::Eip2930 {
                gas_price,
                access_list,
            } => (Some(gas_price), None, None, None, Some(access_list), None),
            TransactionData::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
                access_list,
            } => (
                None,
                Some(max_fee_per_gas),
                Some(max_priority_fee_per_gas),
                None,
                Some(access_list),
                None,
            ),
            TransactionData::Eip4844 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
                max_fee_per_blob_gas,
                access_list,
                blob_versioned_hashes,
            } => (
                None,
                Some(max_fee_per_gas),
                Some(max_priority_fee_per_gas),
                Some(max_fee_per_blob_gas),
                Some(access_list),
                Some(blob_versioned_hashes),
            ),
        };

    let access_list = access_list
        .map(|list| serde_json::to_string(list))
        .transpose()
        .change_context(EventStoreError::Query)
        .attach_printable("failed to serialize access list")?;
    let blob_hashes = blob_hashes
        .map(|hashes| serde_json::to_string(hashes))
        .transpose()
        .change_context(EventStoreError::Query)
        .attach_printable("failed to serialize blob hashes")?;

    conn.execute(
        "INSERT INTO transactions (chain_id, hash, block_hash, block_number, \
         transaction_index, from_address, to_address, input, value, nonce, gas, v, r, s, \
         tx_type, gas_price, max_fee_per_gas, max_priority_fee_per_gas, \
         max_fee_per_blob_gas, access_list, blob_versioned_hashes) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, \
         ?17, ?18, ?19, ?20, ?21) \
         ON CONFLICT (chain_id, hash) DO NOTHING",
        params![
            chain_param(chain_id)?,
            b256_hex(&transaction.hash),
            b256_hex(&transaction.block_hash),
            u256_hex(&transaction.block_number),
            transaction.transaction_index as i64,
            address_hex(&transaction.from),
            transaction.to.as_ref().map(address_hex),
            bytes_hex(&transaction.input),
            u256_hex(&transaction.value),
            transaction.nonce as i64,
            u256_hex(&transaction.gas),
            u256_hex(&transaction.v),
            u256_hex(&transaction.r),
            u256_hex(&transaction.s),
            transaction.data.tx_type() as i64,
            gas_price.map(u256_hex),
            max_fee.map(u256_hex),
            max_priority_fee.map(u256_hex),
            max_blob_fee.map(u256_hex),
            access_list,
            blob_hashes,
        ],
    )
    .db_context()?;

    Ok(())
}

pub(crate) fn upsert_log(
    conn: &Connection,
    chain_id: ChainId,
    log: &Log,
) -> Result<(), EventStoreError> {
    if log.topics.len() > TOPIC_SLOTS {
        return Err(Report::new(EventStoreError::InvalidCriteria))
            .attach_printable_lazy(|| format!("log carries {} topics", log.topics.len()));
    }

    let topic = |position: usize| log.topics.get(position).map(b256_hex);

    conn.execute(
        "INSERT INTO logs (chain_id, block_hash, log_index, block_number, \
         transaction_hash, transaction_index, address, topic0, topic1, topic2, topic3, \
         data, removed) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13) \
         ON CONFLICT (chain_id, block_hash, log_index) DO NOTHING",
        params![
            chain_param(chain_id)?,
            b256_hex(&log.block_hash),
            log.log_index as i64,
            u256_hex(&log.block_number),
            b256_hex(&log.transaction_hash),
            log.transaction_index as i64,
            address_hex(&log.address),
            topic(0),
            topic(1),
            topic(2),
            topic(3),
            bytes_hex(&log.data),
            log.removed as i64,
        ],
    )
    .db_context()?;

    Ok(())
}

pub(crate) fn block_from_row(row: &Row<'_>, base: usize) -> Result<Block, EventStoreError> {
    let text = |index: usize| -> Result<String, EventStoreError> {
        row.get::<_, String>(base + index).db_context()
    };
    let opt = |index: usize| -> Result<Option<String>, EventStoreError> {
        row.get::<_, Option<String>>(base + index).db_context()
    };

    Ok(Block {
        hash: b256_from_hex(&text(0)?)?,
        number: u256_from_hex(&text(1)?)?,
        timestamp: u256_from_hex(&text(2)?)?,
        parent_hash: b256_from_hex(&text(3)?)?,
        base_fee_per_gas: opt(4)?.map(|value| u256_from_hex(&value)).transpose()?,
        difficulty: u256_from_hex(&text(5)?)?,
        extra_data: bytes_from_hex(&text(6)?)?,
        gas_limit: u256_from_hex(&text(7)?)?,
        gas_used: u256_from_hex(&text(8)?)?,
        logs_bloom: bytes_from_hex(&text(9)?)?,
        miner: address_from_hex(&text(10)?)?,
        mix_hash: b256_from_hex(&text(11)?)?,
        nonce: u64_from_hex(&text(12)?)?,
        receipts_root: b256_from_hex(&text(13)?)?,
        sha3_uncles: b256_from_hex(&text(14)?)?,
        size: u256_from_hex(&text(15)?)?,
        state_root: b256_from_hex(&text(16)?)?,
        total_difficulty: u256_from_hex(&text(17)?)?,
        transactions_root: b256_from_hex(&text(18)?)?,
    })
}

pub(crate) fn transaction_from_row(
    row: &Row<'_>,
    base: usize,
) -> Result<Transaction, EventStoreError> {
    let text = |index: usize| -> Result<String, EventStoreError> {
        row.get::<_, String>(base + index).db_context()
    };
    let opt = |index: usize| -> Result<Option<String>, EventStoreError> {
        row.get::<_, Option<String>>(base + index).db_context()
    };

    let tx_type: i64 = row.get(base + 13).db_context()?;
    let gas_price = opt(14)?.map(|value| u256_from_hex(&value)).transpose()?;
    let max_fee = opt(15)?.map(|value| u256_from_hex(&value)).transpose()?;
    let max_priority_fee = opt(16)?.map(|value| u256_from_hex(&value)).transpose()?;
    let max_blob_fee = opt(17)?.map(|value| u256_from_hex(&value)).transpose()?;
    let access_list = match opt(18)? {
        Some(json) => serde_json::from_str(&json)
            .change_context(EventStoreError::Query)
            .attach_printable("corrupt access list column")?,
        None => Vec::new(),
    };
    let blob_versioned_hashes: Vec<B256> = match opt(19)? {
        Some(json) => serde_json::from_str(&json)
            .change_context(EventStoreError::Query)
            .attach_printable("corrupt blob hashes column")?,
        None => Vec::new(),
    };

    let required = |value: Option<alloy_primitives::U256>| {
        value.ok_or_else(|| {
            Report::new(EventStoreError::Query)
                .attach_printable("transaction row missing a type-required column")
        })
    };

    let data = match tx_type {
        0 => TransactionData::Legacy {
            gas_price: required(gas_price)?,
        },
        1 => TransactionData::Eip2930 {
            gas_price: required(gas_price)?,
            access_list,
        },
        2 => TransactionData::Eip1559 {
            max_fee_per_gas: required(max_fee)?,
            max_priority_fee_per_gas: required(max_priority_fee)?,
            access_list,
        },
        3 => TransactionData::Eip4844 {
            max_fee_per_gas: required(max_fee)?,
            max_priority_fee_per_gas: required(max_priority_fee)?,
            max_fee_per_blob_gas: required(max_blob_fee)?,
            access_list,
            blob_versioned_hashes,
        },
        other => {
            return Err(Report::new(EventStoreError::Query))
                .attach_printable_lazy(|| format!("unknown transaction type: {other}"))
        }
    };

    Ok(Transaction {
        hash: b256_from_hex(&text(0)?)?,
        block_hash: b256_from_hex(&text(1)?)?,
        block_number: u256_from_hex(&text(2)?)?,
        transaction_index: row.get::<_, i64>(base + 3).db_context()? as u64,
        from: address_from_hex(&text(4)?)?,
        to: opt(5)?.map(|value| address_from_hex(&value)).transpose()?,
        input: bytes_from_hex(&text(6)?)?,
        value: u256_from_hex(&text(7)?)?,
        nonce: row.get::<_, i64>(base + 8).db_context()? as u64,
        gas: u256_from_hex(&text(9)?)?,
        v: u256_from_hex(&text(10)?)?,
        r: u256_from_hex(&text(11)?)?,
        s: u256_from_hex(&text(12)?)?,
        data,
    })
}

pub(crate) fn log_from_row(row: &Row<'_>, base: usize) -> Result<Log, EventStoreError> {
    let text = |index: usize| -> Result<String, EventStoreError> {
        row.get::<_, String>(base + index).db_context()
    };
    let opt = |index: usize| -> Result<Option<String>, EventStoreError> {
        row.get::<_, Option<String>>(base + index).db_context()
    };

    let mut topics = Vec::new();
    for position in 0..TOPIC_SLOTS {
        match opt(6 + position)? {
            Some(topic) => topics.push(b256_from_hex(&topic)?),
            None => break,
        }
    }

    Ok(Log {
        block_hash: b256_from_hex(&text(0)?)?,
        log_index: row.get::<_, i64>(base + 1).db_context()? as u64,
        block_number: u256_from_hex(&text(2)?)?,
        transaction_hash: b256_from_hex(&text(3)?)?,
        transaction_index: row.get::<_, i64>(base + 4).db_context()? as u64,
        address: address_from_hex(&text(5)?)?,
        topics,
        data: bytes_from_hex(&text(10)?)?,
        removed: row.get::<_, i64>(base + 11).db_context()? != 0,
    })
}
