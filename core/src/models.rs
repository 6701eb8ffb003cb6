//! Chain artifact models recorded by the event store.
//!
//! These are storage-shaped types: every field the store persists, nothing
//! more. Block numbers, timestamps and fee values are `U256` so the store can
//! hold any value a chain reports, not just ones that fit in a machine word.

use alloy_primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};

/// A block header, immutable once inserted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub hash: B256,
    pub number: U256,
    pub timestamp: U256,
    pub parent_hash: B256,
    pub base_fee_per_gas: Option<U256>,
    pub difficulty: U256,
    pub extra_data: Bytes,
    pub gas_limit: U256,
    pub gas_used: U256,
    pub logs_bloom: Bytes,
    pub miner: Address,
    pub mix_hash: B256,
    pub nonce: u64,
    pub receipts_root: B256,
    pub sha3_uncles: B256,
    pub size: U256,
    pub state_root: B256,
    pub total_difficulty: U256,
    pub transactions_root: B256,
}

/// One entry of an EIP-2930 access list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessListItem {
    pub address: Address,
    pub storage_keys: Vec<B256>,
}

/// Fields that vary with the EIP-2718 transaction envelope type.
///
/// Shared fields live on [`Transaction`]; each arm carries only what its
/// envelope adds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionData {
    Legacy {
        gas_price: U256,
    },
    Eip2930 {
        gas_price: U256,
        access_list: Vec<AccessListItem>,
    },
    Eip1559 {
        max_fee_per_gas: U256,
        max_priority_fee_per_gas: U256,
        access_list: Vec<AccessListItem>,
    },
    Eip4844 {
        max_fee_per_gas: U256,
        max_priority_fee_per_gas: U256,
        max_fee_per_blob_gas: U256,
        access_list: Vec<AccessListItem>,
        blob_versioned_hashes: Vec<B256>,
    },
}

impl TransactionData {
    /// The EIP-2718 type byte for this envelope.
    pub fn tx_type(&self) -> u8 {
        match self {
            TransactionData::Legacy { .. } => 0,
            TransactionData::Eip2930 { .. } => 1,
            TransactionData::Eip1559 { .. } => 2,
            TransactionData::Eip4844 { .. } => 3,
        }
    }
}

/// A transaction, keyed by `(chain_id, hash)` in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub hash: B256,
    pub block_hash: B256,
    pub block_number: U256,
    pub transaction_index: u64,
    pub from: Address,
    /// `None` for contract creation.
    pub to: Option<Address>,
    pub input: Bytes,
    pub value: U256,
    pub nonce: u64,
    pub gas: U256,
    pub v: U256,
    pub r: U256,
    pub s: U256,
    pub data: TransactionData,
}

/// A log, keyed by `(chain_id, block_hash, log_index)` in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Log {
    pub block_hash: B256,
    pub block_number: U256,
    pub log_index: u64,
    pub transaction_hash: B256,
    pub transaction_index: u64,
    pub address: Address,
    /// Indexed topics, at most four. Position 0 is the event selector.
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub removed: bool,
}

impl Log {
    /// Stable event identifier handed to downstream consumers:
    /// `{blockHash}-{hex(logIndex)}`, lowercase, no leading zeros on the
    /// index part.
    pub fn id(&self) -> String {
        format!("{:#x}-{:#x}", self.block_hash, self.log_index)
    }

    /// The event selector, when the log has one.
    pub fn topic0(&self) -> Option<&B256> {
        self.topics.first()
    }
}
