//! Codecs between domain values and database columns.
//!
//! All byte fields are lowercase `0x`-prefixed hex TEXT. All 256-bit numbers
//! are fixed-width 64-digit hex TEXT so lexicographic order equals numeric
//! order; range predicates and `ORDER BY` on those columns are therefore
//! correct without a big-decimal column type.

use std::str::FromStr;

use alloy_primitives::{hex, Address, Bytes, B256, U256};
use error_stack::{Report, Result, ResultExt};

use crate::error::EventStoreError;

pub(crate) fn u256_hex(value: &U256) -> String {
    format!("0x{:0>64}", format!("{value:x}"))
}

pub(crate) fn u256_from_hex(text: &str) -> Result<U256, EventStoreError> {
    let digits = text.strip_prefix("0x").unwrap_or(text);
    U256::from_str_radix(digits, 16)
        .change_context(EventStoreError::Query)
        .attach_printable_lazy(|| format!("corrupt numeric column: {text}"))
}

pub(crate) fn address_hex(value: &Address) -> String {
    format!("{value:#x}")
}

pub(crate) fn address_from_hex(text: &str) -> Result<Address, EventStoreError> {
    Address::from_str(text)
        .change_context(EventStoreError::Query)
        .attach_printable_lazy(|| format!("corrupt address column: {text}"))
}

pub(crate) fn b256_hex(value: &B256) -> String {
    format!("{value:#x}")
}

pub(crate) fn b256_from_hex(text: &str) -> Result<B256, EventStoreError> {
    B256::from_str(text)
        .change_context(EventStoreError::Query)
        .attach_printable_lazy(|| format!("corrupt hash column: {text}"))
}

pub(crate) fn bytes_hex(value: &[u8]) -> String {
    format!("0x{}", hex::encode(value))
}

pub(crate) fn bytes_from_hex(text: &str) -> Result<Bytes, EventStoreError> {
    Bytes::from_str(text)
        .change_context(EventStoreError::Query)
        .attach_printable_lazy(|| format!("corrupt byte column: {text}"))
}

pub(crate) fn u64_hex(value: u64) -> String {
    format!("0x{value:016x}")
}

pub(crate) fn u64_from_hex(text: &str) -> Result<u64, EventStoreError> {
    let digits = text.strip_prefix("0x").unwrap_or(text);
    u64::from_str_radix(digits, 16)
        .change_context(EventStoreError::Query)
        .attach_printable_lazy(|| format!("corrupt numeric column: {text}"))
}

/// Prefix every column of a comma-separated list, for join queries.
pub(crate) fn prefixed(columns: &str, prefix: &str) -> String {
    columns
        .split(", ")
        .map(|column| format!("{prefix}.{column}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Chain ids are stored as INTEGER columns.
pub(crate) fn chain_param(chain_id: u64) -> Result<i64, EventStoreError> {
    i64::try_from(chain_id)
        .map_err(|_| Report::new(EventStoreError::InvalidCriteria))
        .attach_printable_lazy(|| format!("chain id out of range: {chain_id}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u256_hex_is_fixed_width_and_ordered() {
        let small = u256_hex(&U256::from(15495110u64));
        let large = u256_hex(&U256::from(15495112u64));

        assert_eq!(small.len(), 66);
        assert!(small < large);
        assert_eq!(u256_from_hex(&small).unwrap(), U256::from(15495110u64));
    }

    #[test]
    fn test_u256_hex_max_round_trip() {
        let encoded = u256_hex(&U256::MAX);
        assert_eq!(encoded.len(), 66);
        assert_eq!(u256_from_hex(&encoded).unwrap(), U256::MAX);
    }

    #[test]
    fn test_prefixed_columns() {
        assert_eq!(prefixed("hash, number", "b"), "b.hash, b.number");
    }
}
