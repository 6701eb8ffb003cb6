//! Factory descriptors and child-address extraction.
//!
//! A factory contract announces each child it deploys by emitting a log. The
//! child's address sits either in one of the indexed topics or at a fixed
//! word offset inside the data payload, right-aligned within its 32-byte
//! word.

use std::fmt;

use alloy_primitives::{hex, keccak256, Address, ChainId, B256};
use error_stack::{Report, Result, ResultExt};

use crate::error::CriteriaError;
use crate::filter::{AddressFilter, LogFilterCriteria, TopicFilter};

/// Bytes of left padding before an address inside a 32-byte word.
const WORD_PADDING: usize = 12;

/// Where a factory's parent-emission log carries the child address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildAddressLocation {
    Topic1,
    Topic2,
    Topic3,
    /// Byte offset into the data payload. Always a multiple of 32.
    Offset(u64),
}

impl ChildAddressLocation {
    /// Parse the canonical string form: `topic1`, `topic2`, `topic3`, or
    /// `offset<N>` with `N` a non-negative multiple of 32.
    pub fn parse(value: &str) -> Result<Self, CriteriaError> {
        match value {
            "topic1" => Ok(ChildAddressLocation::Topic1),
            "topic2" => Ok(ChildAddressLocation::Topic2),
            "topic3" => Ok(ChildAddressLocation::Topic3),
            other => other
                .strip_prefix("offset")
                .and_then(|suffix| suffix.parse::<u64>().ok())
                .filter(|offset| offset % 32 == 0)
                .map(ChildAddressLocation::Offset)
                .ok_or_else(|| Report::new(CriteriaError::InvalidChildAddressLocation))
                .attach_printable_lazy(|| format!("location: {other}")),
        }
    }

    fn topic_position(&self) -> Option<usize> {
        match self {
            ChildAddressLocation::Topic1 => Some(1),
            ChildAddressLocation::Topic2 => Some(2),
            ChildAddressLocation::Topic3 => Some(3),
            ChildAddressLocation::Offset(_) => None,
        }
    }
}

impl fmt::Display for ChildAddressLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChildAddressLocation::Topic1 => write!(f, "topic1"),
            ChildAddressLocation::Topic2 => write!(f, "topic2"),
            ChildAddressLocation::Topic3 => write!(f, "topic3"),
            ChildAddressLocation::Offset(offset) => write!(f, "offset{offset}"),
        }
    }
}

/// A factory contract whose emissions announce child deployments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Factory {
    pub address: Address,
    pub event_selector: B256,
    pub child_address_location: ChildAddressLocation,
}

impl Factory {
    /// Deterministic 128-bit storage key for this factory on the given chain.
    pub fn factory_id(&self, chain_id: ChainId) -> String {
        let location = self.child_address_location.to_string();
        let mut preimage = Vec::with_capacity(8 + 20 + 32 + location.len());
        preimage.extend_from_slice(&chain_id.to_be_bytes());
        preimage.extend_from_slice(self.address.as_slice());
        preimage.extend_from_slice(self.event_selector.as_slice());
        preimage.extend_from_slice(location.as_bytes());
        let digest = keccak256(&preimage);
        format!("0x{}", hex::encode(&digest[..16]))
    }

    /// The log filter matching this factory's own parent-emission logs.
    pub fn parent_criteria(&self) -> LogFilterCriteria {
        LogFilterCriteria {
            address: AddressFilter::exact(self.address),
            topics: [
                TopicFilter::exact(self.event_selector),
                TopicFilter::Any,
                TopicFilter::Any,
                TopicFilter::Any,
            ],
        }
    }

    /// Extract the child address from a parent-emission log. Returns `None`
    /// when the log does not carry the configured topic or data range.
    pub fn extract_child_address(&self, topics: &[B256], data: &[u8]) -> Option<Address> {
        match self.child_address_location {
            ChildAddressLocation::Offset(offset) => {
                let start = offset as usize + WORD_PADDING;
                let word = data.get(start..start + Address::len_bytes())?;
                Some(Address::from_slice(word))
            }
            _ => {
                let position = self.child_address_location.topic_position()?;
                let topic = topics.get(position)?;
                Some(Address::from_slice(&topic[WORD_PADDING..]))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::{address, b256};

    use super::*;

    fn factory(location: ChildAddressLocation) -> Factory {
        Factory {
            address: address!("00000000000000000000000000000000000000f1"),
            event_selector: b256!(
                "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"
            ),
            child_address_location: location,
        }
    }

    fn padded(address: Address) -> B256 {
        B256::left_padding_from(address.as_slice())
    }

    #[test]
    fn test_parse_locations() {
        assert_eq!(
            ChildAddressLocation::parse("topic2").unwrap(),
            ChildAddressLocation::Topic2
        );
        assert_eq!(
            ChildAddressLocation::parse("offset64").unwrap(),
            ChildAddressLocation::Offset(64)
        );
        assert!(ChildAddressLocation::parse("topic0").is_err());
        assert!(ChildAddressLocation::parse("offset33").is_err());
        assert!(ChildAddressLocation::parse("data").is_err());
    }

    #[test]
    fn test_extract_from_topic() {
        let child = address!("00000000000000000000000000000000000000c1");
        let factory = factory(ChildAddressLocation::Topic1);

        let extracted = factory
            .extract_child_address(&[factory.event_selector, padded(child)], &[])
            .unwrap();
        assert_eq!(extracted, child);

        // Missing topic yields nothing.
        assert!(factory
            .extract_child_address(&[factory.event_selector], &[])
            .is_none());
    }

    #[test]
    fn test_extract_from_offset() {
        let child = address!("00000000000000000000000000000000000000c2");
        let factory = factory(ChildAddressLocation::Offset(32));

        // Two data words; the child sits right-aligned in the second.
        let mut data = vec![0u8; 64];
        data[32..].copy_from_slice(padded(child).as_slice());

        let extracted = factory
            .extract_child_address(&[factory.event_selector], &data)
            .unwrap();
        assert_eq!(extracted, child);

        // Truncated payload yields nothing.
        assert!(factory
            .extract_child_address(&[factory.event_selector], &data[..40])
            .is_none());
    }

    #[test]
    fn test_factory_id_distinguishes_location() {
        let chain_id = 1;
        let by_topic = factory(ChildAddressLocation::Topic1);
        let by_offset = factory(ChildAddressLocation::Offset(32));
        assert_ne!(by_topic.factory_id(chain_id), by_offset.factory_id(chain_id));
    }

    #[test]
    fn test_parent_criteria_matches_emission() {
        let factory = factory(ChildAddressLocation::Topic1);
        let criteria = factory.parent_criteria();

        assert!(criteria.matches(&factory.address, &[factory.event_selector]));
        assert!(!criteria.matches(&factory.address, &[B256::ZERO]));
    }
}
