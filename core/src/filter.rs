//! Log filter criteria: canonical form, identity, subsumption, matching.
//!
//! A filter constrains the emitting address and up to four topic positions.
//! Each slot is either a wildcard or a non-empty set of accepted values. The
//! canonical JSON rendering (sets sorted, wildcards as `null`) makes the
//! filter hashable, so semantically equal filters share one storage key.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use alloy_primitives::{hex, keccak256, Address, ChainId, B256};
use error_stack::{Report, Result, ResultExt};
use serde_json::{json, Value};

use crate::error::CriteriaError;

/// Number of topic positions a log can carry.
pub const TOPIC_SLOTS: usize = 4;

/// One criteria slot: accept anything, or one of a non-empty set of values.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SlotFilter<T> {
    #[default]
    Any,
    OneOf(BTreeSet<T>),
}

pub type AddressFilter = SlotFilter<Address>;
pub type TopicFilter = SlotFilter<B256>;

impl<T: Ord + Copy> SlotFilter<T> {
    /// A slot accepting exactly one value.
    pub fn exact(value: T) -> Self {
        SlotFilter::OneOf(BTreeSet::from([value]))
    }

    /// A slot accepting any of the given values. An empty set is a wildcard.
    pub fn one_of(values: impl IntoIterator<Item = T>) -> Self {
        let values: BTreeSet<T> = values.into_iter().collect();
        if values.is_empty() {
            SlotFilter::Any
        } else {
            SlotFilter::OneOf(values)
        }
    }

    pub fn is_any(&self) -> bool {
        matches!(self, SlotFilter::Any)
    }

    pub fn matches(&self, value: &T) -> bool {
        match self {
            SlotFilter::Any => true,
            SlotFilter::OneOf(values) => values.contains(value),
        }
    }

    /// Whether every value accepted by `self` is accepted by `other`.
    ///
    /// A wildcard is only covered by a wildcard: it stands for the full value
    /// domain, which no finite set contains.
    pub fn is_subset_of(&self, other: &Self) -> bool {
        match (self, other) {
            (_, SlotFilter::Any) => true,
            (SlotFilter::Any, SlotFilter::OneOf(_)) => false,
            (SlotFilter::OneOf(own), SlotFilter::OneOf(other)) => own.is_subset(other),
        }
    }
}

impl<T: Ord + Copy + fmt::LowerHex> SlotFilter<T> {
    /// Canonical JSON rendering: `null` for wildcard, a sorted array of
    /// lowercase hex strings otherwise.
    pub fn to_json(&self) -> Value {
        match self {
            SlotFilter::Any => Value::Null,
            SlotFilter::OneOf(values) => Value::Array(
                values
                    .iter()
                    .map(|value| Value::String(format!("{value:#x}")))
                    .collect(),
            ),
        }
    }
}

impl<T: Ord + Copy + FromStr> SlotFilter<T> {
    /// Parse a slot back from its canonical JSON rendering.
    pub fn from_json(value: &Value) -> Result<Self, CriteriaError> {
        match value {
            Value::Null => Ok(SlotFilter::Any),
            Value::Array(entries) => {
                let mut values = BTreeSet::new();
                for entry in entries {
                    let text = entry.as_str().ok_or(CriteriaError::MalformedSlot)?;
                    let parsed = T::from_str(text).map_err(|_| {
                        Report::new(CriteriaError::MalformedSlot)
                            .attach_printable(format!("value: {text}"))
                    })?;
                    values.insert(parsed);
                }
                if values.is_empty() {
                    return Err(Report::new(CriteriaError::MalformedSlot))
                        .attach_printable("empty slot set");
                }
                Ok(SlotFilter::OneOf(values))
            }
            other => Err(Report::new(CriteriaError::MalformedSlot))
                .attach_printable(format!("unexpected slot value: {other}")),
        }
    }
}

/// The criteria of a log filter in canonical form.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LogFilterCriteria {
    pub address: AddressFilter,
    pub topics: [TopicFilter; TOPIC_SLOTS],
}

impl LogFilterCriteria {
    /// Criteria constraining only the emitting address.
    pub fn new(address: AddressFilter) -> Self {
        LogFilterCriteria {
            address,
            topics: Default::default(),
        }
    }

    /// Criteria with positional topic constraints. Missing trailing positions
    /// are wildcards; more than [`TOPIC_SLOTS`] positions is an error.
    pub fn with_topics(
        address: AddressFilter,
        topics: Vec<TopicFilter>,
    ) -> Result<Self, CriteriaError> {
        if topics.len() > TOPIC_SLOTS {
            return Err(Report::new(CriteriaError::TooManyTopics))
                .attach_printable_lazy(|| format!("positions: {}", topics.len()));
        }

        let mut slots: [TopicFilter; TOPIC_SLOTS] = Default::default();
        for (slot, topic) in slots.iter_mut().zip(topics) {
            *slot = topic;
        }

        Ok(LogFilterCriteria {
            address,
            topics: slots,
        })
    }

    /// Canonical JSON form. Set slots are sorted, wildcards render as `null`,
    /// so semantically equal criteria serialize identically.
    pub fn canonical_json(&self) -> Value {
        json!({
            "address": self.address.to_json(),
            "topics": self.topics.iter().map(SlotFilter::to_json).collect::<Vec<_>>(),
        })
    }

    /// Rebuild criteria from the slots of [`Self::canonical_json`].
    pub fn from_slots(
        address: &Value,
        topics: [&Value; TOPIC_SLOTS],
    ) -> Result<Self, CriteriaError> {
        let address = AddressFilter::from_json(address).attach_printable("address slot")?;
        let mut slots: [TopicFilter; TOPIC_SLOTS] = Default::default();
        for (position, (slot, value)) in slots.iter_mut().zip(topics).enumerate() {
            *slot = TopicFilter::from_json(value)
                .attach_printable_lazy(|| format!("topic position: {position}"))?;
        }
        Ok(LogFilterCriteria {
            address,
            topics: slots,
        })
    }

    /// Deterministic 128-bit storage key for this filter on the given chain.
    pub fn filter_id(&self, chain_id: ChainId) -> String {
        let canonical = self.canonical_json().to_string();
        let mut preimage = Vec::with_capacity(8 + canonical.len());
        preimage.extend_from_slice(&chain_id.to_be_bytes());
        preimage.extend_from_slice(canonical.as_bytes());
        let digest = keccak256(&preimage);
        format!("0x{}", hex::encode(&digest[..16]))
    }

    /// The subsumption relation: every log matched by `self` is matched by
    /// `other`. Coverage recorded under `other` is then valid for `self`.
    pub fn is_subset_of(&self, other: &Self) -> bool {
        self.address.is_subset_of(&other.address)
            && self
                .topics
                .iter()
                .zip(other.topics.iter())
                .all(|(own, other)| own.is_subset_of(other))
    }

    /// Positive match of a concrete log against the criteria. A constrained
    /// position the log does not carry fails the match.
    pub fn matches(&self, address: &Address, topics: &[B256]) -> bool {
        if !self.address.matches(address) {
            return false;
        }
        self.topics.iter().enumerate().all(|(position, slot)| {
            match (slot, topics.get(position)) {
                (SlotFilter::Any, _) => true,
                (slot, Some(topic)) => slot.matches(topic),
                (_, None) => false,
            }
        })
    }
}
