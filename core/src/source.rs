//! Event-source descriptors used by the replay iterator.
//!
//! A source names one lens over the raw log table: either a direct log
//! filter, or the dynamically discovered children of a factory. A single log
//! can belong to several sources at once; the replay iterator emits it once
//! per matching source, tagged with the source name.

use alloy_primitives::{ChainId, U256};

use crate::factory::Factory;
use crate::filter::{LogFilterCriteria, TopicFilter, TOPIC_SLOTS};
use crate::models::Log;

/// A direct log filter event source.
#[derive(Debug, Clone)]
pub struct LogFilterSource {
    pub name: String,
    pub chain_id: ChainId,
    pub criteria: LogFilterCriteria,
    /// Lower bound on the containing block number.
    pub from_block: Option<U256>,
    /// When present, intersects topic position 0. The empty list matches
    /// nothing at all.
    pub include_event_selectors: Option<Vec<alloy_primitives::B256>>,
}

impl LogFilterSource {
    pub fn matches(&self, chain_id: ChainId, log: &Log) -> bool {
        if self.chain_id != chain_id {
            return false;
        }
        if let Some(from_block) = self.from_block {
            if log.block_number < from_block {
                return false;
            }
        }
        if let Some(selectors) = &self.include_event_selectors {
            match log.topic0() {
                Some(topic0) if selectors.contains(topic0) => {}
                _ => return false,
            }
        }
        self.criteria.matches(&log.address, &log.topics)
    }
}

/// A factory event source: matches logs emitted by the factory's children.
///
/// Whether an address is a child at a given block is knowledge held by the
/// store, so the address check happens there; this descriptor carries the
/// remaining per-log criteria.
#[derive(Debug, Clone)]
pub struct FactorySource {
    pub name: String,
    pub chain_id: ChainId,
    pub factory: Factory,
    /// Positional topic constraints on the children's logs.
    pub topics: [TopicFilter; TOPIC_SLOTS],
}

impl FactorySource {
    pub fn new(name: impl Into<String>, chain_id: ChainId, factory: Factory) -> Self {
        FactorySource {
            name: name.into(),
            chain_id,
            factory,
            topics: Default::default(),
        }
    }

    /// Per-log match, not including the child-address membership check.
    pub fn matches_log(&self, chain_id: ChainId, log: &Log) -> bool {
        if self.chain_id != chain_id {
            return false;
        }
        self.topics.iter().enumerate().all(|(position, slot)| {
            match (slot, log.topics.get(position)) {
                (TopicFilter::Any, _) => true,
                (slot, Some(topic)) => slot.matches(topic),
                (_, None) => false,
            }
        })
    }
}
