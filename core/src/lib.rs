//! Core domain model for the emberlog event indexer.
//!
//! This crate contains the pure, I/O-free half of the indexer storage core:
//! chain artifact models, log filter criteria with their canonical form and
//! subsumption relation, the closed block-interval algebra used to track
//! indexed coverage, and factory descriptors with child-address extraction.
//!
//! Persistence lives in the `emberlog-store` crate.

pub mod error;
pub mod factory;
pub mod filter;
pub mod interval;
pub mod models;
pub mod source;

pub use self::error::CriteriaError;
pub use self::factory::{ChildAddressLocation, Factory};
pub use self::filter::{AddressFilter, LogFilterCriteria, SlotFilter, TopicFilter, TOPIC_SLOTS};
pub use self::interval::{merge, BlockInterval};
pub use self::models::{AccessListItem, Block, Log, Transaction, TransactionData};
pub use self::source::{FactorySource, LogFilterSource};
