//! Durable event store for the emberlog event indexer.
//!
//! The store records raw chain artifacts (blocks, transactions, logs) once
//! and exposes them through per-source lenses: direct log filters and
//! dynamically discovered factory children. Alongside the artifacts it
//! tracks, per filter, which block ranges have already been indexed, so a
//! backfill never re-fetches covered ranges and narrower filters reuse
//! broader filters' coverage. A read-through cache keyed by
//! `(chain, contract, call data, block)` deduplicates identical contract
//! reads across runs.
//!
//! The backing engine is in-process SQLite behind an async facade; the
//! contract is serializability at the transaction boundary, not a specific
//! engine.

mod artifacts;
mod children;
pub mod db;
pub mod error;
pub mod events;
mod intervals;
pub mod read_cache;
mod schema;
mod sql;
pub mod store;

pub use self::db::{Db, DbLocation, EventStoreOptions};
pub use self::error::{EventStoreError, EventStoreErrorExt};
pub use self::events::{EventCursor, EventFilter, EventPage, LogEvent, DEFAULT_PAGE_SIZE};
pub use self::read_cache::ContractReadResult;
pub use self::store::{EventStore, DEFAULT_CHILD_PAGE_SIZE};
