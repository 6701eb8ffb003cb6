//! The event store facade: the single transactional entry point.
//!
//! Backfill and realtime fetchers push artifacts and coverage intervals in;
//! the event-processing pipeline pulls enriched events out. Every write runs
//! inside one immediate transaction and is retried as a whole on lock
//! conflicts, so concurrent backfill, realtime ingestion and reorg unwinding
//! always observe each other's effects completely or not at all.

use std::collections::{BTreeSet, HashMap};

use alloy_primitives::{Address, Bytes, ChainId, U256};
use async_stream::try_stream;
use error_stack::Result;
use futures::Stream;
use rusqlite::params;
use tracing::debug;

use emberlog_core::factory::Factory;
use emberlog_core::filter::LogFilterCriteria;
use emberlog_core::interval::BlockInterval;
use emberlog_core::models::{Block, Log, Transaction};

use crate::children;
use crate::db::{Db, EventStoreOptions, SqliteResultExt};
use crate::error::EventStoreError;
use crate::events::{self, EventCursor, EventFilter, EventPage, LogEvent};
use crate::intervals::{self, Ledger};
use crate::read_cache::{self, ContractReadResult};
use crate::sql::{chain_param, u256_hex};
use crate::{artifacts, schema};

/// Default number of child addresses per page of
/// [`EventStore::get_factory_child_addresses`].
pub const DEFAULT_CHILD_PAGE_SIZE: usize = 500;

/// Durable store for chain artifacts, per-filter coverage intervals, factory
/// child discovery and cached contract reads.
#[derive(Clone)]
pub struct EventStore {
    db: Db,
}

impl EventStore {
    /// Open the database and bring the schema up to date.
    pub async fn new(options: EventStoreOptions) -> Result<Self, EventStoreError> {
        let db = Db::open(&options)?;
        db.write(|tx| schema::migrate(tx)).await?;
        Ok(EventStore { db })
    }

    /// Raw engine handle. Test introspection only; production consumers use
    /// the typed operations.
    pub fn db(&self) -> &Db {
        &self.db
    }

    /// Record one backfill observation: a block with its transactions and
    /// logs, plus the coverage interval it proves for the filter. One
    /// transaction; the filter's interval set is re-merged before commit.
    pub async fn insert_log_filter_interval(
        &self,
        chain_id: ChainId,
        criteria: LogFilterCriteria,
        block: Block,
        transactions: Vec<Transaction>,
        logs: Vec<Log>,
        interval: BlockInterval,
    ) -> Result<(), EventStoreError> {
        self.db
            .write(move |tx| {
                artifacts::upsert_block(tx, chain_id, &block)?;
                for transaction in &transactions {
                    artifacts::upsert_transaction(tx, chain_id, transaction)?;
                }
                for log in &logs {
                    artifacts::upsert_log(tx, chain_id, log)?;
                }
                let filter_id = intervals::ensure_log_filter(tx, chain_id, &criteria)?;
                intervals::insert_and_merge(tx, Ledger::LogFilters, &filter_id, interval)
            })
            .await
    }

    /// Aggregate coverage for the criteria: the union of the intervals of
    /// every stored filter that subsumes it. A narrower filter transparently
    /// reuses a broader filter's coverage.
    pub async fn get_log_filter_intervals(
        &self,
        chain_id: ChainId,
        criteria: LogFilterCriteria,
    ) -> Result<Vec<BlockInterval>, EventStoreError> {
        self.db
            .read(move |conn| intervals::log_filter_coverage(conn, chain_id, &criteria))
            .await
    }

    /// Record one backfill observation of a factory's children's coverage.
    pub async fn insert_factory_log_filter_interval(
        &self,
        chain_id: ChainId,
        factory: Factory,
        block: Block,
        transactions: Vec<Transaction>,
        logs: Vec<Log>,
        interval: BlockInterval,
    ) -> Result<(), EventStoreError> {
        self.db
            .write(move |tx| {
                artifacts::upsert_block(tx, chain_id, &block)?;
                for transaction in &transactions {
                    artifacts::upsert_transaction(tx, chain_id, transaction)?;
                }
                for log in &logs {
                    artifacts::upsert_log(tx, chain_id, log)?;
                }
                let factory_id = intervals::ensure_factory(tx, chain_id, &factory)?;
                intervals::insert_and_merge(tx, Ledger::Factories, &factory_id, interval)
            })
            .await
    }

    /// Coverage for a factory. Matching is identity on
    /// `(address, event selector, child location)`: topic constraints on the
    /// query do not narrow the answer.
    pub async fn get_factory_log_filter_intervals(
        &self,
        chain_id: ChainId,
        factory: Factory,
    ) -> Result<Vec<BlockInterval>, EventStoreError> {
        self.db
            .read(move |conn| intervals::factory_coverage(conn, chain_id, &factory))
            .await
    }

    /// Write raw parent-emission logs so child discovery can query them
    /// later. No interval bookkeeping happens here.
    pub async fn insert_factory_child_address_logs(
        &self,
        chain_id: ChainId,
        logs: Vec<Log>,
    ) -> Result<(), EventStoreError> {
        self.db
            .write(move |tx| {
                for log in &logs {
                    artifacts::upsert_log(tx, chain_id, log)?;
                }
                Ok(())
            })
            .await
    }

    /// Pages of child addresses announced by the factory up to the given
    /// block, in announcement order. Pages are never empty; the stream is
    /// finite, single-pass, and does no further work once dropped.
    ///
    /// `page_size` defaults to [`DEFAULT_CHILD_PAGE_SIZE`].
    pub fn get_factory_child_addresses(
        &self,
        chain_id: ChainId,
        factory: Factory,
        up_to_block: U256,
        page_size: Option<usize>,
    ) -> impl Stream<Item = Result<Vec<Address>, EventStoreError>> {
        let db = self.db.clone();
        try_stream! {
            let page_size = page_size.unwrap_or(DEFAULT_CHILD_PAGE_SIZE).max(1);
            let mut cursor: Option<(U256, u64)> = None;

            loop {
                let query_factory = factory.clone();
                let rows = db
                    .read(move |conn| {
                        children::parent_log_page(
                            conn,
                            chain_id,
                            &query_factory,
                            &up_to_block,
                            cursor.as_ref(),
                            page_size,
                        )
                    })
                    .await?;

                let Some(last) = rows.last() else { break };
                cursor = Some((last.block_number, last.log_index));
                let row_count = rows.len();

                let addresses: Vec<Address> = rows
                    .iter()
                    .filter_map(|row| factory.extract_child_address(&row.topics, &row.data))
                    .collect();
                if !addresses.is_empty() {
                    yield addresses;
                }

                if row_count < page_size {
                    break;
                }
            }
        }
    }

    /// Time-ordered pages of enriched events matching the given sources.
    ///
    /// Replay order is `(timestamp, chain id, block number, log index)`. A
    /// log matching several sources appears once per source — log filters
    /// first, then factories, each in input order. A factory source matches
    /// a log when the emitting address was announced as a child at or before
    /// the log's block.
    pub fn get_log_events(
        &self,
        filter: EventFilter,
    ) -> impl Stream<Item = Result<EventPage, EventStoreError>> {
        let db = self.db.clone();
        let chain_ids: Vec<ChainId> = filter
            .log_filters
            .iter()
            .map(|source| source.chain_id)
            .chain(filter.factories.iter().map(|source| source.chain_id))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        try_stream! {
            let page_size = filter.page_size.max(1);

            // Child sets are loaded once per stream, aligned with the
            // factory source list.
            let mut children_by_source: Vec<HashMap<Address, U256>> =
                Vec::with_capacity(filter.factories.len());
            for source in &filter.factories {
                let chain_id = source.chain_id;
                let factory = source.factory.clone();
                let children = db
                    .read(move |conn| children::child_first_seen(conn, chain_id, &factory))
                    .await?;
                children_by_source.push(children);
            }

            let mut scan_cursor: Option<EventCursor> = None;
            loop {
                let rows = {
                    let chain_ids = chain_ids.clone();
                    let from_timestamp = filter.from_timestamp;
                    let to_timestamp = filter.to_timestamp;
                    let cursor = scan_cursor.clone();
                    db.read(move |conn| {
                        events::candidate_page(
                            conn,
                            &chain_ids,
                            &from_timestamp,
                            &to_timestamp,
                            cursor.as_ref(),
                            page_size,
                        )
                    })
                    .await?
                };

                let Some(last_row) = rows.last() else { break };
                // The scan cursor advances past every row we looked at, not
                // just the ones that matched, so progress is guaranteed.
                scan_cursor = Some(EventCursor {
                    timestamp: last_row.block.timestamp,
                    chain_id: last_row.chain_id,
                    block_number: last_row.block.number,
                    log_index: last_row.log.log_index,
                });
                let row_count = rows.len();

                let mut events = Vec::new();
                for row in rows {
                    for source in &filter.log_filters {
                        if source.matches(row.chain_id, &row.log) {
                            events.push(LogEvent {
                                source_name: source.name.clone(),
                                chain_id: row.chain_id,
                                log: row.log.clone(),
                                block: row.block.clone(),
                                transaction: row.transaction.clone(),
                            });
                        }
                    }
                    for (source, children) in
                        filter.factories.iter().zip(&children_by_source)
                    {
                        let is_child = children
                            .get(&row.log.address)
                            .is_some_and(|first_seen| *first_seen <= row.log.block_number);
                        if is_child && source.matches_log(row.chain_id, &row.log) {
                            events.push(LogEvent {
                                source_name: source.name.clone(),
                                chain_id: row.chain_id,
                                log: row.log.clone(),
                                block: row.block.clone(),
                                transaction: row.transaction.clone(),
                            });
                        }
                    }
                }

                let page_cursor = events.last().map(|event| EventCursor {
                    timestamp: event.block.timestamp,
                    chain_id: event.chain_id,
                    block_number: event.block.number,
                    log_index: event.log.log_index,
                });
                if let Some(cursor) = page_cursor {
                    debug!(events = events.len(), "emitting replay page");
                    yield EventPage { events, cursor };
                }

                if row_count < page_size {
                    break;
                }
            }
        }
    }

    /// Upsert realtime artifacts. No interval bookkeeping happens here; the
    /// caller records coverage separately once it knows what the block
    /// proves.
    pub async fn insert_realtime_block(
        &self,
        chain_id: ChainId,
        block: Block,
        transactions: Vec<Transaction>,
        logs: Vec<Log>,
    ) -> Result<(), EventStoreError> {
        self.db
            .write(move |tx| {
                artifacts::upsert_block(tx, chain_id, &block)?;
                for transaction in &transactions {
                    artifacts::upsert_transaction(tx, chain_id, transaction)?;
                }
                for log in &logs {
                    artifacts::upsert_log(tx, chain_id, log)?;
                }
                Ok(())
            })
            .await
    }

    /// Record realtime coverage for a set of filters and factories. Factory
    /// coverage is recorded twice: under the factory itself, and under the
    /// synthetic parent-emission filter so the raw emissions stay queryable
    /// through the normal log path.
    pub async fn insert_realtime_interval(
        &self,
        chain_id: ChainId,
        log_filters: Vec<LogFilterCriteria>,
        factories: Vec<Factory>,
        interval: BlockInterval,
    ) -> Result<(), EventStoreError> {
        self.db
            .write(move |tx| {
                for criteria in &log_filters {
                    let filter_id = intervals::ensure_log_filter(tx, chain_id, criteria)?;
                    intervals::insert_and_merge(tx, Ledger::LogFilters, &filter_id, interval)?;
                }
                for factory in &factories {
                    let parent_id =
                        intervals::ensure_log_filter(tx, chain_id, &factory.parent_criteria())?;
                    intervals::insert_and_merge(tx, Ledger::LogFilters, &parent_id, interval)?;

                    let factory_id = intervals::ensure_factory(tx, chain_id, factory)?;
                    intervals::insert_and_merge(tx, Ledger::Factories, &factory_id, interval)?;
                }
                Ok(())
            })
            .await
    }

    /// Unwind a reorg: drop every artifact at or past `from_block` for the
    /// chain and clamp coverage to end before it. Whether `from_block`
    /// crosses a finalized checkpoint is the caller's policy; the delete is
    /// unconditional.
    pub async fn delete_realtime_data(
        &self,
        chain_id: ChainId,
        from_block: U256,
    ) -> Result<(), EventStoreError> {
        self.db
            .write(move |tx| {
                let chain = chain_param(chain_id)?;
                let from_hex = u256_hex(&from_block);
                let clamped_end = u256_hex(&from_block.saturating_sub(U256::from(1)));

                tx.execute(
                    "DELETE FROM logs WHERE chain_id = ?1 AND block_number >= ?2",
                    params![chain, from_hex],
                )
                .db_context()?;
                tx.execute(
                    "DELETE FROM transactions WHERE chain_id = ?1 AND block_number >= ?2",
                    params![chain, from_hex],
                )
                .db_context()?;
                tx.execute(
                    "DELETE FROM blocks WHERE chain_id = ?1 AND number >= ?2",
                    params![chain, from_hex],
                )
                .db_context()?;

                // Intervals starting inside the unwound range disappear;
                // intervals straddling it are clamped to end just before.
                tx.execute(
                    "DELETE FROM log_filter_intervals WHERE start_block >= ?2 AND filter_id \
                     IN (SELECT id FROM log_filters WHERE chain_id = ?1)",
                    params![chain, from_hex],
                )
                .db_context()?;
                tx.execute(
                    "UPDATE log_filter_intervals SET end_block = ?3 WHERE end_block >= ?2 \
                     AND filter_id IN (SELECT id FROM log_filters WHERE chain_id = ?1)",
                    params![chain, from_hex, clamped_end],
                )
                .db_context()?;
                tx.execute(
                    "DELETE FROM factory_log_filter_intervals WHERE start_block >= ?2 AND \
                     factory_id IN (SELECT id FROM factories WHERE chain_id = ?1)",
                    params![chain, from_hex],
                )
                .db_context()?;
                tx.execute(
                    "UPDATE factory_log_filter_intervals SET end_block = ?3 WHERE \
                     end_block >= ?2 AND factory_id IN \
                     (SELECT id FROM factories WHERE chain_id = ?1)",
                    params![chain, from_hex, clamped_end],
                )
                .db_context()?;

                Ok(())
            })
            .await
    }

    /// Cache a contract read. Re-inserting the same key replaces the result.
    pub async fn insert_contract_read_result(
        &self,
        entry: ContractReadResult,
    ) -> Result<(), EventStoreError> {
        self.db
            .write(move |tx| read_cache::upsert(tx, &entry))
            .await
    }

    /// Cached contract read, or `None` on a miss. A miss is not an error:
    /// the caller performs the real call and inserts the result before
    /// continuing.
    pub async fn get_contract_read_result(
        &self,
        chain_id: ChainId,
        address: Address,
        block_number: U256,
        data: Bytes,
    ) -> Result<Option<ContractReadResult>, EventStoreError> {
        self.db
            .read(move |conn| read_cache::get(conn, chain_id, &address, &block_number, &data))
            .await
    }
}
