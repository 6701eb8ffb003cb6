//! Guarded database handle with async execution and write retry.
//!
//! The store presents a cooperative async surface over an in-process engine:
//! every statement runs on the blocking pool, and the mutex serializes access
//! to the single connection. Write transactions open in immediate mode so two
//! writers cannot interleave; when the engine still reports a lock conflict
//! (file-backed databases shared between processes), the whole write closure
//! is retried with jittered exponential backoff.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use error_stack::{Report, Result, ResultExt};
use rand::Rng;
use rusqlite::{Connection, ErrorCode, TransactionBehavior};
use tracing::{debug, info};

use crate::error::{EventStoreError, EventStoreErrorExt};

/// Where the database lives.
#[derive(Debug, Clone, Default)]
pub enum DbLocation {
    /// Private in-memory database, dropped with the store.
    #[default]
    Memory,
    /// File-backed database at the given path.
    Path(PathBuf),
}

/// Store construction options.
#[derive(Debug, Clone)]
pub struct EventStoreOptions {
    pub location: DbLocation,
    /// How long the engine waits on a locked database before reporting a
    /// conflict.
    pub busy_timeout: Duration,
    /// Attempts per write before a serialization conflict surfaces.
    pub max_write_attempts: u32,
    /// Base delay of the jittered exponential backoff between attempts.
    pub retry_base_delay: Duration,
}

impl Default for EventStoreOptions {
    fn default() -> Self {
        EventStoreOptions {
            location: DbLocation::Memory,
            busy_timeout: Duration::from_secs(5),
            max_write_attempts: 5,
            retry_base_delay: Duration::from_millis(10),
        }
    }
}

/// Handle to the underlying engine.
#[derive(Clone)]
pub struct Db {
    connection: Arc<Mutex<Connection>>,
    max_write_attempts: u32,
    retry_base_delay: Duration,
}

impl Db {
    pub fn open(options: &EventStoreOptions) -> Result<Self, EventStoreError> {
        let connection = match &options.location {
            DbLocation::Memory => Connection::open_in_memory(),
            DbLocation::Path(path) => Connection::open(path),
        }
        .change_context(EventStoreError::Connection)
        .attach_printable("failed to open database")?;

        connection
            .busy_timeout(options.busy_timeout)
            .change_context(EventStoreError::Connection)?;
        connection
            .pragma_update(None, "foreign_keys", "ON")
            .change_context(EventStoreError::Connection)?;
        if let DbLocation::Path(path) = &options.location {
            connection
                .pragma_update(None, "journal_mode", "WAL")
                .change_context(EventStoreError::Connection)
                .attach_printable_lazy(|| format!("path: {}", path.display()))?;
        }

        info!(location = ?options.location, "event store database opened");

        Ok(Db {
            connection: Arc::new(Mutex::new(connection)),
            max_write_attempts: options.max_write_attempts.max(1),
            retry_base_delay: options.retry_base_delay,
        })
    }

    /// Run a read-only closure against the connection.
    pub async fn read<T, F>(&self, f: F) -> Result<T, EventStoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, EventStoreError> + Send + 'static,
    {
        let connection = self.connection.clone();
        tokio::task::spawn_blocking(move || {
            let guard = lock(&connection)?;
            f(&guard)
        })
        .await
        .change_context(EventStoreError::Connection)
        .attach_printable("database worker task failed")?
    }

    /// Run a write closure inside an immediate transaction. The closure must
    /// be idempotent up to its own writes: on a lock conflict the transaction
    /// rolls back and the closure runs again from scratch.
    pub async fn write<T, F>(&self, f: F) -> Result<T, EventStoreError>
    where
        T: Send + 'static,
        F: Fn(&rusqlite::Transaction<'_>) -> Result<T, EventStoreError> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        let mut attempt = 1;
        loop {
            let connection = self.connection.clone();
            let run = f.clone();
            let result: Result<T, EventStoreError> = tokio::task::spawn_blocking(move || {
                let mut guard = lock(&connection)?;
                let tx = guard
                    .transaction_with_behavior(TransactionBehavior::Immediate)
                    .map_err(map_sqlite_error)?;
                let value = (*run)(&tx)?;
                tx.commit().map_err(map_sqlite_error)?;
                Ok(value)
            })
            .await
            .change_context(EventStoreError::Connection)
            .attach_printable("database worker task failed")?;

            match result {
                Ok(value) => return Ok(value),
                Err(report)
                    if report.is_serialization_conflict()
                        && attempt < self.max_write_attempts =>
                {
                    let delay = self.backoff_delay(attempt);
                    debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "write conflict, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(report) => return Err(report),
            }
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.retry_base_delay.saturating_mul(1 << attempt.min(8));
        let jitter = rand::thread_rng().gen_range(0..=base.as_millis().max(1) as u64);
        base + Duration::from_millis(jitter)
    }
}

fn lock(connection: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>, EventStoreError> {
    connection.lock().map_err(|_| {
        Report::new(EventStoreError::Connection).attach_printable("database mutex poisoned")
    })
}

/// Classify an engine error into the store's error kinds.
pub(crate) fn map_sqlite_error(error: rusqlite::Error) -> Report<EventStoreError> {
    let kind = match &error {
        rusqlite::Error::SqliteFailure(failure, message) => match failure.code {
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                EventStoreError::SerializationConflict
            }
            ErrorCode::ConstraintViolation
                if message
                    .as_deref()
                    .is_some_and(|message| message.contains("FOREIGN KEY")) =>
            {
                EventStoreError::ReferentialViolation
            }
            _ => EventStoreError::Query,
        },
        _ => EventStoreError::Query,
    };
    Report::new(kind).attach_printable(error.to_string())
}

/// Shorthand to carry engine errors into the store's error kinds.
pub(crate) trait SqliteResultExt<T> {
    fn db_context(self) -> Result<T, EventStoreError>;
}

impl<T> SqliteResultExt<T> for std::result::Result<T, rusqlite::Error> {
    fn db_context(self) -> Result<T, EventStoreError> {
        self.map_err(map_sqlite_error)
    }
}
