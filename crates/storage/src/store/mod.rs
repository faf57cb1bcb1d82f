#![forbid(unsafe_code)]

mod config;
mod counters;
mod dependencies;
mod dialect;
mod error;
mod executor;
mod gates;
mod initiatives;
mod migrations;
mod phases;
mod rows;
mod runs;
mod tasks;
mod templates;
mod tx;
mod workflows;

pub use config::{DATABASE_FILE, StoreConfig};
pub use dialect::Dialect;
pub use error::{ErrorKind, StoreError};
pub use migrations::{MIGRATIONS, Migration, apply_migrations, schema_version};
pub use tx::{CancelHandle, TxContext, TxOps};

use error::SqlContext;
use orc_core::{Clock, SystemClock};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug)]
pub struct SqliteStore {
    conn: Connection,
    config: StoreConfig,
    clock: Arc<dyn Clock>,
}

impl SqliteStore {
    /// Opens (creating if needed) `orc.db` inside `storage_dir`.
    pub fn open(storage_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let storage_dir = storage_dir.as_ref();
        std::fs::create_dir_all(storage_dir)?;
        Self::open_with(StoreConfig::in_dir(storage_dir))
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::open_with(StoreConfig::in_memory())
    }

    pub fn open_with(config: StoreConfig) -> Result<Self, StoreError> {
        let mut conn = match config.path.as_deref() {
            Some(path) => Connection::open(path).op("open database")?,
            None => Connection::open_in_memory().op("open in-memory database")?,
        };
        conn.busy_timeout(config.busy_timeout())
            .op("set busy timeout")?;
        if config.foreign_keys {
            conn.execute_batch("PRAGMA foreign_keys = ON;")
                .op("enable foreign keys")?;
        }
        if config.wal && config.path.is_some() {
            conn.query_row("PRAGMA journal_mode = WAL;", [], |_| Ok(()))
                .op("enable wal")?;
        }

        let applied = apply_migrations(&mut conn, MIGRATIONS)?;
        tracing::debug!(
            path = ?config.path,
            applied = applied.len(),
            "opened store"
        );

        Ok(Self {
            conn,
            config,
            clock: Arc::new(SystemClock),
        })
    }

    /// Replaces the time source used for every stored timestamp.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    /// Current time of the store clock.
    pub fn now(&self) -> time::OffsetDateTime {
        self.clock.now()
    }

    pub fn schema_version(&self) -> Result<i64, StoreError> {
        schema_version(&self.conn)
    }

    /// Runs `work` in one transaction: commit on `Ok`, roll back on `Err`.
    /// The closure's error is returned unchanged unless the rollback also
    /// fails, in which case both are reported.
    pub fn run_in_tx<T, F>(&mut self, ctx: &TxContext, work: F) -> Result<T, StoreError>
    where
        F: FnOnce(&TxOps<'_>) -> Result<T, StoreError>,
    {
        ctx.check()?;
        let dialect = self.dialect();
        let tx = self.conn.transaction().op("begin transaction")?;
        let result = {
            let ops = TxOps::new(&tx, dialect, &*self.clock, ctx);
            work(&ops).and_then(|value| ctx.check().map(|()| value))
        };

        match result {
            Ok(value) => {
                tx.commit().op("commit transaction")?;
                Ok(value)
            }
            Err(original) => {
                tracing::warn!(error = %original, "rolling back transaction");
                match tx.rollback() {
                    Ok(()) => Err(original),
                    Err(rollback) => Err(StoreError::RollbackFailed {
                        rollback,
                        original: Box::new(original),
                    }),
                }
            }
        }
    }

    /// Writes outside an explicit context still run in a transaction.
    fn write<T, F>(&mut self, work: F) -> Result<T, StoreError>
    where
        F: FnOnce(&TxOps<'_>) -> Result<T, StoreError>,
    {
        self.run_in_tx(&TxContext::background(), work)
    }

    /// Runs `work` without opening a transaction: reads and single-statement
    /// writes.
    fn direct<T, F>(&self, work: F) -> Result<T, StoreError>
    where
        F: FnOnce(&TxOps<'_>) -> Result<T, StoreError>,
    {
        let ctx = TxContext::background();
        let ops = TxOps::new(&self.conn, self.dialect(), &*self.clock, &ctx);
        work(&ops)
    }
}
