#![forbid(unsafe_code)]

use super::dialect::Dialect;
use super::error::{SqlContext, StoreError};
use orc_core::Clock;
use orc_core::clock::{format_timestamp, truncate_micros};
use rusqlite::{Connection, OptionalExtension, Params, Row};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use time::OffsetDateTime;

/// Cancellation flag shared between a caller and the transactions it runs.
#[derive(Clone, Debug, Default)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Cancellation and deadline checked before every statement of a
/// transaction.
#[derive(Clone, Debug, Default)]
pub struct TxContext {
    cancel: Option<CancelHandle>,
    deadline: Option<Instant>,
}

impl TxContext {
    /// Never cancelled, no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_cancel(mut self, handle: &CancelHandle) -> Self {
        self.cancel = Some(handle.clone());
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn check(&self) -> Result<(), StoreError> {
        if self.cancel.as_ref().is_some_and(CancelHandle::is_cancelled) {
            return Err(StoreError::Cancelled);
        }
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(StoreError::DeadlineExceeded);
        }
        Ok(())
    }
}

/// Statement executor handed to transactional closures. Every entity
/// operation is available on it, so several can compose into one atomic
/// unit.
pub struct TxOps<'a> {
    conn: &'a Connection,
    dialect: Dialect,
    clock: &'a dyn Clock,
    ctx: &'a TxContext,
}

impl<'a> TxOps<'a> {
    pub(crate) fn new(
        conn: &'a Connection,
        dialect: Dialect,
        clock: &'a dyn Clock,
        ctx: &'a TxContext,
    ) -> Self {
        Self {
            conn,
            dialect,
            clock,
            ctx,
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Current time at storage precision.
    pub fn now(&self) -> OffsetDateTime {
        truncate_micros(self.clock.now())
    }

    pub(crate) fn now_text(&self) -> String {
        format_timestamp(self.now())
    }

    pub(crate) fn execute<P: Params>(
        &self,
        op: &str,
        sql: &str,
        params: P,
    ) -> Result<usize, StoreError> {
        self.ctx.check()?;
        self.conn.execute(sql, params).op(op)
    }

    pub(crate) fn query_one<T, P, F>(
        &self,
        op: &str,
        sql: &str,
        params: P,
        map: F,
    ) -> Result<Option<T>, StoreError>
    where
        P: Params,
        F: FnOnce(&Row<'_>) -> rusqlite::Result<T>,
    {
        self.ctx.check()?;
        self.conn.query_row(sql, params, map).optional().op(op)
    }

    pub(crate) fn query_all<T, P, F>(
        &self,
        op: &str,
        sql: &str,
        params: P,
        mut map: F,
    ) -> Result<Vec<T>, StoreError>
    where
        P: Params,
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        self.ctx.check()?;
        let mut stmt = self.conn.prepare_cached(sql).op(op)?;
        let mut rows = stmt.query(params).op(op)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().op(op)? {
            out.push(map(row).op(op)?);
        }
        Ok(out)
    }

    pub(crate) fn count<P: Params>(&self, op: &str, sql: &str, params: P) -> Result<u64, StoreError> {
        let total: i64 = self
            .query_one(op, sql, params, |row| row.get(0))?
            .unwrap_or(0);
        Ok(u64::try_from(total).unwrap_or(0))
    }
}
