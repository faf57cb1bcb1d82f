#![forbid(unsafe_code)]

use super::*;
use orc_core::ids::IdKind;
use rusqlite::params;

fn id_table(kind: IdKind) -> &'static str {
    match kind {
        IdKind::Task => "tasks",
        IdKind::Initiative => "initiatives",
        IdKind::Run => "workflow_runs",
        IdKind::Decision => "initiative_decisions",
    }
}

impl TxOps<'_> {
    /// Allocates the next sequential id of `kind`. The counter never moves
    /// below the highest numeric suffix already stored, so rows saved with
    /// explicit ids are never collided with. Call inside the transaction
    /// that inserts the row.
    pub fn next_id(&self, kind: IdKind) -> Result<String, StoreError> {
        let op = format!("allocate {} id", kind.prefix());
        let counter: i64 = self
            .query_one(
                &op,
                "SELECT value FROM counters WHERE name=?1",
                params![kind.counter_name()],
                |row| row.get(0),
            )?
            .unwrap_or(0);

        let prefix_len = i64::try_from(kind.prefix().len() + 2)
            .map_err(|_| StoreError::InvalidInput("numeric overflow"))?;
        let sql = format!(
            "SELECT COALESCE(MAX(CAST(SUBSTR(id, ?1) AS INTEGER)), 0) FROM {} WHERE id GLOB ?2",
            id_table(kind)
        );
        let existing: i64 = self
            .query_one(
                &op,
                &sql,
                params![prefix_len, format!("{}-[0-9]*", kind.prefix())],
                |row| row.get(0),
            )?
            .unwrap_or(0);

        let next = counter.max(existing) + 1;
        self.execute(
            &op,
            "INSERT INTO counters(name, value) VALUES (?1, ?2) \
             ON CONFLICT(name) DO UPDATE SET value=excluded.value",
            params![kind.counter_name(), next],
        )?;
        let number = u64::try_from(next).map_err(|_| StoreError::InvalidInput("numeric overflow"))?;
        Ok(kind.format(number))
    }
}
