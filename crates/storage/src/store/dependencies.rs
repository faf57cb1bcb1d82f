#![forbid(unsafe_code)]

use super::*;
use orc_core::deps::{DependencyKind, find_cycle};
use orc_core::ids::normalize_id;
use orc_core::model::{InitiativeStatus, TaskStatus};
use rusqlite::params;
use std::collections::BTreeMap;

struct EdgeTable {
    table: &'static str,
    subject: &'static str,
    nodes: &'static str,
}

fn edge_table(kind: DependencyKind) -> EdgeTable {
    match kind {
        DependencyKind::Task => EdgeTable {
            table: "task_dependencies",
            subject: "task_id",
            nodes: "tasks",
        },
        DependencyKind::Initiative => EdgeTable {
            table: "initiative_dependencies",
            subject: "initiative_id",
            nodes: "initiatives",
        },
    }
}

/// Quoted statuses that release dependents, for an SQL `IN` list.
fn done_statuses(kind: DependencyKind) -> String {
    let done: Vec<&str> = match kind {
        DependencyKind::Task => TaskStatus::ALL
            .iter()
            .filter(|status| status.is_done())
            .map(|status| status.as_str())
            .collect(),
        DependencyKind::Initiative => vec![InitiativeStatus::Completed.as_str()],
    };
    done.iter()
        .map(|status| format!("'{status}'"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn group_pairs(pairs: Vec<(String, String)>) -> BTreeMap<String, Vec<String>> {
    let mut out: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (key, value) in pairs {
        out.entry(key).or_default().push(value);
    }
    out
}

impl TxOps<'_> {
    /// Records that `subject` depends on `depends_on`. Returns `false` when
    /// the edge already existed.
    pub fn add_edge(
        &self,
        kind: DependencyKind,
        subject: &str,
        depends_on: &str,
    ) -> Result<bool, StoreError> {
        let subject = normalize_id(subject)?;
        let depends_on = normalize_id(depends_on)?;
        if subject == depends_on {
            return Err(StoreError::InvalidInput("an entity cannot depend on itself"));
        }

        let graph = self.all_edges(kind)?;
        if let Some(path) = find_cycle(&graph, &subject, &depends_on) {
            return Err(StoreError::DependencyCycle { path });
        }

        let edges = edge_table(kind);
        let sql = self
            .dialect()
            .insert_ignore(edges.table, &[edges.subject, "depends_on"]);
        let inserted = self.execute(
            &format!("add {} dependency {subject} -> {depends_on}", kind.as_str()),
            &sql,
            params![subject, depends_on],
        )?;
        Ok(inserted > 0)
    }

    pub fn remove_edge(
        &self,
        kind: DependencyKind,
        subject: &str,
        depends_on: &str,
    ) -> Result<bool, StoreError> {
        let edges = edge_table(kind);
        let removed = self.execute(
            &format!("remove {} dependency {subject} -> {depends_on}", kind.as_str()),
            &format!(
                "DELETE FROM {} WHERE {}=?1 AND depends_on=?2",
                edges.table, edges.subject
            ),
            params![subject, depends_on],
        )?;
        Ok(removed > 0)
    }

    pub fn clear_edges(&self, kind: DependencyKind, subject: &str) -> Result<usize, StoreError> {
        let edges = edge_table(kind);
        self.execute(
            &format!("clear {} dependencies of {subject}", kind.as_str()),
            &format!("DELETE FROM {} WHERE {}=?1", edges.table, edges.subject),
            params![subject],
        )
    }

    /// Makes `depends_on` the complete dependency set of `subject`.
    pub fn replace_edges(
        &self,
        kind: DependencyKind,
        subject: &str,
        depends_on: &[String],
    ) -> Result<(), StoreError> {
        self.clear_edges(kind, subject)?;
        for dep in depends_on {
            self.add_edge(kind, subject, dep)?;
        }
        Ok(())
    }

    /// What `subject` depends on, sorted.
    pub fn edges(&self, kind: DependencyKind, subject: &str) -> Result<Vec<String>, StoreError> {
        let edges = edge_table(kind);
        self.query_all(
            &format!("list {} dependencies of {subject}", kind.as_str()),
            &format!(
                "SELECT depends_on FROM {} WHERE {}=?1 ORDER BY depends_on ASC",
                edges.table, edges.subject
            ),
            params![subject],
            |row| row.get(0),
        )
    }

    /// What depends on `id`, sorted.
    pub fn dependents(&self, kind: DependencyKind, id: &str) -> Result<Vec<String>, StoreError> {
        let edges = edge_table(kind);
        self.query_all(
            &format!("list {} dependents of {id}", kind.as_str()),
            &format!(
                "SELECT {subject} FROM {} WHERE depends_on=?1 ORDER BY {subject} ASC",
                edges.table,
                subject = edges.subject
            ),
            params![id],
            |row| row.get(0),
        )
    }

    /// Every subject's dependency list in one query.
    pub fn all_edges(&self, kind: DependencyKind) -> Result<BTreeMap<String, Vec<String>>, StoreError> {
        let edges = edge_table(kind);
        let pairs = self.query_all(
            &format!("load all {} dependencies", kind.as_str()),
            &format!(
                "SELECT {subject}, depends_on FROM {} ORDER BY {subject} ASC, depends_on ASC",
                edges.table,
                subject = edges.subject
            ),
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(group_pairs(pairs))
    }

    /// Reverse of [`TxOps::all_edges`]: every id mapped to its dependents.
    pub fn all_dependents(
        &self,
        kind: DependencyKind,
    ) -> Result<BTreeMap<String, Vec<String>>, StoreError> {
        let edges = edge_table(kind);
        let pairs = self.query_all(
            &format!("load all {} dependents", kind.as_str()),
            &format!(
                "SELECT depends_on, {subject} FROM {} ORDER BY depends_on ASC, {subject} ASC",
                edges.table,
                subject = edges.subject
            ),
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(group_pairs(pairs))
    }

    /// Dependencies of `subject` that have not finished yet.
    pub fn blocking_edges(&self, kind: DependencyKind, subject: &str) -> Result<Vec<String>, StoreError> {
        let edges = edge_table(kind);
        self.query_all(
            &format!("list blocking {} dependencies of {subject}", kind.as_str()),
            &format!(
                "SELECT d.depends_on FROM {} d JOIN {} n ON n.id = d.depends_on \
                 WHERE d.{}=?1 AND n.status NOT IN ({}) ORDER BY d.depends_on ASC",
                edges.table,
                edges.nodes,
                edges.subject,
                done_statuses(kind)
            ),
            params![subject],
            |row| row.get(0),
        )
    }
}

impl SqliteStore {
    #[tracing::instrument(level = "debug", skip(self), fields(kind = kind.as_str()))]
    pub fn add_edge(
        &mut self,
        kind: DependencyKind,
        subject: &str,
        depends_on: &str,
    ) -> Result<bool, StoreError> {
        self.write(|tx| tx.add_edge(kind, subject, depends_on))
    }

    pub fn remove_edge(
        &mut self,
        kind: DependencyKind,
        subject: &str,
        depends_on: &str,
    ) -> Result<bool, StoreError> {
        self.write(|tx| tx.remove_edge(kind, subject, depends_on))
    }

    pub fn clear_edges(&mut self, kind: DependencyKind, subject: &str) -> Result<usize, StoreError> {
        self.write(|tx| tx.clear_edges(kind, subject))
    }

    #[tracing::instrument(level = "debug", skip(self, depends_on), fields(kind = kind.as_str(), count = depends_on.len()))]
    pub fn replace_edges(
        &mut self,
        kind: DependencyKind,
        subject: &str,
        depends_on: &[String],
    ) -> Result<(), StoreError> {
        self.write(|tx| tx.replace_edges(kind, subject, depends_on))
    }

    pub fn edges(&self, kind: DependencyKind, subject: &str) -> Result<Vec<String>, StoreError> {
        self.direct(|tx| tx.edges(kind, subject))
    }

    pub fn dependents(&self, kind: DependencyKind, id: &str) -> Result<Vec<String>, StoreError> {
        self.direct(|tx| tx.dependents(kind, id))
    }

    pub fn all_edges(&self, kind: DependencyKind) -> Result<BTreeMap<String, Vec<String>>, StoreError> {
        self.direct(|tx| tx.all_edges(kind))
    }

    pub fn all_dependents(
        &self,
        kind: DependencyKind,
    ) -> Result<BTreeMap<String, Vec<String>>, StoreError> {
        self.direct(|tx| tx.all_dependents(kind))
    }

    pub fn blocking_edges(&self, kind: DependencyKind, subject: &str) -> Result<Vec<String>, StoreError> {
        self.direct(|tx| tx.blocking_edges(kind, subject))
    }
}
