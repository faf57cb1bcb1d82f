#![forbid(unsafe_code)]

use super::rows::{enum_col, limit_offset, non_empty, ts_col, ts_text};
use super::*;
use orc_core::ids::{IdKind, normalize_id};
use orc_core::model::{
    Initiative, InitiativeDecision, InitiativeOwner, InitiativeStatus, InitiativeTaskRef, Page,
    Pagination,
};
use rusqlite::{Row, params};
use std::collections::BTreeMap;

const INITIATIVE_COLUMNS: &str = "id, title, status, vision, owner_initials, owner_display_name, \
     owner_email, branch_base, branch_prefix, created_at, updated_at";

fn initiative_from_row(row: &Row<'_>) -> rusqlite::Result<Initiative> {
    Ok(Initiative {
        id: row.get(0)?,
        title: row.get(1)?,
        status: enum_col(row, 2)?,
        vision: row.get(3)?,
        owner: InitiativeOwner {
            initials: row.get(4)?,
            display_name: row.get(5)?,
            email: row.get(6)?,
        },
        branch_base: row.get(7)?,
        branch_prefix: row.get(8)?,
        created_at: ts_col(row, 9)?,
        updated_at: ts_col(row, 10)?,
    })
}

fn decision_from_row(row: &Row<'_>) -> rusqlite::Result<InitiativeDecision> {
    Ok(InitiativeDecision {
        id: row.get(0)?,
        initiative_id: row.get(1)?,
        decision: row.get(2)?,
        rationale: row.get(3)?,
        decided_by: row.get(4)?,
        decided_at: ts_col(row, 5)?,
    })
}

fn task_ref_from_row(row: &Row<'_>) -> rusqlite::Result<InitiativeTaskRef> {
    Ok(InitiativeTaskRef {
        initiative_id: row.get(0)?,
        task_id: row.get(1)?,
        sequence: row.get(2)?,
    })
}

impl TxOps<'_> {
    pub fn save_initiative(&self, initiative: &Initiative) -> Result<(), StoreError> {
        let id = normalize_id(&initiative.id)?;
        if initiative.title.trim().is_empty() {
            return Err(StoreError::InvalidInput("initiative.title must not be empty"));
        }
        self.execute(
            &format!("save initiative {id}"),
            &format!(
                "INSERT INTO initiatives ({INITIATIVE_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11) \
                 ON CONFLICT(id) DO UPDATE SET \
                 title=excluded.title, status=excluded.status, vision=excluded.vision, \
                 owner_initials=excluded.owner_initials, \
                 owner_display_name=excluded.owner_display_name, \
                 owner_email=excluded.owner_email, branch_base=excluded.branch_base, \
                 branch_prefix=excluded.branch_prefix, updated_at=excluded.updated_at"
            ),
            params![
                id,
                initiative.title.trim(),
                initiative.status.as_str(),
                initiative.vision,
                non_empty(&initiative.owner.initials),
                non_empty(&initiative.owner.display_name),
                non_empty(&initiative.owner.email),
                non_empty(&initiative.branch_base),
                non_empty(&initiative.branch_prefix),
                ts_text(initiative.created_at),
                self.now_text(),
            ],
        )?;
        Ok(())
    }

    pub fn create_initiative(&self, mut initiative: Initiative) -> Result<Initiative, StoreError> {
        let now = self.now();
        initiative.id = self.next_id(IdKind::Initiative)?;
        initiative.created_at = now;
        initiative.updated_at = now;
        self.save_initiative(&initiative)?;
        Ok(initiative)
    }

    pub fn get_initiative(&self, id: &str) -> Result<Option<Initiative>, StoreError> {
        self.query_one(
            &format!("get initiative {id}"),
            &format!("SELECT {INITIATIVE_COLUMNS} FROM initiatives WHERE id=?1"),
            params![id],
            initiative_from_row,
        )
    }

    pub fn list_initiatives(
        &self,
        status: Option<InitiativeStatus>,
        page: Pagination,
    ) -> Result<Page<Initiative>, StoreError> {
        let (limit, offset) = limit_offset(page);
        let status = status.map(InitiativeStatus::as_str);
        let total = self.count(
            "count initiatives",
            "SELECT COUNT(1) FROM initiatives WHERE (?1 IS NULL OR status=?1)",
            params![status],
        )?;
        let items = self.query_all(
            "list initiatives",
            &format!(
                "SELECT {INITIATIVE_COLUMNS} FROM initiatives WHERE (?1 IS NULL OR status=?1) \
                 ORDER BY created_at DESC, id DESC LIMIT ?2 OFFSET ?3"
            ),
            params![status, limit, offset],
            initiative_from_row,
        )?;
        Ok(Page { items, total })
    }

    /// Removes the initiative with its task links, decisions and dependency
    /// edges. Member tasks stay, unassigned.
    pub fn delete_initiative(&self, id: &str) -> Result<bool, StoreError> {
        let removed = self.execute(
            &format!("delete initiative {id}"),
            "DELETE FROM initiatives WHERE id=?1",
            params![id],
        )?;
        Ok(removed > 0)
    }

    /// Appends (or repositions) `task_id` in the initiative's ordered list
    /// and points the task at the initiative. A task belongs to at most one
    /// initiative, so any link to a previous initiative is dropped.
    pub fn add_initiative_task(
        &self,
        initiative_id: &str,
        task_id: &str,
        sequence: Option<i64>,
    ) -> Result<i64, StoreError> {
        let op = format!("link task {task_id} to initiative {initiative_id}");
        let sequence = match sequence {
            Some(sequence) => sequence,
            None => self
                .query_one(
                    &op,
                    "SELECT COALESCE(MAX(sequence), 0) + 1 FROM initiative_tasks WHERE initiative_id=?1",
                    params![initiative_id],
                    |row| row.get(0),
                )?
                .unwrap_or(1),
        };
        self.execute(
            &op,
            "DELETE FROM initiative_tasks WHERE task_id=?2 AND initiative_id<>?1",
            params![initiative_id, task_id],
        )?;
        self.execute(
            &op,
            "INSERT INTO initiative_tasks(initiative_id, task_id, sequence) VALUES (?1, ?2, ?3) \
             ON CONFLICT(initiative_id, task_id) DO UPDATE SET sequence=excluded.sequence",
            params![initiative_id, task_id, sequence],
        )?;
        self.execute(
            &op,
            "UPDATE tasks SET initiative_id=?1, updated_at=?3 WHERE id=?2",
            params![initiative_id, task_id, self.now_text()],
        )?;
        Ok(sequence)
    }

    pub fn remove_initiative_task(&self, initiative_id: &str, task_id: &str) -> Result<bool, StoreError> {
        let op = format!("unlink task {task_id} from initiative {initiative_id}");
        let removed = self.execute(
            &op,
            "DELETE FROM initiative_tasks WHERE initiative_id=?1 AND task_id=?2",
            params![initiative_id, task_id],
        )?;
        self.execute(
            &op,
            "UPDATE tasks SET initiative_id=NULL, updated_at=?3 WHERE id=?2 AND initiative_id=?1",
            params![initiative_id, task_id, self.now_text()],
        )?;
        Ok(removed > 0)
    }

    pub fn initiative_tasks(&self, initiative_id: &str) -> Result<Vec<InitiativeTaskRef>, StoreError> {
        self.query_all(
            &format!("list tasks of initiative {initiative_id}"),
            "SELECT initiative_id, task_id, sequence FROM initiative_tasks \
             WHERE initiative_id=?1 ORDER BY sequence ASC, task_id ASC",
            params![initiative_id],
            task_ref_from_row,
        )
    }

    /// Every initiative's ordered task list in one query.
    pub fn all_initiative_tasks(&self) -> Result<BTreeMap<String, Vec<InitiativeTaskRef>>, StoreError> {
        let refs = self.query_all(
            "list all initiative tasks",
            "SELECT initiative_id, task_id, sequence FROM initiative_tasks \
             ORDER BY initiative_id ASC, sequence ASC, task_id ASC",
            [],
            task_ref_from_row,
        )?;
        let mut out: BTreeMap<String, Vec<InitiativeTaskRef>> = BTreeMap::new();
        for task_ref in refs {
            out.entry(task_ref.initiative_id.clone())
                .or_default()
                .push(task_ref);
        }
        Ok(out)
    }

    pub fn add_initiative_decision(
        &self,
        initiative_id: &str,
        decision: &str,
        rationale: Option<&str>,
        decided_by: Option<&str>,
    ) -> Result<InitiativeDecision, StoreError> {
        if decision.trim().is_empty() {
            return Err(StoreError::InvalidInput("decision must not be empty"));
        }
        let record = InitiativeDecision {
            id: self.next_id(IdKind::Decision)?,
            initiative_id: initiative_id.to_string(),
            decision: decision.trim().to_string(),
            rationale: rationale.map(str::to_string),
            decided_by: decided_by.map(str::to_string),
            decided_at: self.now(),
        };
        self.execute(
            &format!("record decision for initiative {initiative_id}"),
            "INSERT INTO initiative_decisions(id, initiative_id, decision, rationale, decided_by, decided_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.id,
                record.initiative_id,
                record.decision,
                record.rationale,
                record.decided_by,
                ts_text(record.decided_at),
            ],
        )?;
        Ok(record)
    }

    pub fn initiative_decisions(&self, initiative_id: &str) -> Result<Vec<InitiativeDecision>, StoreError> {
        self.query_all(
            &format!("list decisions of initiative {initiative_id}"),
            "SELECT id, initiative_id, decision, rationale, decided_by, decided_at \
             FROM initiative_decisions WHERE initiative_id=?1 ORDER BY decided_at ASC, id ASC",
            params![initiative_id],
            decision_from_row,
        )
    }

    /// Every initiative's decisions in one query, chronological per
    /// initiative.
    pub fn all_initiative_decisions(
        &self,
    ) -> Result<BTreeMap<String, Vec<InitiativeDecision>>, StoreError> {
        let decisions = self.query_all(
            "list all initiative decisions",
            "SELECT id, initiative_id, decision, rationale, decided_by, decided_at \
             FROM initiative_decisions ORDER BY initiative_id ASC, decided_at ASC, id ASC",
            [],
            decision_from_row,
        )?;
        let mut out: BTreeMap<String, Vec<InitiativeDecision>> = BTreeMap::new();
        for decision in decisions {
            out.entry(decision.initiative_id.clone())
                .or_default()
                .push(decision);
        }
        Ok(out)
    }
}

impl SqliteStore {
    #[tracing::instrument(level = "debug", skip(self, initiative), fields(title = %initiative.title))]
    pub fn create_initiative(&mut self, initiative: Initiative) -> Result<Initiative, StoreError> {
        self.write(|tx| tx.create_initiative(initiative))
    }

    #[tracing::instrument(level = "debug", skip(self, initiative), fields(initiative_id = %initiative.id))]
    pub fn save_initiative(&mut self, initiative: &Initiative) -> Result<(), StoreError> {
        self.write(|tx| tx.save_initiative(initiative))
    }

    pub fn get_initiative(&self, id: &str) -> Result<Option<Initiative>, StoreError> {
        self.direct(|tx| tx.get_initiative(id))
    }

    pub fn list_initiatives(
        &self,
        status: Option<InitiativeStatus>,
        page: Pagination,
    ) -> Result<Page<Initiative>, StoreError> {
        self.direct(|tx| tx.list_initiatives(status, page))
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub fn delete_initiative(&mut self, id: &str) -> Result<bool, StoreError> {
        self.write(|tx| tx.delete_initiative(id))
    }

    pub fn add_initiative_task(
        &mut self,
        initiative_id: &str,
        task_id: &str,
        sequence: Option<i64>,
    ) -> Result<i64, StoreError> {
        self.write(|tx| tx.add_initiative_task(initiative_id, task_id, sequence))
    }

    pub fn remove_initiative_task(&mut self, initiative_id: &str, task_id: &str) -> Result<bool, StoreError> {
        self.write(|tx| tx.remove_initiative_task(initiative_id, task_id))
    }

    pub fn initiative_tasks(&self, initiative_id: &str) -> Result<Vec<InitiativeTaskRef>, StoreError> {
        self.direct(|tx| tx.initiative_tasks(initiative_id))
    }

    pub fn all_initiative_tasks(&self) -> Result<BTreeMap<String, Vec<InitiativeTaskRef>>, StoreError> {
        self.direct(|tx| tx.all_initiative_tasks())
    }

    pub fn add_initiative_decision(
        &mut self,
        initiative_id: &str,
        decision: &str,
        rationale: Option<&str>,
        decided_by: Option<&str>,
    ) -> Result<InitiativeDecision, StoreError> {
        self.write(|tx| tx.add_initiative_decision(initiative_id, decision, rationale, decided_by))
    }

    pub fn initiative_decisions(&self, initiative_id: &str) -> Result<Vec<InitiativeDecision>, StoreError> {
        self.direct(|tx| tx.initiative_decisions(initiative_id))
    }

    pub fn all_initiative_decisions(
        &self,
    ) -> Result<BTreeMap<String, Vec<InitiativeDecision>>, StoreError> {
        self.direct(|tx| tx.all_initiative_decisions())
    }
}
