use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use snare_core::Result;
use tracing::debug;

use crate::db::Db;

/// A queued instruction for one hooked browser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub id: i64,
    pub browser_id: i64,
    pub module_id: Option<i64>,
    pub label: String,
    pub script: String,
    pub instructions_sent: bool,
    pub creation_time: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    pub id: i64,
    pub command_id: i64,
    pub browser_id: i64,
    pub label: String,
    pub status: i64,
    pub data: String,
    pub date: i64,
}

fn row_to_command(row: &Row) -> rusqlite::Result<Command> {
    Ok(Command {
        id: row.get("id")?,
        browser_id: row.get("browser_id")?,
        module_id: row.get("module_id")?,
        label: row.get("label")?,
        script: row.get("script")?,
        instructions_sent: row.get::<_, i64>("instructions_sent")? != 0,
        creation_time: row.get("creation_time")?,
    })
}

fn row_to_result(row: &Row) -> rusqlite::Result<CommandResult> {
    Ok(CommandResult {
        id: row.get("id")?,
        command_id: row.get("command_id")?,
        browser_id: row.get("browser_id")?,
        label: row.get("label")?,
        status: row.get("status")?,
        data: row.get("data")?,
        date: row.get("date")?,
    })
}

#[derive(Clone)]
pub struct CommandStore {
    db: Db,
}

impl CommandStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub fn enqueue(
        &self,
        browser_id: i64,
        module_id: Option<i64>,
        label: &str,
        script: &str,
        now: i64,
    ) -> Result<Command> {
        let conn = self.db.conn()?;
        conn.execute(
            "INSERT INTO commands (browser_id, module_id, label, script, instructions_sent, creation_time)
             VALUES (?1, ?2, ?3, ?4, 0, ?5)",
            params![browser_id, module_id, label, script, now],
        )
        .map_err(|e| snare_core::Error::Storage(format!("Insert error: {}", e)))?;
        let id = conn.last_insert_rowid();

        debug!(id, browser_id, label = %label, "command queued");
        Ok(Command {
            id,
            browser_id,
            module_id,
            label: label.to_string(),
            script: script.to_string(),
            instructions_sent: false,
            creation_time: now,
        })
    }

    /// Unsent commands for a session, oldest first.
    pub fn pending_for(&self, browser_id: i64) -> Result<Vec<Command>> {
        let conn = self.db.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT * FROM commands
                 WHERE browser_id = ?1 AND instructions_sent = 0 ORDER BY id",
            )
            .map_err(|e| snare_core::Error::Storage(format!("Query error: {}", e)))?;
        let rows = stmt
            .query_map(params![browser_id], row_to_command)
            .map_err(|e| snare_core::Error::Storage(format!("Query error: {}", e)))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| snare_core::Error::Storage(format!("Query error: {}", e)))
    }

    /// Flips the sent flag for exactly the given ids. Idempotent; a command
    /// enqueued after the caller fetched its pending set is left untouched.
    pub fn mark_sent(&self, ids: &[i64]) -> Result<usize> {
        let conn = self.db.conn()?;
        let mut updated = 0;
        for id in ids {
            updated += conn
                .execute(
                    "UPDATE commands SET instructions_sent = 1 WHERE id = ?1",
                    params![id],
                )
                .map_err(|e| snare_core::Error::Storage(format!("Update error: {}", e)))?;
        }
        Ok(updated)
    }

    pub fn by_id(&self, id: i64) -> Result<Option<Command>> {
        let conn = self.db.conn()?;
        conn.query_row("SELECT * FROM commands WHERE id = ?1", params![id], row_to_command)
            .optional()
            .map_err(|e| snare_core::Error::Storage(format!("Query error: {}", e)))
    }

    pub fn insert_result(
        &self,
        command_id: i64,
        browser_id: i64,
        label: &str,
        status: i64,
        data: &str,
        now: i64,
    ) -> Result<i64> {
        let conn = self.db.conn()?;
        conn.execute(
            "INSERT INTO results (command_id, browser_id, label, status, data, date)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![command_id, browser_id, label, status, data, now],
        )
        .map_err(|e| snare_core::Error::Storage(format!("Insert error: {}", e)))?;
        Ok(conn.last_insert_rowid())
    }

    pub fn results_for(&self, command_id: i64) -> Result<Vec<CommandResult>> {
        let conn = self.db.conn()?;
        let mut stmt = conn
            .prepare("SELECT * FROM results WHERE command_id = ?1 ORDER BY id")
            .map_err(|e| snare_core::Error::Storage(format!("Query error: {}", e)))?;
        let rows = stmt
            .query_map(params![command_id], row_to_result)
            .map_err(|e| snare_core::Error::Storage(format!("Query error: {}", e)))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| snare_core::Error::Storage(format!("Query error: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> CommandStore {
        CommandStore::new(Db::open_in_memory().unwrap())
    }

    #[test]
    fn test_enqueue_and_pending_order() {
        let store = test_store();
        let c1 = store.enqueue(1, None, "alert", "a();", 100).unwrap();
        let c2 = store.enqueue(1, Some(3), "probe", "b();", 101).unwrap();
        store.enqueue(2, None, "other", "c();", 102).unwrap();

        let pending = store.pending_for(1).unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].id, c1.id);
        assert_eq!(pending[1].id, c2.id);
        assert_eq!(pending[1].module_id, Some(3));
    }

    #[test]
    fn test_mark_sent_only_listed_ids() {
        let store = test_store();
        let c1 = store.enqueue(1, None, "one", "a();", 100).unwrap();
        let fetched = store.pending_for(1).unwrap();

        // a command that lands between fetch and mark stays pending
        let c2 = store.enqueue(1, None, "two", "b();", 101).unwrap();
        let ids: Vec<i64> = fetched.iter().map(|c| c.id).collect();
        store.mark_sent(&ids).unwrap();

        let pending = store.pending_for(1).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, c2.id);
        assert!(store.by_id(c1.id).unwrap().unwrap().instructions_sent);

        // idempotent
        store.mark_sent(&ids).unwrap();
        assert_eq!(store.pending_for(1).unwrap().len(), 1);
    }

    #[test]
    fn test_results_round_trip() {
        let store = test_store();
        let cmd = store.enqueue(1, None, "probe", "x();", 100).unwrap();
        let rid = store
            .insert_result(cmd.id, 1, "probe", 1, r#"{"data":"ok"}"#, 105)
            .unwrap();
        let results = store.results_for(cmd.id).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, rid);
        assert_eq!(results[0].status, 1);
        assert_eq!(results[0].data, r#"{"data":"ok"}"#);
    }
}
