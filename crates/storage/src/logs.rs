use chrono::Utc;
use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};
use snare_core::Result;
use tracing::info;

use crate::db::Db;

/// An audit event. `browser_id` 0 means not session-scoped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: i64,
    pub logtype: String,
    pub event: String,
    pub date: i64,
    pub browser_id: i64,
}

fn row_to_entry(row: &Row) -> rusqlite::Result<LogEntry> {
    Ok(LogEntry {
        id: row.get("id")?,
        logtype: row.get("logtype")?,
        event: row.get("event")?,
        date: row.get("date")?,
        browser_id: row.get("browser_id")?,
    })
}

#[derive(Clone)]
pub struct LogStore {
    db: Db,
}

impl LogStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Records an audit event and mirrors it to the tracing output.
    pub fn register(&self, logtype: &str, event: &str, browser_id: i64) -> Result<()> {
        let conn = self.db.conn()?;
        conn.execute(
            "INSERT INTO logs (logtype, event, date, browser_id) VALUES (?1, ?2, ?3, ?4)",
            params![logtype, event, Utc::now().timestamp(), browser_id],
        )
        .map_err(|e| snare_core::Error::Storage(format!("Insert error: {}", e)))?;

        info!(logtype = %logtype, browser_id, "{}", event);
        Ok(())
    }

    pub fn recent(&self, limit: usize) -> Result<Vec<LogEntry>> {
        let conn = self.db.conn()?;
        let mut stmt = conn
            .prepare("SELECT * FROM logs ORDER BY id DESC LIMIT ?1")
            .map_err(|e| snare_core::Error::Storage(format!("Query error: {}", e)))?;
        let rows = stmt
            .query_map(params![limit as i64], row_to_entry)
            .map_err(|e| snare_core::Error::Storage(format!("Query error: {}", e)))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| snare_core::Error::Storage(format!("Query error: {}", e)))
    }

    pub fn for_browser(&self, browser_id: i64) -> Result<Vec<LogEntry>> {
        let conn = self.db.conn()?;
        let mut stmt = conn
            .prepare("SELECT * FROM logs WHERE browser_id = ?1 ORDER BY id")
            .map_err(|e| snare_core::Error::Storage(format!("Query error: {}", e)))?;
        let rows = stmt
            .query_map(params![browser_id], row_to_entry)
            .map_err(|e| snare_core::Error::Storage(format!("Query error: {}", e)))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| snare_core::Error::Storage(format!("Query error: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_query() {
        let store = LogStore::new(Db::open_in_memory().unwrap());
        store.register("Hook", "new browser hooked", 3).unwrap();
        store.register("Engine", "rules loaded", 0).unwrap();

        let recent = store.recent(10).unwrap();
        assert_eq!(recent.len(), 2);
        // newest first
        assert_eq!(recent[0].logtype, "Engine");
        assert_eq!(recent[0].browser_id, 0);

        let scoped = store.for_browser(3).unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].event, "new browser hooked");
    }
}
