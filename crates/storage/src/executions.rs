use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};
use snare_core::Result;
use tracing::debug;

use crate::db::Db;

/// A raw script queued by the admin API, outside the module pipeline.
/// Delivered appended to the next check-in response for its session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: i64,
    pub session: String,
    pub script: String,
    pub is_sent: bool,
    pub creation_time: i64,
}

fn row_to_execution(row: &Row) -> rusqlite::Result<Execution> {
    Ok(Execution {
        id: row.get("id")?,
        session: row.get("session")?,
        script: row.get("script")?,
        is_sent: row.get::<_, i64>("is_sent")? != 0,
        creation_time: row.get("creation_time")?,
    })
}

#[derive(Clone)]
pub struct ExecutionStore {
    db: Db,
}

impl ExecutionStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub fn queue(&self, session: &str, script: &str, now: i64) -> Result<Execution> {
        let conn = self.db.conn()?;
        conn.execute(
            "INSERT INTO executions (session, script, is_sent, creation_time)
             VALUES (?1, ?2, 0, ?3)",
            params![session, script, now],
        )
        .map_err(|e| snare_core::Error::Storage(format!("Insert error: {}", e)))?;
        let id = conn.last_insert_rowid();
        debug!(id, session = %session, "execution queued");
        Ok(Execution {
            id,
            session: session.to_string(),
            script: script.to_string(),
            is_sent: false,
            creation_time: now,
        })
    }

    pub fn unsent_for(&self, session: &str) -> Result<Vec<Execution>> {
        let conn = self.db.conn()?;
        let mut stmt = conn
            .prepare("SELECT * FROM executions WHERE session = ?1 AND is_sent = 0 ORDER BY id")
            .map_err(|e| snare_core::Error::Storage(format!("Query error: {}", e)))?;
        let rows = stmt
            .query_map(params![session], row_to_execution)
            .map_err(|e| snare_core::Error::Storage(format!("Query error: {}", e)))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| snare_core::Error::Storage(format!("Query error: {}", e)))
    }

    pub fn mark_sent(&self, ids: &[i64]) -> Result<usize> {
        let conn = self.db.conn()?;
        let mut updated = 0;
        for id in ids {
            updated += conn
                .execute("UPDATE executions SET is_sent = 1 WHERE id = ?1", params![id])
                .map_err(|e| snare_core::Error::Storage(format!("Update error: {}", e)))?;
        }
        Ok(updated)
    }
}
