use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use snare_core::Result;
use tracing::debug;

use crate::db::Db;

/// A hooked browser session row. The session token is the agent-facing
/// identity; the row id is what internal callers key on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookedBrowser {
    pub id: i64,
    pub session: String,
    pub ip: String,
    pub domain: Option<String>,
    pub firstseen: i64,
    pub lastseen: i64,
    pub count: i64,
}

fn row_to_browser(row: &Row) -> rusqlite::Result<HookedBrowser> {
    Ok(HookedBrowser {
        id: row.get("id")?,
        session: row.get("session")?,
        ip: row.get("ip")?,
        domain: row.get("domain")?,
        firstseen: row.get("firstseen")?,
        lastseen: row.get("lastseen")?,
        count: row.get("count")?,
    })
}

#[derive(Clone)]
pub struct BrowserStore {
    db: Db,
}

impl BrowserStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Insert a freshly hooked browser. Count starts at zero; the first
    /// re-poll is what bumps it.
    pub fn create(
        &self,
        session: &str,
        ip: &str,
        domain: Option<&str>,
        now: i64,
    ) -> Result<HookedBrowser> {
        let conn = self.db.conn()?;
        conn.execute(
            "INSERT INTO hooked_browsers (session, ip, domain, firstseen, lastseen, count)
             VALUES (?1, ?2, ?3, ?4, ?4, 0)",
            params![session, ip, domain, now],
        )
        .map_err(|e| snare_core::Error::Storage(format!("Insert error: {}", e)))?;
        let id = conn.last_insert_rowid();

        debug!(id, session = %session, ip = %ip, "hooked browser created");
        Ok(HookedBrowser {
            id,
            session: session.to_string(),
            ip: ip.to_string(),
            domain: domain.map(|d| d.to_string()),
            firstseen: now,
            lastseen: now,
            count: 0,
        })
    }

    pub fn by_session(&self, session: &str) -> Result<Option<HookedBrowser>> {
        let conn = self.db.conn()?;
        conn.query_row(
            "SELECT * FROM hooked_browsers WHERE session = ?1",
            params![session],
            row_to_browser,
        )
        .optional()
        .map_err(|e| snare_core::Error::Storage(format!("Query error: {}", e)))
    }

    pub fn by_id(&self, id: i64) -> Result<Option<HookedBrowser>> {
        let conn = self.db.conn()?;
        conn.query_row(
            "SELECT * FROM hooked_browsers WHERE id = ?1",
            params![id],
            row_to_browser,
        )
        .optional()
        .map_err(|e| snare_core::Error::Storage(format!("Query error: {}", e)))
    }

    /// Check-in mutation: updates address, bumps count, moves lastseen to
    /// `now`. A None domain keeps the stored one (transports that carry no
    /// Host header must not erase it). Returns the previous lastseen so the
    /// caller can decide whether the browser went dormant in between. Runs
    /// under a single connection lock, which serializes racing check-ins
    /// for the same session.
    pub fn touch_check_in(
        &self,
        id: i64,
        ip: &str,
        domain: Option<&str>,
        now: i64,
    ) -> Result<i64> {
        let conn = self.db.conn()?;
        let prev: Option<i64> = conn
            .query_row(
                "SELECT lastseen FROM hooked_browsers WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| snare_core::Error::Storage(format!("Query error: {}", e)))?;
        let prev = prev
            .ok_or_else(|| snare_core::Error::NotFound(format!("hooked browser id {}", id)))?;

        conn.execute(
            "UPDATE hooked_browsers
             SET ip = ?1, domain = COALESCE(?2, domain), lastseen = ?3, count = count + 1
             WHERE id = ?4",
            params![ip, domain, now, id],
        )
        .map_err(|e| snare_core::Error::Storage(format!("Update error: {}", e)))?;
        Ok(prev)
    }

    pub fn all(&self) -> Result<Vec<HookedBrowser>> {
        let conn = self.db.conn()?;
        let mut stmt = conn
            .prepare("SELECT * FROM hooked_browsers ORDER BY id")
            .map_err(|e| snare_core::Error::Storage(format!("Query error: {}", e)))?;
        let rows = stmt
            .query_map([], row_to_browser)
            .map_err(|e| snare_core::Error::Storage(format!("Query error: {}", e)))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| snare_core::Error::Storage(format!("Query error: {}", e)))
    }
}
