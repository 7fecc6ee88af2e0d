use rusqlite::{params, OptionalExtension};
use snare_core::Result;

use crate::db::Db;

// Detail keys the autorun engine resolves when matching rules.
pub const BROWSER_NAME: &str = "browser.name";
pub const BROWSER_VERSION: &str = "browser.version";
pub const OS_NAME: &str = "host.os.name";
pub const OS_VERSION: &str = "host.os.version";

/// Key/value environment facts reported by a hooked browser after
/// bootstrap (browser.name, host.os.name, screen size and so on).
#[derive(Clone)]
pub struct DetailStore {
    db: Db,
}

impl DetailStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub fn set(&self, browser_id: i64, key: &str, value: &str) -> Result<()> {
        let conn = self.db.conn()?;
        conn.execute(
            "INSERT INTO browser_details (browser_id, detail_key, detail_value)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(browser_id, detail_key) DO UPDATE SET detail_value = excluded.detail_value",
            params![browser_id, key, value],
        )
        .map_err(|e| snare_core::Error::Storage(format!("Insert error: {}", e)))?;
        Ok(())
    }

    /// Stores a whole report under one lock.
    pub fn set_many<'a, I>(&self, browser_id: i64, details: I) -> Result<usize>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let conn = self.db.conn()?;
        let mut written = 0;
        for (key, value) in details {
            conn.execute(
                "INSERT INTO browser_details (browser_id, detail_key, detail_value)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(browser_id, detail_key) DO UPDATE SET detail_value = excluded.detail_value",
                params![browser_id, key, value],
            )
            .map_err(|e| snare_core::Error::Storage(format!("Insert error: {}", e)))?;
            written += 1;
        }
        Ok(written)
    }

    pub fn get(&self, browser_id: i64, key: &str) -> Result<Option<String>> {
        let conn = self.db.conn()?;
        conn.query_row(
            "SELECT detail_value FROM browser_details WHERE browser_id = ?1 AND detail_key = ?2",
            params![browser_id, key],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| snare_core::Error::Storage(format!("Query error: {}", e)))
    }

    pub fn all_for(&self, browser_id: i64) -> Result<Vec<(String, String)>> {
        let conn = self.db.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT detail_key, detail_value FROM browser_details
                 WHERE browser_id = ?1 ORDER BY detail_key",
            )
            .map_err(|e| snare_core::Error::Storage(format!("Query error: {}", e)))?;
        let rows = stmt
            .query_map(params![browser_id], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(|e| snare_core::Error::Storage(format!("Query error: {}", e)))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| snare_core::Error::Storage(format!("Query error: {}", e)))
    }
}
