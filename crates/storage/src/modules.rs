use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use snare_core::Result;
use std::path::Path;
use tracing::{debug, warn};

use crate::db::Db;

/// An instruction module template. The body is external content; the core
/// only composes and delivers it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandModule {
    pub id: i64,
    pub name: String,
    pub path: String,
    pub body: String,
}

fn row_to_module(row: &Row) -> rusqlite::Result<CommandModule> {
    Ok(CommandModule {
        id: row.get("id")?,
        name: row.get("name")?,
        path: row.get("path")?,
        body: row.get("body")?,
    })
}

#[derive(Clone)]
pub struct ModuleStore {
    db: Db,
}

impl ModuleStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub fn upsert(&self, name: &str, path: &str, body: &str) -> Result<i64> {
        let conn = self.db.conn()?;
        conn.execute(
            "INSERT INTO command_modules (name, path, body) VALUES (?1, ?2, ?3)
             ON CONFLICT(name) DO UPDATE SET path = excluded.path, body = excluded.body",
            params![name, path, body],
        )
        .map_err(|e| snare_core::Error::Storage(format!("Insert error: {}", e)))?;

        let id: i64 = conn
            .query_row(
                "SELECT id FROM command_modules WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .map_err(|e| snare_core::Error::Storage(format!("Query error: {}", e)))?;
        Ok(id)
    }

    pub fn by_name(&self, name: &str) -> Result<Option<CommandModule>> {
        let conn = self.db.conn()?;
        conn.query_row(
            "SELECT * FROM command_modules WHERE name = ?1",
            params![name],
            row_to_module,
        )
        .optional()
        .map_err(|e| snare_core::Error::Storage(format!("Query error: {}", e)))
    }

    pub fn all(&self) -> Result<Vec<CommandModule>> {
        let conn = self.db.conn()?;
        let mut stmt = conn
            .prepare("SELECT * FROM command_modules ORDER BY name")
            .map_err(|e| snare_core::Error::Storage(format!("Query error: {}", e)))?;
        let rows = stmt
            .query_map([], row_to_module)
            .map_err(|e| snare_core::Error::Storage(format!("Query error: {}", e)))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| snare_core::Error::Storage(format!("Query error: {}", e)))
    }

    /// Loads every `*.js` file in `dir` into the catalog (name = file stem).
    /// Unreadable files are skipped with a warning.
    pub fn load_dir(&self, dir: &Path) -> Result<usize> {
        if !dir.is_dir() {
            return Ok(0);
        }
        let mut loaded = 0;
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("js") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match std::fs::read_to_string(&path) {
                Ok(body) => {
                    self.upsert(name, &path.to_string_lossy(), &body)?;
                    loaded += 1;
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable module");
                }
            }
        }
        debug!(count = loaded, dir = %dir.display(), "instruction modules loaded");
        Ok(loaded)
    }
}
