use rusqlite::Connection;
use snare_core::Result;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Shared SQLite handle. Every store clones this; the single connection
/// behind the mutex is what serializes concurrent writers.
#[derive(Clone)]
pub struct Db {
    inner: Arc<Mutex<Connection>>,
    #[allow(dead_code)]
    db_path: PathBuf,
}

impl Db {
    /// Open (or create) the database at the given path.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                snare_core::Error::Storage(format!("Failed to create db directory: {}", e))
            })?;
        }

        let conn = Connection::open(db_path).map_err(|e| {
            snare_core::Error::Storage(format!("Failed to open db: {}", e))
        })?;

        // Enable WAL mode for better concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();

        let db = Self {
            inner: Arc::new(Mutex::new(conn)),
            db_path: db_path.to_path_buf(),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| {
            snare_core::Error::Storage(format!("Failed to open db: {}", e))
        })?;
        let db = Self {
            inner: Arc::new(Mutex::new(conn)),
            db_path: PathBuf::from(":memory:"),
        };
        db.init_schema()?;
        Ok(db)
    }

    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.inner
            .lock()
            .map_err(|e| snare_core::Error::Storage(format!("Lock error: {}", e)))
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS hooked_browsers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session TEXT NOT NULL UNIQUE,
                ip TEXT NOT NULL,
                domain TEXT,
                firstseen INTEGER NOT NULL,
                lastseen INTEGER NOT NULL,
                count INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_browsers_session ON hooked_browsers(session);

            CREATE TABLE IF NOT EXISTS browser_details (
                browser_id INTEGER NOT NULL,
                detail_key TEXT NOT NULL,
                detail_value TEXT NOT NULL,
                PRIMARY KEY (browser_id, detail_key)
            );

            CREATE TABLE IF NOT EXISTS commands (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                browser_id INTEGER NOT NULL,
                module_id INTEGER,
                label TEXT NOT NULL,
                script TEXT NOT NULL,
                instructions_sent INTEGER NOT NULL DEFAULT 0,
                creation_time INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_commands_pending ON commands(browser_id, instructions_sent);

            CREATE TABLE IF NOT EXISTS results (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                command_id INTEGER NOT NULL,
                browser_id INTEGER NOT NULL,
                label TEXT NOT NULL,
                status INTEGER NOT NULL,
                data TEXT NOT NULL,
                date INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_results_command ON results(command_id);

            CREATE TABLE IF NOT EXISTS executions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session TEXT NOT NULL,
                script TEXT NOT NULL,
                is_sent INTEGER NOT NULL DEFAULT 0,
                creation_time INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_executions_pending ON executions(session, is_sent);

            CREATE TABLE IF NOT EXISTS command_modules (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                path TEXT NOT NULL,
                body TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS rules (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                author TEXT NOT NULL,
                browser TEXT NOT NULL,
                browser_version TEXT NOT NULL,
                os TEXT NOT NULL,
                os_version TEXT NOT NULL,
                modules TEXT NOT NULL,
                execution_order TEXT NOT NULL,
                execution_delay TEXT NOT NULL,
                chain_mode TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                logtype TEXT NOT NULL,
                event TEXT NOT NULL,
                date INTEGER NOT NULL,
                browser_id INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_logs_browser ON logs(browser_id);
            ",
        )
        .map_err(|e| snare_core::Error::Storage(format!("Failed to init schema: {}", e)))?;

        debug!("database schema initialized");
        Ok(())
    }
}
