use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use snare_core::{Error, Result};
use tracing::debug;

use crate::db::Db;

/// A stored autorun rule. The parallel module/order/delay lists are kept
/// JSON-encoded in TEXT columns; chain_mode stays a plain string so that
/// dispatch can reject values that bypassed validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: i64,
    pub name: String,
    pub author: String,
    pub browser: String,
    pub browser_version: String,
    pub os: String,
    pub os_version: String,
    pub modules: Vec<String>,
    pub execution_order: Vec<usize>,
    pub execution_delay: Vec<u64>,
    pub chain_mode: String,
}

/// Rule fields as they arrive from the loader, before an id exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRule {
    pub name: String,
    pub author: String,
    pub browser: String,
    pub browser_version: String,
    pub os: String,
    pub os_version: String,
    pub modules: Vec<String>,
    pub execution_order: Vec<usize>,
    pub execution_delay: Vec<u64>,
    pub chain_mode: String,
}

fn row_to_rule(row: &Row) -> rusqlite::Result<Rule> {
    let modules: String = row.get("modules")?;
    let execution_order: String = row.get("execution_order")?;
    let execution_delay: String = row.get("execution_delay")?;
    Ok(Rule {
        id: row.get("id")?,
        name: row.get("name")?,
        author: row.get("author")?,
        browser: row.get("browser")?,
        browser_version: row.get("browser_version")?,
        os: row.get("os")?,
        os_version: row.get("os_version")?,
        modules: serde_json::from_str(&modules).unwrap_or_default(),
        execution_order: serde_json::from_str(&execution_order).unwrap_or_default(),
        execution_delay: serde_json::from_str(&execution_delay).unwrap_or_default(),
        chain_mode: row.get("chain_mode")?,
    })
}

#[derive(Clone)]
pub struct RuleStore {
    db: Db,
}

impl RuleStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Inserts a validated rule. Name collisions are a loader-contract
    /// error, checked and inserted under one lock.
    pub fn insert(&self, rule: &NewRule) -> Result<i64> {
        let conn = self.db.conn()?;
        let exists: Option<i64> = conn
            .query_row(
                "SELECT id FROM rules WHERE name = ?1",
                params![rule.name],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| Error::Storage(format!("Query error: {}", e)))?;
        if exists.is_some() {
            return Err(Error::Validation("Duplicate rule already exists".to_string()));
        }

        conn.execute(
            "INSERT INTO rules (name, author, browser, browser_version, os, os_version,
                                modules, execution_order, execution_delay, chain_mode)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                rule.name,
                rule.author,
                rule.browser,
                rule.browser_version,
                rule.os,
                rule.os_version,
                serde_json::to_string(&rule.modules)?,
                serde_json::to_string(&rule.execution_order)?,
                serde_json::to_string(&rule.execution_delay)?,
                rule.chain_mode,
            ],
        )
        .map_err(|e| Error::Storage(format!("Insert error: {}", e)))?;
        let id = conn.last_insert_rowid();
        debug!(id, name = %rule.name, "autorun rule stored");
        Ok(id)
    }

    pub fn find(&self, id: i64) -> Result<Option<Rule>> {
        let conn = self.db.conn()?;
        conn.query_row("SELECT * FROM rules WHERE id = ?1", params![id], row_to_rule)
            .optional()
            .map_err(|e| Error::Storage(format!("Query error: {}", e)))
    }

    /// All rules in insertion order; matching relies on this order.
    pub fn all(&self) -> Result<Vec<Rule>> {
        let conn = self.db.conn()?;
        let mut stmt = conn
            .prepare("SELECT * FROM rules ORDER BY id")
            .map_err(|e| Error::Storage(format!("Query error: {}", e)))?;
        let rows = stmt
            .query_map([], row_to_rule)
            .map_err(|e| Error::Storage(format!("Query error: {}", e)))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| Error::Storage(format!("Query error: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(name: &str) -> NewRule {
        NewRule {
            name: name.to_string(),
            author: "tester".to_string(),
            browser: "ALL".to_string(),
            browser_version: "ALL".to_string(),
            os: "ALL".to_string(),
            os_version: "ALL".to_string(),
            modules: vec!["alert_dialog".to_string()],
            execution_order: vec![0],
            execution_delay: vec![0],
            chain_mode: "sequential".to_string(),
        }
    }

    #[test]
    fn test_insert_find_all() {
        let store = RuleStore::new(Db::open_in_memory().unwrap());
        let id1 = store.insert(&sample("one")).unwrap();
        let id2 = store.insert(&sample("two")).unwrap();
        assert!(id2 > id1);

        let rule = store.find(id1).unwrap().unwrap();
        assert_eq!(rule.name, "one");
        assert_eq!(rule.modules, vec!["alert_dialog"]);
        assert_eq!(rule.execution_order, vec![0]);

        let all = store.all().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, id1);
        assert_eq!(all[1].id, id2);

        assert!(store.find(999).unwrap().is_none());
    }

    #[test]
    fn test_duplicate_name() {
        let store = RuleStore::new(Db::open_in_memory().unwrap());
        store.insert(&sample("dup")).unwrap();
        match store.insert(&sample("dup")) {
            Err(Error::Validation(msg)) => {
                assert_eq!(msg, "Duplicate rule already exists");
            }
            other => panic!("expected Validation error, got {:?}", other.map(|_| ())),
        }
    }
}
