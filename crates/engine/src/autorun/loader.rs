use std::path::Path;

use serde::Serialize;
use serde_json::Value;
use snare_core::Error;
use snare_storage::RuleStore;
use tracing::{info, warn};

use super::parser;

/// Outcome of one rule-definition load. Serializes to the wire shape
/// `{"success": true, "rule_id": n}` / `{"success": false, "error": reason}`.
#[derive(Debug, Serialize)]
pub struct LoadResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LoadResult {
    fn ok(rule_id: i64) -> Self {
        Self { success: true, rule_id: Some(rule_id), error: None }
    }

    fn fail(reason: impl Into<String>) -> Self {
        Self { success: false, rule_id: None, error: Some(reason.into()) }
    }
}

pub struct RuleLoader {
    rules: RuleStore,
}

impl RuleLoader {
    pub fn new(rules: RuleStore) -> Self {
        Self { rules }
    }

    /// Parses and stores one rule definition. Failures are reported in the
    /// result, never raised; callers decide whether to abort or continue.
    pub fn load(&self, data: &Value) -> LoadResult {
        let rule = match parser::parse_rule(data) {
            Ok(rule) => rule,
            Err(err) => return LoadResult::fail(bare_message(err)),
        };
        match self.rules.insert(&rule) {
            Ok(id) => {
                info!(rule = %rule.name, rule_id = id, "autorun rule loaded");
                LoadResult::ok(id)
            }
            Err(err) => LoadResult::fail(bare_message(err)),
        }
    }

    pub fn load_file(&self, path: &Path) -> LoadResult {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) => return LoadResult::fail(format!("{}: {}", path.display(), err)),
        };
        match serde_json::from_str::<Value>(&raw) {
            Ok(data) => self.load(&data),
            Err(err) => LoadResult::fail(format!("{}: {}", path.display(), err)),
        }
    }

    /// Loads every `*.json` definition in `dir`, in filename order. Returns
    /// the number of rules stored; broken files are skipped.
    pub fn load_dir(&self, dir: &Path) -> usize {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return 0;
        };
        let mut paths: Vec<_> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().map(|ext| ext == "json").unwrap_or(false))
            .collect();
        paths.sort();

        let mut loaded = 0;
        for path in paths {
            let result = self.load_file(&path);
            if result.success {
                loaded += 1;
            } else if let Some(reason) = result.error {
                warn!(file = %path.display(), error = %reason, "skipping autorun rule");
            }
        }
        loaded
    }
}

/// The wire contract carries the human-readable reason without the error
/// enum's display prefix.
fn bare_message(err: Error) -> String {
    match err {
        Error::Validation(msg) | Error::TypeMismatch(msg) => msg,
        other => other.to_string(),
    }
}
