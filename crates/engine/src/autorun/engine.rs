//! Rule evaluation and dispatch against hooked browsers.

use std::collections::HashMap;
use std::sync::Arc;

use snare_core::{Error, Result};
use snare_storage::details;
use snare_storage::{BrowserStore, DetailStore, ModuleStore, Rule, RuleStore};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::matcher;
use super::parser::{CHAIN_NESTED_FORWARD, CHAIN_SEQUENTIAL};
use super::wrapper::{self, WrapModule};
use crate::queue::CommandQueue;

/// The four environment facts rule matching runs against.
struct Environment {
    browser: String,
    browser_version: String,
    os: String,
    os_version: String,
}

/// Evaluates stored rules against a browser's reported environment and
/// enqueues composed instruction chains. Dispatch for one browser is
/// serialized by a per-session lock; different browsers dispatch in
/// parallel.
#[derive(Clone)]
pub struct AutorunEngine {
    rules: RuleStore,
    details: DetailStore,
    modules: ModuleStore,
    browsers: BrowserStore,
    queue: CommandQueue,
    session_locks: Arc<Mutex<HashMap<i64, Arc<Mutex<()>>>>>,
}

impl AutorunEngine {
    pub fn new(
        rules: RuleStore,
        details: DetailStore,
        modules: ModuleStore,
        browsers: BrowserStore,
        queue: CommandQueue,
    ) -> Self {
        Self {
            rules,
            details,
            modules,
            browsers,
            queue,
            session_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Matching is meaningless until the agent has reported its browser and
    /// OS names; versions missing from the report degrade to "0".
    fn environment(&self, browser_id: i64) -> Result<Option<Environment>> {
        let Some(browser) = self.details.get(browser_id, details::BROWSER_NAME)? else {
            return Ok(None);
        };
        let Some(os) = self.details.get(browser_id, details::OS_NAME)? else {
            return Ok(None);
        };
        let browser_version = self
            .details
            .get(browser_id, details::BROWSER_VERSION)?
            .unwrap_or_else(|| "0".to_string());
        let os_version = self
            .details
            .get(browser_id, details::OS_VERSION)?
            .unwrap_or_else(|| "0".to_string());
        Ok(Some(Environment { browser, browser_version, os, os_version }))
    }

    fn matching_rule_ids(&self, env: &Environment) -> Result<Vec<i64>> {
        let rules = self.rules.all()?;
        Ok(matcher::find_matching(
            &rules,
            &env.browser,
            &env.browser_version,
            &env.os,
            &env.os_version,
        ))
    }

    /// Evaluates every stored rule against the browser's environment and
    /// dispatches all matches.
    pub async fn run_all_matching(&self, browser_id: i64) -> Result<()> {
        let Some(env) = self.environment(browser_id)? else {
            debug!(browser_id, "environment not reported yet, skipping autorun");
            return Ok(());
        };
        let matched = self.matching_rule_ids(&env)?;
        if matched.is_empty() {
            debug!(browser_id, "no autorun rules match");
            return Ok(());
        }
        self.dispatch(&matched, browser_id).await
    }

    /// Dispatches the requested rules, restricted to those still matching
    /// the browser's current environment. The match set is re-evaluated
    /// fresh so a rule whose conditions no longer hold never fires.
    pub async fn run_selected(&self, rule_ids: &[i64], browser_id: i64) -> Result<()> {
        if rule_ids.is_empty() {
            return Ok(());
        }
        let Some(env) = self.environment(browser_id)? else {
            debug!(browser_id, "environment not reported yet, skipping autorun");
            return Ok(());
        };
        let mut matched = self.matching_rule_ids(&env)?;
        matched.retain(|id| rule_ids.contains(id));
        if matched.is_empty() {
            debug!(browser_id, "requested rules no longer match");
            return Ok(());
        }
        self.dispatch(&matched, browser_id).await
    }

    /// Composes and enqueues each rule in turn. One broken rule is logged
    /// and skipped; the rest of the batch still dispatches.
    pub async fn dispatch(&self, rule_ids: &[i64], browser_id: i64) -> Result<()> {
        if rule_ids.is_empty() {
            return Ok(());
        }
        if self.browsers.by_id(browser_id)?.is_none() {
            warn!(browser_id, "autorun dispatch for unknown browser");
            return Ok(());
        }

        let lock = {
            let mut locks = self.session_locks.lock().await;
            locks.entry(browser_id).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
        };
        let _guard = lock.lock().await;

        for rule_id in rule_ids {
            let rule = match self.rules.find(*rule_id)? {
                Some(rule) => rule,
                None => {
                    warn!(rule_id, "autorun rule not found, skipping");
                    continue;
                }
            };
            if let Err(err) = self.dispatch_rule(&rule, browser_id) {
                error!(rule = %rule.name, browser_id, "{}", err);
            }
        }
        Ok(())
    }

    fn dispatch_rule(&self, rule: &Rule, browser_id: i64) -> Result<()> {
        if rule.chain_mode != CHAIN_SEQUENTIAL && rule.chain_mode != CHAIN_NESTED_FORWARD {
            return Err(Error::Validation(format!("Invalid chain mode '{}'", rule.chain_mode)));
        }
        if rule.modules.is_empty() {
            debug!(rule = %rule.name, "rule has no modules, nothing to dispatch");
            return Ok(());
        }

        let mut mods = Vec::with_capacity(rule.modules.len());
        for name in &rule.modules {
            let module = self
                .modules
                .by_name(name)?
                .ok_or_else(|| Error::NotFound(format!("module '{}'", name)))?;
            mods.push(WrapModule { name: module.name, body: module.body });
        }

        let token = uuid::Uuid::new_v4().simple().to_string();
        let script = match rule.chain_mode.as_str() {
            CHAIN_NESTED_FORWARD => {
                // Each position forwards to the next module in execution
                // order; conditions are frozen to literal true at dispatch.
                let mut forwards = Vec::with_capacity(rule.execution_order.len());
                let mut conditions = Vec::with_capacity(rule.execution_order.len());
                for pos in 0..rule.execution_order.len() {
                    let next = rule
                        .execution_order
                        .get(pos + 1)
                        .and_then(|&idx| mods.get(idx))
                        .map(|m| format!("{}_{}", wrapper::js_ident(&m.name), token))
                        .unwrap_or_else(|| "null".to_string());
                    forwards.push(next);
                    conditions.push("true".to_string());
                }
                wrapper::nested_forward(&mods, &forwards, &conditions, &rule.execution_order, &token)
            }
            _ => wrapper::sequential(&mods, &rule.execution_order, &rule.execution_delay, &token),
        };

        let label = format!("autorun:{}", rule.name);
        let command = self.queue.enqueue_script(browser_id, &label, &script)?;
        info!(
            rule = %rule.name,
            browser_id,
            command_id = command.id,
            chain_mode = %rule.chain_mode,
            "autorun rule dispatched"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snare_storage::{CommandStore, Db, ExecutionStore, NewRule};

    struct Fixture {
        engine: AutorunEngine,
        browsers: BrowserStore,
        details: DetailStore,
        modules: ModuleStore,
        rules: RuleStore,
        queue: CommandQueue,
    }

    fn fixture() -> Fixture {
        let db = Db::open_in_memory().unwrap();
        let browsers = BrowserStore::new(db.clone());
        let details = DetailStore::new(db.clone());
        let modules = ModuleStore::new(db.clone());
        let rules = RuleStore::new(db.clone());
        let queue = CommandQueue::new(
            CommandStore::new(db.clone()),
            ExecutionStore::new(db.clone()),
            modules.clone(),
            browsers.clone(),
        );
        let engine = AutorunEngine::new(
            rules.clone(),
            details.clone(),
            modules.clone(),
            browsers.clone(),
            queue.clone(),
        );
        Fixture { engine, browsers, details, modules, rules, queue }
    }

    fn hooked_browser(fx: &Fixture) -> i64 {
        let hb = fx.browsers.create("tok", "10.0.0.5", None, 100).unwrap();
        fx.details
            .set_many(
                hb.id,
                [
                    (details::BROWSER_NAME, "FF"),
                    (details::BROWSER_VERSION, "41"),
                    (details::OS_NAME, "Windows"),
                    (details::OS_VERSION, "7"),
                ],
            )
            .unwrap();
        hb.id
    }

    fn rule(name: &str, modules: Vec<String>, chain_mode: &str) -> NewRule {
        let count = modules.len();
        NewRule {
            name: name.to_string(),
            author: "tester".to_string(),
            browser: "ALL".to_string(),
            browser_version: "ALL".to_string(),
            os: "ALL".to_string(),
            os_version: "ALL".to_string(),
            modules,
            execution_order: (0..count).collect(),
            execution_delay: vec![0; count],
            chain_mode: chain_mode.to_string(),
        }
    }

    #[tokio::test]
    async fn test_run_all_matching_enqueues_for_match() {
        let fx = fixture();
        let hb = hooked_browser(&fx);
        fx.modules.upsert("alert_dialog", "/m/alert_dialog.js", "alert(1);").unwrap();
        fx.rules
            .insert(&rule("Alert", vec!["alert_dialog".to_string()], "sequential"))
            .unwrap();

        fx.engine.run_all_matching(hb).await.unwrap();

        let pending = fx.queue.pending_for(hb).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].label, "autorun:Alert");
        assert!(pending[0].script.contains("alert(1);"));
        assert!(pending[0].script.contains("setTimeout(function(){"));
    }

    #[tokio::test]
    async fn test_run_all_matching_without_environment() {
        let fx = fixture();
        let hb = fx.browsers.create("tok", "10.0.0.5", None, 100).unwrap().id;
        fx.modules.upsert("alert_dialog", "/m/alert_dialog.js", "alert(1);").unwrap();
        fx.rules
            .insert(&rule("Alert", vec!["alert_dialog".to_string()], "sequential"))
            .unwrap();

        fx.engine.run_all_matching(hb).await.unwrap();
        assert!(fx.queue.pending_for(hb).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_chain_mode_skips_rule_but_not_batch() {
        let fx = fixture();
        let hb = hooked_browser(&fx);
        fx.modules.upsert("probe", "/m/probe.js", "probe();").unwrap();
        let bad = fx
            .rules
            .insert(&rule("Broken", vec!["probe".to_string()], "invalid"))
            .unwrap();
        let good = fx
            .rules
            .insert(&rule("Valid Rule", vec!["probe".to_string()], "sequential"))
            .unwrap();

        fx.engine.dispatch(&[bad, good], hb).await.unwrap();

        let pending = fx.queue.pending_for(hb).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].label, "autorun:Valid Rule");
    }

    #[tokio::test]
    async fn test_run_selected_takes_fresh_intersection() {
        let fx = fixture();
        let hb = hooked_browser(&fx);
        fx.modules.upsert("probe", "/m/probe.js", "probe();").unwrap();
        fx.rules
            .insert(&rule("First", vec!["probe".to_string()], "sequential"))
            .unwrap();
        let second = fx
            .rules
            .insert(&rule("Second", vec!["probe".to_string()], "sequential"))
            .unwrap();

        fx.engine.run_selected(&[second], hb).await.unwrap();
        let pending = fx.queue.pending_for(hb).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].label, "autorun:Second");

        // ids that match nothing stored dispatch nothing
        fx.engine.run_selected(&[9999], hb).await.unwrap();
        assert_eq!(fx.queue.pending_for(hb).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_run_selected_respects_rule_conditions() {
        let fx = fixture();
        let hb = hooked_browser(&fx);
        fx.modules.upsert("probe", "/m/probe.js", "probe();").unwrap();
        let mut ie_only = rule("IE Only", vec!["probe".to_string()], "sequential");
        ie_only.browser = "IE".to_string();
        let id = fx.rules.insert(&ie_only).unwrap();

        // environment reports FF, so the explicit request is filtered out
        fx.engine.run_selected(&[id], hb).await.unwrap();
        assert!(fx.queue.pending_for(hb).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_nested_forward_dispatch_builds_chain() {
        let fx = fixture();
        let hb = hooked_browser(&fx);
        fx.modules.upsert("grab", "/m/grab.js", "collect();").unwrap();
        fx.modules.upsert("send", "/m/send.js", "exfil('<<mod_input>>');").unwrap();
        let id = fx
            .rules
            .insert(&rule(
                "Chain",
                vec!["grab".to_string(), "send".to_string()],
                "nested-forward",
            ))
            .unwrap();

        fx.engine.dispatch(&[id], hb).await.unwrap();

        let pending = fx.queue.pending_for(hb).unwrap();
        assert_eq!(pending.len(), 1);
        let script = &pending[0].script;
        assert!(script.contains("grab_"));
        assert!(script.contains("_f = function(mod_output)"));
        assert!(script.contains("exfil(mod_input);"));
        assert!(script.trim_end().ends_with("(null);"));
    }

    #[tokio::test]
    async fn test_missing_module_skips_rule() {
        let fx = fixture();
        let hb = hooked_browser(&fx);
        let id = fx
            .rules
            .insert(&rule("Ghost", vec!["nonexistent".to_string()], "sequential"))
            .unwrap();

        fx.engine.dispatch(&[id], hb).await.unwrap();
        assert!(fx.queue.pending_for(hb).unwrap().is_empty());
    }
}
