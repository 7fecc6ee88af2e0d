pub mod browsers;
pub mod commands;
pub mod db;
pub mod details;
pub mod executions;
pub mod logs;
pub mod modules;
pub mod rules;

pub use browsers::{BrowserStore, HookedBrowser};
pub use commands::{Command, CommandResult, CommandStore};
pub use db::Db;
pub use details::DetailStore;
pub use executions::{Execution, ExecutionStore};
pub use logs::{LogEntry, LogStore};
pub use modules::{CommandModule, ModuleStore};
pub use rules::{NewRule, Rule, RuleStore};
