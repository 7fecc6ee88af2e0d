use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::paths::Paths;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebSocketConfig {
    #[serde(default)]
    pub enable: bool,
    /// Push-loop tick while a hooked browser holds a socket open.
    #[serde(default = "default_ws_poll_secs")]
    pub poll_secs: u64,
}

fn default_ws_poll_secs() -> u64 {
    5
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            enable: false,
            poll_secs: default_ws_poll_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookConfig {
    #[serde(default = "default_hook_host")]
    pub host: String,
    #[serde(default = "default_hook_port")]
    pub port: u16,
    /// Path the hooked browsers poll, bootstrap and delivery alike.
    #[serde(default = "default_hook_path")]
    pub path: String,
    /// Query parameter carrying the session token.
    #[serde(default = "default_session_param")]
    pub session_param: String,
    /// Client poll interval baked into the bootstrap payload.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub websocket: WebSocketConfig,
}

fn default_hook_host() -> String {
    "0.0.0.0".to_string()
}

fn default_hook_port() -> u16 {
    3000
}

fn default_hook_path() -> String {
    "/hook.js".to_string()
}

fn default_session_param() -> String {
    "token".to_string()
}

fn default_poll_interval_ms() -> u64 {
    5000
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            host: default_hook_host(),
            port: default_hook_port(),
            path: default_hook_path(),
            session_param: default_session_param(),
            poll_interval_ms: default_poll_interval_ms(),
            websocket: WebSocketConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestrictionsConfig {
    /// CIDR allow-list for check-ins. Empty rejects everything.
    #[serde(default = "default_permitted_subnets")]
    pub permitted_hooking_subnets: Vec<String>,
    /// CIDR deny-list, wins over the allow-list.
    #[serde(default)]
    pub excluded_hooking_subnets: Vec<String>,
}

fn default_permitted_subnets() -> Vec<String> {
    vec!["0.0.0.0/0".to_string(), "::/0".to_string()]
}

impl Default for RestrictionsConfig {
    fn default() -> Self {
        Self {
            permitted_hooking_subnets: default_permitted_subnets(),
            excluded_hooking_subnets: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfig {
    /// Bearer token for the admin API. None disables the API entirely.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutorunConfig {
    #[serde(default = "default_autorun_enable")]
    pub enable: bool,
    /// Overrides `Paths::rules_dir` when set.
    #[serde(default)]
    pub rules_dir: Option<String>,
}

fn default_autorun_enable() -> bool {
    true
}

impl Default for AutorunConfig {
    fn default() -> Self {
        Self {
            enable: default_autorun_enable(),
            rules_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ModulesConfig {
    /// Overrides `Paths::modules_dir` when set.
    #[serde(default)]
    pub dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DbConfig {
    /// Overrides `Paths::db_file` when set.
    #[serde(default)]
    pub file: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub hook: HookConfig,
    #[serde(default)]
    pub restrictions: RestrictionsConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub autorun: AutorunConfig,
    #[serde(default)]
    pub modules: ModulesConfig,
    #[serde(default)]
    pub db: DbConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn load_or_default(paths: &Paths) -> Result<Self> {
        let config_path = paths.config_file();
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn db_file(&self, paths: &Paths) -> PathBuf {
        match self.db.file.as_deref() {
            Some(f) if !f.trim().is_empty() => PathBuf::from(f),
            _ => paths.db_file(),
        }
    }

    pub fn rules_dir(&self, paths: &Paths) -> PathBuf {
        match self.autorun.rules_dir.as_deref() {
            Some(d) if !d.trim().is_empty() => PathBuf::from(d),
            _ => paths.rules_dir(),
        }
    }

    pub fn modules_dir(&self, paths: &Paths) -> PathBuf {
        match self.modules.dir.as_deref() {
            Some(d) if !d.trim().is_empty() => PathBuf::from(d),
            _ => paths.modules_dir(),
        }
    }
}
