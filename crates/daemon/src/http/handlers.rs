// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP handlers.

use super::HttpState;
use crate::broker::{Frame, StreamBroker, StreamRequest};
use crate::daemon::{Daemon, ERROR_WINDOW};
use crate::error::DaemonError;
use crate::orchestrator::{self, ChatMode};
use amon_core::{ChatId, ErrorKind, Event, EventKind, ProjectId, RunId};
use amon_storage::{load_json, SessionStore};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use futures_util::stream::Stream;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::convert::Infallible;

/// Error body: `{error_code, message}` with a taxonomy code.
#[derive(Debug)]
pub(crate) struct ApiError {
    status: StatusCode,
    kind: ErrorKind,
    message: String,
}

impl ApiError {
    fn bad_request(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { status: StatusCode::BAD_REQUEST, kind, message: message.into() }
    }
}

impl From<DaemonError> for ApiError {
    fn from(e: DaemonError) -> Self {
        let status = match &e {
            DaemonError::MissingChatId | DaemonError::ConfigInvalid(_) => StatusCode::BAD_REQUEST,
            DaemonError::ProjectNotFound(_) | DaemonError::RunNotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self { status, kind: e.kind(), message: e.to_string() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let body = json!({"error_code": self.kind.to_string(), "message": self.message});
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// --- projects ---

pub(crate) async fn list_projects(State(state): State<HttpState>) -> ApiResult<Json<Value>> {
    let projects: Vec<Value> = state
        .daemon
        .list_projects()?
        .into_iter()
        .map(|(id, name)| json!({"project_id": id, "name": name}))
        .collect();
    Ok(Json(json!({"projects": projects})))
}

#[derive(Deserialize)]
pub(crate) struct CreateProjectBody {
    #[serde(default)]
    project_id: Option<String>,
    #[serde(default)]
    name: String,
}

pub(crate) async fn create_project(
    State(state): State<HttpState>,
    Json(body): Json<CreateProjectBody>,
) -> ApiResult<Json<Value>> {
    let id = body
        .project_id
        .filter(|s| !s.is_empty())
        .map(|s| ProjectId::from_string(s));
    let project_id = state.daemon.create_project(id, &body.name)?;
    Ok(Json(json!({"project_id": project_id})))
}

// --- chat sessions ---

#[derive(Deserialize)]
pub(crate) struct EnsureSessionBody {
    project_id: String,
    #[serde(default)]
    chat_id: Option<String>,
}

pub(crate) async fn ensure_session(
    State(state): State<HttpState>,
    Json(body): Json<EnsureSessionBody>,
) -> ApiResult<Json<Value>> {
    let project_id = ProjectId::from_string(&body.project_id);
    let paths = state.daemon.project_paths(&project_id)?;
    let store = SessionStore::new(paths);

    let hint = body.chat_id.filter(|c| !c.is_empty()).map(ChatId::from_string);
    let ensured = store.ensure_session(hint.as_ref()).map_err(DaemonError::from)?;
    if ensured.fell_back {
        state.daemon.emit_project(
            &project_id,
            Event::new(EventKind::ChatSessionFallback)
                .chat_id(ensured.chat_id)
                .payload(json!({"hint": hint.map(|h| h.to_string())})),
        );
    }
    Ok(Json(json!({"chat_id": ensured.chat_id, "source": ensured.source.to_string()})))
}

// --- chat streaming ---

#[derive(Deserialize)]
pub(crate) struct ChatStreamQuery {
    project_id: String,
    #[serde(default)]
    chat_id: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    stream_token: Option<String>,
    #[serde(default)]
    last_event_id: Option<u64>,
    #[serde(default)]
    mode: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct StreamInitBody {
    pub project_id: String,
    #[serde(default)]
    pub chat_id: Option<String>,
    pub message: String,
    #[serde(default)]
    pub mode: Option<String>,
}

pub(crate) async fn stream_init(
    State(state): State<HttpState>,
    Json(body): Json<StreamInitBody>,
) -> ApiResult<Json<Value>> {
    // Validate the project now so the GET can't fail late.
    state.daemon.project_paths(&ProjectId::from_string(&body.project_id))?;
    let token = state.tokens.insert(body);
    Ok(Json(json!({"stream_token": token})))
}

pub(crate) async fn chat_stream(
    State(state): State<HttpState>,
    Query(query): Query<ChatStreamQuery>,
) -> ApiResult<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>> {
    let (project_id, chat_hint, message, mode) = match query.stream_token.as_deref() {
        Some(token) => {
            let body = state.tokens.take(token).ok_or_else(|| {
                ApiError::bad_request(ErrorKind::ProtocolError, "unknown or expired stream_token")
            })?;
            (
                ProjectId::from_string(&body.project_id),
                body.chat_id.clone(),
                Some(body.message),
                body.mode,
            )
        }
        None => (
            ProjectId::from_string(&query.project_id),
            query.chat_id.clone(),
            query.message.clone(),
            query.mode.clone(),
        ),
    };
    let chat_hint = chat_hint.filter(|c| !c.is_empty()).map(ChatId::from_string);
    let mode = mode.as_deref().and_then(ChatMode::parse);

    let request = match message {
        Some(message) if !message.is_empty() => {
            let turn = orchestrator::handle_message(
                &state.daemon,
                project_id,
                chat_hint,
                &message,
                mode,
            )
            .await?;
            StreamRequest {
                project_id,
                chat_id: Some(turn.chat_id),
                run_id: Some(turn.run_id),
                since_event_id: query.last_event_id,
            }
        }
        // Reconnect path: resume the chat's current run.
        _ => StreamRequest {
            project_id,
            chat_id: chat_hint,
            run_id: None,
            since_event_id: query.last_event_id,
        },
    };

    let rx = StreamBroker::open(&state.daemon, request)?;
    Ok(Sse::new(frames_to_sse(rx)).keep_alive(KeepAlive::default()))
}

fn frames_to_sse(
    rx: tokio::sync::mpsc::Receiver<Frame>,
) -> impl Stream<Item = Result<SseEvent, Infallible>> {
    futures_util::stream::unfold(rx, |mut rx| async move {
        let frame = rx.recv().await?;
        let event = SseEvent::default()
            .id(frame.event_id.to_string())
            .event(frame.kind.to_string())
            .data(frame.data.to_string());
        Some((Ok(event), rx))
    })
}

// --- plan confirmation ---

#[derive(Deserialize)]
pub(crate) struct PlanConfirmBody {
    project_id: String,
    chat_id: String,
    #[serde(default)]
    #[allow(dead_code)]
    command: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    args: Option<Value>,
    confirmed: bool,
}

pub(crate) async fn plan_confirm(
    State(state): State<HttpState>,
    Json(body): Json<PlanConfirmBody>,
) -> ApiResult<Json<Value>> {
    let project_id = ProjectId::from_string(&body.project_id);
    let chat_id = ChatId::from_string(&body.chat_id);
    let run = orchestrator::resolve_plan(&state.daemon, project_id, chat_id, body.confirmed).await?;
    Ok(Json(json!({"run_id": run.run_id, "status": run.status})))
}

// --- context clear ---

#[derive(Deserialize)]
pub(crate) struct ContextClearBody {
    scope: String,
    project_id: String,
    #[serde(default)]
    chat_id: Option<String>,
}

pub(crate) async fn context_clear(
    State(state): State<HttpState>,
    Json(body): Json<ContextClearBody>,
) -> ApiResult<Json<Value>> {
    let project_id = ProjectId::from_string(&body.project_id);
    let paths = state.daemon.project_paths(&project_id)?;
    let store = SessionStore::new(paths);

    match body.scope.as_str() {
        "chat" => {
            let chat_id = body
                .chat_id
                .filter(|c| !c.is_empty())
                .ok_or(DaemonError::MissingChatId)?;
            store
                .clear_session(&ChatId::from_string(&chat_id))
                .map_err(DaemonError::from)?;
            Ok(Json(json!({"cleared": "chat", "chat_id": chat_id})))
        }
        "project" => {
            let removed = store.clear_all().map_err(DaemonError::from)?;
            Ok(Json(json!({"cleared": "project", "sessions_removed": removed})))
        }
        other => Err(ApiError::bad_request(
            ErrorKind::ProtocolError,
            format!("unknown scope: {other}"),
        )),
    }
}

// --- runs ---

#[derive(Deserialize)]
pub(crate) struct ProjectQuery {
    project_id: String,
}

pub(crate) async fn list_runs(
    State(state): State<HttpState>,
    Query(query): Query<ProjectQuery>,
) -> ApiResult<Json<Value>> {
    let project_id = ProjectId::from_string(&query.project_id);
    let paths = state.daemon.project_paths(&project_id)?;

    let mut runs = Vec::new();
    if let Ok(entries) = std::fs::read_dir(paths.runs_dir()) {
        for entry in entries.flatten() {
            let run_id = RunId::from_string(entry.file_name().to_string_lossy());
            let Ok(Some(run_state)) =
                load_json::<amon_runtime::RunStateFile>(&paths.run_state_file(&run_id))
            else {
                continue;
            };
            runs.push(json!({
                "run_id": run_state.run.run_id,
                "status": run_state.run.status,
                "trigger": run_state.run.trigger,
                "chat_id": run_state.run.chat_id,
                "started_at": run_state.run.started_at,
                "finished_at": run_state.run.finished_at,
            }));
        }
    }
    // Time-ordered run ids sort chronologically.
    runs.sort_by(|a, b| a["run_id"].as_str().cmp(&b["run_id"].as_str()));
    Ok(Json(json!({"runs": runs})))
}

pub(crate) async fn run_graph(
    State(state): State<HttpState>,
    Path(run_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let run_id = RunId::from_string(&run_id);
    let project_id = state.daemon.find_run_on_disk(&run_id)?;
    let paths = state.daemon.project_paths(&project_id)?;
    let text = std::fs::read_to_string(paths.run_graph_file(&run_id))
        .map_err(DaemonError::from)?;
    let graph: Value = serde_json::from_str(&text)
        .map_err(|e| DaemonError::Protocol(format!("corrupt graph file: {e}")))?;
    Ok(Json(graph))
}

pub(crate) async fn run_node(
    State(state): State<HttpState>,
    Path((run_id, node_id)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let run_id = RunId::from_string(&run_id);
    let project_id = state.daemon.find_run_on_disk(&run_id)?;
    let paths = state.daemon.project_paths(&project_id)?;
    let run_state = load_json::<amon_runtime::RunStateFile>(&paths.run_state_file(&run_id))
        .map_err(DaemonError::from)?
        .ok_or_else(|| DaemonError::RunNotFound(run_id.to_string()))?;
    let node = run_state
        .run
        .state
        .get(&node_id)
        .ok_or_else(|| DaemonError::RunNotFound(format!("{run_id}/{node_id}")))?;
    Ok(Json(serde_json::to_value(node).unwrap_or(Value::Null)))
}

pub(crate) async fn run_artifacts(
    State(state): State<HttpState>,
    Path(run_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let run_id = RunId::from_string(&run_id);
    let project_id = state.daemon.find_run_on_disk(&run_id)?;
    let paths = state.daemon.project_paths(&project_id)?;
    let artifacts: Value = load_json(&paths.run_artifacts_file(&run_id))
        .map_err(DaemonError::from)?
        .unwrap_or_else(|| json!([]));
    Ok(Json(json!({"artifacts": artifacts})))
}

// --- event and log queries ---

#[derive(Deserialize)]
pub(crate) struct EventsQuery {
    project_id: String,
    #[serde(default)]
    run_id: Option<String>,
    #[serde(default)]
    node_id: Option<String>,
    #[serde(default)]
    severity: Option<String>,
    #[serde(default)]
    component: Option<String>,
    #[serde(default)]
    time_from: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    time_to: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    page: usize,
    #[serde(default = "default_page_size")]
    page_size: usize,
}

fn default_page_size() -> usize {
    100
}

fn event_matches(query: &EventsQuery, event: &Event) -> bool {
    if let Some(run_id) = &query.run_id {
        if event.run_id.as_ref().map(|r| r.as_str()) != Some(run_id.as_str()) {
            return false;
        }
    }
    if let Some(node_id) = &query.node_id {
        if event.node_id.as_ref().map(|n| n.as_str()) != Some(node_id.as_str()) {
            return false;
        }
    }
    if let Some(component) = &query.component {
        if event.kind.family() != component {
            return false;
        }
    }
    if let Some(from) = query.time_from {
        if event.ts < from {
            return false;
        }
    }
    if let Some(to) = query.time_to {
        if event.ts > to {
            return false;
        }
    }
    true
}

fn paginate(mut events: Vec<Event>, page: usize, page_size: usize) -> Vec<Event> {
    let total = events.len();
    let end = total.saturating_sub(page * page_size);
    let start = end.saturating_sub(page_size);
    events.drain(..start);
    events.truncate(end - start);
    events
}

pub(crate) async fn events_query(
    State(state): State<HttpState>,
    Query(query): Query<EventsQuery>,
) -> ApiResult<Json<Value>> {
    let project_id = ProjectId::from_string(&query.project_id);
    let log = state.daemon.project_events(&project_id)?;
    let matching =
        log.read_filtered(|e| event_matches(&query, e)).map_err(DaemonError::from)?;
    let page = paginate(matching, query.page, query.page_size);
    Ok(Json(json!({"events": page})))
}

/// Severity → event kinds shown by the log view.
fn severity_kinds(severity: Option<&str>) -> Vec<EventKind> {
    match severity {
        Some("error") => vec![EventKind::NodeFailed, EventKind::ToolDenied, EventKind::JobFailed],
        Some("warning") => vec![
            EventKind::NodeWarning,
            EventKind::ChatSessionFallback,
            EventKind::BillingBudgetExceeded,
            EventKind::ScheduleMisfired,
        ],
        _ => vec![
            EventKind::NodeFailed,
            EventKind::ToolDenied,
            EventKind::JobFailed,
            EventKind::NodeWarning,
            EventKind::ChatSessionFallback,
            EventKind::BillingBudgetExceeded,
            EventKind::ScheduleMisfired,
        ],
    }
}

pub(crate) async fn logs_query(
    State(state): State<HttpState>,
    Query(query): Query<EventsQuery>,
) -> ApiResult<Json<Value>> {
    let project_id = ProjectId::from_string(&query.project_id);
    let log = state.daemon.project_events(&project_id)?;
    let kinds = severity_kinds(query.severity.as_deref());
    let matching = log
        .read_filtered(|e| kinds.contains(&e.kind) && event_matches(&query, e))
        .map_err(DaemonError::from)?;
    let page = paginate(matching, query.page, query.page_size);
    Ok(Json(json!({"logs": page})))
}

// --- billing ---

pub(crate) async fn billing_summary(
    State(state): State<HttpState>,
    Query(query): Query<ProjectQuery>,
) -> ApiResult<Json<Value>> {
    let project_id = ProjectId::from_string(&query.project_id);
    let log = state.daemon.project_billing(&project_id)?;
    let usage = log
        .read_filtered(|e| e.kind == EventKind::BillingUsage)
        .map_err(DaemonError::from)?;

    let today = chrono::Utc::now().date_naive();
    let mut total_usd = 0.0;
    let mut today_usd = 0.0;
    for event in &usage {
        let cost = event.payload.get("cost_usd").and_then(|c| c.as_f64()).unwrap_or(0.0);
        total_usd += cost;
        if event.ts.date_naive() == today {
            today_usd += cost;
        }
    }
    Ok(Json(json!({
        "project_id": project_id,
        "today_usd": today_usd,
        "total_usd": total_usd,
        "usage_events": usage.len(),
    })))
}

pub(crate) async fn billing_stream(
    State(state): State<HttpState>,
    Query(query): Query<ProjectQuery>,
) -> ApiResult<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>> {
    let project_id = ProjectId::from_string(&query.project_id);
    state.daemon.project_paths(&project_id)?;
    let sub = state.daemon.bus.subscribe(move |e| {
        e.kind.family() == "billing" && e.project_id == Some(project_id)
    });

    let stream = futures_util::stream::unfold(sub, |sub| async move {
        let event = sub.recv().await;
        let sse = SseEvent::default()
            .id(event.event_id.to_string())
            .event("result")
            .data(serde_json::to_string(&event).unwrap_or_default());
        Some((Ok(sse), sub))
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

// --- health and metrics ---

#[derive(Serialize)]
pub(crate) struct HealthBody {
    status: &'static str,
    queue_depth: usize,
    recent_error_rate: RecentErrorRate,
    observability: Observability,
}

#[derive(Serialize)]
struct RecentErrorRate {
    window_seconds: u64,
    request_count: u64,
    error_count: u64,
    error_rate: f64,
    uptime_seconds: u64,
}

#[derive(Serialize)]
struct Observability {
    schema_version: &'static str,
}

pub(crate) async fn health(State(state): State<HttpState>) -> Json<HealthBody> {
    let daemon: &Daemon = &state.daemon;
    let (request_count, error_count, error_rate) = daemon.metrics.recent();
    Json(HealthBody {
        status: "ok",
        queue_depth: daemon.bus.queue_depth(),
        recent_error_rate: RecentErrorRate {
            window_seconds: ERROR_WINDOW.as_secs(),
            request_count,
            error_count,
            error_rate,
            uptime_seconds: daemon.metrics.started.elapsed().as_secs(),
        },
        observability: Observability { schema_version: "v0.1" },
    })
}

pub(crate) async fn metrics(State(state): State<HttpState>) -> String {
    use std::sync::atomic::Ordering;
    let daemon = &state.daemon;
    let (_, _, error_rate) = daemon.metrics.recent();
    let mut out = String::new();
    out.push_str("# TYPE amon_ui_queue_depth gauge\n");
    out.push_str(&format!("amon_ui_queue_depth {}\n", daemon.bus.queue_depth()));
    out.push_str("# TYPE amon_ui_request_total counter\n");
    out.push_str(&format!(
        "amon_ui_request_total {}\n",
        daemon.metrics.request_total.load(Ordering::Relaxed)
    ));
    out.push_str("# TYPE amon_ui_error_total counter\n");
    out.push_str(&format!(
        "amon_ui_error_total {}\n",
        daemon.metrics.error_total.load(Ordering::Relaxed)
    ));
    out.push_str("# TYPE amon_ui_error_rate gauge\n");
    out.push_str(&format!("amon_ui_error_rate {error_rate}\n"));
    out
}
