use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, patch},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::onboarding::{set_onboarding_done, OnboardingError};
use crate::snapshot::{SnapshotAggregator, SnapshotReport};
use crate::store::DocumentStore;
use crate::tasks::{apply_task_action, TaskAction, TaskError};
use crate::writers::get_research;

/// Response header listing the snapshot slices served from fallbacks.
pub const DEGRADED_HEADER: &str = "x-snapshot-degraded";

const INVALID_TASK_PAYLOAD: &str = "Invalid payload. Use { id, action: complete|cancel }";
const INVALID_ONBOARDING_PAYLOAD: &str = "Invalid payload";

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct DashboardState {
    pub store: Arc<dyn DocumentStore>,
    pub activity_limit: usize,
    /// When set, `/api/*` requires `Authorization: Bearer <token>`.
    pub dashboard_token: Option<String>,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(state: DashboardState) -> Router {
    let api = Router::new()
        .route("/api/dashboard", get(api_dashboard))
        .route("/api/research", get(api_research))
        .route("/api/tasks", patch(api_tasks))
        .route("/api/onboarding", patch(api_onboarding))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/health", get(health_handler))
        .merge(api)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Auth middleware
// ---------------------------------------------------------------------------

async fn auth_middleware(
    State(state): State<DashboardState>,
    headers: HeaderMap,
    request: axum::extract::Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(expected) = state.dashboard_token.as_deref() else {
        return Ok(next.run(request).await);
    };

    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");

    if token != expected {
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(next.run(request).await)
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Handler failures, rendered as `{error}` or `{error, detail}` bodies.
#[derive(Debug)]
enum ApiError {
    BadRequest(&'static str),
    NotFound(&'static str),
    Backend {
        message: &'static str,
        detail: String,
    },
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
            }
            ApiError::NotFound(message) => {
                (StatusCode::NOT_FOUND, Json(json!({ "error": message }))).into_response()
            }
            ApiError::Backend { message, detail } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": message, "detail": detail })),
            )
                .into_response(),
        }
    }
}

impl From<TaskError> for ApiError {
    fn from(e: TaskError) -> Self {
        match e {
            TaskError::InvalidPayload(_) => ApiError::BadRequest(INVALID_TASK_PAYLOAD),
            TaskError::TaskNotFound(_) => ApiError::NotFound("Task not found"),
            TaskError::StoreWriteFailed(e) => {
                error!(error = %e, "Task update failed");
                ApiError::Backend {
                    message: "Failed to update task",
                    detail: e.to_string(),
                }
            }
        }
    }
}

impl From<OnboardingError> for ApiError {
    fn from(e: OnboardingError) -> Self {
        match e {
            OnboardingError::InvalidPayload(_) => ApiError::BadRequest(INVALID_ONBOARDING_PAYLOAD),
            OnboardingError::StoreWriteFailed(e) => {
                error!(error = %e, "Onboarding override update failed");
                ApiError::Backend {
                    message: "Failed to update onboarding override",
                    detail: e.to_string(),
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Payload helpers
// ---------------------------------------------------------------------------

/// Text form of a loosely typed payload field. Absent, null, false, zero and
/// empty values all read as empty. Scalars stringify the way a JavaScript
/// client would. Arrays and objects only approximate that: they come out as
/// JSON text (`[1,2]`, not `1,2`), which no real id matches.
fn text_field(body: &Value, key: &str) -> String {
    match body.get(key) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(v) if truthy(v) => v.to_string(),
        _ => String::new(),
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health_handler() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

async fn api_dashboard(State(state): State<DashboardState>) -> Response {
    let report = SnapshotAggregator::new(state.store.as_ref(), state.activity_limit)
        .collect()
        .await;

    let degraded = degraded_header(&report);
    let mut response = Json(report.snapshot).into_response();
    if let Some(value) = degraded.and_then(|v| HeaderValue::from_str(&v).ok()) {
        response.headers_mut().insert(DEGRADED_HEADER, value);
    }
    response
}

fn degraded_header(report: &SnapshotReport) -> Option<String> {
    if report.unreachable {
        return Some("unreachable".to_string());
    }
    if report.is_complete() {
        return None;
    }
    let mut slices: Vec<&str> = Vec::new();
    for d in &report.degraded {
        if !slices.contains(&d.slice.as_str()) {
            slices.push(d.slice.as_str());
        }
    }
    Some(slices.join(","))
}

async fn api_research(State(state): State<DashboardState>) -> Json<Value> {
    match get_research(state.store.as_ref()).await {
        Ok(items) => Json(json!({ "items": items })),
        Err(e) => {
            warn!(error = %e, "Research read failed");
            Json(json!({ "items": [], "error": e.to_string() }))
        }
    }
}

async fn api_tasks(
    State(state): State<DashboardState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = body.map_err(|e| {
        warn!(error = %e, "Rejected task payload");
        ApiError::BadRequest(INVALID_TASK_PAYLOAD)
    })?;

    let task_id = text_field(&body, "id");
    if task_id.is_empty() {
        return Err(ApiError::BadRequest(INVALID_TASK_PAYLOAD));
    }
    let action: TaskAction = text_field(&body, "action").parse()?;

    apply_task_action(state.store.as_ref(), &task_id, action).await?;
    Ok(Json(json!({ "ok": true })))
}

async fn api_onboarding(
    State(state): State<DashboardState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = body.map_err(|e| {
        warn!(error = %e, "Rejected onboarding payload");
        ApiError::BadRequest(INVALID_ONBOARDING_PAYLOAD)
    })?;

    let page_id = text_field(&body, "pageId");
    let task = text_field(&body, "task");
    let done = body.get("done").is_some_and(truthy);

    set_onboarding_done(state.store.as_ref(), &page_id, &task, done).await?;
    Ok(Json(json!({ "ok": true })))
}

// ---------------------------------------------------------------------------
// Server entry point
// ---------------------------------------------------------------------------

pub async fn start_dashboard_server(
    state: DashboardState,
    port: u16,
    bind_addr: &str,
) -> anyhow::Result<()> {
    let app = build_router(state);

    let ip: std::net::IpAddr = bind_addr
        .parse()
        .unwrap_or_else(|_| std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST));
    let addr = std::net::SocketAddr::new(ip, port);
    info!("Dashboard server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Dashboard server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
}
