//! HTTP action server for one application.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/task` | Job URL, task text, system prompt and step budget |
//! | `GET`  | `/actions/list` | All actions with parameter schemas |
//! | `POST` | `/actions/{name}` | Run an action; body is its parameters |
//! | `POST` | `/result` | Report the final [`ApplicationResult`] |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! Errors use the body `{ "error": { "code": "...", "message": "..." } }`
//! with codes `bad_request` (400), `not_found` (404), `job_finished` (409)
//! and `step_budget_exhausted` (429).
//!
//! Action failures the agent can act on are *not* HTTP errors: they come
//! back as `200` with `{"result": {"outcome": "err", "error": "..."}}`.

use anyhow::{Context, Result};
use axum::extract::rejection::JsonRejection;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info, warn};

use super::{ActionContext, ActionInfo, ActionRegistry, ApplicationResult, ApplicationStatus};

/// How long a finished server gets to drain before it is dropped.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// What the agent is asked to do for one job.
#[derive(Debug, Clone, Serialize)]
pub struct JobTask {
    pub job_url: String,
    pub task: String,
    pub system_prompt: Option<String>,
    pub max_steps: u32,
}

/// Shared state of one job's server.
#[derive(Clone)]
pub struct ApplyState {
    job: Arc<JobTask>,
    registry: Arc<ActionRegistry>,
    ctx: Arc<ActionContext>,
    steps: Arc<AtomicU32>,
    result_tx: Arc<Mutex<Option<oneshot::Sender<ApplicationResult>>>>,
}

impl ApplyState {
    /// State plus the receiver that yields the job's single result.
    pub fn new(
        job: JobTask,
        registry: Arc<ActionRegistry>,
        ctx: Arc<ActionContext>,
    ) -> (Self, oneshot::Receiver<ApplicationResult>) {
        let (tx, rx) = oneshot::channel();
        let state = Self {
            job: Arc::new(job),
            registry,
            ctx,
            steps: Arc::new(AtomicU32::new(0)),
            result_tx: Arc::new(Mutex::new(Some(tx))),
        };
        (state, rx)
    }

    /// Deliver the result if none has been delivered yet.
    fn finish(&self, result: ApplicationResult) -> bool {
        let sender = match self.result_tx.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        match sender {
            Some(tx) => {
                info!(job = %self.job.job_url, status = %result.status, "application result received");
                let _ = tx.send(result);
                true
            }
            None => false,
        }
    }

    fn is_finished(&self) -> bool {
        match self.result_tx.lock() {
            Ok(guard) => guard.is_none(),
            Err(poisoned) => poisoned.into_inner().is_none(),
        }
    }
}

pub fn router(state: ApplyState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/task", get(handle_task))
        .route("/actions/list", get(handle_list_actions))
        .route("/actions/{name}", post(handle_action_call))
        .route("/result", post(handle_result))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

/// Serve one job on `listener` until its result arrives, then shut down.
pub async fn serve_until_result(
    listener: TcpListener,
    job: JobTask,
    registry: Arc<ActionRegistry>,
    ctx: Arc<ActionContext>,
) -> Result<ApplicationResult> {
    let (state, result_rx) = ApplyState::new(job, registry, ctx);
    let app = router(state);
    let (stop_tx, stop_rx) = oneshot::channel::<()>();

    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = stop_rx.await;
            })
            .await
    });

    let result = tokio::select! {
        received = result_rx => received.context("action server dropped the result channel")?,
        joined = &mut server => {
            joined.context("action server task panicked")?.context("action server failed")?;
            anyhow::bail!("action server stopped before a result was reported");
        }
    };

    let _ = stop_tx.send(());
    match tokio::time::timeout(SHUTDOWN_GRACE, &mut server).await {
        Ok(Ok(Ok(()))) => debug!("action server stopped"),
        Ok(Ok(Err(e))) => warn!(error = %e, "action server stopped with an error"),
        Ok(Err(e)) => warn!(error = %e, "action server task failed"),
        Err(_) => {
            warn!("action server did not drain in time; aborting");
            server.abort();
        }
    }
    Ok(result)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn app_error(status: StatusCode, code: &str, message: impl Into<String>) -> AppError {
    AppError {
        status,
        code: code.to_string(),
        message: message.into(),
    }
}

fn job_finished() -> AppError {
    app_error(
        StatusCode::CONFLICT,
        "job_finished",
        "a result has already been reported for this job",
    )
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /task ============

#[derive(Serialize)]
struct TaskResponse {
    #[serde(flatten)]
    job: JobTask,
    steps_used: u32,
    finished: bool,
}

async fn handle_task(State(state): State<ApplyState>) -> Json<TaskResponse> {
    Json(TaskResponse {
        job: (*state.job).clone(),
        steps_used: state.steps.load(Ordering::SeqCst),
        finished: state.is_finished(),
    })
}

// ============ GET /actions/list ============

#[derive(Serialize)]
struct ActionListResponse {
    actions: Vec<ActionInfo>,
}

async fn handle_list_actions(State(state): State<ApplyState>) -> Json<ActionListResponse> {
    Json(ActionListResponse {
        actions: state.registry.infos(),
    })
}

// ============ POST /actions/{name} ============

/// Run one action. Each call spends one step; the call that would exceed
/// the budget ends the job as `NEEDS_HUMAN_INTERVENTION` instead.
async fn handle_action_call(
    State(state): State<ApplyState>,
    Path(name): Path<String>,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    if state.is_finished() {
        return Err(job_finished());
    }
    let action = state.registry.find(&name).ok_or_else(|| {
        app_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("no action registered with name: {}", name),
        )
    })?;
    let params = parse_params(&body)?;

    let step = state.steps.fetch_add(1, Ordering::SeqCst) + 1;
    if step > state.job.max_steps {
        let notes = format!("step budget of {} exhausted", state.job.max_steps);
        state.finish(ApplicationResult::new(
            ApplicationStatus::NeedsHumanIntervention,
            notes.clone(),
        ));
        return Err(app_error(
            StatusCode::TOO_MANY_REQUESTS,
            "step_budget_exhausted",
            notes,
        ));
    }

    debug!(action = %name, step, "running action");
    let outcome = action.execute(params, &state.ctx).await;
    if !outcome.is_ok() {
        debug!(action = %name, step, ?outcome, "action reported an error");
    }
    Ok(Json(serde_json::json!({ "result": outcome })))
}

/// An empty body or `null` means no parameters.
fn parse_params(body: &[u8]) -> Result<Value, AppError> {
    if body.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(Value::Object(Default::default()));
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Null) => Ok(Value::Object(Default::default())),
        Ok(v) if v.is_object() => Ok(v),
        Ok(_) => Err(app_error(
            StatusCode::BAD_REQUEST,
            "bad_request",
            "action parameters must be a JSON object",
        )),
        Err(e) => Err(app_error(
            StatusCode::BAD_REQUEST,
            "bad_request",
            format!("invalid JSON body: {}", e),
        )),
    }
}

// ============ POST /result ============

async fn handle_result(
    State(state): State<ApplyState>,
    body: Result<Json<ApplicationResult>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let Json(result) = body.map_err(|e| app_error(StatusCode::BAD_REQUEST, "bad_request", e.body_text()))?;
    if !state.finish(result) {
        return Err(job_finished());
    }
    Ok(Json(serde_json::json!({ "result": { "accepted": true } })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_null_bodies_mean_no_parameters() {
        assert_eq!(parse_params(b"").ok(), Some(serde_json::json!({})));
        assert_eq!(parse_params(b"  \n").ok(), Some(serde_json::json!({})));
        assert_eq!(parse_params(b"null").ok(), Some(serde_json::json!({})));
        assert_eq!(parse_params(br#"{"index":3}"#).ok(), Some(serde_json::json!({"index": 3})));
    }

    #[test]
    fn non_object_bodies_are_rejected() {
        for body in [&b"[1,2]"[..], b"7", b"{oops"] {
            let err = parse_params(body).err().map(|e| (e.status, e.code));
            assert_eq!(err, Some((StatusCode::BAD_REQUEST, "bad_request".to_string())));
        }
    }
}
