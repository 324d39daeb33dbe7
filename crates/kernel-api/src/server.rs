use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use contracts::{
    ApiError, Command, CommandResult, ErrorCode, RoundSnapshot, RunStatus, ScenarioConfig,
};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::Mutex;

use crate::EngineApi;

const DEFAULT_PAGE_SIZE: usize = 100;
const MAX_PAGE_SIZE: usize = 1000;

#[derive(Debug)]
pub enum ServerError {
    Io(std::io::Error),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "server io error: {err}"),
        }
    }
}

impl std::error::Error for ServerError {}

impl From<std::io::Error> for ServerError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

#[derive(Clone)]
struct AppState {
    inner: Arc<Mutex<ServerInner>>,
}

impl AppState {
    fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ServerInner::default())),
        }
    }
}

#[derive(Debug, Default)]
struct ServerInner {
    api: Option<EngineApi>,
}

#[derive(Debug)]
struct HttpApiError {
    status: StatusCode,
    error: ApiError,
}

impl HttpApiError {
    fn run_not_found(requested_run_id: &str, active_run_id: Option<&str>) -> Self {
        let details = active_run_id
            .map(|active| format!("requested_run_id={requested_run_id} active_run_id={active}"));
        Self {
            status: StatusCode::NOT_FOUND,
            error: ApiError::new(
                ErrorCode::RunNotFound,
                "run_id does not match an active run",
                details,
            ),
        }
    }

    fn round_out_of_range(round: usize, round_count: usize) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            error: ApiError::new(
                ErrorCode::RoundOutOfRange,
                "round index is out of range",
                Some(format!("round={round} round_count={round_count}")),
            ),
        }
    }

    fn invalid_command(message: impl Into<String>, details: Option<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error: ApiError::new(ErrorCode::InvalidCommand, message, details),
        }
    }
}

impl IntoResponse for HttpApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.error)).into_response()
    }
}

fn router_with_state(state: AppState) -> Router {
    Router::new()
        .route("/v1/runs", post(create_run))
        .route("/v1/runs/:run_id/status", get(run_status))
        .route("/v1/runs/:run_id/commands", post(submit_command))
        .route("/v1/runs/:run_id/rounds", get(list_rounds))
        .route("/v1/runs/:run_id/rounds/:round", get(round_detail))
        .with_state(state)
}

pub async fn serve(addr: SocketAddr) -> Result<(), ServerError> {
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, router_with_state(AppState::new())).await?;
    Ok(())
}

/// Create (or replace) the active run from a scenario; an omitted body means
/// the reference scenario.
async fn create_run(
    State(state): State<AppState>,
    body: Option<Json<ScenarioConfig>>,
) -> Result<Json<RunStatus>, HttpApiError> {
    let config = body.map_or_else(ScenarioConfig::default, |Json(config)| config);
    let api = EngineApi::from_config(config)
        .map_err(|err| HttpApiError::invalid_command("invalid scenario", Some(err.to_string())))?;
    let status = api.status();
    let mut inner = state.inner.lock().await;
    inner.api = Some(api);
    Ok(Json(status))
}

async fn run_status(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<RunStatus>, HttpApiError> {
    let inner = state.inner.lock().await;
    let api = active_run(&inner, &run_id)?;
    Ok(Json(api.status()))
}

async fn submit_command(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Json(command): Json<Command>,
) -> Result<Json<CommandResult>, HttpApiError> {
    let mut inner = state.inner.lock().await;
    let active = inner
        .api
        .as_ref()
        .map(|api| api.run_id().to_string());
    match &active {
        Some(active_run_id) if *active_run_id == run_id => {}
        _ => return Err(HttpApiError::run_not_found(&run_id, active.as_deref())),
    }
    let api = match inner.api.as_mut() {
        Some(api) => api,
        None => return Err(HttpApiError::run_not_found(&run_id, None)),
    };
    Ok(Json(api.apply_command(command)))
}

#[derive(Debug, Default, Deserialize)]
struct RoundsQuery {
    from: Option<usize>,
    limit: Option<usize>,
}

async fn list_rounds(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Query(query): Query<RoundsQuery>,
) -> Result<Json<Vec<RoundSnapshot>>, HttpApiError> {
    let inner = state.inner.lock().await;
    let api = active_run(&inner, &run_id)?;
    let from = query.from.unwrap_or(0);
    let limit = query
        .limit
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .min(MAX_PAGE_SIZE);
    let snapshots = (from..api.round_count())
        .take(limit)
        .filter_map(|round| api.round_snapshot(round))
        .collect();
    Ok(Json(snapshots))
}

async fn round_detail(
    State(state): State<AppState>,
    Path((run_id, round)): Path<(String, usize)>,
) -> Result<Json<RoundSnapshot>, HttpApiError> {
    let inner = state.inner.lock().await;
    let api = active_run(&inner, &run_id)?;
    api.round_snapshot(round)
        .map(Json)
        .ok_or_else(|| HttpApiError::round_out_of_range(round, api.round_count()))
}

fn active_run<'a>(inner: &'a ServerInner, run_id: &str) -> Result<&'a EngineApi, HttpApiError> {
    match inner.api.as_ref() {
        Some(api) if api.run_id() == run_id => Ok(api),
        Some(api) => Err(HttpApiError::run_not_found(run_id, Some(api.run_id()))),
        None => Err(HttpApiError::run_not_found(run_id, None)),
    }
}
