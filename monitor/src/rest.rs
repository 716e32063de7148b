use crate::commands::DynSimulator;
use crate::errors::Error;
use crate::model::{Alert, Bin, Command, CommandKind, ListResponse, NewBin, Timestamped};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::error;

#[derive(Clone)]
struct AppState {
    simulator: Arc<DynSimulator>,
}

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    bin_id: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    #[serde(rename = "type")]
    kind: CommandKind,
}

pub fn create_router(simulator: Arc<DynSimulator>) -> Router {
    let state = AppState { simulator };

    Router::new()
        .route("/api/v1/bins", get(list_bins).post(add_bin))
        .route("/api/v1/bins/:id", get(get_bin))
        .route("/api/v1/bins/:id/commands", post(send_command))
        .route("/api/v1/commands", get(list_commands))
        .route("/api/v1/alerts", get(list_alerts))
        .with_state(state)
}

async fn list_bins(State(state): State<AppState>) -> Json<ListResponse<Bin>> {
    let store = state.simulator.store().lock().await;
    let bins: Vec<Bin> = store.bins().cloned().collect();
    let total = bins.len();

    Json(ListResponse {
        data: bins,
        total,
        limit: total,
        offset: 0,
    })
}

async fn add_bin(
    State(state): State<AppState>,
    Json(new_bin): Json<NewBin>,
) -> Result<(StatusCode, Json<Bin>), AppError> {
    let mut store = state.simulator.store().lock().await;
    let bin = store.add_bin(new_bin)?.clone();
    Ok((StatusCode::CREATED, Json(bin)))
}

async fn get_bin(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Bin>, AppError> {
    let store = state.simulator.store().lock().await;
    let bin = store.get(&id).cloned().ok_or(Error::MissingBin(id))?;
    Ok(Json(bin))
}

async fn send_command(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<CommandRequest>,
) -> Result<Json<Command>, AppError> {
    let command = state.simulator.send_command(&id, request.kind).await?;
    Ok(Json(command))
}

async fn list_commands(
    State(state): State<AppState>,
    Query(params): Query<LogQuery>,
) -> Json<ListResponse<Command>> {
    let store = state.simulator.store().lock().await;
    Json(page(store.commands().recent(), &params))
}

async fn list_alerts(
    State(state): State<AppState>,
    Query(params): Query<LogQuery>,
) -> Json<ListResponse<Alert>> {
    let store = state.simulator.store().lock().await;
    Json(page(store.alerts().recent(), &params))
}

/// Filter a newest-first log view and cut one page out of it
fn page<T: Timestamped + Clone>(entries: Vec<&T>, params: &LogQuery) -> ListResponse<T> {
    let limit = params.limit.unwrap_or(100).min(1000);
    let offset = params.offset.unwrap_or(0);

    let matching: Vec<&T> = entries
        .into_iter()
        .filter(|entry| {
            params
                .bin_id
                .as_deref()
                .map_or(true, |bin_id| entry.bin_id() == bin_id)
        })
        .collect();
    let total = matching.len();
    let data = matching
        .into_iter()
        .skip(offset)
        .take(limit)
        .cloned()
        .collect();

    ListResponse {
        data,
        total,
        limit,
        offset,
    }
}

struct AppError(anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self.0.downcast_ref::<Error>() {
            Some(Error::MissingBin(_)) => StatusCode::NOT_FOUND,
            Some(Error::DuplicateBin(_)) => StatusCode::CONFLICT,
            Some(Error::MalformedReading(_)) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!("API error: {}", self.0);
        }
        (status, self.0.to_string()).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
