// Copyright 2024 Felix Engl
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The http control plane. All requests and responses are JSON, every
//! response carries `success` and failed ones an `error` string.

use crate::config::Configs;
use crate::engines::{
    EngineError, EngineSlot, HttpCrawlRequest, OnionSearchRequest, Supervisor, TocRequest,
    TorbotRequest,
};
use crate::publish::{PublishError, Publisher, SyncReport};
use crate::runtime::Shutdown;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub supervisor: Arc<Supervisor>,
    pub publisher: Arc<Publisher>,
}

/// Binds the control plane, serves until `shutdown`, then drains the
/// running engine within the configured grace period.
pub async fn run_server(configs: Configs, shutdown: Shutdown) -> std::io::Result<()> {
    let publisher = Arc::new(Publisher::new(&configs.paths));
    let supervisor = Supervisor::new(configs.clone(), Arc::clone(&publisher), shutdown.child());

    let watch_task = {
        let publisher = Arc::clone(&publisher);
        let watch_shutdown = shutdown.child();
        tokio::spawn(async move { publisher.watch(watch_shutdown).await })
    };

    let state = AppState {
        supervisor: Arc::clone(&supervisor),
        publisher,
    };
    let listener = tokio::net::TcpListener::bind(configs.system.bind).await?;
    log::info!("control plane listening on {}", configs.system.bind);

    let serve_shutdown = shutdown.clone();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { serve_shutdown.wait().await })
        .await?;

    supervisor.shutdown_engines().await;
    watch_task.await.ok();
    Ok(())
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/start", post(start_http))
        .route("/api/stop", post(stop_http))
        .route("/api/toc/start", post(start_toc))
        .route("/api/toc/stop", post(stop_toc))
        .route("/api/onionsearch/start", post(start_onionsearch))
        .route("/api/onionsearch/stop", post(stop_onionsearch))
        .route("/api/torbot/start", post(start_torbot))
        .route("/api/torbot/stop", post(stop_torbot))
        .route("/api/status", get(status))
        .route("/api/torbot/progress", get(torbot_progress))
        .route("/api/sync/status", get(sync_status))
        .route("/api/sync/force", post(sync_force))
        .with_state(state)
}

/// Errors a handler can answer with, mapped onto the documented status
/// codes. Validation problems and exclusivity violations are the client's
/// fault, everything else is a 500.
#[derive(Debug)]
enum ApiError {
    BadRequest(String),
    Internal(String),
}

impl From<EngineError> for ApiError {
    fn from(error: EngineError) -> Self {
        match error {
            EngineError::Busy | EngineError::Validation(_) | EngineError::NotRunning(_) => {
                ApiError::BadRequest(error.to_string())
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<PublishError> for ApiError {
    fn from(error: PublishError) -> Self {
        ApiError::Internal(error.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            ApiError::BadRequest(error) => (StatusCode::BAD_REQUEST, error),
            ApiError::Internal(error) => (StatusCode::INTERNAL_SERVER_ERROR, error),
        };
        (status, Json(json!({ "success": false, "error": error }))).into_response()
    }
}

/// Deserializes a request body, naming the offending field on failure.
fn parse_body<T: DeserializeOwned>(body: Value) -> Result<T, ApiError> {
    serde_json::from_value(body).map_err(|error| ApiError::BadRequest(error.to_string()))
}

fn ok() -> Json<Value> {
    Json(json!({ "success": true }))
}

fn ok_with<T: Serialize>(payload: &T) -> Json<Value> {
    let mut response = json!({ "success": true });
    if let (Value::Object(response_map), Value::Object(payload_map)) = (
        &mut response,
        serde_json::to_value(payload).unwrap_or_default(),
    ) {
        response_map.extend(payload_map);
    }
    Json(response)
}

async fn start_http(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let request: HttpCrawlRequest = parse_body(body)?;
    state.supervisor.start_http(request)?;
    Ok(ok())
}

async fn stop_http(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    state.supervisor.stop(EngineSlot::Http)?;
    Ok(ok())
}

async fn start_toc(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let request: TocRequest = parse_body(body)?;
    state.supervisor.start_toc(request)?;
    Ok(ok())
}

async fn stop_toc(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    state.supervisor.stop(EngineSlot::Toc)?;
    Ok(ok())
}

async fn start_onionsearch(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let request: OnionSearchRequest = parse_body(body)?;
    state.supervisor.start_onionsearch(request)?;
    Ok(ok())
}

async fn stop_onionsearch(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    state.supervisor.stop(EngineSlot::Onionsearch)?;
    Ok(ok())
}

async fn start_torbot(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let request: TorbotRequest = parse_body(body)?;
    state.supervisor.start_torbot(request)?;
    Ok(ok())
}

async fn stop_torbot(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    state.supervisor.stop(EngineSlot::Torbot)?;
    Ok(ok())
}

async fn status(State(state): State<AppState>) -> Json<Value> {
    ok_with(&state.supervisor.status())
}

async fn torbot_progress(State(state): State<AppState>) -> Json<Value> {
    ok_with(&state.supervisor.counters().snapshot())
}

async fn sync_status(State(state): State<AppState>) -> Json<Value> {
    ok_with::<SyncReport>(&state.publisher.sync_status())
}

async fn sync_force(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let report = state.publisher.sync_now()?;
    Ok(ok_with(&report))
}
