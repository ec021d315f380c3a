//! API request handlers.

use std::convert::Infallible;
use std::path::Path as FsPath;

use axum::{
    Json,
    body::{Body, Bytes},
    extract::{Path, Query, State, rejection::JsonRejection},
    http::{StatusCode, header},
    response::sse::{Event, Sse},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio_stream::Stream;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, instrument};

use crate::artifacts;
use crate::jobs::{JobId, StartJobRequest};
use crate::locations;
use crate::session::{SessionId, SessionSnapshot};
use crate::stream::StreamPublisher;

use super::error::{ApiError, ApiResult};
use super::state::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============================================================================
// Jobs
// ============================================================================

#[derive(Debug, Serialize)]
pub struct StartJobResponse {
    pub status: &'static str,
    pub job_id: JobId,
}

/// Start a collection job. Returns as soon as the job is spawned.
#[instrument(skip(state, payload))]
pub async fn start_job(
    State(state): State<AppState>,
    payload: Result<Json<StartJobRequest>, JsonRejection>,
) -> ApiResult<Json<StartJobResponse>> {
    let Json(raw) = payload.map_err(|rejection| {
        debug!("Rejected start-job body: {}", rejection.body_text());
        ApiError::validation("Missing required fields")
    })?;

    let request = raw.validate()?;
    let handle = state.jobs.start(request)?;

    Ok(Json(StartJobResponse {
        status: "started",
        job_id: handle.id,
    }))
}

/// Optional body for pause/stop. Older clients send none.
#[derive(Debug, Default, Deserialize)]
pub struct ControlRequest {
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ControlResponse {
    pub status: &'static str,
}

fn parse_control(body: &Bytes) -> ControlRequest {
    serde_json::from_slice(body).unwrap_or_default()
}

/// Acknowledge a pause request. Jobs cannot be paused; this never halts one.
#[instrument(skip(state, body))]
pub async fn pause_job(State(state): State<AppState>, body: Bytes) -> Json<ControlResponse> {
    if let Some(session_id) = parse_control(&body).session_id {
        state.jobs.pause(&session_id);
    }
    Json(ControlResponse { status: "paused" })
}

/// Request a stop. Best effort: the collector decides whether to honour it.
#[instrument(skip(state, body))]
pub async fn stop_job(State(state): State<AppState>, body: Bytes) -> Json<ControlResponse> {
    if let Some(session_id) = parse_control(&body).session_id {
        if !state.jobs.stop(&session_id) {
            debug!(session_id = %session_id, "Stop requested for idle session");
        }
    }
    Json(ControlResponse { status: "stopped" })
}

// ============================================================================
// Streams
// ============================================================================

/// Live event stream for a session.
#[instrument(skip(state))]
pub async fn stream_events(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let publisher = StreamPublisher::open(
        state.registry.clone(),
        SessionId::from(session_id),
        state.heartbeat,
    );

    let events = publisher
        .into_stream()
        .map(|frame| Ok::<_, Infallible>(frame.into_event()));

    Sse::new(events)
}

// ============================================================================
// Sessions
// ============================================================================

#[derive(Debug, Serialize)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub created_at: DateTime<Utc>,
    pub idle_secs: u64,
    pub queued: usize,
    pub job_running: bool,
}

/// List live sessions with their queue depth.
pub async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionSummary>> {
    let sessions = state
        .registry
        .snapshot()
        .into_iter()
        .map(|SessionSnapshot { session_id, created_at, idle_secs, queued }| {
            let job_running = state.jobs.is_running(session_id.as_str());
            SessionSummary {
                session_id,
                created_at,
                idle_secs,
                queued,
                job_running,
            }
        })
        .collect();
    Json(sessions)
}

// ============================================================================
// Locations
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct LocationQuery {
    pub country: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum LocationResponse {
    Countries { countries: Vec<&'static str> },
    Cities { cities: Vec<&'static str> },
}

pub async fn list_locations(Query(query): Query<LocationQuery>) -> Json<LocationResponse> {
    match query.country.filter(|c| !c.is_empty()) {
        Some(country) => Json(LocationResponse::Cities {
            cities: locations::cities(&country),
        }),
        None => Json(LocationResponse::Countries {
            countries: locations::countries(),
        }),
    }
}

// ============================================================================
// Downloads
// ============================================================================

/// Exported result files, newest first.
pub async fn list_downloads(State(state): State<AppState>) -> ApiResult<Json<Vec<String>>> {
    Ok(Json(state.artifacts.list().await?))
}

#[instrument(skip(state))]
pub async fn download_file(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> ApiResult<Response> {
    let path = state.artifacts.resolve(&filename).await?;
    attachment(&path).await
}

/// Download the most recently written export.
#[instrument(skip(state))]
pub async fn export_current(State(state): State<AppState>) -> ApiResult<Response> {
    let path = state.artifacts.latest().await?;
    info!("Exporting {}", path.display());
    attachment(&path).await
}

async fn attachment(path: &FsPath) -> ApiResult<Response> {
    let file_name = artifacts::file_name(path).unwrap_or_else(|| "download.csv".to_string());
    let metadata = fs::metadata(path)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to read {file_name}: {e}")))?;
    let file = fs::File::open(path)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to open {file_name}: {e}")))?;
    let body = Body::from_stream(ReaderStream::new(file));

    let safe_filename = file_name.replace('"', "'");

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (header::CONTENT_LENGTH, metadata.len().to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", safe_filename),
            ),
        ],
        body,
    )
        .into_response())
}
