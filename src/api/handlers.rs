use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::engine::publisher::Snapshot;
use crate::engine::types::{CaseId, OutcomeCounts, RunState, RunStatus, Verdict};

use super::AppState;
use super::errors::AppError;

// --- Request/Response types ---

#[derive(Deserialize)]
pub struct ListRunsQuery {
    pub status: Option<String>,
}

#[derive(Serialize)]
pub struct RunSummary {
    pub id: String,
    pub plan: String,
    pub status: RunStatus,
    pub started: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended: Option<chrono::DateTime<chrono::Utc>>,
    pub counts: OutcomeCounts,
}

impl From<&RunState> for RunSummary {
    fn from(run: &RunState) -> Self {
        Self {
            id: run.id.clone(),
            plan: run.plan.clone(),
            status: run.status,
            started: run.started,
            ended: run.ended,
            counts: run.counts(),
        }
    }
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub run_active: bool,
    pub subscribers: usize,
}

// --- Handlers ---

/// GET /run
pub async fn current_run(State(state): State<Arc<AppState>>) -> Result<Json<RunState>, AppError> {
    let snapshot = state
        .engine
        .snapshot()
        .await
        .ok_or_else(|| AppError::NotFound("No run has been started".to_string()))?;

    Ok(Json(RunState::clone(&snapshot)))
}

/// GET /run/cases/{id}/verdict
///
/// Whether the case may run right now against the live outcomes.
pub async fn case_verdict(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Verdict>, AppError> {
    let case = id
        .parse::<CaseId>()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;
    Ok(Json(state.engine.resolve(&case).await?))
}

/// GET /events
///
/// Server-Sent Events stream. The current document is sent first, then one
/// `run_state` event per published transition.
pub async fn events(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = state.engine.subscribe();
    let initial = state.engine.snapshot().await;

    let stream = stream::unfold(
        (subscription, initial),
        |(mut subscription, pending)| async move {
            let snapshot = match pending {
                Some(snapshot) => snapshot,
                None => subscription.recv().await?,
            };
            Some((Ok(snapshot_event(&snapshot)), (subscription, None)))
        },
    );

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

fn snapshot_event(snapshot: &Snapshot) -> Event {
    let event = Event::default()
        .event("run_state")
        .id(snapshot.revision.to_string());

    match event.json_data(snapshot.as_ref()) {
        Ok(event) => event,
        Err(e) => {
            warn!(revision = snapshot.revision, error = %e, "Failed to encode run state event");
            Event::default().event("error").data(e.to_string())
        }
    }
}

/// GET /runs
pub async fn list_runs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListRunsQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let status = match query.status {
        Some(ref s) => Some(s.parse::<RunStatus>().map_err(AppError::BadRequest)?),
        None => None,
    };

    let runs = state.store.list_runs(status).await?;
    let summaries: Vec<RunSummary> = runs.iter().map(RunSummary::from).collect();

    Ok(Json(serde_json::json!({
        "total": summaries.len(),
        "runs": summaries,
    })))
}

/// Run ids are UUIDs; anything else never reaches the store.
fn parse_run_id(raw: &str) -> Result<String, AppError> {
    uuid::Uuid::parse_str(raw)
        .map(|id| id.to_string())
        .map_err(|_| AppError::BadRequest(format!("Invalid run id '{}'", raw)))
}

/// GET /runs/{id}
pub async fn get_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<RunState>, AppError> {
    let id = parse_run_id(&id)?;
    let run = state
        .store
        .load(&id)
        .await
        .map_err(|_| AppError::NotFound(format!("Run '{}' not found", id)))?;

    Ok(Json(run))
}

/// DELETE /runs/{id}
pub async fn delete_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let id = parse_run_id(&id)?;
    state
        .store
        .load(&id)
        .await
        .map_err(|_| AppError::NotFound(format!("Run '{}' not found", id)))?;

    if let Some(live) = state.engine.snapshot().await
        && live.id == id
        && !live.is_finished()
    {
        return Err(AppError::Conflict(format!("Run '{}' is still active", id)));
    }

    state.store.delete_run(&id).await?;

    Ok(Json(serde_json::json!({
        "deleted": id,
    })))
}

/// GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        run_active: state.engine.is_active().await,
        subscribers: state.engine.publisher().subscriber_count(),
    })
}
