//! Health probes and the job-status introspection endpoint.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::db::{queries, AppState};
use crate::error::Result;
use crate::extractors::Json;
use crate::queue::QueueCounts;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

fn probe(ok: bool) -> Response {
    if ok {
        (StatusCode::OK, Json(serde_json::json!({ "status": "ok" }))).into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "status": "unavailable" })),
        )
            .into_response()
    }
}

/// GET /health/db
pub async fn health_db(State(state): State<AppState>) -> Response {
    let ok = state
        .db
        .get()
        .ok()
        .and_then(|conn| conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0)).ok())
        .is_some();
    probe(ok)
}

/// GET /health/queue (also answers the legacy /health/redis path)
pub async fn health_queue(State(state): State<AppState>) -> Response {
    let ok = state.queues.payments.counts().is_ok() && state.queues.webhooks.counts().is_ok();
    probe(ok)
}

#[derive(Serialize)]
pub struct QueuesReport {
    pub payments: QueueCounts,
    pub webhooks: QueueCounts,
}

#[derive(Serialize)]
pub struct OutboxReport {
    pub pending: i64,
    pub completed: i64,
    pub failed: i64,
}

#[derive(Serialize)]
pub struct JobStatusReport {
    pub queues: QueuesReport,
    pub outbox: OutboxReport,
}

/// GET /test/jobs/status
pub async fn jobs_status(State(state): State<AppState>) -> Result<Json<JobStatusReport>> {
    // Scope the connection so the queue handles can take their own from the
    // same pool afterwards.
    let (pending, completed, failed) = {
        let conn = state.db.get()?;
        queries::count_events_by_status(&conn)?
    };

    Ok(Json(JobStatusReport {
        queues: QueuesReport {
            payments: state.queues.payments.counts()?,
            webhooks: state.queues.webhooks.counts()?,
        },
        outbox: OutboxReport {
            pending,
            completed,
            failed,
        },
    }))
}
