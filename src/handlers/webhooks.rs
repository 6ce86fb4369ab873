//! Webhook subscription CRUD and per-subscription event listing.
//!
//! The signing secret is generated server-side and returned exactly once,
//! in the registration response. Every later read omits it.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};

use crate::db::{queries, AppState};
use crate::error::{msg, AppError, OptionExt, Result};
use crate::extractors::{Json, Path};
use crate::models::{
    CreateWebhookRequest, EventStatus, UpdateWebhookRequest, WebhookEventResponse, WebhookResponse,
};
use crate::signer;

#[derive(Deserialize)]
pub struct WebhookPath {
    pub webhook_id: String,
}

fn validate_url(url: &str) -> Result<()> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(AppError::Validation(msg::URL_INVALID.into()))
    }
}

fn validate_events(events: &[String]) -> Result<()> {
    if events.is_empty() || events.iter().any(|e| e.trim().is_empty()) {
        Err(AppError::Validation(msg::EVENTS_REQUIRED.into()))
    } else {
        Ok(())
    }
}

/// POST /webhooks
pub async fn register_webhook(
    State(state): State<AppState>,
    Json(request): Json<CreateWebhookRequest>,
) -> Result<Response> {
    validate_url(&request.url)?;
    validate_events(&request.events)?;

    let conn = state.db.get()?;
    let secret = signer::generate_secret();
    let webhook = queries::create_webhook(&conn, &request, &secret)?;

    tracing::info!("webhook {} registered for {:?}", webhook.id, webhook.events);

    // The only response that ever carries the secret.
    let body = WebhookResponse::from(&webhook).with_secret(secret);
    Ok((StatusCode::CREATED, Json(body)).into_response())
}

/// GET /webhooks
pub async fn list_webhooks(State(state): State<AppState>) -> Result<Json<Vec<WebhookResponse>>> {
    let conn = state.db.get()?;
    let webhooks = queries::list_webhooks(&conn)?;
    Ok(Json(webhooks.iter().map(WebhookResponse::from).collect()))
}

/// GET /webhooks/{webhook_id}
pub async fn get_webhook(
    State(state): State<AppState>,
    Path(path): Path<WebhookPath>,
) -> Result<Json<WebhookResponse>> {
    let conn = state.db.get()?;
    let webhook =
        queries::get_webhook(&conn, &path.webhook_id)?.or_not_found(msg::WEBHOOK_NOT_FOUND)?;
    Ok(Json(WebhookResponse::from(&webhook)))
}

/// PATCH /webhooks/{webhook_id}
pub async fn update_webhook(
    State(state): State<AppState>,
    Path(path): Path<WebhookPath>,
    Json(request): Json<UpdateWebhookRequest>,
) -> Result<Json<WebhookResponse>> {
    if let Some(url) = &request.url {
        validate_url(url)?;
    }
    if let Some(events) = &request.events {
        validate_events(events)?;
    }

    let conn = state.db.get()?;
    let webhook = queries::update_webhook(&conn, &path.webhook_id, &request)?
        .or_not_found(msg::WEBHOOK_NOT_FOUND)?;

    Ok(Json(WebhookResponse::from(&webhook)))
}

/// DELETE /webhooks/{webhook_id}
///
/// Removes the subscription and (by cascade) its outbox rows.
pub async fn delete_webhook(
    State(state): State<AppState>,
    Path(path): Path<WebhookPath>,
) -> Result<Json<serde_json::Value>> {
    let conn = state.db.get()?;
    if !queries::delete_webhook(&conn, &path.webhook_id)? {
        return Err(AppError::NotFound(msg::WEBHOOK_NOT_FOUND.into()));
    }
    Ok(Json(serde_json::json!({ "deleted": true })))
}

#[derive(Debug, Deserialize)]
pub struct ListEventsQuery {
    /// Filter by delivery status (pending, completed, failed)
    pub status: Option<EventStatus>,
    /// Max results to return (default 50, max 100)
    pub limit: Option<i64>,
    /// Offset for pagination (default 0)
    pub offset: Option<i64>,
}

impl ListEventsQuery {
    fn limit(&self) -> i64 {
        self.limit.unwrap_or(50).clamp(1, 100)
    }

    fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

/// Paginated response wrapper for list endpoints.
#[derive(Debug, Serialize)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// GET /webhooks/{webhook_id}/events
pub async fn list_events(
    State(state): State<AppState>,
    Path(path): Path<WebhookPath>,
    Query(query): Query<ListEventsQuery>,
) -> Result<Json<Paginated<WebhookEventResponse>>> {
    let conn = state.db.get()?;

    // 404 for an unknown subscription rather than an empty page.
    queries::get_webhook(&conn, &path.webhook_id)?.or_not_found(msg::WEBHOOK_NOT_FOUND)?;

    let limit = query.limit();
    let offset = query.offset();
    let (events, total) =
        queries::list_webhook_events(&conn, &path.webhook_id, query.status, limit, offset)?;

    Ok(Json(Paginated {
        items: events.iter().map(WebhookEventResponse::from).collect(),
        total,
        limit,
        offset,
    }))
}
