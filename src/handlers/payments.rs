//! Payment and refund intake.
//!
//! Every mutation runs as one transaction: state row, idempotency record,
//! outbox rows, and job row commit together or not at all. The queue is
//! only woken after the commit.

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::db::{queries, AppState};
use crate::error::{msg, AppError, OptionExt, Result};
use crate::extractors::{Json, Path};
use crate::id::EntityType;
use crate::models::{
    event_types, CreatePayment, CreatePaymentRequest, CreateRefundRequest, Payment,
    PaymentResponse, Refund,
};
use crate::queue::{self, JobKind, QueueName};

const IDEMPOTENCY_HEADER: &str = "idempotency-key";

/// The client's idempotency key, if it sent one.
fn client_idempotency_key(headers: &HeaderMap) -> Option<String> {
    headers
        .get(IDEMPOTENCY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Replay the recorded response byte-for-byte.
fn replay_response(stored: String) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        stored,
    )
        .into_response()
}

fn created_response(body: String) -> Response {
    (
        StatusCode::CREATED,
        [(header::CONTENT_TYPE, "application/json")],
        body,
    )
        .into_response()
}

fn validate_payment_request(req: &CreatePaymentRequest) -> Result<CreatePayment> {
    if req.amount <= Decimal::ZERO {
        return Err(AppError::Validation(msg::AMOUNT_NOT_POSITIVE.into()));
    }

    let customer_email = req.customer_email.trim().to_string();
    if customer_email.is_empty() {
        return Err(AppError::Validation(msg::EMAIL_REQUIRED.into()));
    }

    let currency = match &req.currency {
        Some(c) => {
            let c = c.trim();
            if c.len() != 3 || !c.chars().all(|ch| ch.is_ascii_alphabetic()) {
                return Err(AppError::Validation(msg::CURRENCY_INVALID.into()));
            }
            c.to_ascii_uppercase()
        }
        None => "USD".to_string(),
    };

    Ok(CreatePayment {
        amount: req.amount,
        currency,
        customer_email,
        customer_name: req.customer_name.clone(),
        description: req.description.clone(),
        payment_method: req.payment_method.clone(),
        metadata: req
            .metadata
            .clone()
            .unwrap_or_else(|| serde_json::json!({})),
    })
}

/// POST /payments
///
/// Idempotency gate, validation, then one transaction that writes the
/// payment, the replay record, and the `ProcessPayment` job.
pub async fn create_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreatePaymentRequest>,
) -> Result<Response> {
    let client_key = client_idempotency_key(&headers);
    let mut conn = state.db.get()?;
    let now = Utc::now().timestamp();

    if let Some(key) = &client_key {
        if let Some(stored) = queries::lookup_idempotent(&conn, key, now)? {
            tracing::debug!("replaying recorded response for idempotency key");
            return Ok(replay_response(stored));
        }
    } else {
        // A server-generated key cannot be replayed by the client, so the
        // request gets no replay protection. Recorded for bookkeeping only.
        tracing::warn!("POST /payments without Idempotency-Key header");
    }

    let input = validate_payment_request(&request)?;
    let key = client_key
        .clone()
        .unwrap_or_else(|| EntityType::IdempotencyKey.gen_id());

    let tx = conn.transaction()?;
    let payment = match queries::create_payment(&tx, &input, &key) {
        Ok(payment) => payment,
        Err(AppError::DuplicateKey) => {
            // Lost a race (or the replay record expired while the payment
            // row survived). Answer from the existing payment.
            drop(tx);
            let existing = queries::get_payment_by_idempotency_key(&conn, &key)?
                .or_not_found(msg::PAYMENT_NOT_FOUND)?;
            return Ok((
                StatusCode::OK,
                Json(serde_json::json!({
                    "id": existing.id,
                    "status": existing.status,
                    "message": msg::PAYMENT_ALREADY_EXISTS,
                })),
            )
                .into_response());
        }
        Err(e) => return Err(e),
    };

    let body = serde_json::to_string(&PaymentResponse::from(&payment))?;
    if client_key.is_some() {
        queries::put_idempotency_record(&tx, &key, &payment.id, &body, state.idempotency_ttl_secs)?;
    }
    queue::enqueue(
        &tx,
        QueueName::Payments,
        &payment.id,
        &JobKind::ProcessPayment {
            payment_id: payment.id.clone(),
        },
    )?;
    tx.commit()?;
    state.queues.payments.wake();

    tracing::info!(
        "payment {} accepted: {} {}",
        payment.id,
        payment.amount,
        payment.currency
    );
    Ok(created_response(body))
}

#[derive(Deserialize)]
pub struct PaymentPath {
    pub payment_id: String,
}

/// Payment with its refunds embedded, newest refund first.
#[derive(Serialize)]
pub struct PaymentDetail {
    #[serde(flatten)]
    pub payment: Payment,
    pub refunds: Vec<Refund>,
}

/// GET /payments/{payment_id}
pub async fn get_payment(
    State(state): State<AppState>,
    Path(path): Path<PaymentPath>,
) -> Result<Json<PaymentDetail>> {
    let conn = state.db.get()?;

    let payment =
        queries::get_payment(&conn, &path.payment_id)?.or_not_found(msg::PAYMENT_NOT_FOUND)?;
    let refunds = queries::list_refunds_for_payment(&conn, &path.payment_id)?;

    Ok(Json(PaymentDetail { payment, refunds }))
}

/// POST /payments/{payment_id}/refund
///
/// Refunds settle synchronously: the refund row, the parent payment's
/// transition, and both refund outbox events share one transaction.
pub async fn refund_payment(
    State(state): State<AppState>,
    Path(path): Path<PaymentPath>,
    headers: HeaderMap,
    Json(request): Json<CreateRefundRequest>,
) -> Result<Response> {
    let client_key = client_idempotency_key(&headers);
    let mut conn = state.db.get()?;
    let now = Utc::now().timestamp();

    if let Some(key) = &client_key {
        if let Some(stored) = queries::lookup_idempotent(&conn, key, now)? {
            tracing::debug!("replaying recorded response for idempotency key");
            return Ok(replay_response(stored));
        }
    }

    let tx = conn.transaction()?;
    let (refund, payment) = queries::create_refund(
        &tx,
        &path.payment_id,
        request.amount,
        request.reason.as_deref(),
    )?;

    let payload = serde_json::json!({
        "refund_id": refund.id,
        "payment_id": payment.id,
        "amount": refund.amount,
        "reason": refund.reason,
        "payment_status": payment.status,
    });
    queries::insert_outbox_events(
        &tx,
        event_types::REFUND_CREATED,
        &payload,
        state.delivery.max_retries,
    )?;
    queries::insert_outbox_events(
        &tx,
        event_types::REFUND_PROCESSED,
        &payload,
        state.delivery.max_retries,
    )?;

    let body = serde_json::to_string(&refund)?;
    if let Some(key) = &client_key {
        queries::put_idempotency_record(&tx, key, &payment.id, &body, state.idempotency_ttl_secs)?;
    }
    tx.commit()?;
    // Cue the dispatcher; the outbox rows are already due.
    state.queues.webhooks.wake();

    tracing::info!(
        "refund {} of {} accepted for payment {} (now {})",
        refund.id,
        refund.amount,
        payment.id,
        payment.status
    );
    Ok(created_response(body))
}
