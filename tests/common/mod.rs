//! Test utilities and fixtures for Paygate integration tests

#![allow(dead_code)]

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rust_decimal::Decimal;
use tower::ServiceExt;

pub use paygate::config::{DeliveryConfig, ProcessingConfig};
pub use paygate::db::{init_db, queries, AppState, DbPool};
pub use paygate::models::*;
pub use paygate::queue::{self, JobKind, QueueName, Queues};

/// In-memory database pool. Capped at one connection so every borrower
/// sees the same database.
pub fn test_pool() -> DbPool {
    // foreign_keys is per-connection; without it cascade deletes are inert
    let manager = SqliteConnectionManager::memory()
        .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;"));
    let pool = Pool::builder().max_size(1).build(manager).unwrap();
    {
        let conn = pool.get().unwrap();
        init_db(&conn).unwrap();
    }
    pool
}

/// App state with deterministic processing (test mode, zero delay) and the
/// short retry schedule.
pub fn test_state() -> AppState {
    test_state_with(test_pool())
}

pub fn test_state_with(pool: DbPool) -> AppState {
    AppState {
        db: pool.clone(),
        queues: Queues::new(pool),
        processing: ProcessingConfig {
            success_rate: 1.0,
            test_mode: true,
            test_payment_success: true,
            delay: Duration::ZERO,
        },
        delivery: DeliveryConfig {
            max_retries: 5,
            timeout: Duration::from_secs(2),
            test_intervals: true,
            poll_interval: Duration::from_secs(30),
            poll_batch: 100,
        },
        idempotency_ttl_secs: 24 * 3600,
        http_client: reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .unwrap(),
    }
}

pub fn test_app(state: AppState) -> Router {
    paygate::handlers::router().with_state(state)
}

pub fn dec(s: &str) -> Decimal {
    s.parse().unwrap()
}

/// Create a pending payment directly through the store.
pub fn create_test_payment(
    conn: &rusqlite::Connection,
    amount: &str,
    email: &str,
) -> Payment {
    let input = CreatePayment {
        amount: dec(amount),
        currency: "USD".to_string(),
        customer_email: email.to_string(),
        customer_name: None,
        description: None,
        payment_method: None,
        metadata: serde_json::json!({}),
    };
    let key = paygate::id::EntityType::IdempotencyKey.gen_id();
    queries::create_payment(conn, &input, &key).expect("Failed to create test payment")
}

/// Create a payment and settle it as completed.
pub fn create_completed_payment(
    conn: &rusqlite::Connection,
    amount: &str,
    email: &str,
) -> Payment {
    let payment = create_test_payment(conn, amount, email);
    assert!(queries::mark_payment_status(
        conn,
        &payment.id,
        PaymentStatus::Pending,
        PaymentStatus::Completed
    )
    .unwrap());
    queries::get_payment(conn, &payment.id).unwrap().unwrap()
}

/// Register an active webhook subscription.
pub fn create_test_webhook(
    conn: &rusqlite::Connection,
    url: &str,
    events: &[&str],
) -> WebhookSubscription {
    let input = CreateWebhookRequest {
        url: url.to_string(),
        events: events.iter().map(|s| s.to_string()).collect(),
        active: true,
    };
    let secret = paygate::signer::generate_secret();
    queries::create_webhook(conn, &input, &secret).expect("Failed to create test webhook")
}

/// Fire one request at the router and return status plus raw body bytes.
pub async fn send_request(
    app: &Router,
    method: &str,
    uri: &str,
    idempotency_key: Option<&str>,
    body: Option<serde_json::Value>,
) -> (StatusCode, Vec<u8>) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(key) = idempotency_key {
        builder = builder.header("Idempotency-Key", key);
    }
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, bytes.to_vec())
}

/// Like `send_request` but parses the body as JSON.
pub async fn send_json(
    app: &Router,
    method: &str,
    uri: &str,
    idempotency_key: Option<&str>,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let (status, bytes) = send_request(app, method, uri, idempotency_key, body).await;
    let json = serde_json::from_slice(&bytes)
        .unwrap_or_else(|_| panic!("non-JSON response body: {:?}", String::from_utf8_lossy(&bytes)));
    (status, json)
}

/// Count rows in the jobs table for a queue.
pub fn count_jobs(conn: &rusqlite::Connection, queue: &str) -> i64 {
    conn.query_row(
        "SELECT COUNT(*) FROM jobs WHERE queue = ?1",
        rusqlite::params![queue],
        |row| row.get(0),
    )
    .unwrap()
}

/// Count outbox rows for a subscription.
pub fn count_events_for_webhook(conn: &rusqlite::Connection, webhook_id: &str) -> i64 {
    conn.query_row(
        "SELECT COUNT(*) FROM webhook_events WHERE webhook_id = ?1",
        rusqlite::params![webhook_id],
        |row| row.get(0),
    )
    .unwrap()
}
