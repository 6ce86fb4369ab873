//! End-to-end dispatch tests against a live local receiver: signing,
//! header contract, retry scheduling, exhaustion, and crash-safe
//! redelivery.

mod common;

use std::sync::{Arc, Mutex};

use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use chrono::Utc;
use common::*;
use paygate::signer;
use paygate::workers::dispatcher;

/// One captured delivery.
#[derive(Debug, Clone)]
struct Hit {
    event_type: String,
    signature: String,
    timestamp: String,
    content_type: String,
    body: String,
}

/// Spawn a receiver on an ephemeral port that records every POST and
/// answers with a fixed status.
async fn start_receiver(respond_with: StatusCode) -> (String, Arc<Mutex<Vec<Hit>>>) {
    let hits: Arc<Mutex<Vec<Hit>>> = Arc::default();
    let recorded = hits.clone();

    let app = Router::new().route(
        "/hook",
        post(move |headers: HeaderMap, body: String| {
            let recorded = recorded.clone();
            async move {
                let header = |name: &str| {
                    headers
                        .get(name)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string()
                };
                recorded.lock().unwrap().push(Hit {
                    event_type: header("x-webhook-event"),
                    signature: header("x-webhook-signature"),
                    timestamp: header("x-webhook-timestamp"),
                    content_type: header("content-type"),
                    body,
                });
                respond_with
            }
        }),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}/hook", addr), hits)
}

/// Seed one subscription and one due outbox row; returns (secret, event_id).
fn seed_event(state: &AppState, url: &str) -> (String, String) {
    let conn = state.db.get().unwrap();
    let webhook = create_test_webhook(&conn, url, &["payment.completed"]);
    let ids = queries::insert_outbox_events(
        &conn,
        "payment.completed",
        &serde_json::json!({"payment_id": "pg_pay_1", "amount": "99.99", "email": "a@b.c"}),
        5,
    )
    .unwrap();
    (webhook.secret, ids[0].clone())
}

#[tokio::test]
async fn test_delivery_signs_and_posts_the_stored_payload() {
    let (url, hits) = start_receiver(StatusCode::OK).await;
    let state = test_state();
    let (secret, event_id) = seed_event(&state, &url);

    dispatcher::deliver_event(&state, &event_id).await.unwrap();

    let hits = hits.lock().unwrap();
    assert_eq!(hits.len(), 1);
    let hit = &hits[0];

    assert_eq!(hit.event_type, "payment.completed");
    assert_eq!(hit.content_type, "application/json");

    // The posted body is byte-identical to the stored canonical payload
    let stored = {
        let conn = state.db.get().unwrap();
        queries::get_event(&conn, &event_id).unwrap().unwrap().payload
    };
    assert_eq!(hit.body, stored);

    // Receiver-side verification of the signature over timestamp "." body
    let now = Utc::now().timestamp_millis();
    assert!(signer::verify(
        &secret,
        &hit.timestamp,
        &hit.body,
        &hit.signature,
        now,
        signer::TIMESTAMP_TOLERANCE_SECS
    ));

    // Payload carries the event id for receiver-side dedup
    let payload: serde_json::Value = serde_json::from_str(&hit.body).unwrap();
    assert_eq!(payload["event_id"], event_id.as_str());

    let conn = state.db.get().unwrap();
    let event = queries::get_event(&conn, &event_id).unwrap().unwrap();
    assert_eq!(event.status, EventStatus::Completed);
}

#[tokio::test]
async fn test_poller_and_consumer_drive_delivery() {
    let (url, hits) = start_receiver(StatusCode::OK).await;
    let state = test_state();
    let (_, event_id) = seed_event(&state, &url);

    // Poller leases the row and enqueues the delivery job
    assert_eq!(dispatcher::poll_once(&state).unwrap(), 1);
    // A second tick is a no-op: the row is leased and the job id dedups
    assert_eq!(dispatcher::poll_once(&state).unwrap(), 0);

    let jobs = state.queues.webhooks.claim(1).unwrap();
    assert_eq!(jobs.len(), 1);
    match &jobs[0].kind {
        JobKind::DeliverWebhook { event_id: id } => assert_eq!(id, &event_id),
        other => panic!("wrong kind: {:?}", other),
    }

    dispatcher::deliver_event(&state, &event_id).await.unwrap();
    state.queues.webhooks.complete(&jobs[0].id).unwrap();

    assert_eq!(hits.lock().unwrap().len(), 1);
    let conn = state.db.get().unwrap();
    assert_eq!(count_jobs(&conn, "webhooks"), 0);
    let event = queries::get_event(&conn, &event_id).unwrap().unwrap();
    assert_eq!(event.status, EventStatus::Completed);
}

#[tokio::test]
async fn test_failed_delivery_schedules_backoff() {
    let (url, hits) = start_receiver(StatusCode::INTERNAL_SERVER_ERROR).await;
    let state = test_state();
    let (_, event_id) = seed_event(&state, &url);

    let before = Utc::now().timestamp();
    dispatcher::deliver_event(&state, &event_id).await.unwrap();

    assert_eq!(hits.lock().unwrap().len(), 1);

    let conn = state.db.get().unwrap();
    let event = queries::get_event(&conn, &event_id).unwrap().unwrap();
    assert_eq!(event.status, EventStatus::Pending);
    assert_eq!(event.retry_count, 1);
    assert!(event.last_error.as_deref().unwrap().contains("500"));

    // Test schedule: 2^1 = 2 s, with up to +-10% jitter
    let next_retry = event.next_retry.unwrap();
    assert!(next_retry >= before + 1, "next_retry too early: {}", next_retry - before);
    assert!(next_retry <= before + 4, "next_retry too late: {}", next_retry - before);
}

#[tokio::test]
async fn test_retries_exhaust_into_terminal_failure() {
    let (url, hits) = start_receiver(StatusCode::INTERNAL_SERVER_ERROR).await;
    let mut state = test_state();
    state.delivery.max_retries = 3;

    let event_id = {
        let conn = state.db.get().unwrap();
        create_test_webhook(&conn, &url, &["payment.completed"]);
        queries::insert_outbox_events(&conn, "payment.completed", &serde_json::json!({"n": 1}), 3)
            .unwrap()
            .remove(0)
    };

    for expected_count in 1..=3 {
        dispatcher::deliver_event(&state, &event_id).await.unwrap();
        let conn = state.db.get().unwrap();
        let event = queries::get_event(&conn, &event_id).unwrap().unwrap();
        assert_eq!(event.retry_count, expected_count);
        if expected_count < 3 {
            assert_eq!(event.status, EventStatus::Pending);
            // Pull the retry forward so the next attempt is eligible
            conn.execute("UPDATE webhook_events SET next_retry = 0 WHERE id = ?1", [&event_id])
                .unwrap();
        } else {
            assert_eq!(event.status, EventStatus::Failed);
            assert!(event.next_retry.is_none());
        }
    }

    assert_eq!(hits.lock().unwrap().len(), 3);

    // Terminal: another delivery attempt is a no-op
    dispatcher::deliver_event(&state, &event_id).await.unwrap();
    assert_eq!(hits.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn test_unreachable_receiver_counts_as_failed_attempt() {
    // Nothing listens here; connection is refused
    let state = test_state();
    let (_, event_id) = seed_event(&state, "http://127.0.0.1:1/hook");

    dispatcher::deliver_event(&state, &event_id).await.unwrap();

    let conn = state.db.get().unwrap();
    let event = queries::get_event(&conn, &event_id).unwrap().unwrap();
    assert_eq!(event.status, EventStatus::Pending);
    assert_eq!(event.retry_count, 1);
    assert!(event.last_error.is_some());
}

#[tokio::test]
async fn test_inactive_subscription_fails_event_without_attempt() {
    let (url, hits) = start_receiver(StatusCode::OK).await;
    let state = test_state();
    let (_, event_id) = seed_event(&state, &url);

    {
        let conn = state.db.get().unwrap();
        conn.execute("UPDATE webhooks SET active = 0", []).unwrap();
    }

    dispatcher::deliver_event(&state, &event_id).await.unwrap();

    assert!(hits.lock().unwrap().is_empty());
    let conn = state.db.get().unwrap();
    let event = queries::get_event(&conn, &event_id).unwrap().unwrap();
    assert_eq!(event.status, EventStatus::Failed);
    assert!(event.last_error.as_deref().unwrap().contains("inactive"));
}

#[tokio::test]
async fn test_crash_before_recording_redelivers_same_event_id() {
    let (url, hits) = start_receiver(StatusCode::OK).await;
    let state = test_state();
    let (_, event_id) = seed_event(&state, &url);

    dispatcher::deliver_event(&state, &event_id).await.unwrap();

    // Simulate a crash after the receiver processed the request but before
    // completion was recorded: the row is pending again with no lease.
    {
        let conn = state.db.get().unwrap();
        conn.execute(
            "UPDATE webhook_events SET status = 'pending', claimed_at = NULL WHERE id = ?1",
            [&event_id],
        )
        .unwrap();
    }

    assert_eq!(dispatcher::poll_once(&state).unwrap(), 1);
    dispatcher::deliver_event(&state, &event_id).await.unwrap();

    // The receiver saw the same body (same event_id) twice: its dedup key
    let hits = hits.lock().unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].body, hits[1].body);
    let payload: serde_json::Value = serde_json::from_str(&hits[1].body).unwrap();
    assert_eq!(payload["event_id"], event_id.as_str());
}
