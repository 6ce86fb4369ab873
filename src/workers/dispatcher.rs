//! Webhook dispatcher: the outbox poller and the delivery consumer.
//!
//! The poller is the authority on what gets delivered and when: it leases
//! due outbox rows and enqueues one delivery job per row (job id = event
//! id, so re-polls are no-ops). The queue is just the wake-up cue; if it
//! loses a job, the next poll re-enqueues it. The consumer signs the
//! stored payload string byte-for-byte and posts it, then records the
//! attempt against the outbox row.

use std::time::Duration;

use axum::http::header;
use chrono::Utc;

use crate::db::{queries, AppState};
use crate::error::Result;
use crate::models::EventStatus;
use crate::queue::{self, Job, JobKind, QueueName};
use crate::signer;

/// Poller loop: wakes on the configured interval or when a transaction
/// that inserted outbox rows commits.
pub async fn run_poller(state: AppState) {
    loop {
        match poll_once(&state) {
            Ok(enqueued) if enqueued > 0 => {
                tracing::debug!("outbox poll enqueued {} deliveries", enqueued);
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("outbox poll failed: {}", e),
        }
        state.queues.webhooks.idle(state.delivery.poll_interval).await;
    }
}

/// Claim due outbox rows and enqueue one delivery job per row.
pub fn poll_once(state: &AppState) -> Result<usize> {
    let conn = state.db.get()?;
    let now = Utc::now().timestamp();
    let events = queries::claim_due_events(&conn, now, state.delivery.poll_batch)?;

    let mut enqueued = 0;
    for event in &events {
        let fresh = queue::enqueue(
            &conn,
            QueueName::Webhooks,
            &event.id,
            &JobKind::DeliverWebhook {
                event_id: event.id.clone(),
            },
        )?;
        if fresh {
            enqueued += 1;
        }
    }
    if enqueued > 0 {
        state.queues.webhooks.wake();
    }
    Ok(enqueued)
}

/// Consumer loop: claim, deliver, ack; nack on error for redelivery.
pub async fn run_consumer(state: AppState) {
    loop {
        match state.queues.webhooks.claim(1) {
            Ok(jobs) if !jobs.is_empty() => {
                for job in jobs {
                    if let Err(e) = handle_job(&state, &job).await {
                        tracing::warn!("delivery job {} failed: {}", job.id, e);
                        if let Err(e) = state.queues.webhooks.release(&job.id) {
                            tracing::error!("failed to release job {}: {}", job.id, e);
                        }
                    }
                }
            }
            Ok(_) => state.queues.webhooks.idle(Duration::from_secs(1)).await,
            Err(e) => {
                tracing::warn!("webhooks queue claim failed: {}", e);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

async fn handle_job(state: &AppState, job: &Job) -> Result<()> {
    match &job.kind {
        JobKind::DeliverWebhook { event_id } => {
            deliver_event(state, event_id).await?;
        }
        other => {
            tracing::error!("unexpected job kind on webhooks queue: {:?}", other);
        }
    }
    state.queues.webhooks.complete(&job.id)
}

/// Perform one delivery attempt for an outbox row.
///
/// Deliveries are at-least-once: a crash between the receiver accepting
/// the POST and us recording completion means a later attempt posts the
/// same event id again, which receivers deduplicate.
pub async fn deliver_event(state: &AppState, event_id: &str) -> Result<()> {
    let (event, subscription) = {
        let conn = state.db.get()?;
        let Some(event) = queries::get_event(&conn, event_id)? else {
            tracing::warn!("outbox row {} not found; dropping delivery", event_id);
            return Ok(());
        };
        if event.status.is_terminal() {
            return Ok(());
        }
        let subscription = queries::get_webhook(&conn, &event.webhook_id)?;
        (event, subscription)
    };

    let Some(sub) = subscription.filter(|s| s.active) else {
        let conn = state.db.get()?;
        queries::mark_event_undeliverable(&conn, event_id, "subscription missing or inactive")?;
        tracing::warn!("event {} undeliverable: subscription missing or inactive", event_id);
        return Ok(());
    };

    let timestamp = Utc::now().timestamp_millis().to_string();
    let signature = signer::sign(&sub.secret, &timestamp, &event.payload);

    let outcome = state
        .http_client
        .post(&sub.url)
        .header(header::CONTENT_TYPE, "application/json")
        .header("X-Webhook-Event", &event.event_type)
        .header("X-Webhook-Signature", &signature)
        .header("X-Webhook-Timestamp", &timestamp)
        .body(event.payload.clone())
        .send()
        .await;

    let error = match outcome {
        Ok(response) if response.status().is_success() => {
            let conn = state.db.get()?;
            queries::record_event_delivered(&conn, event_id)?;
            tracing::info!("event {} delivered to {}", event_id, sub.url);
            return Ok(());
        }
        Ok(response) => format!("receiver returned {}", response.status()),
        Err(e) if e.is_timeout() => "request timed out".to_string(),
        Err(e) => format!("request failed: {}", e),
    };

    let attempt = event.retry_count + 1;
    let next_retry =
        Utc::now().timestamp() + backoff_with_jitter(attempt, state.delivery.test_intervals);
    let conn = state.db.get()?;
    match queries::record_event_failure(&conn, event_id, &error, next_retry)? {
        Some(updated) if updated.status == EventStatus::Failed => {
            tracing::warn!(
                "event {} failed permanently after {} attempts: {}",
                event_id,
                updated.retry_count,
                error
            );
        }
        Some(updated) => {
            tracing::warn!(
                "event {} attempt {} failed ({}); next retry at {:?}",
                event_id,
                updated.retry_count,
                error,
                updated.next_retry
            );
        }
        None => {}
    }
    Ok(())
}

/// Backoff before attempt `n` is retried: `2^n * 60` seconds (2, 4, 8, 16,
/// 32 minutes across the default budget), or `2^n` seconds under the test
/// schedule.
fn backoff_secs(attempt: i64, test_schedule: bool) -> i64 {
    let exp = attempt.clamp(1, 16) as u32;
    let base: i64 = if test_schedule { 1 } else { 60 };
    (1_i64 << exp) * base
}

/// Apply up to +-10% jitter so a burst of failures does not retry in
/// lockstep.
fn backoff_with_jitter(attempt: i64, test_schedule: bool) -> i64 {
    let base = backoff_secs(attempt, test_schedule);
    let factor = 0.9 + rand::random::<f64>() * 0.2;
    ((base as f64) * factor).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_per_attempt() {
        assert_eq!(backoff_secs(1, false), 120);
        assert_eq!(backoff_secs(2, false), 240);
        assert_eq!(backoff_secs(3, false), 480);
        assert_eq!(backoff_secs(4, false), 960);
        assert_eq!(backoff_secs(5, false), 1920);
    }

    #[test]
    fn test_backoff_test_schedule_is_seconds() {
        assert_eq!(backoff_secs(1, true), 2);
        assert_eq!(backoff_secs(2, true), 4);
        assert_eq!(backoff_secs(5, true), 32);
    }

    #[test]
    fn test_backoff_clamps_runaway_attempts() {
        // A corrupted retry_count must not overflow the shift.
        assert_eq!(backoff_secs(1000, true), 1 << 16);
        assert_eq!(backoff_secs(-3, true), 2);
    }

    #[test]
    fn test_jitter_stays_within_ten_percent() {
        for attempt in 1..=5 {
            let base = backoff_secs(attempt, false);
            for _ in 0..100 {
                let jittered = backoff_with_jitter(attempt, false);
                assert!(jittered >= (base as f64 * 0.9) as i64 - 1);
                assert!(jittered <= (base as f64 * 1.1) as i64 + 1);
            }
        }
    }
}
