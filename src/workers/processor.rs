//! Payment processor: drives pending payments to `completed` or `failed`.
//!
//! The queue delivers at least once, so everything here is CAS-guarded: a
//! redelivered job finds the payment already settled and acks without
//! side effects. The settlement and its outbox rows commit in one
//! transaction; the simulated processor latency runs outside any
//! transaction so no locks are held across the sleep.

use std::time::Duration;

use crate::db::{queries, AppState};
use crate::error::Result;
use crate::models::{event_types, PaymentStatus};
use crate::queue::{Job, JobKind};

/// Worker loop: claim, process, ack; nack on error for redelivery.
pub async fn run(state: AppState) {
    loop {
        match state.queues.payments.claim(1) {
            Ok(jobs) if !jobs.is_empty() => {
                for job in jobs {
                    if let Err(e) = handle_job(&state, &job).await {
                        tracing::warn!("payment job {} failed: {}", job.id, e);
                        if let Err(e) = state.queues.payments.release(&job.id) {
                            tracing::error!("failed to release job {}: {}", job.id, e);
                        }
                    }
                }
            }
            Ok(_) => state.queues.payments.idle(Duration::from_secs(1)).await,
            Err(e) => {
                tracing::warn!("payments queue claim failed: {}", e);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

async fn handle_job(state: &AppState, job: &Job) -> Result<()> {
    match &job.kind {
        JobKind::ProcessPayment { payment_id } => {
            process_payment(state, payment_id).await?;
        }
        other => {
            tracing::error!("unexpected job kind on payments queue: {:?}", other);
        }
    }
    state.queues.payments.complete(&job.id)
}

/// Run one payment through the simulated processor.
///
/// Safe to call any number of times for the same payment: only the caller
/// that wins the `pending -> terminal` CAS emits events.
pub async fn process_payment(state: &AppState, payment_id: &str) -> Result<()> {
    {
        let conn = state.db.get()?;
        let Some(payment) = queries::get_payment(&conn, payment_id)? else {
            tracing::warn!("payment {} not found; dropping job", payment_id);
            return Ok(());
        };
        if payment.status != PaymentStatus::Pending {
            // Redelivery after another worker already settled it.
            return Ok(());
        }
    }

    let success = state.processing.simulate_outcome();
    tokio::time::sleep(state.processing.delay).await;

    let mut conn = state.db.get()?;
    let tx = conn.transaction()?;

    let Some(payment) = queries::get_payment(&tx, payment_id)? else {
        return Ok(());
    };
    let to = if success {
        PaymentStatus::Completed
    } else {
        PaymentStatus::Failed
    };
    if !queries::mark_payment_status(&tx, payment_id, PaymentStatus::Pending, to)? {
        // Lost the race to another worker; their transaction emitted the
        // events.
        return Ok(());
    }

    let (event_type, payload) = if success {
        (
            event_types::PAYMENT_COMPLETED,
            serde_json::json!({
                "payment_id": payment.id,
                "amount": payment.amount,
                "email": payment.customer_email,
            }),
        )
    } else {
        (
            event_types::PAYMENT_FAILED,
            serde_json::json!({
                "payment_id": payment.id,
                "amount": payment.amount,
                "reason": "payment declined by processor",
            }),
        )
    };
    queries::insert_outbox_events(&tx, event_type, &payload, state.delivery.max_retries)?;
    tx.commit()?;
    state.queues.webhooks.wake();

    tracing::info!("payment {} settled as {}", payment_id, to);
    Ok(())
}
