pub mod dispatcher;
pub mod processor;

use std::time::Duration;

use chrono::Utc;

use crate::db::{queries, AppState};

/// Spawn the delivery engine: payment workers, webhook delivery workers,
/// the outbox poller, and the idempotency cleanup task.
pub fn spawn_all(state: &AppState, payment_workers: usize, webhook_workers: usize) {
    for _ in 0..payment_workers {
        tokio::spawn(processor::run(state.clone()));
    }
    for _ in 0..webhook_workers {
        tokio::spawn(dispatcher::run_consumer(state.clone()));
    }
    tokio::spawn(dispatcher::run_poller(state.clone()));
    spawn_idempotency_cleanup(state.clone());

    tracing::info!(
        "delivery engine started: {} payment workers, {} webhook workers, 1 poller",
        payment_workers,
        webhook_workers
    );
}

/// Periodically purge expired idempotency records.
fn spawn_idempotency_cleanup(state: AppState) {
    tokio::spawn(async move {
        let interval = Duration::from_secs(10 * 60);

        loop {
            tokio::time::sleep(interval).await;

            match state.db.get() {
                Ok(conn) => {
                    match queries::cleanup_expired_idempotency_keys(&conn, Utc::now().timestamp()) {
                        Ok(count) if count > 0 => {
                            tracing::debug!("purged {} expired idempotency keys", count);
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::warn!("idempotency cleanup failed: {}", e);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("failed to get connection for cleanup: {}", e);
                }
            }
        }
    });

    tracing::info!("idempotency cleanup task started (runs every 10 minutes)");
}
