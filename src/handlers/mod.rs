pub mod health;
pub mod payments;
pub mod webhooks;

use axum::http::{HeaderName, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use crate::db::AppState;

pub fn router() -> Router<AppState> {
    let api = Router::new()
        .route("/payments", post(payments::create_payment))
        .route("/payments/{payment_id}", get(payments::get_payment))
        .route("/payments/{payment_id}/refund", post(payments::refund_payment))
        .route(
            "/webhooks",
            post(webhooks::register_webhook).get(webhooks::list_webhooks),
        )
        .route(
            "/webhooks/{webhook_id}",
            get(webhooks::get_webhook)
                .patch(webhooks::update_webhook)
                .delete(webhooks::delete_webhook),
        )
        .route("/webhooks/{webhook_id}/events", get(webhooks::list_events));

    let ops = Router::new()
        .route("/health", get(health::health))
        .route("/health/db", get(health::health_db))
        .route("/health/queue", get(health::health_queue))
        // Legacy probe path from when the queue backend was Redis; kept so
        // existing liveness checks keep working.
        .route("/health/redis", get(health::health_queue))
        .route("/test/jobs/status", get(health::jobs_status));

    // Merchant servers call the API directly; allow any origin.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_headers([
            HeaderName::from_static("content-type"),
            HeaderName::from_static("idempotency-key"),
        ]);

    Router::new().merge(api).merge(ops).layer(cors)
}
