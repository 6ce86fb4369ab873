mod from_row;
pub mod queries;
mod schema;

pub use from_row::FromRow;
pub use schema::init_db;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use reqwest::Client;

use crate::config::{DeliveryConfig, ProcessingConfig};
use crate::queue::Queues;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Application state shared by the intake handlers and background workers.
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    /// Named job queues (payments, webhooks) over the same store.
    pub queues: Queues,
    /// Simulated card-network outcome knobs.
    pub processing: ProcessingConfig,
    /// Webhook dispatch knobs (timeout, retry budget, schedule).
    pub delivery: DeliveryConfig,
    /// Replay-record lifetime in seconds.
    pub idempotency_ttl_secs: i64,
    /// Shared HTTP client for outbound webhook deliveries, built with the
    /// configured delivery timeout.
    pub http_client: Client,
}

pub fn create_pool(database_path: &str) -> Result<DbPool, r2d2::Error> {
    // foreign_keys and busy_timeout are per-connection settings, so they go
    // in the pool's init hook rather than the schema script.
    let manager = SqliteConnectionManager::file(database_path).with_init(|conn| {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
    });
    Pool::builder().max_size(16).build(manager)
}
