use std::env;
use std::time::Duration;

/// Default simulated processing delay when not running in test mode.
const DEFAULT_PROCESSING_DELAY_MS: u64 = 2000;

#[derive(Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub processing: ProcessingConfig,
    pub delivery: DeliveryConfig,
    /// How long recorded idempotent responses stay replayable.
    pub idempotency_ttl: Duration,
    pub payment_workers: usize,
    pub webhook_workers: usize,
}

/// Knobs for the simulated card-network outcome.
#[derive(Debug, Clone, Copy)]
pub struct ProcessingConfig {
    /// Probability of simulated success outside test mode.
    pub success_rate: f64,
    pub test_mode: bool,
    /// Deterministic outcome when `test_mode` is set.
    pub test_payment_success: bool,
    /// Simulated processing delay, applied outside any transaction.
    pub delay: Duration,
}

impl ProcessingConfig {
    /// Decide whether a payment succeeds: deterministic in test mode,
    /// otherwise a weighted coin flip.
    pub fn simulate_outcome(&self) -> bool {
        if self.test_mode {
            self.test_payment_success
        } else {
            rand::random::<f64>() < self.success_rate
        }
    }
}

/// Knobs for the webhook dispatcher.
#[derive(Debug, Clone, Copy)]
pub struct DeliveryConfig {
    pub max_retries: i64,
    pub timeout: Duration,
    /// Shortened backoff schedule (2^n seconds) for integration tests.
    pub test_intervals: bool,
    pub poll_interval: Duration,
    pub poll_batch: i64,
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(name: &str) -> bool {
    env::var(name)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false)
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let test_mode = env_bool("TEST_MODE");
        let delay_ms = if test_mode {
            env_parse("TEST_PROCESSING_DELAY_MS", DEFAULT_PROCESSING_DELAY_MS)
        } else {
            DEFAULT_PROCESSING_DELAY_MS
        };

        let processing = ProcessingConfig {
            success_rate: env_parse("PAYMENT_SUCCESS_RATE", 0.9_f64).clamp(0.0, 1.0),
            test_mode,
            test_payment_success: env_bool("TEST_PAYMENT_SUCCESS"),
            delay: Duration::from_millis(delay_ms),
        };

        let delivery = DeliveryConfig {
            max_retries: env_parse("WEBHOOK_MAX_RETRIES", 5_i64).max(1),
            timeout: Duration::from_millis(env_parse("WEBHOOK_TIMEOUT_MS", 5000_u64)),
            test_intervals: env_bool("WEBHOOK_RETRY_INTERVALS_TEST"),
            poll_interval: Duration::from_millis(env_parse("POLL_INTERVAL_MS", 30_000_u64)),
            poll_batch: env_parse("POLL_BATCH", 100_i64).clamp(1, 1000),
        };

        let idempotency_ttl_hours: u64 = env_parse("IDEMPOTENCY_TTL_HOURS", 24);

        Self {
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env_parse("PORT", 3000),
            database_path: env::var("DATABASE_PATH").unwrap_or_else(|_| "paygate.db".to_string()),
            processing,
            delivery,
            idempotency_ttl: Duration::from_secs(idempotency_ttl_hours * 3600),
            payment_workers: env_parse("PAYMENT_WORKERS", 4),
            webhook_workers: env_parse("WEBHOOK_WORKERS", 8),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
