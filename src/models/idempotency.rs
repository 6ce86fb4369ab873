use serde::Serialize;

/// A recorded response for a client-supplied idempotency key.
///
/// The `response` column holds the exact body that was returned the first
/// time, so a replay can echo it byte-for-byte. Expired records are treated
/// as absent and purged by the background cleanup task.
#[derive(Debug, Clone, Serialize)]
pub struct IdempotencyRecord {
    pub key: String,
    pub payment_id: Option<String>,
    pub response: String,
    pub created_at: i64,
    pub expires_at: i64,
}

impl IdempotencyRecord {
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at <= now
    }
}
