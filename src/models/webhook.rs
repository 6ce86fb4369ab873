use serde::{Deserialize, Serialize};

/// Event types emitted by the gateway.
pub mod event_types {
    pub const PAYMENT_COMPLETED: &str = "payment.completed";
    pub const PAYMENT_FAILED: &str = "payment.failed";
    pub const REFUND_CREATED: &str = "refund.created";
    pub const REFUND_PROCESSED: &str = "refund.processed";
}

/// A merchant-registered webhook subscription.
///
/// The signing `secret` is stored in plaintext (it is needed to sign every
/// delivery) but is only ever returned to the caller once, at registration.
#[derive(Debug, Clone)]
pub struct WebhookSubscription {
    pub id: String,
    pub url: String,
    /// Set of subscribed event types (`payment.completed`, ...).
    pub events: Vec<String>,
    pub active: bool,
    pub secret: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl WebhookSubscription {
    /// Whether this subscription wants the given event type.
    pub fn subscribes_to(&self, event_type: &str) -> bool {
        self.events.iter().any(|e| e == event_type)
    }
}

/// Request body for `POST /webhooks`.
#[derive(Debug, Deserialize)]
pub struct CreateWebhookRequest {
    pub url: String,
    pub events: Vec<String>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

/// Request body for `PATCH /webhooks/{id}`. All fields optional.
#[derive(Debug, Deserialize)]
pub struct UpdateWebhookRequest {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub events: Option<Vec<String>>,
    #[serde(default)]
    pub active: Option<bool>,
}

/// Subscription as exposed over the API. The secret is only populated on
/// the creation response and never again.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub id: String,
    pub url: String,
    pub events: Vec<String>,
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<&WebhookSubscription> for WebhookResponse {
    fn from(sub: &WebhookSubscription) -> Self {
        Self {
            id: sub.id.clone(),
            url: sub.url.clone(),
            events: sub.events.clone(),
            active: sub.active,
            secret: None,
            created_at: sub.created_at,
            updated_at: sub.updated_at,
        }
    }
}

impl WebhookResponse {
    /// Attach the secret for the one-time registration response.
    pub fn with_secret(mut self, secret: String) -> Self {
        self.secret = Some(secret);
        self
    }
}

/// An outbox row: one pending delivery of one event to one subscription.
///
/// `payload` holds the exact JSON string that was serialized when the row
/// was written; the dispatcher signs and posts that string byte-for-byte.
#[derive(Debug, Clone)]
pub struct WebhookEvent {
    pub id: String,
    pub webhook_id: String,
    pub event_type: String,
    pub payload: String,
    pub status: EventStatus,
    pub retry_count: i64,
    pub max_retries: i64,
    /// Null means eligible for dispatch now.
    pub next_retry: Option<i64>,
    pub last_error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Outbox row status. `completed` and `failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Pending,
    Completed,
    Failed,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::str::FromStr for EventStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown event status: {}", other)),
        }
    }
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outbox row as exposed by `GET /webhooks/{id}/events`.
#[derive(Debug, Serialize)]
pub struct WebhookEventResponse {
    pub id: String,
    pub webhook_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub status: EventStatus,
    pub retry_count: i64,
    pub max_retries: i64,
    pub next_retry: Option<i64>,
    pub last_error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<&WebhookEvent> for WebhookEventResponse {
    fn from(event: &WebhookEvent) -> Self {
        let payload = serde_json::from_str(&event.payload)
            .unwrap_or_else(|_| serde_json::Value::String(event.payload.clone()));
        Self {
            id: event.id.clone(),
            webhook_id: event.webhook_id.clone(),
            event_type: event.event_type.clone(),
            payload,
            status: event.status,
            retry_count: event.retry_count,
            max_retries: event.max_retries,
            next_retry: event.next_retry,
            last_error: event.last_error.clone(),
            created_at: event.created_at,
            updated_at: event.updated_at,
        }
    }
}
