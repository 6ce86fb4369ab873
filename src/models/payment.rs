use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A payment moving through the gateway's state machine.
#[derive(Debug, Clone, Serialize)]
pub struct Payment {
    pub id: String,
    pub idempotency_key: Option<String>,
    pub amount: Decimal,
    pub currency: String,
    pub status: PaymentStatus,
    pub customer_email: String,
    pub customer_name: Option<String>,
    pub description: Option<String>,
    pub payment_method: Option<String>,
    /// Opaque merchant-supplied JSON mapping.
    pub metadata: serde_json::Value,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Payment lifecycle status.
///
/// Transitions only move forward: `pending` settles to `completed` or
/// `failed`; a completed payment can be partially or fully refunded; partial
/// refunds accumulate until the balance is exhausted. `failed` and
/// `refunded` are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
    PartialRefunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
            Self::PartialRefunded => "partial_refunded",
        }
    }

    /// Whether the forward-only status DAG permits `self -> next`.
    pub fn can_transition_to(self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, next),
            (Pending, Completed)
                | (Pending, Failed)
                | (Completed, Refunded)
                | (Completed, PartialRefunded)
                | (PartialRefunded, Refunded)
                | (PartialRefunded, PartialRefunded)
        )
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "refunded" => Ok(Self::Refunded),
            "partial_refunded" => Ok(Self::PartialRefunded),
            other => Err(format!("unknown payment status: {}", other)),
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Request body for `POST /payments`.
#[derive(Debug, Deserialize)]
pub struct CreatePaymentRequest {
    pub amount: Decimal,
    /// 3-letter currency code, defaults to USD.
    #[serde(default)]
    pub currency: Option<String>,
    pub customer_email: String,
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// Validated insert input, after the handler normalized the request.
#[derive(Debug, Clone)]
pub struct CreatePayment {
    pub amount: Decimal,
    pub currency: String,
    pub customer_email: String,
    pub customer_name: Option<String>,
    pub description: Option<String>,
    pub payment_method: Option<String>,
    pub metadata: serde_json::Value,
}

/// The canonical response body for a created payment.
///
/// This exact serialization is what gets recorded against the idempotency
/// key, so a replay returns byte-identical content.
#[derive(Debug, Serialize)]
pub struct PaymentResponse {
    pub id: String,
    pub status: PaymentStatus,
    pub amount: Decimal,
    pub currency: String,
    pub customer_email: String,
    pub created_at: i64,
}

impl From<&Payment> for PaymentResponse {
    fn from(p: &Payment) -> Self {
        Self {
            id: p.id.clone(),
            status: p.status,
            amount: p.amount,
            currency: p.currency.clone(),
            customer_email: p.customer_email.clone(),
            created_at: p.created_at,
        }
    }
}
