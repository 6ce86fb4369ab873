use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A refund against a completed (or partially refunded) payment.
#[derive(Debug, Clone, Serialize)]
pub struct Refund {
    pub id: String,
    pub payment_id: String,
    pub amount: Decimal,
    pub reason: Option<String>,
    pub status: RefundStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Refund lifecycle status.
///
/// Refunds currently settle synchronously in the creation transaction, so
/// rows are written as `processed`. `pending` and `failed` stay in the state
/// machine for a background refund worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    Pending,
    Processed,
    Failed,
}

impl RefundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processed => "processed",
            Self::Failed => "failed",
        }
    }

    /// Non-failed refunds count against the payment's refundable balance.
    pub fn counts_against_budget(self) -> bool {
        !matches!(self, Self::Failed)
    }
}

impl std::str::FromStr for RefundStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processed" => Ok(Self::Processed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown refund status: {}", other)),
        }
    }
}

impl std::fmt::Display for RefundStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Request body for `POST /payments/{id}/refund`.
#[derive(Debug, Deserialize)]
pub struct CreateRefundRequest {
    /// Omitted means "refund the remaining balance".
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub reason: Option<String>,
}
