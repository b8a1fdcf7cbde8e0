use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// key: payment-transaction-status -> PENDING then one terminal state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Success,
    Failed,
    Outdated,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Success => "SUCCESS",
            TransactionStatus::Failed => "FAILED",
            TransactionStatus::Outdated => "OUTDATED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(TransactionStatus::Pending),
            "SUCCESS" => Some(TransactionStatus::Success),
            "FAILED" => Some(TransactionStatus::Failed),
            "OUTDATED" => Some(TransactionStatus::Outdated),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }
}

/// Payment discrepancy reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentDiscrepancy {
    #[default]
    None,
    Overpaid,
    Underpaid,
}

impl PaymentDiscrepancy {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentDiscrepancy::None => "none",
            PaymentDiscrepancy::Overpaid => "overpaid",
            PaymentDiscrepancy::Underpaid => "underpaid",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "none" => Some(PaymentDiscrepancy::None),
            "overpaid" => Some(PaymentDiscrepancy::Overpaid),
            "underpaid" => Some(PaymentDiscrepancy::Underpaid),
            _ => None,
        }
    }
}

/// key: payment-transaction -> one purchase attempt of one product
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub user_id: i32,
    pub profile_id: Uuid,
    pub product_id: i32,
    pub status: TransactionStatus,
    pub error: PaymentDiscrepancy,
    pub validation_errors: Vec<String>,
    pub amount_minor: i64,
    pub description: String,
    pub provider_reference: Option<String>,
    pub redirect_url: Option<String>,
    pub raw_create_response: Option<Value>,
    pub raw_resolve_response: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    pub fn pending(
        user_id: i32,
        profile_id: Uuid,
        product_id: i32,
        amount_minor: i64,
        description: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            profile_id,
            product_id,
            status: TransactionStatus::Pending,
            error: PaymentDiscrepancy::None,
            validation_errors: Vec::new(),
            amount_minor,
            description,
            provider_reference: None,
            redirect_url: None,
            raw_create_response: None,
            raw_resolve_response: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Terminal outcome written by the store's PENDING-only guard.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionResolution {
    pub status: TransactionStatus,
    pub error: PaymentDiscrepancy,
    pub validation_errors: Vec<String>,
    pub raw_resolve_response: Option<Value>,
    pub resolved_at: DateTime<Utc>,
}

impl TransactionResolution {
    pub fn new(status: TransactionStatus, resolved_at: DateTime<Utc>) -> Self {
        Self {
            status,
            error: PaymentDiscrepancy::None,
            validation_errors: Vec::new(),
            raw_resolve_response: None,
            resolved_at,
        }
    }
}

/// Returned to the buyer after the provider accepted the transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionTicket {
    pub transaction_id: Uuid,
    pub status: TransactionStatus,
    pub redirect_url: String,
}
