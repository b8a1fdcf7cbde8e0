//! Payment provider seam: credential handling, transaction creation and
//! callback verification.

pub mod notification;
pub mod tpay;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use thiserror::Error;

use super::models::Transaction;
pub use notification::{CallbackSecurity, ProviderNotification};
pub use tpay::{TpayClient, TpayConfig};

/// Credentials are treated as expired this long before the provider says so.
pub const CREDENTIAL_EXPIRY_MARGIN_SECS: i64 = 30;

#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("payment provider authentication failed: {0}")]
    Auth(String),
    #[error("payment provider unreachable: {0}")]
    Transport(String),
    #[error("payment provider rejected the request with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("payment provider returned an unreadable response: {0}")]
    Decode(String),
    #[error("payment provider credential expired")]
    CredentialExpired,
}

impl TransactionError {
    /// Whether a cached credential should be dropped after this failure.
    pub fn invalidates_credential(&self) -> bool {
        matches!(
            self,
            TransactionError::CredentialExpired
                | TransactionError::Auth(_)
                | TransactionError::Rejected { status: 401, .. }
        )
    }
}

/// key: provider-access-credential -> bearer token with an expiry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessCredential {
    pub access_token: String,
    pub token_type: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessCredential {
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(CREDENTIAL_EXPIRY_MARGIN_SECS) < self.expires_at
    }

    pub fn authorization_header(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payer {
    pub email: String,
    pub name: String,
}

/// Everything the provider needs to open a payment for a local transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTransactionRequest {
    pub amount: String,
    pub description: String,
    /// Correlation id echoed back in the callback as `tr_crc`.
    pub hidden_description: String,
    pub payer: Payer,
    pub success_url: String,
    pub error_url: String,
    pub notification_email: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteTransaction {
    pub transaction_id: String,
    pub title: String,
    pub payment_url: String,
    pub raw: Value,
}

/// key: payment-provider -> external payment gateway adapter
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn authenticate(&self, now: DateTime<Utc>) -> Result<AccessCredential, TransactionError>;

    async fn create_transaction(
        &self,
        credential: &AccessCredential,
        request: &RemoteTransactionRequest,
    ) -> Result<RemoteTransaction, TransactionError>;

    /// Success redirect for a purchase, decorated with product details.
    fn success_url(&self, reference: &str, inquiry_count: Option<i64>) -> String;

    fn error_url(&self) -> String;

    fn notification_email(&self) -> String;

    /// Verify a callback against the stored transaction, returning every
    /// failure found.
    fn verify_callback(
        &self,
        notification: &ProviderNotification,
        transaction: Option<&Transaction>,
    ) -> Vec<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_expires_with_margin() {
        let now = Utc::now();
        let credential = AccessCredential {
            access_token: "abc".into(),
            token_type: "Bearer".into(),
            expires_at: now + Duration::seconds(60),
        };
        assert!(credential.is_valid(now));
        assert!(!credential.is_valid(now + Duration::seconds(31)));
        assert_eq!(credential.authorization_header(), "Bearer abc");
    }

    #[test]
    fn unauthorized_rejection_drops_the_credential() {
        assert!(TransactionError::Rejected {
            status: 401,
            body: String::new()
        }
        .invalidates_credential());
        assert!(!TransactionError::Rejected {
            status: 500,
            body: String::new()
        }
        .invalidates_credential());
        assert!(!TransactionError::Transport("timeout".into()).invalidates_credential());
    }
}
