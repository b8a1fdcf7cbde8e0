use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::payments::models::{PaymentDiscrepancy, Transaction};
use crate::products::parse_minor;

pub const TEST_MODE_NOT_ALLOWED: &str = "Application does not accept test_mode transactions";
pub const INVALID_CHECKSUM: &str = "Checksum is invalid";
pub const TRANSACTION_NOT_FOUND: &str = "Transaction not found";
pub const INVALID_AMOUNT: &str = "Invalid data: Amount is invalid";
pub const INVALID_CORRELATION: &str = "Invalid data: UUID is invalid";
pub const INVALID_DESCRIPTION: &str = "Invalid data: Description is invalid";
pub const INVALID_REFERENCE: &str = "Invalid data: Provider reference is invalid";
pub const UNDERPAID: &str = "Transaction was underpaid";

/// key: provider-callback -> form posted by the gateway once per payment event
///
/// Every field defaults to empty so a malformed callback still reaches
/// verification and gets recorded instead of bouncing at extraction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderNotification {
    #[serde(rename = "id")]
    pub merchant_id: String,
    pub tr_id: String,
    pub tr_date: String,
    pub tr_crc: String,
    pub tr_amount: String,
    pub tr_paid: String,
    pub tr_desc: String,
    pub tr_status: String,
    pub tr_error: String,
    pub tr_email: String,
    pub test_mode: String,
    #[serde(alias = "md5sum")]
    pub checksum: String,
}

impl ProviderNotification {
    /// Local transaction id carried in the hidden description.
    pub fn correlation_id(&self) -> Option<Uuid> {
        Uuid::parse_str(self.tr_crc.trim()).ok()
    }

    pub fn is_test_mode(&self) -> bool {
        self.test_mode.trim() == "1"
    }

    pub fn status_acceptable(&self) -> bool {
        matches!(self.tr_status.trim(), "TRUE" | "PAID")
    }

    pub fn discrepancy(&self) -> Option<PaymentDiscrepancy> {
        match self.tr_error.trim() {
            "" | "none" => Some(PaymentDiscrepancy::None),
            "overpay" | "overpayment" => Some(PaymentDiscrepancy::Overpaid),
            "surcharge" | "underpayment" => Some(PaymentDiscrepancy::Underpaid),
            _ => None,
        }
    }

    /// Hex MD5 over `id ‖ tr_id ‖ tr_amount ‖ tr_crc ‖ secret`.
    pub fn expected_checksum(&self, secret: &str) -> String {
        let mut hasher = Md5::new();
        hasher.update(self.merchant_id.as_bytes());
        hasher.update(self.tr_id.as_bytes());
        hasher.update(self.tr_amount.as_bytes());
        hasher.update(self.tr_crc.as_bytes());
        hasher.update(secret.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Shared secret and test-mode policy used to verify callbacks.
#[derive(Debug, Clone)]
pub struct CallbackSecurity {
    pub security_code: String,
    pub accept_test_mode: bool,
}

impl CallbackSecurity {
    /// Collect every verification failure for `notification`. An empty result
    /// means the callback may settle the transaction as paid.
    pub fn verify(
        &self,
        notification: &ProviderNotification,
        transaction: Option<&Transaction>,
    ) -> Vec<String> {
        let mut errors = Vec::new();

        if notification.is_test_mode() && !self.accept_test_mode {
            errors.push(TEST_MODE_NOT_ALLOWED.to_string());
        }

        let expected = notification.expected_checksum(&self.security_code);
        if !expected.eq_ignore_ascii_case(notification.checksum.trim()) {
            errors.push(INVALID_CHECKSUM.to_string());
        }

        match transaction {
            None => errors.push(TRANSACTION_NOT_FOUND.to_string()),
            Some(transaction) => {
                if parse_minor(&notification.tr_amount) != Some(transaction.amount_minor) {
                    errors.push(INVALID_AMOUNT.to_string());
                }
                if notification.correlation_id() != Some(transaction.id) {
                    errors.push(INVALID_CORRELATION.to_string());
                }
                if notification.tr_desc != transaction.description {
                    errors.push(INVALID_DESCRIPTION.to_string());
                }
                if let Some(reference) = &transaction.provider_reference {
                    if notification.tr_id.trim() != reference {
                        errors.push(INVALID_REFERENCE.to_string());
                    }
                }
            }
        }

        if !notification.status_acceptable() {
            errors.push(format!(
                "Transaction status is not acceptable: {}",
                notification.tr_status
            ));
        }
        match notification.discrepancy() {
            Some(PaymentDiscrepancy::Underpaid) => errors.push(UNDERPAID.to_string()),
            Some(_) => {}
            None => errors.push(format!(
                "Invalid data: unknown payment error `{}`",
                notification.tr_error
            )),
        }

        errors
    }
}
