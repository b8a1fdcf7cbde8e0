#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use entitlements::payments::{
    AccessCredential, CallbackSecurity, PaymentProvider, PaymentService, ProviderNotification,
    Purchaser, RemoteTransaction, RemoteTransactionRequest, Transaction, TransactionError,
};
use entitlements::premium::{NewProfile, PremiumService};
use entitlements::products::{format_minor, ProductCatalog};
use entitlements::profiles::ProfileVariant;
use entitlements::store::{EntitlementStore, MemoryStore};
use serde_json::json;
use uuid::Uuid;

pub const SECRET: &str = "integration-security-code";
pub const PREFIX: &str = "PLAYMAKER.PRO";

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 3, 12, 0, 0).single().unwrap()
}

#[derive(Default)]
pub struct FakeProvider {
    pub auth_calls: AtomicUsize,
    pub create_calls: AtomicUsize,
    pub fail_create: AtomicBool,
}

impl FakeProvider {
    fn security(&self) -> CallbackSecurity {
        CallbackSecurity {
            security_code: SECRET.to_string(),
            accept_test_mode: false,
        }
    }
}

#[async_trait]
impl PaymentProvider for FakeProvider {
    async fn authenticate(&self, now: DateTime<Utc>) -> Result<AccessCredential, TransactionError> {
        let n = self.auth_calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(AccessCredential {
            access_token: format!("token-{n}"),
            token_type: "Bearer".to_string(),
            expires_at: now + Duration::hours(2),
        })
    }

    async fn create_transaction(
        &self,
        _credential: &AccessCredential,
        request: &RemoteTransactionRequest,
    ) -> Result<RemoteTransaction, TransactionError> {
        let n = self.create_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(TransactionError::Transport("connection refused".to_string()));
        }
        Ok(RemoteTransaction {
            transaction_id: format!("01HTEST{n}"),
            title: format!("TR-TEST-{n}"),
            payment_url: format!("https://pay.example.com/{}", request.hidden_description),
            raw: json!({
                "result": "success",
                "title": format!("TR-TEST-{n}"),
                "hiddenDescription": request.hidden_description,
                "amount": request.amount,
                "description": request.description,
            }),
        })
    }

    fn success_url(&self, reference: &str, inquiry_count: Option<i64>) -> String {
        match inquiry_count {
            Some(count) => format!(
                "https://app.example.com/success?inquiry_count={count}&product={}",
                reference.to_lowercase()
            ),
            None => format!(
                "https://app.example.com/success?product={}",
                reference.to_lowercase()
            ),
        }
    }

    fn error_url(&self) -> String {
        "https://app.example.com/error".to_string()
    }

    fn notification_email(&self) -> String {
        "payments@example.com".to_string()
    }

    fn verify_callback(
        &self,
        notification: &ProviderNotification,
        transaction: Option<&Transaction>,
    ) -> Vec<String> {
        self.security().verify(notification, transaction)
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub premium: PremiumService,
    pub payments: PaymentService,
    pub provider: Arc<FakeProvider>,
}

pub fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    harness_over(store.clone(), store)
}

/// Harness whose services talk to `seam`, which wraps `store`.
pub fn harness_over(store: Arc<MemoryStore>, seam: Arc<dyn EntitlementStore>) -> Harness {
    let premium = PremiumService::new(seam.clone());
    let provider = Arc::new(FakeProvider::default());
    let payments = PaymentService::new(
        seam,
        premium.clone(),
        provider.clone(),
        Arc::new(ProductCatalog::standard()),
        PREFIX,
    );
    Harness {
        store,
        premium,
        payments,
        provider,
    }
}

impl Harness {
    /// Register a profile at `t0()`, which starts its trial.
    pub async fn register(&self, user_id: i32, variant: ProfileVariant) -> Purchaser {
        let profile_id = Uuid::new_v4();
        self.premium
            .on_profile_created(
                NewProfile {
                    profile_id,
                    user_id,
                    variant,
                },
                t0(),
            )
            .await
            .unwrap();
        Purchaser {
            user_id,
            profile_id,
            is_staff: false,
            email: format!("user{user_id}@example.com"),
            name: format!("User {user_id}"),
        }
    }

    /// Spend every inquiry left at `now`.
    pub async fn exhaust(&self, profile_id: Uuid, now: DateTime<Utc>) {
        let left = self.premium.status(profile_id, now).await.unwrap().left;
        for _ in 0..left {
            self.premium.increment(profile_id, now).await.unwrap();
        }
    }
}

pub fn product_id(name: &str) -> i32 {
    ProductCatalog::standard().by_name(name).unwrap().id
}

/// A correctly signed "paid" callback for `transaction`.
pub fn paid_notification(transaction: &Transaction) -> ProviderNotification {
    let mut notification = ProviderNotification {
        merchant_id: "1010".to_string(),
        tr_id: transaction.provider_reference.clone().unwrap_or_default(),
        tr_date: "2024-06-03 12:05:00".to_string(),
        tr_crc: transaction.id.to_string(),
        tr_amount: format_minor(transaction.amount_minor),
        tr_paid: format_minor(transaction.amount_minor),
        tr_desc: transaction.description.clone(),
        tr_status: "TRUE".to_string(),
        tr_error: "none".to_string(),
        tr_email: "buyer@example.com".to_string(),
        test_mode: "0".to_string(),
        checksum: String::new(),
    };
    notification.checksum = notification.expected_checksum(SECRET);
    notification
}
