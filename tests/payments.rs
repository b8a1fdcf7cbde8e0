mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::{harness, harness_over, paid_notification, product_id, t0, SECRET};
use entitlements::payments::{
    PaymentError, Transaction, TransactionResolution, TransactionStatus,
};
use entitlements::premium::{EntitlementBundle, PolicyError, PremiumError};
use entitlements::profiles::ProfileVariant;
use entitlements::store::{EntitlementStore, MemoryStore, StoreError};
use uuid::Uuid;

/// What the next `settle_success` runs into.
enum Hiccup {
    /// Another writer saves the bundle first.
    BundleWrite,
    Fail(StoreError),
}

/// Memory store that disturbs the next settlement once.
struct FlakyStore {
    inner: Arc<MemoryStore>,
    next_settle: Mutex<Option<Hiccup>>,
    settle_calls: AtomicUsize,
}

impl FlakyStore {
    fn new(inner: Arc<MemoryStore>, hiccup: Hiccup) -> Self {
        Self {
            inner,
            next_settle: Mutex::new(Some(hiccup)),
            settle_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl EntitlementStore for FlakyStore {
    async fn insert_bundle(&self, bundle: &EntitlementBundle) -> Result<(), StoreError> {
        self.inner.insert_bundle(bundle).await
    }

    async fn load_bundle(&self, profile_id: Uuid) -> Result<Option<EntitlementBundle>, StoreError> {
        self.inner.load_bundle(profile_id).await
    }

    async fn load_bundle_for_user(
        &self,
        user_id: i32,
    ) -> Result<Option<EntitlementBundle>, StoreError> {
        self.inner.load_bundle_for_user(user_id).await
    }

    async fn save_bundle(&self, bundle: &EntitlementBundle) -> Result<i64, StoreError> {
        self.inner.save_bundle(bundle).await
    }

    async fn bundles_awaiting_expiry(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, StoreError> {
        self.inner.bundles_awaiting_expiry(now).await
    }

    async fn bundles_with_pending_tickets(&self) -> Result<Vec<Uuid>, StoreError> {
        self.inner.bundles_with_pending_tickets().await
    }

    async fn insert_transaction(&self, transaction: &Transaction) -> Result<(), StoreError> {
        self.inner.insert_transaction(transaction).await
    }

    async fn load_transaction(&self, id: Uuid) -> Result<Option<Transaction>, StoreError> {
        self.inner.load_transaction(id).await
    }

    async fn resolve_transaction(
        &self,
        id: Uuid,
        resolution: &TransactionResolution,
    ) -> Result<Option<Transaction>, StoreError> {
        self.inner.resolve_transaction(id, resolution).await
    }

    async fn settle_success(
        &self,
        id: Uuid,
        resolution: &TransactionResolution,
        bundle: &EntitlementBundle,
    ) -> Result<Option<Transaction>, StoreError> {
        self.settle_calls.fetch_add(1, Ordering::SeqCst);
        let hiccup = self.next_settle.lock().unwrap().take();
        match hiccup {
            Some(Hiccup::BundleWrite) => {
                let current = self.inner.load_bundle(bundle.profile_id).await?;
                if let Some(current) = current {
                    self.inner.save_bundle(&current).await?;
                }
            }
            Some(Hiccup::Fail(err)) => return Err(err),
            None => {}
        }
        self.inner.settle_success(id, resolution, bundle).await
    }

    async fn stale_transactions(
        &self,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, StoreError> {
        self.inner.stale_transactions(created_before).await
    }

    async fn transactions_for_user(&self, user_id: i32) -> Result<Vec<Transaction>, StoreError> {
        self.inner.transactions_for_user(user_id).await
    }
}

#[tokio::test]
async fn inquiry_package_is_added_once_the_callback_verifies() {
    let h = harness();
    let coach = h.register(7, ProfileVariant::Coach).await;
    let later = t0() + Duration::days(4);
    h.exhaust(coach.profile_id, later).await;

    let ticket = h
        .payments
        .create_transaction(&coach, product_id("PREMIUM_INQUIRIES_L"), later)
        .await
        .unwrap();
    assert_eq!(ticket.status, TransactionStatus::Pending);
    assert!(ticket
        .redirect_url
        .ends_with(&ticket.transaction_id.to_string()));

    let transaction = h.payments.transaction(ticket.transaction_id).await.unwrap();
    assert_eq!(transaction.amount_minor, 999);
    assert_eq!(transaction.description, "PLAYMAKER.PRO | Inquiry package L");
    assert_eq!(transaction.provider_reference.as_deref(), Some("TR-TEST-1"));
    assert!(transaction.raw_create_response.is_some());

    let outcome = h
        .payments
        .resolve(&paid_notification(&transaction), later)
        .await
        .unwrap();
    assert!(outcome.applied);
    assert_eq!(outcome.status, TransactionStatus::Success);
    assert!(outcome.validation_errors.is_empty());

    let status = h.premium.status(coach.profile_id, later).await.unwrap();
    assert_eq!(status.limit, 8);
    assert_eq!(status.left, 3);

    let stored = h.payments.transaction(ticket.transaction_id).await.unwrap();
    assert_eq!(stored.status, TransactionStatus::Success);
    assert!(stored.raw_resolve_response.is_some());
}

#[tokio::test]
async fn repeated_callback_does_not_apply_twice() {
    let h = harness();
    let coach = h.register(8, ProfileVariant::Coach).await;
    let later = t0() + Duration::days(4);
    h.exhaust(coach.profile_id, later).await;

    let ticket = h
        .payments
        .create_transaction(&coach, product_id("PREMIUM_INQUIRIES_XL"), later)
        .await
        .unwrap();
    let transaction = h.payments.transaction(ticket.transaction_id).await.unwrap();
    let notification = paid_notification(&transaction);

    let first = h.payments.resolve(&notification, later).await.unwrap();
    let second = h.payments.resolve(&notification, later).await.unwrap();

    assert!(first.applied);
    assert!(!second.applied);
    assert_eq!(second.status, TransactionStatus::Success);
    let status = h.premium.status(coach.profile_id, later).await.unwrap();
    assert_eq!(status.limit, 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callbacks_apply_exactly_once() {
    let h = harness();
    let guest = h.register(9, ProfileVariant::Guest).await;
    let later = t0() + Duration::days(10);

    let ticket = h
        .payments
        .create_transaction(&guest, product_id("GUEST_PREMIUM_PROFILE_MONTH"), later)
        .await
        .unwrap();
    let transaction = h.payments.transaction(ticket.transaction_id).await.unwrap();
    let notification = paid_notification(&transaction);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let payments = h.payments.clone();
        let notification = notification.clone();
        handles.push(tokio::spawn(async move {
            payments.resolve(&notification, later).await.unwrap()
        }));
    }
    let mut applied = 0;
    for handle in handles {
        if handle.await.unwrap().applied {
            applied += 1;
        }
    }

    assert_eq!(applied, 1);
    let bundle = h.premium.bundle(guest.profile_id).await.unwrap();
    assert_eq!(bundle.subscription.valid_until, Some(later + Duration::days(30)));
}

#[tokio::test]
async fn premium_purchase_extends_a_running_trial() {
    let h = harness();
    let guest = h.register(10, ProfileVariant::Guest).await;
    let during_trial = t0() + Duration::days(1);

    let ticket = h
        .payments
        .create_transaction(&guest, product_id("GUEST_PREMIUM_PROFILE_YEAR"), during_trial)
        .await
        .unwrap();
    let transaction = h.payments.transaction(ticket.transaction_id).await.unwrap();
    h.payments
        .resolve(&paid_notification(&transaction), during_trial)
        .await
        .unwrap();

    let bundle = h.premium.bundle(guest.profile_id).await.unwrap();
    assert_eq!(
        bundle.subscription.valid_until,
        Some(t0() + Duration::days(3 + 365))
    );
    assert!(bundle.is_promoted(during_trial));
}

#[tokio::test]
async fn provider_failure_persists_nothing() {
    let h = harness();
    let guest = h.register(11, ProfileVariant::Guest).await;
    h.provider.fail_create.store(true, Ordering::SeqCst);

    let err = h
        .payments
        .create_transaction(&guest, product_id("GUEST_PREMIUM_PROFILE_MONTH"), t0())
        .await
        .unwrap_err();

    assert!(matches!(err, PaymentError::ProviderUnavailable(_)));
    assert_eq!(err.to_string(), "Something went wrong. Try again later.");
    assert!(h.store.transactions_for_user(11).await.unwrap().is_empty());
}

#[tokio::test]
async fn credential_is_reused_between_purchases() {
    let h = harness();
    let guest = h.register(12, ProfileVariant::Guest).await;
    let product = product_id("GUEST_PREMIUM_PROFILE_MONTH");

    h.payments.create_transaction(&guest, product, t0()).await.unwrap();
    h.payments
        .create_transaction(&guest, product, t0() + Duration::minutes(5))
        .await
        .unwrap();
    assert_eq!(h.provider.auth_calls.load(Ordering::SeqCst), 1);

    h.payments
        .create_transaction(&guest, product, t0() + Duration::hours(3))
        .await
        .unwrap();
    assert_eq!(h.provider.auth_calls.load(Ordering::SeqCst), 2);
    assert_eq!(h.store.transactions_for_user(12).await.unwrap().len(), 3);
}

#[tokio::test]
async fn unknown_and_hidden_products_are_rejected() {
    let h = harness();
    let mut guest = h.register(13, ProfileVariant::Guest).await;

    let err = h
        .payments
        .create_transaction(&guest, 999, t0())
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::InvalidProduct(999)));
    assert_eq!(err.to_string(), "Invalid transaction type id.");

    let hidden = product_id("PREMIUM_PROFILE_MONTH");
    let err = h
        .payments
        .create_transaction(&guest, hidden, t0())
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::NotVisible(id) if id == hidden));

    guest.is_staff = true;
    h.payments
        .create_transaction(&guest, hidden, t0())
        .await
        .unwrap();
}

#[tokio::test]
async fn products_are_limited_to_their_audience() {
    let h = harness();
    let guest = h.register(14, ProfileVariant::Guest).await;

    let err = h
        .payments
        .create_transaction(&guest, product_id("PLAYER_PREMIUM_PROFILE_MONTH"), t0())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PaymentError::Policy(PolicyError::ProductNotForVariant { .. })
    ));
    assert_eq!(h.provider.create_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn package_purchases_require_an_exhausted_non_player_quota() {
    let h = harness();
    let player = h.register(15, ProfileVariant::Player).await;
    let coach = h.register(16, ProfileVariant::Coach).await;
    let later = t0() + Duration::days(4);
    let package = product_id("PREMIUM_INQUIRIES_L");

    let err = h
        .payments
        .create_transaction(&player, package, later)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PaymentError::Policy(PolicyError::PlayersCannotBuyPackages)
    ));

    let err = h
        .payments
        .create_transaction(&coach, package, later)
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentError::Policy(PolicyError::MustExhaustFirst)));
}

#[tokio::test]
async fn tampered_callback_fails_the_transaction() {
    let h = harness();
    let guest = h.register(17, ProfileVariant::Guest).await;
    let later = t0() + Duration::days(10);

    let ticket = h
        .payments
        .create_transaction(&guest, product_id("GUEST_PREMIUM_PROFILE_MONTH"), later)
        .await
        .unwrap();
    let transaction = h.payments.transaction(ticket.transaction_id).await.unwrap();
    let mut notification = paid_notification(&transaction);
    notification.tr_amount = "0.01".to_string();

    let outcome = h.payments.resolve(&notification, later).await.unwrap();
    assert!(outcome.applied);
    assert_eq!(outcome.status, TransactionStatus::Failed);
    assert!(outcome
        .validation_errors
        .iter()
        .any(|error| error == "Checksum is invalid"));
    assert!(outcome
        .validation_errors
        .iter()
        .any(|error| error == "Invalid data: Amount is invalid"));

    let stored = h.payments.transaction(ticket.transaction_id).await.unwrap();
    assert_eq!(stored.status, TransactionStatus::Failed);
    assert_eq!(stored.validation_errors, outcome.validation_errors);
    assert!(!h.premium.is_premium_active(guest.profile_id, later).await.unwrap());

    let retry = h
        .payments
        .resolve(&paid_notification(&transaction), later)
        .await
        .unwrap();
    assert!(!retry.applied);
    assert_eq!(retry.status, TransactionStatus::Failed);
}

#[tokio::test]
async fn callback_for_unknown_transaction_is_an_error() {
    let h = harness();
    let guest = h.register(18, ProfileVariant::Guest).await;
    let ticket = h
        .payments
        .create_transaction(&guest, product_id("GUEST_PREMIUM_PROFILE_MONTH"), t0())
        .await
        .unwrap();
    let transaction = h.payments.transaction(ticket.transaction_id).await.unwrap();

    let mut notification = paid_notification(&transaction);
    notification.tr_crc = uuid::Uuid::new_v4().to_string();
    notification.checksum = notification.expected_checksum(SECRET);

    let err = h.payments.resolve(&notification, t0()).await.unwrap_err();
    assert!(matches!(err, PaymentError::TransactionNotFound(_)));

    notification.tr_crc = "not-a-uuid".to_string();
    let err = h.payments.resolve(&notification, t0()).await.unwrap_err();
    assert!(matches!(err, PaymentError::TransactionNotFound(crc) if crc == "not-a-uuid"));
}

#[tokio::test]
async fn stale_transactions_become_outdated_and_ignore_late_callbacks() {
    let h = harness();
    let guest = h.register(19, ProfileVariant::Guest).await;
    let ticket = h
        .payments
        .create_transaction(&guest, product_id("GUEST_PREMIUM_PROFILE_MONTH"), t0())
        .await
        .unwrap();
    let transaction = h.payments.transaction(ticket.transaction_id).await.unwrap();

    let early = h
        .payments
        .mark_outdated(Duration::hours(24), t0() + Duration::hours(2))
        .await
        .unwrap();
    assert!(early.is_empty());

    let sweep_at = t0() + Duration::hours(25);
    let outdated = h
        .payments
        .mark_outdated(Duration::hours(24), sweep_at)
        .await
        .unwrap();
    assert_eq!(outdated, vec![ticket.transaction_id]);

    let late = h
        .payments
        .resolve(&paid_notification(&transaction), sweep_at)
        .await
        .unwrap();
    assert!(!late.applied);
    assert_eq!(late.status, TransactionStatus::Outdated);
    assert!(!h.premium.is_premium_active(guest.profile_id, sweep_at).await.unwrap());
}

#[tokio::test]
async fn manual_transitions_respect_the_pending_guard() {
    let h = harness();
    let coach = h.register(20, ProfileVariant::Coach).await;
    let later = t0() + Duration::days(4);

    let ticket = h
        .payments
        .create_transaction(&coach, product_id("OTHER_PREMIUM_PROFILE_QUARTER"), later)
        .await
        .unwrap();
    let outcome = h.payments.success(ticket.transaction_id, later).await.unwrap();
    assert!(outcome.applied);
    let bundle = h.premium.bundle(coach.profile_id).await.unwrap();
    assert_eq!(bundle.subscription.valid_until, Some(later + Duration::days(90)));

    let err = h
        .payments
        .fail(ticket.transaction_id, "manual cancel", later)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PaymentError::InvalidTransition {
            status: TransactionStatus::Success,
            ..
        }
    ));
    let err = h.payments.success(ticket.transaction_id, later).await.unwrap_err();
    assert!(matches!(err, PaymentError::InvalidTransition { .. }));
    let bundle = h.premium.bundle(coach.profile_id).await.unwrap();
    assert_eq!(bundle.subscription.valid_until, Some(later + Duration::days(90)));
}

#[tokio::test]
async fn settlement_retries_after_a_concurrent_bundle_write() {
    let memory = Arc::new(MemoryStore::new());
    let flaky = Arc::new(FlakyStore::new(memory.clone(), Hiccup::BundleWrite));
    let h = harness_over(memory, flaky.clone());
    let coach = h.register(40, ProfileVariant::Coach).await;
    let later = t0() + Duration::days(4);
    h.exhaust(coach.profile_id, later).await;

    let ticket = h
        .payments
        .create_transaction(&coach, product_id("PREMIUM_INQUIRIES_L"), later)
        .await
        .unwrap();
    let transaction = h.payments.transaction(ticket.transaction_id).await.unwrap();

    let outcome = h
        .payments
        .resolve(&paid_notification(&transaction), later)
        .await
        .unwrap();
    assert!(outcome.applied);
    assert_eq!(flaky.settle_calls.load(Ordering::SeqCst), 2);

    let status = h.premium.status(coach.profile_id, later).await.unwrap();
    assert_eq!(status.limit, 8);
    assert_eq!(status.left, 3);
}

#[tokio::test]
async fn failed_settlement_stays_pending_and_applies_once_on_redelivery() {
    let memory = Arc::new(MemoryStore::new());
    let flaky = Arc::new(FlakyStore::new(
        memory.clone(),
        Hiccup::Fail(StoreError::Corrupt("write timed out".to_string())),
    ));
    let h = harness_over(memory, flaky);
    let coach = h.register(41, ProfileVariant::Coach).await;
    let later = t0() + Duration::days(4);
    h.exhaust(coach.profile_id, later).await;

    let ticket = h
        .payments
        .create_transaction(&coach, product_id("PREMIUM_INQUIRIES_L"), later)
        .await
        .unwrap();
    let transaction = h.payments.transaction(ticket.transaction_id).await.unwrap();
    let notification = paid_notification(&transaction);
    let before = h.premium.bundle(coach.profile_id).await.unwrap();

    let err = h.payments.resolve(&notification, later).await.unwrap_err();
    assert!(matches!(
        err,
        PaymentError::Premium(PremiumError::Store(StoreError::Corrupt(_)))
    ));
    let stored = h.payments.transaction(ticket.transaction_id).await.unwrap();
    assert_eq!(stored.status, TransactionStatus::Pending);
    assert_eq!(h.premium.bundle(coach.profile_id).await.unwrap(), before);

    let redelivered = h.payments.resolve(&notification, later).await.unwrap();
    assert!(redelivered.applied);
    assert_eq!(redelivered.status, TransactionStatus::Success);

    let again = h.payments.resolve(&notification, later).await.unwrap();
    assert!(!again.applied);

    let status = h.premium.status(coach.profile_id, later).await.unwrap();
    assert_eq!(status.limit, 8);
    assert_eq!(status.left, 3);
}
