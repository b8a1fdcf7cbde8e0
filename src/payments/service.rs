use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::models::{
    PaymentDiscrepancy, Transaction, TransactionResolution, TransactionStatus, TransactionTicket,
};
use super::provider::{
    AccessCredential, Payer, PaymentProvider, ProviderNotification, RemoteTransactionRequest,
    TransactionError,
};
use crate::premium::{PolicyError, PremiumError, PremiumService, MAX_SAVE_ATTEMPTS};
use crate::products::{Product, ProductCatalog, ProductEffect, ProductReference};
use crate::profiles::ProfileVariant;
use crate::store::{EntitlementStore, StoreError};

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("Invalid transaction type id.")]
    InvalidProduct(i32),
    #[error("product {0} is not available")]
    NotVisible(i32),
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error("no entitlement bundle for profile {0}")]
    BundleNotFound(Uuid),
    #[error("Something went wrong. Try again later.")]
    ProviderUnavailable(#[source] TransactionError),
    #[error("transaction {0} not found")]
    TransactionNotFound(String),
    #[error("transaction {id} is {status:?} and cannot change state")]
    InvalidTransition {
        id: Uuid,
        status: TransactionStatus,
    },
    #[error("failed to apply purchase effect: {0}")]
    Premium(PremiumError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<PremiumError> for PaymentError {
    fn from(err: PremiumError) -> Self {
        match err {
            PremiumError::Policy(policy) => PaymentError::Policy(policy),
            PremiumError::Store(store) => PaymentError::Store(store),
            PremiumError::BundleNotFound(profile_id) => PaymentError::BundleNotFound(profile_id),
            other => PaymentError::Premium(other),
        }
    }
}

/// Authenticated buyer starting a purchase.
#[derive(Debug, Clone)]
pub struct Purchaser {
    pub user_id: i32,
    pub profile_id: Uuid,
    pub is_staff: bool,
    pub email: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolveOutcome {
    pub transaction_id: Uuid,
    pub status: TransactionStatus,
    /// Whether this callback performed the state change.
    pub applied: bool,
    pub validation_errors: Vec<String>,
}

/// key: payment-service -> purchase lifecycle from checkout to entitlement
#[derive(Clone)]
pub struct PaymentService {
    store: Arc<dyn EntitlementStore>,
    premium: PremiumService,
    provider: Arc<dyn PaymentProvider>,
    catalog: Arc<ProductCatalog>,
    description_prefix: String,
    credential: Arc<Mutex<Option<AccessCredential>>>,
}

impl PaymentService {
    pub fn new(
        store: Arc<dyn EntitlementStore>,
        premium: PremiumService,
        provider: Arc<dyn PaymentProvider>,
        catalog: Arc<ProductCatalog>,
        description_prefix: impl Into<String>,
    ) -> Self {
        Self {
            store,
            premium,
            provider,
            catalog,
            description_prefix: description_prefix.into(),
            credential: Arc::new(Mutex::new(None)),
        }
    }

    pub fn catalog(&self) -> &ProductCatalog {
        &self.catalog
    }

    /// Visible products, optionally narrowed to one reference and to what a
    /// variant may buy.
    pub fn products(
        &self,
        reference: Option<ProductReference>,
        variant: Option<ProfileVariant>,
    ) -> Vec<Product> {
        self.catalog
            .visible()
            .filter(|product| reference.map_or(true, |reference| product.reference == reference))
            .filter(|product| variant.map_or(true, |variant| product.audience.admits(variant)))
            .cloned()
            .collect()
    }

    pub fn description_for(&self, product: &Product) -> String {
        format!("{} | {}", self.description_prefix, product.readable_name)
    }

    /// Start a purchase. Nothing is persisted unless the provider accepts the
    /// transaction.
    pub async fn create_transaction(
        &self,
        purchaser: &Purchaser,
        product_id: i32,
        now: DateTime<Utc>,
    ) -> Result<TransactionTicket, PaymentError> {
        let product = self
            .catalog
            .get(product_id)
            .ok_or(PaymentError::InvalidProduct(product_id))?;
        if !product.visible && !purchaser.is_staff {
            return Err(PaymentError::NotVisible(product_id));
        }

        let bundle = self.premium.bundle(purchaser.profile_id).await?;
        product.ensure_available_to(bundle.variant)?;
        if let ProductEffect::Inquiries { .. } = product.effect() {
            bundle.can_buy_package(now)?;
        }

        let mut transaction = Transaction::pending(
            purchaser.user_id,
            purchaser.profile_id,
            product.id,
            product.price_minor,
            self.description_for(product),
            now,
        );
        let request = RemoteTransactionRequest {
            amount: product.price_string(),
            description: transaction.description.clone(),
            hidden_description: transaction.id.to_string(),
            payer: Payer {
                email: purchaser.email.clone(),
                name: purchaser.name.clone(),
            },
            success_url: self
                .provider
                .success_url(product.reference.as_str(), product.bonus_count),
            error_url: self.provider.error_url(),
            notification_email: self.provider.notification_email(),
        };

        let remote = self.open_remote(&request, now).await.map_err(|err| {
            tracing::error!(
                ?err,
                transaction_id = %transaction.id,
                product = %product.name,
                "payment provider failed to open transaction"
            );
            PaymentError::ProviderUnavailable(err)
        })?;

        transaction.provider_reference = Some(remote.title.clone());
        transaction.redirect_url = Some(remote.payment_url.clone());
        transaction.raw_create_response = Some(remote.raw);
        self.store.insert_transaction(&transaction).await?;

        tracing::info!(
            transaction_id = %transaction.id,
            user_id = purchaser.user_id,
            product = %product.name,
            provider_reference = %remote.title,
            "transaction created"
        );
        Ok(TransactionTicket {
            transaction_id: transaction.id,
            status: transaction.status,
            redirect_url: remote.payment_url,
        })
    }

    /// Settle a transaction from a provider callback. Verification failures
    /// are recorded on the transaction, which then fails instead of succeeding.
    pub async fn resolve(
        &self,
        notification: &ProviderNotification,
        now: DateTime<Utc>,
    ) -> Result<ResolveOutcome, PaymentError> {
        let transaction = match notification.correlation_id() {
            Some(id) => self.store.load_transaction(id).await?,
            None => None,
        };
        let errors = self
            .provider
            .verify_callback(notification, transaction.as_ref());

        let Some(transaction) = transaction else {
            tracing::error!(
                correlation_id = %notification.tr_crc,
                ?errors,
                "callback for unknown transaction"
            );
            return Err(PaymentError::TransactionNotFound(notification.tr_crc.clone()));
        };

        let mut resolution = TransactionResolution::new(
            if errors.is_empty() {
                TransactionStatus::Success
            } else {
                TransactionStatus::Failed
            },
            now,
        );
        resolution.error = notification
            .discrepancy()
            .unwrap_or(PaymentDiscrepancy::None);
        resolution.validation_errors = errors;
        resolution.raw_resolve_response = serde_json::to_value(notification).ok();

        if resolution.status == TransactionStatus::Success {
            tracing::info!(transaction_id = %transaction.id, "callback verified");
        } else {
            tracing::error!(
                transaction_id = %transaction.id,
                errors = ?resolution.validation_errors,
                "callback failed verification"
            );
        }

        let validation_errors = resolution.validation_errors.clone();
        match self.transition(transaction.id, resolution).await {
            // Callbacks are at-least-once; a resolved transaction absorbs repeats.
            Err(PaymentError::InvalidTransition { id, status }) => Ok(ResolveOutcome {
                transaction_id: id,
                status,
                applied: false,
                validation_errors,
            }),
            other => other,
        }
    }

    /// Mark a PENDING transaction as paid and apply its effect. Fails with
    /// [`PaymentError::InvalidTransition`] once the transaction is terminal.
    pub async fn success(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<ResolveOutcome, PaymentError> {
        self.transition(id, TransactionResolution::new(TransactionStatus::Success, now))
            .await
    }

    pub async fn fail(
        &self,
        id: Uuid,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<ResolveOutcome, PaymentError> {
        let mut resolution = TransactionResolution::new(TransactionStatus::Failed, now);
        resolution.validation_errors.push(reason.into());
        self.transition(id, resolution).await
    }

    /// Move PENDING transactions older than `stale_after` to OUTDATED.
    pub async fn mark_outdated(
        &self,
        stale_after: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, PaymentError> {
        let mut outdated = Vec::new();
        for id in self.store.stale_transactions(now - stale_after).await? {
            let resolution = TransactionResolution::new(TransactionStatus::Outdated, now);
            if self.store.resolve_transaction(id, &resolution).await?.is_some() {
                tracing::info!(transaction_id = %id, "pending transaction outdated");
                outdated.push(id);
            }
        }
        Ok(outdated)
    }

    pub async fn transaction(&self, id: Uuid) -> Result<Transaction, PaymentError> {
        self.store
            .load_transaction(id)
            .await?
            .ok_or_else(|| PaymentError::TransactionNotFound(id.to_string()))
    }

    pub async fn transactions_for_user(&self, user_id: i32) -> Result<Vec<Transaction>, PaymentError> {
        Ok(self.store.transactions_for_user(user_id).await?)
    }

    async fn transition(
        &self,
        id: Uuid,
        resolution: TransactionResolution,
    ) -> Result<ResolveOutcome, PaymentError> {
        let transaction = if resolution.status == TransactionStatus::Success {
            self.settle(id, &resolution).await?
        } else {
            let Some(transaction) = self.store.resolve_transaction(id, &resolution).await? else {
                return Err(self.rejected_transition(id, resolution.status).await);
            };
            tracing::info!(
                transaction_id = %id,
                status = transaction.status.as_str(),
                errors = ?transaction.validation_errors,
                "transaction closed without effect"
            );
            transaction
        };

        Ok(ResolveOutcome {
            transaction_id: id,
            status: transaction.status,
            applied: true,
            validation_errors: transaction.validation_errors,
        })
    }

    /// Apply the product effect to a fresh copy of the bundle and store it
    /// together with the SUCCESS flip. Either both land or neither does, so a
    /// failed attempt leaves the transaction PENDING for the next callback.
    async fn settle(
        &self,
        id: Uuid,
        resolution: &TransactionResolution,
    ) -> Result<Transaction, PaymentError> {
        let now = resolution.resolved_at;
        let pending = self.transaction(id).await?;
        if pending.status != TransactionStatus::Pending {
            return Err(invalid_transition(&pending, resolution.status));
        }
        let product = self
            .catalog
            .get(pending.product_id)
            .ok_or(PaymentError::InvalidProduct(pending.product_id))?;

        for attempt in 1..=MAX_SAVE_ATTEMPTS {
            let mut bundle = self
                .premium
                .bundle(pending.profile_id)
                .await
                .map_err(|err| effect_failed(&pending, product, err))?;
            match product.effect() {
                ProductEffect::Premium(period) => {
                    bundle
                        .grant(period, now)
                        .map_err(|err| effect_failed(&pending, product, err.into()))?;
                }
                ProductEffect::Inquiries { bonus_count } => bundle.add_package(bonus_count, now),
            }

            match self.store.settle_success(id, resolution, &bundle).await {
                Ok(Some(settled)) => {
                    tracing::info!(
                        transaction_id = %id,
                        user_id = settled.user_id,
                        product = %product.name,
                        "transaction approved"
                    );
                    return Ok(settled);
                }
                Ok(None) => return Err(self.rejected_transition(id, resolution.status).await),
                Err(StoreError::Conflict(_)) => {
                    tracing::debug!(transaction_id = %id, attempt, "bundle changed while settling; retrying");
                }
                Err(err) => return Err(effect_failed(&pending, product, err.into())),
            }
        }
        Err(effect_failed(
            &pending,
            product,
            PremiumError::Contended(pending.profile_id, MAX_SAVE_ATTEMPTS),
        ))
    }

    async fn rejected_transition(&self, id: Uuid, requested: TransactionStatus) -> PaymentError {
        match self.store.load_transaction(id).await {
            Ok(Some(current)) => invalid_transition(&current, requested),
            Ok(None) => PaymentError::TransactionNotFound(id.to_string()),
            Err(err) => err.into(),
        }
    }

    /// Reuse the cached credential while valid; authenticate otherwise.
    async fn open_remote(
        &self,
        request: &RemoteTransactionRequest,
        now: DateTime<Utc>,
    ) -> Result<super::provider::RemoteTransaction, TransactionError> {
        let mut slot = self.credential.lock().await;
        let credential = match slot.as_ref() {
            Some(credential) if credential.is_valid(now) => credential.clone(),
            _ => {
                let fresh = self.provider.authenticate(now).await?;
                *slot = Some(fresh.clone());
                fresh
            }
        };
        drop(slot);

        let result = self.provider.create_transaction(&credential, request).await;
        if let Err(err) = &result {
            if err.invalidates_credential() {
                let mut slot = self.credential.lock().await;
                if slot.as_ref() == Some(&credential) {
                    *slot = None;
                }
            }
        }
        result
    }
}

fn invalid_transition(current: &Transaction, requested: TransactionStatus) -> PaymentError {
    tracing::warn!(
        transaction_id = %current.id,
        status = current.status.as_str(),
        requested = requested.as_str(),
        "transaction already resolved"
    );
    PaymentError::InvalidTransition {
        id: current.id,
        status: current.status,
    }
}

fn effect_failed(transaction: &Transaction, product: &Product, err: PremiumError) -> PaymentError {
    tracing::error!(
        ?err,
        transaction_id = %transaction.id,
        profile_id = %transaction.profile_id,
        product = %product.name,
        "paid transaction could not be applied"
    );
    PaymentError::Premium(err)
}
