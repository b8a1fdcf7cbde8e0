//! Persistence seam for entitlement bundles and payment transactions.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::payments::models::{Transaction, TransactionResolution};
use crate::premium::EntitlementBundle;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("record changed concurrently: {0}")]
    Conflict(Uuid),
    #[error("duplicate record: {0}")]
    Duplicate(Uuid),
    #[error("record not found: {0}")]
    NotFound(Uuid),
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// key: entitlement-store -> bundles with optimistic versions, transactions with a PENDING guard
#[async_trait]
pub trait EntitlementStore: Send + Sync {
    /// Insert a brand new bundle. Fails with [`StoreError::Duplicate`] when the
    /// profile already has one.
    async fn insert_bundle(&self, bundle: &EntitlementBundle) -> Result<(), StoreError>;

    async fn load_bundle(&self, profile_id: Uuid) -> Result<Option<EntitlementBundle>, StoreError>;

    async fn load_bundle_for_user(
        &self,
        user_id: i32,
    ) -> Result<Option<EntitlementBundle>, StoreError>;

    /// Persist `bundle` only if the stored version still equals
    /// `bundle.version`. Returns the stored version on success and
    /// [`StoreError::Conflict`] otherwise.
    async fn save_bundle(&self, bundle: &EntitlementBundle) -> Result<i64, StoreError>;

    /// Profiles whose premium window lapsed but whose bundle still records it as active.
    async fn bundles_awaiting_expiry(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, StoreError>;

    /// Profiles with a score ticket awaiting approval, oldest first.
    async fn bundles_with_pending_tickets(&self) -> Result<Vec<Uuid>, StoreError>;

    async fn insert_transaction(&self, transaction: &Transaction) -> Result<(), StoreError>;

    async fn load_transaction(&self, id: Uuid) -> Result<Option<Transaction>, StoreError>;

    /// Move a PENDING transaction to a terminal state. Returns `None` when the
    /// transaction is missing or no longer PENDING; of any number of concurrent
    /// callers at most one receives `Some`.
    async fn resolve_transaction(
        &self,
        id: Uuid,
        resolution: &TransactionResolution,
    ) -> Result<Option<Transaction>, StoreError>;

    /// Move a PENDING transaction to SUCCESS and persist the bundle carrying
    /// its effect, as one unit. Returns `None` without touching the bundle
    /// when the transaction is missing or no longer PENDING, and
    /// [`StoreError::Conflict`] without touching the transaction when the
    /// stored bundle version differs from `bundle.version`.
    async fn settle_success(
        &self,
        id: Uuid,
        resolution: &TransactionResolution,
        bundle: &EntitlementBundle,
    ) -> Result<Option<Transaction>, StoreError>;

    /// PENDING transactions created before `created_before`.
    async fn stale_transactions(
        &self,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, StoreError>;

    async fn transactions_for_user(&self, user_id: i32) -> Result<Vec<Transaction>, StoreError>;
}
