use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use super::{EntitlementStore, StoreError};
use crate::payments::models::{Transaction, TransactionResolution, TransactionStatus};
use crate::premium::EntitlementBundle;

/// In-process store. Each check-and-set runs under the shard write lock of
/// the entry it touches, which gives the same guarantees as the conditional
/// updates in [`super::PgStore`]. Locks are taken in the order users,
/// transactions, bundles.
#[derive(Default)]
pub struct MemoryStore {
    bundles: DashMap<Uuid, EntitlementBundle>,
    users: DashMap<i32, Uuid>,
    transactions: DashMap<Uuid, Transaction>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EntitlementStore for MemoryStore {
    async fn insert_bundle(&self, bundle: &EntitlementBundle) -> Result<(), StoreError> {
        let Entry::Vacant(user) = self.users.entry(bundle.user_id) else {
            return Err(StoreError::Duplicate(bundle.profile_id));
        };
        match self.bundles.entry(bundle.profile_id) {
            Entry::Occupied(_) => Err(StoreError::Duplicate(bundle.profile_id)),
            Entry::Vacant(slot) => {
                slot.insert(bundle.clone());
                user.insert(bundle.profile_id);
                Ok(())
            }
        }
    }

    async fn load_bundle(&self, profile_id: Uuid) -> Result<Option<EntitlementBundle>, StoreError> {
        Ok(self.bundles.get(&profile_id).map(|entry| entry.clone()))
    }

    async fn load_bundle_for_user(
        &self,
        user_id: i32,
    ) -> Result<Option<EntitlementBundle>, StoreError> {
        let Some(profile_id) = self.users.get(&user_id).map(|entry| *entry) else {
            return Ok(None);
        };
        self.load_bundle(profile_id).await
    }

    async fn save_bundle(&self, bundle: &EntitlementBundle) -> Result<i64, StoreError> {
        let mut stored = self
            .bundles
            .get_mut(&bundle.profile_id)
            .ok_or(StoreError::NotFound(bundle.profile_id))?;
        store_next_version(&mut stored, bundle)
    }

    async fn bundles_awaiting_expiry(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, StoreError> {
        Ok(self
            .bundles
            .iter()
            .filter(|entry| entry.needs_expiry_reset(now))
            .map(|entry| entry.profile_id)
            .collect())
    }

    async fn bundles_with_pending_tickets(&self) -> Result<Vec<Uuid>, StoreError> {
        let mut pending: Vec<_> = self
            .bundles
            .iter()
            .filter_map(|entry| {
                entry
                    .score_ticket
                    .as_ref()
                    .filter(|ticket| ticket.awaiting_approval)
                    .map(|ticket| (ticket.created_at, entry.profile_id))
            })
            .collect();
        pending.sort();
        Ok(pending.into_iter().map(|(_, profile_id)| profile_id).collect())
    }

    async fn insert_transaction(&self, transaction: &Transaction) -> Result<(), StoreError> {
        match self.transactions.entry(transaction.id) {
            Entry::Occupied(_) => Err(StoreError::Duplicate(transaction.id)),
            Entry::Vacant(slot) => {
                slot.insert(transaction.clone());
                Ok(())
            }
        }
    }

    async fn load_transaction(&self, id: Uuid) -> Result<Option<Transaction>, StoreError> {
        Ok(self.transactions.get(&id).map(|entry| entry.clone()))
    }

    async fn resolve_transaction(
        &self,
        id: Uuid,
        resolution: &TransactionResolution,
    ) -> Result<Option<Transaction>, StoreError> {
        let Some(mut stored) = self.transactions.get_mut(&id) else {
            return Ok(None);
        };
        if stored.status != TransactionStatus::Pending {
            return Ok(None);
        }
        apply_resolution(&mut stored, resolution);
        Ok(Some(stored.clone()))
    }

    async fn settle_success(
        &self,
        id: Uuid,
        resolution: &TransactionResolution,
        bundle: &EntitlementBundle,
    ) -> Result<Option<Transaction>, StoreError> {
        let Some(mut transaction) = self.transactions.get_mut(&id) else {
            return Ok(None);
        };
        if transaction.status != TransactionStatus::Pending {
            return Ok(None);
        }
        let mut stored = self
            .bundles
            .get_mut(&bundle.profile_id)
            .ok_or(StoreError::NotFound(bundle.profile_id))?;
        store_next_version(&mut stored, bundle)?;
        apply_resolution(&mut transaction, resolution);
        Ok(Some(transaction.clone()))
    }

    async fn stale_transactions(
        &self,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, StoreError> {
        Ok(self
            .transactions
            .iter()
            .filter(|entry| {
                entry.status == TransactionStatus::Pending && entry.created_at < created_before
            })
            .map(|entry| entry.id)
            .collect())
    }

    async fn transactions_for_user(&self, user_id: i32) -> Result<Vec<Transaction>, StoreError> {
        let mut transactions: Vec<_> = self
            .transactions
            .iter()
            .filter(|entry| entry.user_id == user_id)
            .map(|entry| entry.clone())
            .collect();
        transactions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(transactions)
    }
}

fn store_next_version(
    stored: &mut EntitlementBundle,
    bundle: &EntitlementBundle,
) -> Result<i64, StoreError> {
    if stored.version != bundle.version {
        return Err(StoreError::Conflict(bundle.profile_id));
    }
    let mut next = bundle.clone();
    next.version += 1;
    let version = next.version;
    *stored = next;
    Ok(version)
}

fn apply_resolution(stored: &mut Transaction, resolution: &TransactionResolution) {
    stored.status = resolution.status;
    stored.error = resolution.error;
    stored.validation_errors = resolution.validation_errors.clone();
    stored.raw_resolve_response = resolution.raw_resolve_response.clone();
    stored.updated_at = resolution.resolved_at;
}
