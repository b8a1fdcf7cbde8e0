use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::bundle::{EntitlementBundle, EntitlementStatus, GrantOutcome, PeriodClass};
use super::error::{PolicyError, PremiumError};
use super::quota::IncrementOutcome;
use super::score::ScoreTicket;
use crate::profiles::ProfileVariant;
use crate::store::{EntitlementStore, StoreError};

/// Upper bound on load-mutate-save rounds for one bundle mutation. A caller
/// can only lose a round to another writer that then finishes, so this also
/// bounds the number of concurrent writers that are guaranteed to succeed.
pub const MAX_SAVE_ATTEMPTS: usize = 10;

#[derive(Debug, Clone, Copy)]
pub struct NewProfile {
    pub profile_id: Uuid,
    pub user_id: i32,
    pub variant: ProfileVariant,
}

#[derive(Debug, Clone, Serialize)]
pub struct PendingScoreTicket {
    pub profile_id: Uuid,
    pub user_id: i32,
    pub ticket: ScoreTicket,
}

/// key: premium-service -> serialized mutations of entitlement bundles
#[derive(Clone)]
pub struct PremiumService {
    store: Arc<dyn EntitlementStore>,
}

impl PremiumService {
    pub fn new(store: Arc<dyn EntitlementStore>) -> Self {
        Self { store }
    }

    /// Create the bundle for a freshly registered profile and start its trial.
    pub async fn on_profile_created(
        &self,
        profile: NewProfile,
        now: DateTime<Utc>,
    ) -> Result<EntitlementBundle, PremiumError> {
        let mut bundle =
            EntitlementBundle::new(profile.profile_id, profile.user_id, profile.variant, now);
        bundle.grant(PeriodClass::Trial, now)?;

        match self.store.insert_bundle(&bundle).await {
            Ok(()) => {}
            Err(StoreError::Duplicate(_)) => {
                return Err(PremiumError::BundleExists(profile.profile_id))
            }
            Err(err) => return Err(err.into()),
        }

        tracing::info!(
            profile_id = %profile.profile_id,
            user_id = profile.user_id,
            variant = profile.variant.as_str(),
            valid_until = ?bundle.subscription.valid_until,
            "entitlement bundle created with trial"
        );
        Ok(bundle)
    }

    pub async fn bundle(&self, profile_id: Uuid) -> Result<EntitlementBundle, PremiumError> {
        self.store
            .load_bundle(profile_id)
            .await?
            .ok_or(PremiumError::BundleNotFound(profile_id))
    }

    pub async fn bundle_for_user(&self, user_id: i32) -> Result<Option<EntitlementBundle>, PremiumError> {
        Ok(self.store.load_bundle_for_user(user_id).await?)
    }

    pub async fn status(
        &self,
        profile_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<EntitlementStatus, PremiumError> {
        Ok(self.bundle(profile_id).await?.status(now))
    }

    pub async fn is_premium_active(
        &self,
        profile_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, PremiumError> {
        Ok(self.bundle(profile_id).await?.is_premium_active(now))
    }

    pub async fn is_promoted(&self, profile_id: Uuid, now: DateTime<Utc>) -> Result<bool, PremiumError> {
        Ok(self.bundle(profile_id).await?.is_promoted(now))
    }

    pub async fn can_buy_package(
        &self,
        profile_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), PremiumError> {
        Ok(self.bundle(profile_id).await?.can_buy_package(now)?)
    }

    pub async fn grant(
        &self,
        profile_id: Uuid,
        period: PeriodClass,
        now: DateTime<Utc>,
    ) -> Result<GrantOutcome, PremiumError> {
        let outcome = self
            .mutate(profile_id, |bundle| bundle.grant(period, now))
            .await?;
        tracing::info!(
            %profile_id,
            ?period,
            valid_until = ?outcome.premium_valid_until,
            extended = outcome.was_premium_active,
            "premium granted"
        );
        Ok(outcome)
    }

    pub async fn activate_trial(
        &self,
        profile_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<GrantOutcome, PremiumError> {
        self.grant(profile_id, PeriodClass::Trial, now).await
    }

    /// Record one inquiry against the profile's quota.
    pub async fn increment(
        &self,
        profile_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<IncrementOutcome, PremiumError> {
        let outcome = self
            .mutate(profile_id, |bundle| Ok(bundle.increment(now)))
            .await?;
        if outcome == IncrementOutcome::Exhausted {
            tracing::warn!(%profile_id, "inquiry recorded against an exhausted quota");
        }
        Ok(outcome)
    }

    /// Spend one inquiry, refusing when none are left. The check and the
    /// increment see the same bundle version.
    pub async fn consume(
        &self,
        profile_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<IncrementOutcome, PremiumError> {
        self.mutate(profile_id, |bundle| {
            if bundle.left(now) <= 0 {
                return Err(PolicyError::NoInquiriesLeft);
            }
            Ok(bundle.increment(now))
        })
        .await
    }

    /// Add a purchased inquiry package. Eligibility was checked when the
    /// purchase started, so the bonus is applied unconditionally.
    pub async fn add_package(
        &self,
        profile_id: Uuid,
        bonus_count: i64,
        now: DateTime<Utc>,
    ) -> Result<i64, PremiumError> {
        let capacity = self
            .mutate(profile_id, |bundle| {
                bundle.add_package(bonus_count, now);
                Ok(bundle.quota.freemium_capacity)
            })
            .await?;
        tracing::info!(%profile_id, bonus_count, capacity, "inquiry package added");
        Ok(capacity)
    }

    pub async fn approve_score(
        &self,
        profile_id: Uuid,
        admin_id: i32,
        value: i64,
        now: DateTime<Utc>,
    ) -> Result<ScoreTicket, PremiumError> {
        let ticket = self
            .mutate(profile_id, |bundle| {
                bundle.approve_score(admin_id, value, now)?;
                bundle
                    .score_ticket
                    .clone()
                    .ok_or(PolicyError::TicketNotAwaitingApproval)
            })
            .await?;
        tracing::info!(%profile_id, admin_id, value, "score recalculation approved");
        Ok(ticket)
    }

    pub async fn pending_score_tickets(&self) -> Result<Vec<PendingScoreTicket>, PremiumError> {
        let mut pending = Vec::new();
        for profile_id in self.store.bundles_with_pending_tickets().await? {
            let Some(bundle) = self.store.load_bundle(profile_id).await? else {
                continue;
            };
            if let Some(ticket) = bundle.score_ticket.filter(|ticket| ticket.awaiting_approval) {
                pending.push(PendingScoreTicket {
                    profile_id,
                    user_id: bundle.user_id,
                    ticket,
                });
            }
        }
        Ok(pending)
    }

    /// Apply the expiry reset to a bundle whose premium lapsed. Returns whether
    /// this call performed the reset.
    pub async fn reconcile_expiry(
        &self,
        profile_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, PremiumError> {
        for _ in 0..MAX_SAVE_ATTEMPTS {
            let mut bundle = self.bundle(profile_id).await?;
            if !bundle.reconcile_expiry(now) {
                return Ok(false);
            }
            match self.store.save_bundle(&bundle).await {
                Ok(_) => {
                    tracing::info!(%profile_id, "premium lapsed; quota reset to base");
                    return Ok(true);
                }
                Err(StoreError::Conflict(_)) => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Err(PremiumError::Contended(profile_id, MAX_SAVE_ATTEMPTS))
    }

    pub async fn expired_bundles(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, PremiumError> {
        Ok(self.store.bundles_awaiting_expiry(now).await?)
    }

    /// Load, mutate and conditionally save a bundle, retrying on version
    /// conflicts. Policy errors abort without writing.
    async fn mutate<T, F>(&self, profile_id: Uuid, mut apply: F) -> Result<T, PremiumError>
    where
        F: FnMut(&mut EntitlementBundle) -> Result<T, PolicyError> + Send,
        T: Send,
    {
        for attempt in 1..=MAX_SAVE_ATTEMPTS {
            let mut bundle = self.bundle(profile_id).await?;
            let value = apply(&mut bundle)?;
            match self.store.save_bundle(&bundle).await {
                Ok(_) => return Ok(value),
                Err(StoreError::Conflict(_)) => {
                    tracing::debug!(%profile_id, attempt, "bundle changed concurrently; retrying");
                }
                Err(err) => return Err(err.into()),
            }
        }
        tracing::warn!(%profile_id, attempts = MAX_SAVE_ATTEMPTS, "giving up on contended bundle");
        Err(PremiumError::Contended(profile_id, MAX_SAVE_ATTEMPTS))
    }
}
