use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::PolicyError;
use super::quota::{IncrementOutcome, QuotaAccounting};
use super::score::ScoreTicket;
use super::window::ValidityWindow;
use crate::profiles::ProfileVariant;

pub const TRIAL_DAYS: i64 = 3;
pub const MONTH_DAYS: i64 = 30;
pub const QUARTER_DAYS: i64 = 90;
pub const YEAR_DAYS: i64 = 365;

/// key: premium-period -> length of a granted premium period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "days")]
pub enum PeriodClass {
    Trial,
    Month,
    Year,
    Custom(i64),
}

impl PeriodClass {
    pub fn days(&self) -> i64 {
        match self {
            PeriodClass::Trial => TRIAL_DAYS,
            PeriodClass::Month => MONTH_DAYS,
            PeriodClass::Year => YEAR_DAYS,
            PeriodClass::Custom(days) => *days,
        }
    }
}

/// key: entitlement-bundle -> aggregate root per profile
///
/// Holds the premium subscription, the promotion, the player-only score ticket
/// and the inquiry quota of one profile. `version` backs optimistic
/// concurrency in the store; `premium_observed_active` is the premium state the
/// bundle last saw, used to detect the active -> inactive transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitlementBundle {
    pub profile_id: Uuid,
    pub user_id: i32,
    pub variant: ProfileVariant,
    pub trial_tested: bool,
    pub premium_observed_active: bool,
    pub subscription: ValidityWindow,
    pub promotion: ValidityWindow,
    pub score_ticket: Option<ScoreTicket>,
    pub quota: QuotaAccounting,
    pub version: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GrantOutcome {
    pub period: PeriodClass,
    pub premium_valid_until: Option<DateTime<Utc>>,
    pub was_premium_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntitlementStatus {
    pub profile_id: Uuid,
    pub variant: ProfileVariant,
    pub is_premium_active: bool,
    pub is_promoted: bool,
    pub trial_tested: bool,
    pub premium_valid_until: Option<DateTime<Utc>>,
    pub promotion_valid_until: Option<DateTime<Utc>>,
    pub limit: i64,
    pub used: i64,
    pub left: i64,
    pub can_buy_package: bool,
    pub next_pool_reset_at: Option<DateTime<Utc>>,
}

impl EntitlementBundle {
    pub fn new(profile_id: Uuid, user_id: i32, variant: ProfileVariant, now: DateTime<Utc>) -> Self {
        Self {
            profile_id,
            user_id,
            variant,
            trial_tested: false,
            premium_observed_active: false,
            subscription: ValidityWindow::inactive(now),
            promotion: ValidityWindow::inactive(now),
            score_ticket: None,
            quota: QuotaAccounting::new(user_id, variant, now),
            version: 0,
        }
    }

    pub fn is_premium_active(&self, now: DateTime<Utc>) -> bool {
        self.subscription.is_active(now)
    }

    pub fn is_promoted(&self, now: DateTime<Utc>) -> bool {
        self.promotion.is_active(now)
    }

    /// Whether the premium window lapsed since the bundle last looked.
    pub fn needs_expiry_reset(&self, now: DateTime<Utc>) -> bool {
        self.premium_observed_active && !self.is_premium_active(now)
    }

    /// Apply the expiry reset if premium lapsed. Reapplying is a no-op.
    pub fn reconcile_expiry(&mut self, now: DateTime<Utc>) -> bool {
        if !self.needs_expiry_reset(now) {
            return false;
        }
        self.quota.reset_to_base(self.variant);
        self.premium_observed_active = false;
        true
    }

    /// Bring time-dependent state up to date: expiry reset first, then the
    /// premium pool roll-over. Returns whether anything changed.
    pub fn catch_up(&mut self, now: DateTime<Utc>) -> bool {
        let expired = self.reconcile_expiry(now);
        let rolled = self.is_premium_active(now) && self.quota.roll_pool(self.variant, now);
        expired || rolled
    }

    pub fn grant(&mut self, period: PeriodClass, now: DateTime<Utc>) -> Result<GrantOutcome, PolicyError> {
        self.catch_up(now);

        let days = period.days();
        if days <= 0 {
            return Err(PolicyError::InvalidPeriod(days));
        }
        let was_premium_active = self.is_premium_active(now);
        if period == PeriodClass::Trial {
            if self.trial_tested {
                return Err(PolicyError::AlreadyTrialed);
            }
            if was_premium_active {
                return Err(PolicyError::TrialWhileActive);
            }
        }

        self.subscription.setup(days, now)?;
        if period == PeriodClass::Trial {
            self.trial_tested = true;
        }
        self.promotion.setup(days, now)?;
        if self.variant.is_player() {
            match self.score_ticket.as_mut() {
                Some(ticket) => ticket.refresh(now),
                None => self.score_ticket = Some(ScoreTicket::open(now)),
            }
        }
        self.quota.refresh(was_premium_active, now);
        self.premium_observed_active = true;

        Ok(GrantOutcome {
            period,
            premium_valid_until: self.subscription.valid_until,
            was_premium_active,
        })
    }

    pub fn score_ticket(&self) -> Result<Option<&ScoreTicket>, PolicyError> {
        if !self.variant.is_player() {
            return Err(PolicyError::NotAvailableForVariant(self.variant));
        }
        Ok(self.score_ticket.as_ref())
    }

    pub fn approve_score(&mut self, admin_id: i32, value: i64, now: DateTime<Utc>) -> Result<(), PolicyError> {
        if !self.variant.is_player() {
            return Err(PolicyError::NotAvailableForVariant(self.variant));
        }
        match self.score_ticket.as_mut() {
            Some(ticket) => ticket.approve(admin_id, value, now),
            None => Err(PolicyError::TicketNotAwaitingApproval),
        }
    }

    pub fn increment(&mut self, now: DateTime<Utc>) -> IncrementOutcome {
        self.catch_up(now);
        let active = self.is_premium_active(now);
        self.quota.increment(active)
    }

    pub fn add_package(&mut self, bonus_count: i64, now: DateTime<Utc>) {
        self.catch_up(now);
        self.quota.add_package(bonus_count);
    }

    /// Quota as a mutation at `now` would see it, without touching `self`.
    pub fn quota_view(&self, now: DateTime<Utc>) -> QuotaAccounting {
        let mut view = self.clone();
        view.catch_up(now);
        view.quota
    }

    pub fn limit(&self, now: DateTime<Utc>) -> i64 {
        self.quota_view(now)
            .limit(self.variant, self.is_premium_active(now))
    }

    pub fn used(&self, now: DateTime<Utc>) -> i64 {
        self.quota_view(now).used(self.is_premium_active(now))
    }

    pub fn left(&self, now: DateTime<Utc>) -> i64 {
        self.quota_view(now)
            .left(self.variant, self.is_premium_active(now))
    }

    pub fn can_buy_package(&self, now: DateTime<Utc>) -> Result<(), PolicyError> {
        self.quota_view(now)
            .can_buy_package(self.variant, self.is_premium_active(now))
    }

    pub fn status(&self, now: DateTime<Utc>) -> EntitlementStatus {
        let active = self.is_premium_active(now);
        let quota = self.quota_view(now);
        EntitlementStatus {
            profile_id: self.profile_id,
            variant: self.variant,
            is_premium_active: active,
            is_promoted: self.is_promoted(now),
            trial_tested: self.trial_tested,
            premium_valid_until: self.subscription.valid_until,
            promotion_valid_until: self.promotion.valid_until,
            limit: quota.limit(self.variant, active),
            used: quota.used(active),
            left: quota.left(self.variant, active),
            can_buy_package: quota.can_buy_package(self.variant, active).is_ok(),
            next_pool_reset_at: active.then(|| quota.next_pool_reset_at(self.variant)),
        }
    }
}
