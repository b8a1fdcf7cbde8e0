use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::error::PolicyError;
use crate::profiles::ProfileVariant;

/// key: quota-accounting -> freemium/premium inquiry counters
///
/// `freemium_used` is a lifetime counter that only the expiry reset clears.
/// `premium_used` belongs to the renewable pool that exists while premium is
/// active and rolls over every `pool_reset_days`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaAccounting {
    pub user_id: i32,
    pub freemium_used: i64,
    pub freemium_capacity: i64,
    pub premium_used: i64,
    pub counter_updated_at: DateTime<Utc>,
}

/// Which pool absorbed an inquiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IncrementOutcome {
    Freemium,
    Premium,
    Exhausted,
}

impl QuotaAccounting {
    pub fn new(user_id: i32, variant: ProfileVariant, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            freemium_used: 0,
            freemium_capacity: variant.freemium_base(),
            premium_used: 0,
            counter_updated_at: now,
        }
    }

    /// Capacity bought through packages on top of the variant base.
    pub fn package_bonus(&self, variant: ProfileVariant) -> i64 {
        self.freemium_capacity - variant.freemium_base()
    }

    pub fn limit(&self, variant: ProfileVariant, premium_active: bool) -> i64 {
        if premium_active {
            variant.rules().premium_override + self.package_bonus(variant)
        } else {
            self.freemium_capacity
        }
    }

    pub fn used(&self, premium_active: bool) -> i64 {
        if premium_active {
            self.freemium_used + self.premium_used
        } else {
            self.freemium_used
        }
    }

    pub fn left(&self, variant: ProfileVariant, premium_active: bool) -> i64 {
        self.limit(variant, premium_active) - self.used(premium_active)
    }

    /// Record one inquiry. Never fails: callers check `left` beforehand, and an
    /// exhausted quota simply reports [`IncrementOutcome::Exhausted`].
    pub fn increment(&mut self, premium_active: bool) -> IncrementOutcome {
        if self.freemium_used < self.freemium_capacity {
            self.freemium_used += 1;
            IncrementOutcome::Freemium
        } else if premium_active {
            self.premium_used += 1;
            IncrementOutcome::Premium
        } else {
            IncrementOutcome::Exhausted
        }
    }

    pub fn can_buy_package(
        &self,
        variant: ProfileVariant,
        premium_active: bool,
    ) -> Result<(), PolicyError> {
        if variant.is_player() {
            return Err(PolicyError::PlayersCannotBuyPackages);
        }
        if self.left(variant, premium_active) > 0 {
            return Err(PolicyError::MustExhaustFirst);
        }
        Ok(())
    }

    pub fn add_package(&mut self, bonus_count: i64) {
        self.freemium_capacity += bonus_count;
    }

    /// Called when premium is granted. A fresh premium period starts an empty
    /// pool; extending a running one keeps its counters.
    pub fn refresh(&mut self, was_premium_active: bool, now: DateTime<Utc>) {
        if !was_premium_active {
            self.premium_used = 0;
            self.counter_updated_at = now;
        }
    }

    pub fn next_pool_reset_at(&self, variant: ProfileVariant) -> DateTime<Utc> {
        self.counter_updated_at + Duration::days(variant.rules().pool_reset_days)
    }

    /// Roll the premium pool over once its reset period has elapsed. Returns
    /// whether anything changed.
    pub fn roll_pool(&mut self, variant: ProfileVariant, now: DateTime<Utc>) -> bool {
        let period = Duration::days(variant.rules().pool_reset_days);
        if now < self.counter_updated_at + period {
            return false;
        }
        let elapsed = (now - self.counter_updated_at).num_seconds();
        let periods = elapsed / period.num_seconds();
        self.counter_updated_at = self.counter_updated_at + period * periods as i32;
        self.premium_used = 0;
        true
    }

    /// Expiry reset: drop package bonuses and start over from the variant base.
    pub fn reset_to_base(&mut self, variant: ProfileVariant) -> bool {
        let base = variant.freemium_base();
        let changed =
            self.freemium_capacity != base || self.freemium_used != 0 || self.premium_used != 0;
        self.freemium_capacity = base;
        self.freemium_used = 0;
        self.premium_used = 0;
        changed
    }
}
