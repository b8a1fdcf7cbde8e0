use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::error::PolicyError;

/// key: premium-window -> validity period shared by subscription and promotion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidityWindow {
    pub valid_since: DateTime<Utc>,
    pub valid_until: Option<DateTime<Utc>>,
    pub period_days: i64,
}

impl ValidityWindow {
    /// A window that has never been set up.
    pub fn inactive(now: DateTime<Utc>) -> Self {
        Self {
            valid_since: now,
            valid_until: None,
            period_days: 0,
        }
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        matches!(self.valid_until, Some(until) if until > now)
    }

    /// Restart an inactive window at `now`, or concatenate `period_days` onto the
    /// current end of an active one.
    pub fn setup(&mut self, period_days: i64, now: DateTime<Utc>) -> Result<(), PolicyError> {
        if period_days <= 0 {
            return Err(PolicyError::InvalidPeriod(period_days));
        }
        let period = Duration::days(period_days);
        match self.valid_until {
            Some(until) if until > now => {
                self.valid_until = Some(until + period);
            }
            _ => {
                self.valid_since = now;
                self.valid_until = Some(now + period);
            }
        }
        self.period_days = period_days;
        Ok(())
    }

    pub fn days_left(&self, now: DateTime<Utc>) -> i64 {
        match self.valid_until {
            Some(until) if until > now => (until - now).num_days(),
            _ => 0,
        }
    }
}
