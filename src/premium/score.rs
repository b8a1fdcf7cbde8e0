use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::PolicyError;

/// key: score-ticket -> player score recalculation approval
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreTicket {
    pub old_value: Option<i64>,
    pub new_value: Option<i64>,
    pub approved_by: Option<i32>,
    pub awaiting_approval: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScoreTicket {
    pub fn open(now: DateTime<Utc>) -> Self {
        Self {
            old_value: None,
            new_value: None,
            approved_by: None,
            awaiting_approval: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn approve(
        &mut self,
        admin_id: i32,
        value: i64,
        now: DateTime<Utc>,
    ) -> Result<(), PolicyError> {
        if !self.awaiting_approval {
            return Err(PolicyError::TicketNotAwaitingApproval);
        }
        self.new_value = Some(value);
        self.approved_by = Some(admin_id);
        self.awaiting_approval = false;
        self.updated_at = now;
        Ok(())
    }

    /// Reopen the ticket for a new premium period, carrying the last approved
    /// value over as the baseline.
    pub fn refresh(&mut self, now: DateTime<Utc>) {
        self.old_value = self.new_value.take();
        self.approved_by = None;
        self.awaiting_approval = true;
        self.created_at = now;
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn approve_then_refresh_carries_value_over() {
        let t0 = Utc.with_ymd_and_hms(2020, 1, 1, 12, 0, 0).single().unwrap();
        let mut ticket = ScoreTicket::open(t0);
        assert!(ticket.awaiting_approval);
        assert_eq!(ticket.old_value, None);

        let approved_at = t0 + Duration::days(41);
        ticket.approve(7, 10, approved_at).unwrap();
        assert!(!ticket.awaiting_approval);
        assert_eq!(ticket.approved_by, Some(7));
        assert_eq!(ticket.new_value, Some(10));
        assert_eq!(ticket.updated_at, approved_at);
        assert_eq!(ticket.created_at, t0);

        let refreshed_at = t0 + Duration::days(45);
        ticket.refresh(refreshed_at);
        assert!(ticket.awaiting_approval);
        assert_eq!(ticket.approved_by, None);
        assert_eq!(ticket.new_value, None);
        assert_eq!(ticket.old_value, Some(10));
        assert_eq!(ticket.created_at, refreshed_at);
    }

    #[test]
    fn approving_twice_is_rejected() {
        let now = Utc::now();
        let mut ticket = ScoreTicket::open(now);
        ticket.approve(1, 55, now).unwrap();
        assert_eq!(
            ticket.approve(2, 60, now),
            Err(PolicyError::TicketNotAwaitingApproval)
        );
        assert_eq!(ticket.new_value, Some(55));
    }
}
