//! Premium entitlements: validity windows, quota accounting, score tickets and
//! the per-profile bundle that ties them together.

pub mod api;
pub mod bundle;
pub mod error;
pub mod quota;
pub mod score;
pub mod service;
pub mod window;

pub use bundle::{
    EntitlementBundle, EntitlementStatus, GrantOutcome, PeriodClass, MONTH_DAYS, QUARTER_DAYS,
    TRIAL_DAYS, YEAR_DAYS,
};
pub use error::{PolicyError, PremiumError};
pub use quota::{IncrementOutcome, QuotaAccounting};
pub use score::ScoreTicket;
pub use service::{NewProfile, PendingScoreTicket, PremiumService, MAX_SAVE_ATTEMPTS};
pub use window::ValidityWindow;
