use thiserror::Error;
use uuid::Uuid;

use crate::profiles::ProfileVariant;
use crate::store::StoreError;

/// key: premium-policy-errors -> rejected, never retried
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("You have already tested the premium product.")]
    AlreadyTrialed,
    #[error("Trial cannot be activated while premium is active.")]
    TrialWhileActive,
    #[error("Players cannot buy inquiry packages.")]
    PlayersCannotBuyPackages,
    #[error("You have no inquiries left.")]
    NoInquiriesLeft,
    #[error("You need to use all inquiries before buying new ones.")]
    MustExhaustFirst,
    #[error("Score recalculation is not available for {0:?} profiles.")]
    NotAvailableForVariant(ProfileVariant),
    #[error("Score recalculation is not awaiting approval.")]
    TicketNotAwaitingApproval,
    #[error("Product {product} is not available for {variant:?} profiles.")]
    ProductNotForVariant {
        product: String,
        variant: ProfileVariant,
    },
    #[error("period must be a positive number of days, got {0}")]
    InvalidPeriod(i64),
}

#[derive(Debug, Error)]
pub enum PremiumError {
    #[error(transparent)]
    Policy(#[from] PolicyError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("no entitlement bundle for profile {0}")]
    BundleNotFound(Uuid),
    #[error("entitlement bundle for profile {0} already exists")]
    BundleExists(Uuid),
    #[error("entitlement bundle for profile {0} kept changing; gave up after {1} attempts")]
    Contended(Uuid, usize),
}
