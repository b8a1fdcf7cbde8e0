use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Postgres};
use uuid::Uuid;

use super::{EntitlementStore, StoreError};
use crate::payments::models::{
    PaymentDiscrepancy, Transaction, TransactionResolution, TransactionStatus,
};
use crate::premium::{EntitlementBundle, QuotaAccounting, ScoreTicket, ValidityWindow};
use crate::profiles::ProfileVariant;

const WINDOW_PREMIUM: &str = "premium";
const WINDOW_PROMOTION: &str = "promotion";

const BUNDLE_SELECT: &str = r#"
SELECT b.profile_id, b.user_id, b.variant, b.trial_tested, b.premium_observed_active, b.version,
       s.valid_since AS sub_valid_since, s.valid_until AS sub_valid_until, s.period_days AS sub_period_days,
       p.valid_since AS promo_valid_since, p.valid_until AS promo_valid_until, p.period_days AS promo_period_days,
       q.freemium_used, q.freemium_capacity, q.premium_used, q.counter_updated_at,
       t.old_value AS ticket_old_value, t.new_value AS ticket_new_value, t.approved_by AS ticket_approved_by,
       t.awaiting_approval AS ticket_awaiting_approval, t.created_at AS ticket_created_at, t.updated_at AS ticket_updated_at
FROM entitlement_bundles b
JOIN entitlement_windows s ON s.profile_id = b.profile_id AND s.kind = 'premium'
JOIN entitlement_windows p ON p.profile_id = b.profile_id AND p.kind = 'promotion'
JOIN quota_accounting q ON q.profile_id = b.profile_id
LEFT JOIN score_tickets t ON t.profile_id = b.profile_id
"#;

const TRANSACTION_COLUMNS: &str = "id, user_id, profile_id, product_id, status, error, validation_errors, amount_minor, description, provider_reference, redirect_url, raw_create_response, raw_resolve_response, created_at, updated_at";

const RESOLVE_PENDING: &str = "UPDATE payment_transactions SET status = $2, error = $3, validation_errors = $4, raw_resolve_response = $5, updated_at = $6 \
     WHERE id = $1 AND status = 'PENDING' RETURNING id, user_id, profile_id, product_id, status, error, validation_errors, amount_minor, description, provider_reference, redirect_url, raw_create_response, raw_resolve_response, created_at, updated_at";

/// key: postgres-entitlement-store
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Conditionally bump the bundle row. `None` means the stored version moved.
    async fn bump_version(
        tx: &mut sqlx::Transaction<'_, Postgres>,
        bundle: &EntitlementBundle,
    ) -> Result<Option<i64>, StoreError> {
        let version: Option<i64> = sqlx::query_scalar(
            "UPDATE entitlement_bundles SET trial_tested = $2, premium_observed_active = $3, version = version + 1, updated_at = NOW() \
             WHERE profile_id = $1 AND version = $4 RETURNING version",
        )
        .bind(bundle.profile_id)
        .bind(bundle.trial_tested)
        .bind(bundle.premium_observed_active)
        .bind(bundle.version)
        .fetch_optional(&mut *tx)
        .await?;
        Ok(version)
    }

    async fn write_children(
        tx: &mut sqlx::Transaction<'_, Postgres>,
        bundle: &EntitlementBundle,
    ) -> Result<(), StoreError> {
        for (kind, window) in [
            (WINDOW_PREMIUM, &bundle.subscription),
            (WINDOW_PROMOTION, &bundle.promotion),
        ] {
            sqlx::query(
                "INSERT INTO entitlement_windows(profile_id, kind, valid_since, valid_until, period_days) VALUES($1,$2,$3,$4,$5) \
                 ON CONFLICT (profile_id, kind) DO UPDATE SET valid_since = EXCLUDED.valid_since, valid_until = EXCLUDED.valid_until, period_days = EXCLUDED.period_days",
            )
            .bind(bundle.profile_id)
            .bind(kind)
            .bind(window.valid_since)
            .bind(window.valid_until)
            .bind(window.period_days)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            "INSERT INTO quota_accounting(profile_id, user_id, freemium_used, freemium_capacity, premium_used, counter_updated_at) VALUES($1,$2,$3,$4,$5,$6) \
             ON CONFLICT (profile_id) DO UPDATE SET freemium_used = EXCLUDED.freemium_used, freemium_capacity = EXCLUDED.freemium_capacity, premium_used = EXCLUDED.premium_used, counter_updated_at = EXCLUDED.counter_updated_at",
        )
        .bind(bundle.profile_id)
        .bind(bundle.quota.user_id)
        .bind(bundle.quota.freemium_used)
        .bind(bundle.quota.freemium_capacity)
        .bind(bundle.quota.premium_used)
        .bind(bundle.quota.counter_updated_at)
        .execute(&mut *tx)
        .await?;

        if let Some(ticket) = &bundle.score_ticket {
            sqlx::query(
                "INSERT INTO score_tickets(profile_id, old_value, new_value, approved_by, awaiting_approval, created_at, updated_at) VALUES($1,$2,$3,$4,$5,$6,$7) \
                 ON CONFLICT (profile_id) DO UPDATE SET old_value = EXCLUDED.old_value, new_value = EXCLUDED.new_value, approved_by = EXCLUDED.approved_by, awaiting_approval = EXCLUDED.awaiting_approval, created_at = EXCLUDED.created_at, updated_at = EXCLUDED.updated_at",
            )
            .bind(bundle.profile_id)
            .bind(ticket.old_value)
            .bind(ticket.new_value)
            .bind(ticket.approved_by)
            .bind(ticket.awaiting_approval)
            .bind(ticket.created_at)
            .bind(ticket.updated_at)
            .execute(&mut *tx)
            .await?;
        }

        Ok(())
    }
}

#[async_trait]
impl EntitlementStore for PgStore {
    async fn insert_bundle(&self, bundle: &EntitlementBundle) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        let inserted = sqlx::query(
            "INSERT INTO entitlement_bundles(profile_id, user_id, variant, trial_tested, premium_observed_active, version, created_at, updated_at) \
             VALUES($1,$2,$3,$4,$5,$6,NOW(),NOW()) ON CONFLICT DO NOTHING",
        )
        .bind(bundle.profile_id)
        .bind(bundle.user_id)
        .bind(bundle.variant.as_str())
        .bind(bundle.trial_tested)
        .bind(bundle.premium_observed_active)
        .bind(bundle.version)
        .execute(&mut *tx)
        .await?;
        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(StoreError::Duplicate(bundle.profile_id));
        }

        Self::write_children(&mut tx, bundle).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn load_bundle(&self, profile_id: Uuid) -> Result<Option<EntitlementBundle>, StoreError> {
        let row = sqlx::query_as::<_, BundleRow>(&format!("{BUNDLE_SELECT} WHERE b.profile_id = $1"))
            .bind(profile_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(EntitlementBundle::try_from).transpose()
    }

    async fn load_bundle_for_user(
        &self,
        user_id: i32,
    ) -> Result<Option<EntitlementBundle>, StoreError> {
        let row = sqlx::query_as::<_, BundleRow>(&format!("{BUNDLE_SELECT} WHERE b.user_id = $1"))
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(EntitlementBundle::try_from).transpose()
    }

    async fn save_bundle(&self, bundle: &EntitlementBundle) -> Result<i64, StoreError> {
        let mut tx = self.pool.begin().await?;
        let Some(version) = Self::bump_version(&mut tx, bundle).await? else {
            tx.rollback().await?;
            return Err(StoreError::Conflict(bundle.profile_id));
        };

        Self::write_children(&mut tx, bundle).await?;
        tx.commit().await?;
        Ok(version)
    }

    async fn bundles_awaiting_expiry(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>, StoreError> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            "SELECT b.profile_id FROM entitlement_bundles b \
             JOIN entitlement_windows w ON w.profile_id = b.profile_id AND w.kind = 'premium' \
             WHERE b.premium_observed_active AND (w.valid_until IS NULL OR w.valid_until <= $1)",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn bundles_with_pending_tickets(&self) -> Result<Vec<Uuid>, StoreError> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            "SELECT profile_id FROM score_tickets WHERE awaiting_approval ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn insert_transaction(&self, transaction: &Transaction) -> Result<(), StoreError> {
        let inserted = sqlx::query(&format!(
            "INSERT INTO payment_transactions({TRANSACTION_COLUMNS}) VALUES($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15) ON CONFLICT DO NOTHING"
        ))
        .bind(transaction.id)
        .bind(transaction.user_id)
        .bind(transaction.profile_id)
        .bind(transaction.product_id)
        .bind(transaction.status.as_str())
        .bind(transaction.error.as_str())
        .bind(&transaction.validation_errors)
        .bind(transaction.amount_minor)
        .bind(&transaction.description)
        .bind(&transaction.provider_reference)
        .bind(&transaction.redirect_url)
        .bind(&transaction.raw_create_response)
        .bind(&transaction.raw_resolve_response)
        .bind(transaction.created_at)
        .bind(transaction.updated_at)
        .execute(&self.pool)
        .await?;
        if inserted.rows_affected() == 0 {
            return Err(StoreError::Duplicate(transaction.id));
        }
        Ok(())
    }

    async fn load_transaction(&self, id: Uuid) -> Result<Option<Transaction>, StoreError> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM payment_transactions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Transaction::try_from).transpose()
    }

    async fn resolve_transaction(
        &self,
        id: Uuid,
        resolution: &TransactionResolution,
    ) -> Result<Option<Transaction>, StoreError> {
        let row = resolve_pending(id, resolution)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Transaction::try_from).transpose()
    }

    async fn settle_success(
        &self,
        id: Uuid,
        resolution: &TransactionResolution,
        bundle: &EntitlementBundle,
    ) -> Result<Option<Transaction>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let Some(row) = resolve_pending(id, resolution)
            .fetch_optional(&mut *tx)
            .await?
        else {
            tx.rollback().await?;
            return Ok(None);
        };
        if Self::bump_version(&mut tx, bundle).await?.is_none() {
            tx.rollback().await?;
            return Err(StoreError::Conflict(bundle.profile_id));
        }

        Self::write_children(&mut tx, bundle).await?;
        tx.commit().await?;
        Transaction::try_from(row).map(Some)
    }

    async fn stale_transactions(
        &self,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, StoreError> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            "SELECT id FROM payment_transactions WHERE status = 'PENDING' AND created_at < $1 ORDER BY created_at",
        )
        .bind(created_before)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn transactions_for_user(&self, user_id: i32) -> Result<Vec<Transaction>, StoreError> {
        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM payment_transactions WHERE user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Transaction::try_from).collect()
    }
}

/// Guarded PENDING to terminal update, shared by plain resolution and settling.
fn resolve_pending(
    id: Uuid,
    resolution: &TransactionResolution,
) -> sqlx::query::QueryAs<'static, Postgres, TransactionRow, sqlx::postgres::PgArguments> {
    sqlx::query_as::<_, TransactionRow>(RESOLVE_PENDING)
        .bind(id)
        .bind(resolution.status.as_str())
        .bind(resolution.error.as_str())
        .bind(resolution.validation_errors.clone())
        .bind(resolution.raw_resolve_response.clone())
        .bind(resolution.resolved_at)
}

#[derive(sqlx::FromRow)]
struct BundleRow {
    pub profile_id: Uuid,
    pub user_id: i32,
    pub variant: String,
    pub trial_tested: bool,
    pub premium_observed_active: bool,
    pub version: i64,
    pub sub_valid_since: DateTime<Utc>,
    pub sub_valid_until: Option<DateTime<Utc>>,
    pub sub_period_days: i64,
    pub promo_valid_since: DateTime<Utc>,
    pub promo_valid_until: Option<DateTime<Utc>>,
    pub promo_period_days: i64,
    pub freemium_used: i64,
    pub freemium_capacity: i64,
    pub premium_used: i64,
    pub counter_updated_at: DateTime<Utc>,
    pub ticket_old_value: Option<i64>,
    pub ticket_new_value: Option<i64>,
    pub ticket_approved_by: Option<i32>,
    pub ticket_awaiting_approval: Option<bool>,
    pub ticket_created_at: Option<DateTime<Utc>>,
    pub ticket_updated_at: Option<DateTime<Utc>>,
}

impl TryFrom<BundleRow> for EntitlementBundle {
    type Error = StoreError;

    fn try_from(row: BundleRow) -> Result<Self, Self::Error> {
        let variant = ProfileVariant::parse(&row.variant).ok_or_else(|| {
            StoreError::Corrupt(format!("unknown profile variant `{}`", row.variant))
        })?;
        let score_ticket = match (
            row.ticket_awaiting_approval,
            row.ticket_created_at,
            row.ticket_updated_at,
        ) {
            (Some(awaiting_approval), Some(created_at), Some(updated_at)) => Some(ScoreTicket {
                old_value: row.ticket_old_value,
                new_value: row.ticket_new_value,
                approved_by: row.ticket_approved_by,
                awaiting_approval,
                created_at,
                updated_at,
            }),
            _ => None,
        };

        Ok(Self {
            profile_id: row.profile_id,
            user_id: row.user_id,
            variant,
            trial_tested: row.trial_tested,
            premium_observed_active: row.premium_observed_active,
            subscription: ValidityWindow {
                valid_since: row.sub_valid_since,
                valid_until: row.sub_valid_until,
                period_days: row.sub_period_days,
            },
            promotion: ValidityWindow {
                valid_since: row.promo_valid_since,
                valid_until: row.promo_valid_until,
                period_days: row.promo_period_days,
            },
            score_ticket,
            quota: QuotaAccounting {
                user_id: row.user_id,
                freemium_used: row.freemium_used,
                freemium_capacity: row.freemium_capacity,
                premium_used: row.premium_used,
                counter_updated_at: row.counter_updated_at,
            },
            version: row.version,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TransactionRow {
    pub id: Uuid,
    pub user_id: i32,
    pub profile_id: Uuid,
    pub product_id: i32,
    pub status: String,
    pub error: String,
    pub validation_errors: Vec<String>,
    pub amount_minor: i64,
    pub description: String,
    pub provider_reference: Option<String>,
    pub redirect_url: Option<String>,
    pub raw_create_response: Option<Value>,
    pub raw_resolve_response: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = StoreError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        let status = TransactionStatus::parse(&row.status).ok_or_else(|| {
            StoreError::Corrupt(format!("unknown transaction status `{}`", row.status))
        })?;
        let error = PaymentDiscrepancy::parse(&row.error).ok_or_else(|| {
            StoreError::Corrupt(format!("unknown payment discrepancy `{}`", row.error))
        })?;

        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            profile_id: row.profile_id,
            product_id: row.product_id,
            status,
            error,
            validation_errors: row.validation_errors,
            amount_minor: row.amount_minor,
            description: row.description,
            provider_reference: row.provider_reference,
            redirect_url: row.redirect_url,
            raw_create_response: row.raw_create_response,
            raw_resolve_response: row.raw_resolve_response,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
