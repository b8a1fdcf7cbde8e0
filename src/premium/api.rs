use axum::{
    extract::{Extension, Path},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{
    EntitlementStatus, GrantOutcome, IncrementOutcome, NewProfile, PendingScoreTicket,
    PeriodClass, PremiumService, ScoreTicket,
};
use crate::error::{AppError, AppResult};
use crate::extractor::AuthUser;
use crate::profiles::ProfileVariant;

pub(crate) fn require_profile(user: &AuthUser) -> AppResult<Uuid> {
    user.profile_id
        .ok_or_else(|| AppError::BadRequest("No profile selected.".to_string()))
}

fn require_admin(user: &AuthUser) -> AppResult<()> {
    if user.is_admin() {
        Ok(())
    } else {
        Err(AppError::Forbidden("Admin role required.".to_string()))
    }
}

/// key: premium-api -> rest endpoints
pub async fn get_status(
    Extension(premium): Extension<PremiumService>,
    user: AuthUser,
) -> AppResult<Json<EntitlementStatus>> {
    let profile_id = require_profile(&user)?;
    Ok(Json(premium.status(profile_id, Utc::now()).await?))
}

pub async fn activate_trial(
    Extension(premium): Extension<PremiumService>,
    user: AuthUser,
) -> AppResult<Json<GrantOutcome>> {
    let profile_id = require_profile(&user)?;
    Ok(Json(premium.activate_trial(profile_id, Utc::now()).await?))
}

#[derive(Debug, Serialize)]
pub struct InquiryRecorded {
    pub pool: IncrementOutcome,
    pub left: i64,
}

pub async fn record_inquiry(
    Extension(premium): Extension<PremiumService>,
    user: AuthUser,
) -> AppResult<Json<InquiryRecorded>> {
    let profile_id = require_profile(&user)?;
    let now = Utc::now();
    let pool = premium.consume(profile_id, now).await?;
    let left = premium.status(profile_id, now).await?.left;
    Ok(Json(InquiryRecorded { pool, left }))
}

#[derive(Debug, Serialize)]
pub struct PackageEligibility {
    pub can_buy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

pub async fn can_buy_package(
    Extension(premium): Extension<PremiumService>,
    user: AuthUser,
) -> AppResult<Json<PackageEligibility>> {
    let profile_id = require_profile(&user)?;
    let bundle = premium.bundle(profile_id).await?;
    let eligibility = match bundle.can_buy_package(Utc::now()) {
        Ok(()) => PackageEligibility {
            can_buy: true,
            reason: None,
        },
        Err(err) => PackageEligibility {
            can_buy: false,
            reason: Some(err.to_string()),
        },
    };
    Ok(Json(eligibility))
}

pub async fn get_score_ticket(
    Extension(premium): Extension<PremiumService>,
    user: AuthUser,
) -> AppResult<Json<Option<ScoreTicket>>> {
    let profile_id = require_profile(&user)?;
    let bundle = premium.bundle(profile_id).await?;
    Ok(Json(bundle.score_ticket()?.cloned()))
}

pub async fn list_pending_score_tickets(
    Extension(premium): Extension<PremiumService>,
    user: AuthUser,
) -> AppResult<Json<Vec<PendingScoreTicket>>> {
    require_admin(&user)?;
    Ok(Json(premium.pending_score_tickets().await?))
}

#[derive(Debug, Deserialize)]
pub struct ApproveScoreRequest {
    pub value: i64,
}

pub async fn approve_score(
    Extension(premium): Extension<PremiumService>,
    user: AuthUser,
    Path(profile_id): Path<Uuid>,
    Json(payload): Json<ApproveScoreRequest>,
) -> AppResult<Json<ScoreTicket>> {
    require_admin(&user)?;
    let ticket = premium
        .approve_score(profile_id, user.user_id, payload.value, Utc::now())
        .await?;
    Ok(Json(ticket))
}

#[derive(Debug, Deserialize)]
pub struct GrantRequest {
    pub period: PeriodClass,
}

pub async fn grant_premium(
    Extension(premium): Extension<PremiumService>,
    user: AuthUser,
    Path(profile_id): Path<Uuid>,
    Json(payload): Json<GrantRequest>,
) -> AppResult<Json<GrantOutcome>> {
    require_admin(&user)?;
    tracing::info!(admin_id = user.user_id, %profile_id, period = ?payload.period, "manual premium grant");
    Ok(Json(
        premium
            .grant(profile_id, payload.period, Utc::now())
            .await?,
    ))
}

#[derive(Debug, Deserialize)]
pub struct RegisterProfileRequest {
    pub profile_id: Uuid,
    pub user_id: i32,
    pub variant: ProfileVariant,
}

pub async fn register_profile(
    Extension(premium): Extension<PremiumService>,
    user: AuthUser,
    Json(payload): Json<RegisterProfileRequest>,
) -> AppResult<Json<EntitlementStatus>> {
    require_admin(&user)?;
    let now = Utc::now();
    let bundle = premium
        .on_profile_created(
            NewProfile {
                profile_id: payload.profile_id,
                user_id: payload.user_id,
                variant: payload.variant,
            },
            now,
        )
        .await?;
    Ok(Json(bundle.status(now)))
}
