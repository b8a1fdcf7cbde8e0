use axum::{
    extract::{Extension, Form, Path, Query},
    Json,
};
use chrono::Utc;
use serde::Deserialize;

use super::models::{Transaction, TransactionTicket};
use super::provider::ProviderNotification;
use super::service::{PaymentError, PaymentService, Purchaser};
use crate::error::AppResult;
use crate::extractor::AuthUser;
use crate::premium::api::require_profile;
use crate::premium::PremiumService;
use crate::products::{Product, ProductReference};

/// Acknowledgement body the provider expects from the notification endpoint.
pub const NOTIFICATION_ACK: &str = "TRUE";

#[derive(Debug, Deserialize)]
pub struct ProductQuery {
    #[serde(default)]
    pub reference: Option<ProductReference>,
}

/// key: payments-api -> rest endpoints
pub async fn list_products(
    Extension(payments): Extension<PaymentService>,
    Extension(premium): Extension<PremiumService>,
    user: AuthUser,
    Query(query): Query<ProductQuery>,
) -> AppResult<Json<Vec<Product>>> {
    let variant = match user.profile_id {
        Some(profile_id) => Some(premium.bundle(profile_id).await?.variant),
        None => None,
    };
    Ok(Json(payments.products(query.reference, variant)))
}

pub async fn create_transaction(
    Extension(payments): Extension<PaymentService>,
    user: AuthUser,
    Path(product_id): Path<i32>,
) -> AppResult<Json<TransactionTicket>> {
    let profile_id = require_profile(&user)?;
    let purchaser = Purchaser {
        user_id: user.user_id,
        profile_id,
        is_staff: user.is_staff(),
        email: user.email.clone().unwrap_or_default(),
        name: user.name.clone().unwrap_or_default(),
    };
    let ticket = payments
        .create_transaction(&purchaser, product_id, Utc::now())
        .await?;
    Ok(Json(ticket))
}

pub async fn list_transactions(
    Extension(payments): Extension<PaymentService>,
    user: AuthUser,
) -> AppResult<Json<Vec<Transaction>>> {
    Ok(Json(payments.transactions_for_user(user.user_id).await?))
}

/// Provider callback. Always acknowledged; outcomes land on the transaction
/// and in the logs.
pub async fn tpay_notification(
    Extension(payments): Extension<PaymentService>,
    Form(notification): Form<ProviderNotification>,
) -> &'static str {
    match payments.resolve(&notification, Utc::now()).await {
        Ok(outcome) => tracing::info!(
            transaction_id = %outcome.transaction_id,
            status = outcome.status.as_str(),
            applied = outcome.applied,
            "provider notification handled"
        ),
        Err(PaymentError::TransactionNotFound(correlation_id)) => tracing::error!(
            %correlation_id,
            "provider notification for unknown transaction"
        ),
        Err(err) => tracing::error!(
            ?err,
            correlation_id = %notification.tr_crc,
            "provider notification could not be handled"
        ),
    }
    NOTIFICATION_ACK
}
