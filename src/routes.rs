use axum::{
    routing::{get, post},
    Extension, Router,
};

use crate::payments::{self, PaymentService};
use crate::premium::{self, PremiumService};

pub fn api_routes() -> Router {
    Router::new()
        .route("/api/premium/status", get(premium::api::get_status))
        .route("/api/premium/trial", post(premium::api::activate_trial))
        .route("/api/premium/inquiries", post(premium::api::record_inquiry))
        .route(
            "/api/premium/inquiries/can-buy",
            get(premium::api::can_buy_package),
        )
        .route("/api/premium/score", get(premium::api::get_score_ticket))
        .route(
            "/api/admin/premium/profiles",
            post(premium::api::register_profile),
        )
        .route(
            "/api/admin/premium/score-tickets",
            get(premium::api::list_pending_score_tickets),
        )
        .route(
            "/api/admin/premium/:profile_id/score",
            post(premium::api::approve_score),
        )
        .route(
            "/api/admin/premium/:profile_id/grant",
            post(premium::api::grant_premium),
        )
        .route("/api/products", get(payments::api::list_products))
        .route("/api/transactions", get(payments::api::list_transactions))
        .route(
            "/api/transactions/:product_id",
            post(payments::api::create_transaction),
        )
        .route(
            "/api/payments/tpay/notification",
            post(payments::api::tpay_notification),
        )
}

/// API routes with the services they depend on attached.
pub fn app(premium: PremiumService, payments: PaymentService) -> Router {
    api_routes()
        .layer(Extension(premium))
        .layer(Extension(payments))
}
