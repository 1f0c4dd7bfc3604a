//! API routes

pub mod credits;
pub mod health;
pub mod subscriptions;
pub mod webhooks;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::{auth::require_auth, state::AppState};

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    // Health check routes (at root level for infrastructure monitoring)
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness));

    // Webhook routes: provider-signed, no user auth
    let webhook_routes = Router::new().route("/api/webhooks/polar", post(webhooks::polar_webhook));

    // Authenticated user routes
    let user_routes = Router::new()
        .route("/api/credits", get(credits::get_credits))
        .route(
            "/api/subscriptions/cancel",
            post(subscriptions::cancel_subscription),
        )
        .route(
            "/api/paypal-subscription",
            post(subscriptions::record_paypal_subscription),
        )
        .layer(middleware::from_fn_with_state(
            state.jwt_validator.clone(),
            require_auth,
        ));

    Router::new()
        .merge(health_routes)
        .merge(webhook_routes)
        .merge(user_routes)
        .with_state(state)
}
