//! Subscription cancellation and PayPal purchase recording

use axum::{
    extract::{Extension, State},
    Json,
};
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;

use genpire_billing::NewPurchase;
use genpire_shared::{MembershipTier, PlanType, ProviderKind, UserId};

use crate::{auth::AuthUser, error::ApiError, error::ApiResult, state::AppState};

/// Request to cancel a subscription
#[derive(Debug, Deserialize)]
pub struct CancelSubscriptionRequest {
    pub subscription_id: String,
    /// Forwarded to providers that accept a cancellation reason
    pub reason: Option<String>,
}

/// Response from a cancellation
#[derive(Debug, Serialize)]
pub struct CancelSubscriptionResponse {
    pub success: bool,
    /// Access continues until this date
    pub expires_at: String,
    /// Present when the provider cancel succeeded but the local record
    /// update lagged behind
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// POST /api/subscriptions/cancel
pub async fn cancel_subscription(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<CancelSubscriptionRequest>,
) -> ApiResult<Json<CancelSubscriptionResponse>> {
    let outcome = state
        .billing
        .cancellation
        .cancel(
            UserId(auth_user.user_id),
            &req.subscription_id,
            req.reason.as_deref(),
        )
        .await?;

    let expires_at = outcome
        .expires_at
        .format(&Rfc3339)
        .map_err(|_| ApiError::Internal)?;

    Ok(Json(CancelSubscriptionResponse {
        success: true,
        expires_at,
        warning: outcome.warning,
    }))
}

/// Request body from the PayPal client-side approval callback
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaypalSubscriptionRequest {
    #[serde(rename = "subscriptionID")]
    pub subscription_id: String,
    /// Price in cents as charged by PayPal
    pub price: i64,
    pub membership: MembershipTier,
    pub plan_type: PlanType,
}

/// Response from recording a PayPal purchase
#[derive(Debug, Serialize)]
pub struct PaypalSubscriptionResponse {
    pub success: bool,
    pub credits: i64,
}

/// POST /api/paypal-subscription
///
/// Records a purchase after the PayPal buttons flow approves a
/// subscription on the client.
pub async fn record_paypal_subscription(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<PaypalSubscriptionRequest>,
) -> ApiResult<Json<PaypalSubscriptionResponse>> {
    if req.subscription_id.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "subscriptionID must not be empty".to_string(),
        ));
    }

    let outcome = state
        .billing
        .purchases
        .record_purchase(NewPurchase {
            user_id: UserId(auth_user.user_id),
            membership: req.membership,
            plan_type: req.plan_type,
            provider: ProviderKind::Paypal,
            subscription_id: Some(req.subscription_id),
            amount_cents: req.price,
        })
        .await?;

    Ok(Json(PaypalSubscriptionResponse {
        success: true,
        credits: outcome.credits,
    }))
}
