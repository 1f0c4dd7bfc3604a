//! Provider webhook endpoints

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
};

use crate::{error::ApiError, error::ApiResult, state::AppState};

/// POST /api/webhooks/polar
///
/// Body must stay raw for signature verification; parsing happens only
/// after the HMAC check passes.
pub async fn polar_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> ApiResult<StatusCode> {
    let signature = headers
        .get("webhook-signature")
        .and_then(|h| h.to_str().ok())
        .ok_or(ApiError::WebhookSignature)?;

    state.billing.webhooks.handle(&body, signature).await?;

    Ok(StatusCode::OK)
}
