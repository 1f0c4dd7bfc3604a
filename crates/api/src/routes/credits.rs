//! Credits summary endpoint

use axum::{
    extract::{Extension, State},
    Json,
};
use genpire_billing::CreditSummary;
use genpire_shared::UserId;

use crate::{auth::AuthUser, error::ApiResult, state::AppState};

/// GET /api/credits
///
/// The authoritative credits/subscription summary for the authenticated
/// user. Fetching may expire stale zero-balance one-time records as a
/// side effect.
pub async fn get_credits(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<CreditSummary>> {
    let summary = state
        .billing
        .ledger
        .get_summary(UserId(auth_user.user_id))
        .await?;

    Ok(Json(summary))
}
