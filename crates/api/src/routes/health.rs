//! Health and probe endpoints

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub database: &'static str,
}

async fn database_ok(state: &AppState) -> bool {
    sqlx::query("SELECT 1").execute(&state.pool).await.is_ok()
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let db_ok = database_ok(&state).await;
    let code = if db_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        code,
        Json(HealthResponse {
            status: if db_ok { "healthy" } else { "unhealthy" },
            version: env!("CARGO_PKG_VERSION"),
            database: if db_ok { "reachable" } else { "unreachable" },
        }),
    )
}

/// GET /health/live - returns 200 whenever the process is up
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// GET /health/ready - ready only when the database answers
pub async fn readiness(State(state): State<AppState>) -> StatusCode {
    if database_ok(&state).await {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
