// API server clippy configuration
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Genpire Billing API Server
//!
//! Serves the credit ledger: balance summaries, subscription
//! cancellation, PayPal purchase recording and the Polar webhook.

mod auth;
mod config;
mod error;
mod routes;
mod state;

use std::net::SocketAddr;

use axum::http::{header, Method};
use genpire_shared::create_pool;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::{config::Config, routes::create_router, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,genpire_api=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        "Starting Genpire Billing API v{}",
        env!("CARGO_PKG_VERSION")
    );

    let config = Config::from_env()?;
    tracing::info!("Configuration loaded");

    tracing::info!("Connecting to database...");
    let pool = create_pool(&config.database_url).await?;
    tracing::info!("Database connection established");

    // Run migrations over the direct URL when set; PgBouncer does not
    // support the prepared statements the migrator uses
    let migration_url = config
        .database_direct_url
        .as_ref()
        .unwrap_or(&config.database_url);
    let migration_pool = genpire_shared::create_migration_pool(migration_url).await?;
    genpire_shared::run_migrations(&migration_pool).await?;
    migration_pool.close().await;
    tracing::info!("Database migrations applied");

    let state = AppState::new(pool, config.clone());

    // Explicit origin allowlist; production sets ALLOWED_ORIGINS
    let allowed_origins: Vec<axum::http::HeaderValue> = std::env::var("ALLOWED_ORIGINS")
        .unwrap_or_else(|_| "http://localhost:3000,http://127.0.0.1:3000".to_string())
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect();

    tracing::info!(
        allowed_origins = ?allowed_origins,
        "CORS configured with {} allowed origins",
        allowed_origins.len()
    );

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed_origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
        .allow_credentials(true);

    let app = create_router(state).layer(cors).layer(TraceLayer::new_for_http());

    let addr: SocketAddr = config.bind_address.parse()?;
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
