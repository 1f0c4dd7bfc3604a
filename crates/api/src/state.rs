//! Application state

use sqlx::PgPool;

use genpire_billing::{BillingService, PayPalConfig, PolarConfig};

use crate::{auth::JwtValidator, config::Config};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub billing: BillingService,
    pub jwt_validator: JwtValidator,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> Self {
        let billing = BillingService::new(
            pool.clone(),
            PolarConfig {
                access_token: config.polar_access_token.clone(),
                server: config.polar_server.clone(),
                base_url: None,
            },
            PayPalConfig {
                client_id: config.paypal_client_id.clone(),
                client_secret: config.paypal_client_secret.clone(),
                api_base_url: config.paypal_api_base_url.clone(),
            },
            config.polar_webhook_secret.clone(),
        );
        let jwt_validator = JwtValidator::new(&config.supabase_jwt_secret);

        Self {
            pool,
            config,
            billing,
            jwt_validator,
        }
    }
}
