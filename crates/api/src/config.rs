//! Application configuration

use std::env;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub bind_address: String,
    pub app_base_url: String,

    // Database
    pub database_url: String,
    pub database_direct_url: Option<String>,

    // Authentication
    pub supabase_jwt_secret: String,

    // Polar
    pub polar_access_token: String,
    pub polar_server: String,
    pub polar_webhook_secret: String,

    // PayPal
    pub paypal_client_id: String,
    pub paypal_client_secret: String,
    pub paypal_api_base_url: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            // Server
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            app_base_url: env::var("APP_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),

            // Database
            database_url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::Missing("DATABASE_URL"))?,
            database_direct_url: env::var("DATABASE_DIRECT_URL").ok(),

            // Authentication
            supabase_jwt_secret: {
                let secret = env::var("SUPABASE_JWT_SECRET")
                    .map_err(|_| ConfigError::Missing("SUPABASE_JWT_SECRET"))?;
                // Supabase issues 256-bit HS256 secrets; anything shorter
                // was hand-typed and is guessable
                if secret.len() < 32 {
                    return Err(ConfigError::WeakSecret(
                        "SUPABASE_JWT_SECRET must be at least 32 characters",
                    ));
                }
                secret
            },

            // Polar
            polar_access_token: env::var("POLAR_ACCESS_TOKEN").unwrap_or_default(),
            polar_server: env::var("POLAR_SERVER").unwrap_or_else(|_| "production".to_string()),
            polar_webhook_secret: env::var("POLAR_WEBHOOK_SECRET").unwrap_or_default(),

            // PayPal
            paypal_client_id: env::var("PAYPAL_CLIENT_ID").unwrap_or_default(),
            paypal_client_secret: env::var("PAYPAL_CLIENT_SECRET").unwrap_or_default(),
            paypal_api_base_url: env::var("PAYPAL_API_BASE_URL")
                .unwrap_or_else(|_| "https://api-m.paypal.com".to_string()),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Weak secret: {0}")]
    WeakSecret(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Mutex to ensure config tests run serially (they modify shared env vars)
    static CONFIG_TEST_MUTEX: Mutex<()> = Mutex::new(());

    fn setup_minimal_config() {
        env::set_var("DATABASE_URL", "postgres://test");
        env::set_var(
            "SUPABASE_JWT_SECRET",
            "test-supabase-secret-at-least-32-characters",
        );
    }

    fn cleanup_config() {
        env::remove_var("DATABASE_URL");
        env::remove_var("SUPABASE_JWT_SECRET");
    }

    #[test]
    fn test_required_and_weak_secrets() {
        let _lock = CONFIG_TEST_MUTEX.lock().unwrap();

        // Missing DATABASE_URL fails
        cleanup_config();
        env::set_var(
            "SUPABASE_JWT_SECRET",
            "test-supabase-secret-at-least-32-characters",
        );
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Missing("DATABASE_URL"))
        ));

        // Short JWT secret rejected
        setup_minimal_config();
        env::set_var("SUPABASE_JWT_SECRET", "short");
        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::WeakSecret(_))
        ));

        // Valid minimal config accepted with defaults
        setup_minimal_config();
        let config = Config::from_env().unwrap();
        assert_eq!(config.bind_address, "0.0.0.0:3000");
        assert_eq!(config.polar_server, "production");
        assert_eq!(config.paypal_api_base_url, "https://api-m.paypal.com");

        cleanup_config();
    }
}
