//! PayPal API client
//!
//! Cancellation goes through the Billing Subscriptions API: an OAuth
//! client-credentials token, then a cancel call that returns 204 with no
//! body. PayPal never reports a period end, so callers always fall back
//! to local period math.

use async_trait::async_trait;
use genpire_shared::ProviderKind;
use serde::Deserialize;
use time::OffsetDateTime;

use crate::error::{BillingError, BillingResult};
use crate::providers::{provider_error, ProviderAdapter};

/// PayPal API configuration
#[derive(Debug, Clone)]
pub struct PayPalConfig {
    pub client_id: String,
    pub client_secret: String,
    /// e.g. https://api-m.sandbox.paypal.com or https://api-m.paypal.com
    pub api_base_url: String,
}

#[derive(Debug, Deserialize)]
struct OAuthTokenResponse {
    access_token: String,
}

pub struct PayPalClient {
    config: PayPalConfig,
    client: reqwest::Client,
}

impl PayPalClient {
    pub fn new(config: PayPalConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn api_base(&self) -> &str {
        self.config.api_base_url.trim_end_matches('/')
    }

    /// Fetch a short-lived access token. Tokens are not cached; the
    /// billing service makes at most one PayPal call per user action.
    async fn access_token(&self) -> BillingResult<String> {
        let url = format!("{}/v1/oauth2/token", self.api_base());
        let response = self
            .client
            .post(&url)
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(provider_error("paypal", "oauth_token", response).await);
        }

        let token: OAuthTokenResponse = response.json().await?;
        Ok(token.access_token)
    }
}

#[async_trait]
impl ProviderAdapter for PayPalClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Paypal
    }

    /// POST /v1/billing/subscriptions/{id}/cancel. Success is 204 No
    /// Content, so there is no period end to return.
    async fn cancel_subscription(
        &self,
        subscription_id: &str,
        reason: Option<&str>,
    ) -> BillingResult<Option<OffsetDateTime>> {
        let token = self.access_token().await?;

        let url = format!(
            "{}/v1/billing/subscriptions/{}/cancel",
            self.api_base(),
            subscription_id
        );

        // PayPal requires a reason string in the cancel body
        let body = serde_json::json!({
            "reason": reason.unwrap_or("Customer-requested cancellation"),
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(BillingError::SubscriptionNotFound(
                subscription_id.to_string(),
            ));
        }
        if !response.status().is_success() {
            return Err(provider_error("paypal", "cancel_subscription", response).await);
        }

        tracing::info!(
            subscription_id = %subscription_id,
            "PayPal subscription canceled"
        );

        Ok(None)
    }
}
