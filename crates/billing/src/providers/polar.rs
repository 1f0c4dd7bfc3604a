//! Polar API client
//!
//! Only the subscription-cancellation surface is implemented; checkout
//! and order ingestion happen through Polar's hosted pages and webhooks.

use async_trait::async_trait;
use genpire_shared::ProviderKind;
use serde::Deserialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::error::{BillingError, BillingResult};
use crate::providers::{provider_error, ProviderAdapter};

/// Polar API configuration
#[derive(Debug, Clone)]
pub struct PolarConfig {
    pub access_token: String,
    /// "sandbox" or "production"
    pub server: String,
    /// Override for tests; derived from `server` when `None`
    pub base_url: Option<String>,
}

impl PolarConfig {
    pub fn api_base(&self) -> String {
        if let Some(base) = &self.base_url {
            return base.trim_end_matches('/').to_string();
        }
        if self.server == "sandbox" {
            "https://sandbox-api.polar.sh".to_string()
        } else {
            "https://api.polar.sh".to_string()
        }
    }
}

#[derive(Debug, Deserialize)]
struct PolarSubscription {
    id: String,
    cancel_at_period_end: bool,
    current_period_end: Option<String>,
}

pub struct PolarClient {
    config: PolarConfig,
    client: reqwest::Client,
}

impl PolarClient {
    pub fn new(config: PolarConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ProviderAdapter for PolarClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Polar
    }

    /// PATCH /v1/subscriptions/{id} with cancel_at_period_end=true. The
    /// response carries the current period end, which becomes the local
    /// record's expiry. Polar's endpoint takes no reason field.
    async fn cancel_subscription(
        &self,
        subscription_id: &str,
        _reason: Option<&str>,
    ) -> BillingResult<Option<OffsetDateTime>> {
        let url = format!("{}/v1/subscriptions/{}", self.config.api_base(), subscription_id);

        let body = serde_json::json!({ "cancel_at_period_end": true });

        let response = self
            .client
            .patch(&url)
            .bearer_auth(&self.config.access_token)
            .json(&body)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(BillingError::SubscriptionNotFound(
                subscription_id.to_string(),
            ));
        }
        if !response.status().is_success() {
            return Err(provider_error("polar", "cancel_subscription", response).await);
        }

        let subscription: PolarSubscription = response.json().await?;
        tracing::info!(
            subscription_id = %subscription.id,
            cancel_at_period_end = subscription.cancel_at_period_end,
            "Polar subscription set to cancel at period end"
        );

        let period_end = subscription
            .current_period_end
            .as_deref()
            .map(|raw| {
                OffsetDateTime::parse(raw, &Rfc3339).map_err(|e| {
                    BillingError::Provider(format!("Polar returned unparseable period end: {e}"))
                })
            })
            .transpose()?;

        Ok(period_end)
    }
}
