//! Payment provider adapters
//!
//! Each provider implements [`ProviderAdapter`]; handlers resolve the
//! right adapter through [`ProviderRegistry`] based on the credit
//! record's stored provider, never on caller input.

mod paypal;
mod polar;

pub use paypal::{PayPalClient, PayPalConfig};
pub use polar::{PolarClient, PolarConfig};

use std::sync::Arc;

use async_trait::async_trait;
use genpire_shared::ProviderKind;
use time::OffsetDateTime;

use crate::error::{BillingError, BillingResult};

/// A payment provider the billing service can cancel subscriptions at
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Request cancel-at-period-end for a subscription. `reason` is the
    /// caller-supplied cancellation reason; providers that accept one
    /// forward it.
    ///
    /// Returns the provider-reported end of the current period when the
    /// provider includes one in its response; `None` means the caller
    /// must fall back to local period math.
    async fn cancel_subscription(
        &self,
        subscription_id: &str,
        reason: Option<&str>,
    ) -> BillingResult<Option<OffsetDateTime>>;
}

/// Lookup table from stored provider kind to its adapter
#[derive(Clone)]
pub struct ProviderRegistry {
    polar: Arc<dyn ProviderAdapter>,
    paypal: Arc<dyn ProviderAdapter>,
}

impl ProviderRegistry {
    pub fn new(polar: Arc<dyn ProviderAdapter>, paypal: Arc<dyn ProviderAdapter>) -> Self {
        Self { polar, paypal }
    }

    pub fn get(&self, kind: ProviderKind) -> &dyn ProviderAdapter {
        match kind {
            ProviderKind::Polar => self.polar.as_ref(),
            ProviderKind::Paypal => self.paypal.as_ref(),
        }
    }
}

/// Map a non-success provider response to a `Provider` error with enough
/// context to debug without logging secrets
pub(crate) async fn provider_error(
    provider: &str,
    action: &str,
    response: reqwest::Response,
) -> BillingError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    tracing::error!(
        provider = provider,
        action = action,
        status = %status,
        body = %body,
        "Provider API call failed"
    );
    BillingError::Provider(format!("{provider} {action} failed with status {status}"))
}
