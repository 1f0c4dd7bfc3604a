//! Polar webhook handling
//!
//! Polar confirms checkout completion by webhook; `order.paid` is the
//! purchase signal that feeds the purchase recorder. Signatures are
//! verified manually over the raw body before anything is parsed.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use genpire_shared::{MembershipTier, PlanType, ProviderKind, UserId};

use crate::error::{BillingError, BillingResult};
use crate::purchase::{NewPurchase, PurchaseService};

type HmacSha256 = Hmac<Sha256>;

/// Maximum accepted age of a webhook timestamp, in seconds
const TIMESTAMP_TOLERANCE_SECS: i64 = 300;

/// Verify an HMAC-SHA256 webhook signature of the form
/// `t=<unix>,v1=<hex>` over `"{timestamp}.{payload}"`.
///
/// `now` is passed in so expiry checks are testable.
pub fn verify_signature(
    secret: &str,
    payload: &str,
    signature: &str,
    now: i64,
) -> BillingResult<()> {
    let mut timestamp: Option<i64> = None;
    let mut v1_signature: Option<&str> = None;

    for part in signature.split(',') {
        if let Some((key, value)) = part.split_once('=') {
            match key {
                "t" => timestamp = value.parse().ok(),
                "v1" => v1_signature = Some(value),
                _ => {}
            }
        }
    }

    let timestamp = timestamp.ok_or_else(|| {
        tracing::error!("Missing timestamp in webhook signature header");
        BillingError::WebhookSignatureInvalid
    })?;
    let v1_signature = v1_signature.ok_or_else(|| {
        tracing::error!("Missing v1 signature in webhook signature header");
        BillingError::WebhookSignatureInvalid
    })?;

    if (now - timestamp).abs() > TIMESTAMP_TOLERANCE_SECS {
        tracing::error!(
            timestamp = timestamp,
            now = now,
            "Webhook timestamp outside tolerance"
        );
        return Err(BillingError::WebhookSignatureInvalid);
    }

    let signed_payload = format!("{timestamp}.{payload}");
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| {
        tracing::error!("Invalid webhook secret key");
        BillingError::WebhookSignatureInvalid
    })?;
    mac.update(signed_payload.as_bytes());
    let computed = hex::encode(mac.finalize().into_bytes());

    if computed != v1_signature {
        tracing::error!("Webhook signature mismatch");
        return Err(BillingError::WebhookSignatureInvalid);
    }

    Ok(())
}

#[derive(Debug, Deserialize)]
struct PolarEvent {
    #[serde(rename = "type")]
    event_type: String,
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct PolarOrder {
    amount: i64,
    subscription_id: Option<String>,
    customer: PolarCustomer,
    metadata: PolarOrderMetadata,
}

#[derive(Debug, Deserialize)]
struct PolarCustomer {
    /// Our user id, set at checkout creation time
    external_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PolarOrderMetadata {
    membership: String,
    plan_type: String,
}

/// Verifies and dispatches Polar webhook events
#[derive(Clone)]
pub struct PolarWebhookHandler {
    webhook_secret: String,
    purchases: PurchaseService,
}

impl PolarWebhookHandler {
    pub fn new(webhook_secret: String, purchases: PurchaseService) -> Self {
        Self {
            webhook_secret,
            purchases,
        }
    }

    /// Verify the signature, then route the event. Unhandled event types
    /// are acknowledged so Polar stops redelivering them.
    pub async fn handle(&self, payload: &str, signature: &str) -> BillingResult<()> {
        let now = time::OffsetDateTime::now_utc().unix_timestamp();
        verify_signature(&self.webhook_secret, payload, signature, now)?;

        let event: PolarEvent = serde_json::from_str(payload).map_err(|e| {
            tracing::error!(error = %e, "Failed to parse webhook event JSON");
            BillingError::InvalidInput(format!("malformed webhook payload: {e}"))
        })?;

        match event.event_type.as_str() {
            "order.paid" => self.handle_order_paid(event.data).await,
            other => {
                tracing::debug!(event_type = %other, "Ignoring unhandled webhook event");
                Ok(())
            }
        }
    }

    async fn handle_order_paid(&self, data: serde_json::Value) -> BillingResult<()> {
        let order: PolarOrder = serde_json::from_value(data).map_err(|e| {
            tracing::error!(error = %e, "Failed to parse order.paid payload");
            BillingError::InvalidInput(format!("malformed order payload: {e}"))
        })?;

        let user_id = order
            .customer
            .external_id
            .as_deref()
            .ok_or_else(|| {
                BillingError::InvalidInput("order customer has no external_id".to_string())
            })?
            .parse::<uuid::Uuid>()
            .map_err(|e| BillingError::InvalidInput(format!("invalid external_id: {e}")))?;

        let membership: MembershipTier = order
            .metadata
            .membership
            .parse()
            .map_err(BillingError::InvalidInput)?;
        let plan_type: PlanType = order
            .metadata
            .plan_type
            .parse()
            .map_err(BillingError::InvalidInput)?;

        let outcome = self
            .purchases
            .record_purchase(NewPurchase {
                user_id: UserId(user_id),
                membership,
                plan_type,
                provider: ProviderKind::Polar,
                subscription_id: order.subscription_id,
                amount_cents: order.amount,
            })
            .await?;

        tracing::info!(
            user_id = %user_id,
            record_id = %outcome.record_id,
            credits = outcome.credits,
            "Polar order recorded"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    const SECRET: &str = "polar_whsec_testsecret";

    fn sign(payload: &str, timestamp: i64) -> String {
        let mut mac = HmacSha256::new_from_slice(SECRET.as_bytes()).unwrap();
        mac.update(format!("{timestamp}.{payload}").as_bytes());
        let sig = hex::encode(mac.finalize().into_bytes());
        format!("t={timestamp},v1={sig}")
    }

    #[test]
    fn test_valid_signature_passes() {
        let payload = r#"{"type":"order.paid"}"#;
        let now = 1_700_000_000;
        let header = sign(payload, now);
        assert!(verify_signature(SECRET, payload, &header, now).is_ok());
    }

    #[test]
    fn test_tampered_payload_is_rejected() {
        let now = 1_700_000_000;
        let header = sign(r#"{"type":"order.paid"}"#, now);
        let err = verify_signature(SECRET, r#"{"type":"order.refunded"}"#, &header, now)
            .unwrap_err();
        assert!(matches!(err, BillingError::WebhookSignatureInvalid));
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let payload = r#"{"type":"order.paid"}"#;
        let now = 1_700_000_000;
        let header = sign(payload, now);
        let err = verify_signature("other_secret", payload, &header, now).unwrap_err();
        assert!(matches!(err, BillingError::WebhookSignatureInvalid));
    }

    #[test]
    fn test_stale_timestamp_is_rejected() {
        let payload = r#"{"type":"order.paid"}"#;
        let signed_at = 1_700_000_000;
        let header = sign(payload, signed_at);
        let err = verify_signature(
            SECRET,
            payload,
            &header,
            signed_at + TIMESTAMP_TOLERANCE_SECS + 1,
        )
        .unwrap_err();
        assert!(matches!(err, BillingError::WebhookSignatureInvalid));
    }

    #[test]
    fn test_malformed_header_is_rejected() {
        let payload = r#"{"type":"order.paid"}"#;
        assert!(verify_signature(SECRET, payload, "v1=abc", 0).is_err());
        assert!(verify_signature(SECRET, payload, "t=123", 0).is_err());
        assert!(verify_signature(SECRET, payload, "", 0).is_err());
    }

    #[test]
    fn test_order_payload_parses() {
        let data: serde_json::Value = serde_json::from_str(
            r#"{
                "amount": 2900,
                "subscription_id": "sub_polar_1",
                "customer": {"external_id": "4f9a7e68-9c1d-4f9e-8d8a-2b7c3a1e5f00"},
                "metadata": {"membership": "pro", "plan_type": "monthly"}
            }"#,
        )
        .unwrap();
        let order: PolarOrder = serde_json::from_value(data).unwrap();
        assert_eq!(order.amount, 2900);
        assert_eq!(order.subscription_id.as_deref(), Some("sub_polar_1"));
        assert_eq!(order.metadata.membership, "pro");
    }
}
