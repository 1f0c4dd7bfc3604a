//! Notification Outbox Processor
//!
//! Delivers confirmation e-mails enqueued by the billing transactions.
//! Claims are bounded and retried with a backoff enforced by the claim
//! query itself.

use genpire_billing::{
    BillingEmailService, NotificationOutbox, PendingNotification, CANCELLATION_CONFIRMATION,
    PURCHASE_CONFIRMATION,
};
use genpire_shared::{MembershipTier, PlanType};
use tracing::{error, info, warn};

/// Process due notifications from the outbox
pub async fn process_outbox(outbox: &NotificationOutbox, email: &BillingEmailService) {
    let pending = match outbox.claim_due(10).await {
        Ok(p) => p,
        Err(e) => {
            error!(error = %e, "Failed to claim notifications from outbox");
            return;
        }
    };

    if pending.is_empty() {
        return; // No work to do
    }

    info!(count = pending.len(), "Processing notifications from outbox");

    for notification in pending {
        let result = deliver(email, &notification).await;

        match result {
            Ok(true) => {
                if let Err(e) = outbox.mark_sent(notification.id).await {
                    error!(
                        notification_id = %notification.id,
                        error = %e,
                        "Failed to mark notification as sent"
                    );
                }
                info!(
                    notification_id = %notification.id,
                    notification_type = %notification.notification_type,
                    "Notification delivered"
                );
            }
            Ok(false) | Err(_) => {
                let error_msg = match result {
                    Err(e) => e.to_string(),
                    _ => "send returned non-success".to_string(),
                };
                if let Err(e) = outbox.mark_failed(notification.id, &error_msg).await {
                    error!(
                        notification_id = %notification.id,
                        error = %e,
                        "Failed to mark notification as failed"
                    );
                }
                if notification.attempts >= notification.max_attempts {
                    error!(
                        notification_id = %notification.id,
                        notification_type = %notification.notification_type,
                        attempts = notification.attempts,
                        error = %error_msg,
                        "Notification permanently failed after max retries"
                    );
                } else {
                    warn!(
                        notification_id = %notification.id,
                        attempts = notification.attempts,
                        max_attempts = notification.max_attempts,
                        error = %error_msg,
                        "Notification delivery failed, will retry"
                    );
                }
            }
        }
    }
}

/// Render and send one notification
async fn deliver(
    email: &BillingEmailService,
    notification: &PendingNotification,
) -> anyhow::Result<bool> {
    match notification.notification_type.as_str() {
        PURCHASE_CONFIRMATION => {
            let to = str_field(&notification.payload, "email")?;
            let membership: MembershipTier = str_field(&notification.payload, "membership")?
                .parse()
                .map_err(anyhow::Error::msg)?;
            let plan_type: PlanType = str_field(&notification.payload, "plan_type")?
                .parse()
                .map_err(anyhow::Error::msg)?;
            let credits = notification
                .payload
                .get("credits")
                .and_then(|v| v.as_i64())
                .unwrap_or(0);
            let expires_at = notification
                .payload
                .get("expires_at")
                .and_then(|v| v.as_i64())
                .and_then(|ts| time::OffsetDateTime::from_unix_timestamp(ts).ok())
                .map(|t| t.date().to_string())
                .unwrap_or_else(|| "the end of your billing period".to_string());

            let sent = email
                .send_purchase_confirmation(&to, membership, plan_type, credits, &expires_at)
                .await?;
            Ok(sent)
        }
        CANCELLATION_CONFIRMATION => {
            let to = str_field(&notification.payload, "email")?;
            let end_date = notification
                .payload
                .get("end_date")
                .and_then(|v| v.as_i64())
                .and_then(|ts| time::OffsetDateTime::from_unix_timestamp(ts).ok())
                .map(|t| t.date().to_string())
                .unwrap_or_else(|| "the end of your billing period".to_string());

            let sent = email.send_cancellation_confirmation(&to, &end_date).await?;
            Ok(sent)
        }
        other => {
            // Unknown types are not retried
            warn!(notification_type = %other, "Unknown notification type, dropping");
            Ok(true)
        }
    }
}

fn str_field(payload: &serde_json::Value, key: &str) -> anyhow::Result<String> {
    payload
        .get(key)
        .and_then(|v| v.as_str())
        .map(String::from)
        .ok_or_else(|| anyhow::anyhow!("notification payload missing '{key}'"))
}
