//! Email notifications for billing events
//!
//! Sends transactional emails via the Resend API. Delivery failures are
//! non-fatal; the outbox retries them.

use genpire_shared::{MembershipTier, PlanType};

use crate::error::BillingResult;

/// Email configuration
#[derive(Debug, Clone)]
pub struct EmailConfig {
    /// Resend API key; empty disables sending
    pub resend_api_key: String,
    pub email_from: String,
    pub app_name: String,
    pub dashboard_url: String,
}

impl EmailConfig {
    pub fn from_env() -> Self {
        Self {
            resend_api_key: std::env::var("RESEND_API_KEY").unwrap_or_default(),
            email_from: std::env::var("EMAIL_FROM")
                .unwrap_or_else(|_| "Genpire <noreply@genpire.com>".to_string()),
            app_name: std::env::var("APP_NAME").unwrap_or_else(|_| "Genpire".to_string()),
            dashboard_url: std::env::var("APP_BASE_URL")
                .unwrap_or_else(|_| "https://genpire.com".to_string()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.resend_api_key.is_empty()
    }
}

/// Billing email notification service
#[derive(Clone)]
pub struct BillingEmailService {
    config: EmailConfig,
    client: reqwest::Client,
}

impl BillingEmailService {
    pub fn new(config: EmailConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    pub fn from_env() -> Self {
        Self::new(EmailConfig::from_env())
    }

    pub fn is_enabled(&self) -> bool {
        self.config.is_enabled()
    }

    /// Send an email via Resend.
    ///
    /// Returns `Ok(true)` if sent, `Ok(false)` if sending failed or is
    /// unconfigured. Callers treat `Ok(false)` as retryable.
    async fn send_email(&self, to: &str, subject: &str, html: &str) -> BillingResult<bool> {
        if !self.config.is_enabled() {
            tracing::warn!(
                to = %to,
                subject = %subject,
                "Email not configured, skipping"
            );
            return Ok(false);
        }

        let body = serde_json::json!({
            "from": self.config.email_from,
            "to": [to],
            "subject": subject,
            "html": html
        });

        let response = self
            .client
            .post("https://api.resend.com/emails")
            .header(
                "Authorization",
                format!("Bearer {}", self.config.resend_api_key),
            )
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                tracing::info!(to = %to, subject = %subject, "Billing email sent");
                Ok(true)
            }
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                tracing::error!(
                    to = %to,
                    subject = %subject,
                    status = %status,
                    body = %body,
                    "Failed to send billing email - non-fatal"
                );
                Ok(false)
            }
            Err(e) => {
                tracing::error!(
                    to = %to,
                    subject = %subject,
                    error = %e,
                    "Failed to send billing email - non-fatal"
                );
                Ok(false)
            }
        }
    }

    /// Send the tier-specific purchase confirmation
    pub async fn send_purchase_confirmation(
        &self,
        to: &str,
        membership: MembershipTier,
        plan_type: PlanType,
        credits: i64,
        expires_at: &str,
    ) -> BillingResult<bool> {
        let dashboard_link = format!("{}/dashboard", self.config.dashboard_url);
        let tier_display = match membership {
            MembershipTier::Saver => "Saver",
            MembershipTier::Pro => "Pro",
            MembershipTier::Super => "Super",
        };
        let cadence = match plan_type {
            PlanType::Monthly => "monthly plan",
            PlanType::Yearly => "yearly plan",
            PlanType::OneTime => "credit pack",
        };
        let tier_blurb = match membership {
            MembershipTier::Saver => {
                "You're on the Saver plan. Great for getting your first designs out the door."
            }
            MembershipTier::Pro => {
                "You're on the Pro plan. Full tech-pack generation is now unlocked."
            }
            MembershipTier::Super => {
                "You're on the Super plan. Priority generation and supplier outreach are enabled."
            }
        };

        let html = format!(
            r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"></head>
<body style="font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; line-height: 1.6; color: #333; max-width: 600px; margin: 0 auto; padding: 20px;">
    <h2 style="color: #16a34a;">Purchase Confirmed</h2>
    <p>Hi there,</p>
    <p>Thanks for your purchase! Your <strong>{tier_display}</strong> {cadence} is now active.</p>
    <div style="background: #f0fdf4; border: 1px solid #bbf7d0; border-radius: 8px; padding: 16px; margin: 20px 0;">
        <p style="margin: 0 0 8px 0;"><strong>Plan:</strong> {tier_display}</p>
        <p style="margin: 0 0 8px 0;"><strong>Credits:</strong> {credits}</p>
        <p style="margin: 0;"><strong>Valid until:</strong> {expires_at}</p>
    </div>
    <p>{tier_blurb}</p>
    <p>
        <a href="{dashboard_link}" style="display: inline-block; padding: 12px 24px; background-color: #6366f1; color: white; text-decoration: none; border-radius: 6px; font-weight: bold;">
            Start Designing
        </a>
    </p>
    <hr style="border: none; border-top: 1px solid #eee; margin: 20px 0;">
    <p style="color: #999; font-size: 12px;">{app_name}</p>
</body>
</html>"#,
            tier_display = tier_display,
            cadence = cadence,
            credits = credits,
            expires_at = expires_at,
            tier_blurb = tier_blurb,
            dashboard_link = dashboard_link,
            app_name = self.config.app_name,
        );

        self.send_email(
            to,
            &format!("Purchase Confirmed - {}", self.config.app_name),
            &html,
        )
        .await
    }

    /// Send a cancellation confirmation with the access end date
    pub async fn send_cancellation_confirmation(
        &self,
        to: &str,
        end_date: &str,
    ) -> BillingResult<bool> {
        let resubscribe_link = format!("{}/pricing", self.config.dashboard_url);

        let html = format!(
            r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"></head>
<body style="font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; line-height: 1.6; color: #333; max-width: 600px; margin: 0 auto; padding: 20px;">
    <h2 style="color: #333;">Subscription Cancelled</h2>
    <p>Hi there,</p>
    <p>Your subscription has been cancelled.</p>
    <p>You'll keep access to your plan and remaining credits until <strong>{end_date}</strong>. After that, your subscription will not renew.</p>
    <p>Changed your mind? You can resubscribe anytime.</p>
    <p>
        <a href="{resubscribe_link}" style="display: inline-block; padding: 12px 24px; background-color: #6366f1; color: white; text-decoration: none; border-radius: 6px; font-weight: bold;">
            Resubscribe
        </a>
    </p>
    <hr style="border: none; border-top: 1px solid #eee; margin: 20px 0;">
    <p style="color: #999; font-size: 12px;">{app_name}</p>
</body>
</html>"#,
            end_date = end_date,
            resubscribe_link = resubscribe_link,
            app_name = self.config.app_name,
        );

        self.send_email(
            to,
            &format!("Subscription Cancelled - {}", self.config.app_name),
            &html,
        )
        .await
    }
}
