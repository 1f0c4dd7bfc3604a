//! Purchase recording
//!
//! On a confirmed payment (PayPal client callback or Polar webhook) one
//! new credit record is created. Prior active records are expired and
//! their unused balance is carried into the new record, so no credits
//! are lost on a plan change or upgrade.
//!
//! The whole operation runs in one transaction with the user's active
//! rows locked, so two concurrent purchases serialize and carry-over is
//! applied exactly once.

use genpire_shared::{MembershipTier, PlanType, ProviderKind, UserId};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::outbox::NotificationOutbox;
use crate::period::shift_months;
use crate::records::{CreditStore, NewCreditRecord};

pub const PURCHASE_CONFIRMATION: &str = "purchase_confirmation";

/// A confirmed payment to record
#[derive(Debug, Clone)]
pub struct NewPurchase {
    pub user_id: UserId,
    pub membership: MembershipTier,
    pub plan_type: PlanType,
    pub provider: ProviderKind,
    /// Provider subscription reference; None for one-time purchases
    pub subscription_id: Option<String>,
    pub amount_cents: i64,
}

/// What the recorded purchase produced
#[derive(Debug, Clone)]
pub struct PurchaseOutcome {
    pub record_id: Uuid,
    /// Total balance on the new record, carry-over included
    pub credits: i64,
    pub carried_over: i64,
    pub expires_at: OffsetDateTime,
}

/// Plan credit amount before carry-over.
///
/// Saver plans grant 75. Everything else grants 150, bumped to 250 for
/// .edu addresses that do not hold an offer. An active offer scales the
/// base by 1.25, rounded to nearest.
pub fn plan_credits(membership: MembershipTier, email: &str, has_offer: bool) -> i64 {
    let base: f64 = if membership == MembershipTier::Saver {
        75.0
    } else if is_edu_email(email) && !has_offer {
        250.0
    } else {
        150.0
    };

    if has_offer {
        (base * 1.25).round() as i64
    } else {
        base as i64
    }
}

fn is_edu_email(email: &str) -> bool {
    email
        .rsplit_once('@')
        .map(|(_, domain)| {
            let domain = domain.to_ascii_lowercase();
            domain.ends_with(".edu") || domain.contains(".edu.")
        })
        .unwrap_or(false)
}

/// Months of validity granted per plan
fn plan_duration_months(plan_type: PlanType) -> u32 {
    match plan_type {
        PlanType::Monthly | PlanType::OneTime => 1,
        PlanType::Yearly => 12,
    }
}

#[derive(Clone)]
pub struct PurchaseService {
    store: CreditStore,
    outbox: NotificationOutbox,
}

impl PurchaseService {
    pub fn new(store: CreditStore, outbox: NotificationOutbox) -> Self {
        Self { store, outbox }
    }

    /// Record a confirmed purchase.
    ///
    /// Within one transaction: lock the user row and their active credit
    /// rows, sum and expire the old balance, insert the new record and
    /// its payment audit row, consume the offer flag if one applied, and
    /// enqueue the confirmation e-mail.
    pub async fn record_purchase(&self, purchase: NewPurchase) -> BillingResult<PurchaseOutcome> {
        if purchase.plan_type.is_subscription() && purchase.subscription_id.is_none() {
            return Err(BillingError::InvalidInput(
                "subscription purchases require a subscription_id".to_string(),
            ));
        }

        let mut tx = self.store.pool().begin().await?;

        let (email, has_offer) = self
            .store
            .lock_user_in_tx(&mut tx, purchase.user_id)
            .await?
            .ok_or_else(|| {
                BillingError::NotFound(format!("user {} not found", purchase.user_id))
            })?;

        let active = self
            .store
            .lock_active_for_user(&mut tx, purchase.user_id)
            .await?;
        let carried_over: i64 = active.iter().map(|r| r.credits).sum();

        let expired = self
            .store
            .expire_active_in_tx(&mut tx, purchase.user_id)
            .await?;

        let base_credits = plan_credits(purchase.membership, &email, has_offer);
        let credits = base_credits + carried_over;

        let now = OffsetDateTime::now_utc();
        let expires_at = shift_months(now, plan_duration_months(purchase.plan_type));

        let record_id = self
            .store
            .insert_record_in_tx(
                &mut tx,
                &NewCreditRecord {
                    user_id: purchase.user_id,
                    credits,
                    plan_type: purchase.plan_type,
                    membership: purchase.membership,
                    subscription_id: purchase.subscription_id.clone(),
                    payment_provider: purchase.provider,
                    expires_at,
                },
            )
            .await?;

        self.store
            .insert_payment_in_tx(
                &mut tx,
                purchase.user_id,
                record_id,
                purchase.amount_cents,
                purchase.membership,
                purchase.plan_type,
                purchase.provider,
                purchase.subscription_id.as_deref(),
            )
            .await?;

        if has_offer {
            self.store
                .consume_offer_in_tx(&mut tx, purchase.user_id)
                .await?;
        }

        let payload = serde_json::json!({
            "email": email,
            "membership": purchase.membership,
            "plan_type": purchase.plan_type,
            "credits": credits,
            "expires_at": expires_at.unix_timestamp(),
        });
        self.outbox
            .enqueue_in_tx(&mut tx, purchase.user_id, PURCHASE_CONFIRMATION, &payload)
            .await?;

        tx.commit().await?;

        tracing::info!(
            user_id = %purchase.user_id,
            record_id = %record_id,
            credits = credits,
            carried_over = carried_over,
            expired_records = expired,
            provider = %purchase.provider,
            "Purchase recorded"
        );

        Ok(PurchaseOutcome {
            record_id,
            credits,
            carried_over,
            expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_saver_plan_base_credits() {
        assert_eq!(plan_credits(MembershipTier::Saver, "a@example.com", false), 75);
    }

    #[test]
    fn test_pro_plan_base_credits() {
        assert_eq!(plan_credits(MembershipTier::Pro, "a@example.com", false), 150);
        assert_eq!(plan_credits(MembershipTier::Super, "a@example.com", false), 150);
    }

    #[test]
    fn test_edu_address_bumps_pro_base() {
        assert_eq!(plan_credits(MembershipTier::Pro, "a@mit.edu", false), 250);
        assert_eq!(plan_credits(MembershipTier::Pro, "a@cs.stanford.EDU", false), 250);
        assert_eq!(plan_credits(MembershipTier::Pro, "a@uni.edu.au", false), 250);
    }

    #[test]
    fn test_offer_scales_base_and_suppresses_edu_bump() {
        // Offer holders get 150 * 1.25, not the edu 250
        assert_eq!(plan_credits(MembershipTier::Pro, "a@mit.edu", true), 188);
        assert_eq!(plan_credits(MembershipTier::Pro, "a@example.com", true), 188);
        assert_eq!(plan_credits(MembershipTier::Saver, "a@example.com", true), 94);
    }

    #[test]
    fn test_edu_detection_requires_domain_match() {
        assert!(!is_edu_email("edu@example.com"));
        assert!(!is_edu_email("a@education.com"));
        assert!(is_edu_email("a@harvard.edu"));
        assert!(!is_edu_email("no-at-sign"));
    }

    #[test]
    fn test_plan_duration() {
        assert_eq!(plan_duration_months(PlanType::Monthly), 1);
        assert_eq!(plan_duration_months(PlanType::Yearly), 12);
        assert_eq!(plan_duration_months(PlanType::OneTime), 1);
    }
}
