//! Credit Ledger Reconciliation
//!
//! Presents a single coherent credits/subscription summary from a user's
//! possibly-multiple credit rows, self-healing stale one-time records on
//! the fly.
//!
//! ## Design Principles
//!
//! 1. **Single Source of Truth**: `reconcile()` is THE function that
//!    interprets a set of credit records
//! 2. **Deterministic**: same rows always produce the same summary
//! 3. **Pure**: `reconcile()` does no I/O; every endpoint that needs a
//!    summary calls it instead of re-inlining the rules
//! 4. **Self-healing**: zero-balance one-time rows still marked active
//!    are flipped to expired as a side effect of a summary fetch

use genpire_shared::{MembershipTier, PlanType, ProviderKind, RecordStatus, UserId};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;
use crate::records::{CreditRecord, CreditStore};

/// Flattened summary returned to the UI
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditSummary {
    /// Sum of credits over all active records after stale-row cleanup
    pub credits: i64,
    /// "active" when the representative record is a live one, else "inactive"
    pub membership_status: String,
    pub plan_type: Option<PlanType>,
    pub membership: Option<MembershipTier>,
    pub subscription_id: Option<String>,
    pub payment_provider: Option<ProviderKind>,
    pub subscription_status_canceled: bool,
    pub expires_at: Option<OffsetDateTime>,
    /// Whether the user may start a new subscription purchase
    pub can_buy: bool,
    /// Whether the user has ever held a pro record, any status
    pub has_ever_had_subscription: bool,
}

impl CreditSummary {
    /// Summary for a user with no credit records at all
    pub fn zero_state() -> Self {
        Self {
            credits: 0,
            membership_status: "inactive".to_string(),
            plan_type: None,
            membership: None,
            subscription_id: None,
            payment_provider: None,
            subscription_status_canceled: false,
            expires_at: None,
            can_buy: true,
            has_ever_had_subscription: false,
        }
    }
}

/// Outcome of the pure reconciliation pass
#[derive(Debug, Clone)]
pub struct Reconciliation {
    /// Active one-time rows with a zero balance; callers must flip these
    /// to expired in storage before serving the summary
    pub stale_record_ids: Vec<Uuid>,
    /// Total credits over effectively-active rows
    pub total_credits: i64,
    /// The record chosen to supply display metadata, if any exist
    pub representative: Option<CreditRecord>,
    /// Whether the representative is effectively active
    pub representative_active: bool,
    /// Whether any live (active, not canceled) subscription row exists
    pub has_active_subscription: bool,
}

/// Effective status of a record once stale one-time rows are treated as
/// expired, regardless of what storage still says
fn effective_status(record: &CreditRecord) -> RecordStatus {
    if record.status == RecordStatus::Active
        && record.plan_type == PlanType::OneTime
        && record.credits == 0
    {
        RecordStatus::Expired
    } else {
        record.status
    }
}

/// Pure function: reconcile a user's credit rows into totals and a
/// representative record.
///
/// Representative priority (first non-empty tier wins, most recently
/// created within a tier):
/// 1. active, not canceled, has a subscription_id
/// 2. active, not canceled, credits > 0
/// 3. most recently created active record, even if canceled
/// 4. most recently created record of any status
pub fn reconcile(records: &[CreditRecord]) -> Reconciliation {
    let stale_record_ids: Vec<Uuid> = records
        .iter()
        .filter(|r| r.status == RecordStatus::Active && effective_status(r) == RecordStatus::Expired)
        .map(|r| r.id)
        .collect();

    let active: Vec<&CreditRecord> = records
        .iter()
        .filter(|r| effective_status(r) == RecordStatus::Active)
        .collect();

    let total_credits = active.iter().map(|r| r.credits).sum();

    let has_active_subscription = active
        .iter()
        .any(|r| !r.subscription_status_canceled && r.subscription_id.is_some());

    // Records arrive oldest first, so max_by_key on created_at picks the
    // most recent within each tier.
    let tier1 = active
        .iter()
        .filter(|r| !r.subscription_status_canceled && r.subscription_id.is_some())
        .max_by_key(|r| r.created_at)
        .copied();
    let tier2 = active
        .iter()
        .filter(|r| !r.subscription_status_canceled && r.credits > 0)
        .max_by_key(|r| r.created_at)
        .copied();
    let tier3 = active.iter().max_by_key(|r| r.created_at).copied();
    let tier4 = records.iter().max_by_key(|r| r.created_at);

    let representative = tier1.or(tier2).or(tier3).or(tier4);
    let representative_active = representative
        .map(|r| effective_status(r) == RecordStatus::Active)
        .unwrap_or(false);

    Reconciliation {
        stale_record_ids,
        total_credits,
        representative: representative.cloned(),
        representative_active,
        has_active_subscription,
    }
}

/// Build the flat UI summary from a reconciliation result
pub fn summarize(recon: &Reconciliation, has_ever_had_subscription: bool) -> CreditSummary {
    let membership_status = if recon.representative_active {
        "active"
    } else {
        "inactive"
    };

    match &recon.representative {
        Some(rep) => CreditSummary {
            credits: recon.total_credits,
            membership_status: membership_status.to_string(),
            plan_type: Some(rep.plan_type),
            membership: Some(rep.membership),
            subscription_id: rep.subscription_id.clone(),
            payment_provider: rep.payment_provider,
            subscription_status_canceled: rep.subscription_status_canceled,
            expires_at: rep.expires_at,
            can_buy: !recon.has_active_subscription,
            has_ever_had_subscription,
        },
        None => CreditSummary {
            has_ever_had_subscription,
            ..CreditSummary::zero_state()
        },
    }
}

/// Ledger service: loads rows, heals stale ones, serves summaries
#[derive(Clone)]
pub struct LedgerService {
    store: CreditStore,
}

impl LedgerService {
    pub fn new(store: CreditStore) -> Self {
        Self { store }
    }

    /// The summary endpoint. Side effect: stale zero-balance one-time
    /// rows are expired in storage before totals are computed.
    pub async fn get_summary(&self, user_id: UserId) -> BillingResult<CreditSummary> {
        let records = self.store.fetch_for_user(user_id).await?;

        if records.is_empty() {
            // Zero-state: no writes, no further queries
            return Ok(CreditSummary::zero_state());
        }

        let recon = reconcile(&records);

        if !recon.stale_record_ids.is_empty() {
            let expired = self.store.expire_records(&recon.stale_record_ids).await?;
            tracing::info!(
                user_id = %user_id,
                expired = expired,
                "Expired stale zero-balance one-time records during summary fetch"
            );
        }

        let has_ever = self.store.has_ever_had_pro(user_id).await?;

        Ok(summarize(&recon, has_ever))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn record(
        credits: i64,
        status: RecordStatus,
        plan_type: PlanType,
        canceled: bool,
        subscription_id: Option<&str>,
        created_at: OffsetDateTime,
    ) -> CreditRecord {
        CreditRecord {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            credits,
            status,
            plan_type,
            membership: MembershipTier::Pro,
            subscription_id: subscription_id.map(String::from),
            payment_provider: Some(ProviderKind::Polar),
            subscription_status_canceled: canceled,
            created_at,
            expires_at: None,
        }
    }

    const T1: OffsetDateTime = datetime!(2025-01-01 00:00:00 UTC);
    const T2: OffsetDateTime = datetime!(2025-02-01 00:00:00 UTC);
    const T3: OffsetDateTime = datetime!(2025-03-01 00:00:00 UTC);

    #[test]
    fn test_total_sums_active_records_only() {
        let records = vec![
            record(40, RecordStatus::Active, PlanType::Monthly, false, Some("A"), T1),
            record(25, RecordStatus::Expired, PlanType::Monthly, false, None, T2),
            record(10, RecordStatus::Active, PlanType::OneTime, false, None, T3),
        ];
        let recon = reconcile(&records);
        assert_eq!(recon.total_credits, 50);
        assert!(recon.stale_record_ids.is_empty());
    }

    #[test]
    fn test_stale_one_time_record_is_expired_and_not_counted() {
        let stale = record(0, RecordStatus::Active, PlanType::OneTime, false, None, T1);
        let stale_id = stale.id;
        let records = vec![
            stale,
            record(30, RecordStatus::Active, PlanType::Monthly, false, Some("A"), T2),
        ];
        let recon = reconcile(&records);
        assert_eq!(recon.stale_record_ids, vec![stale_id]);
        assert_eq!(recon.total_credits, 30);
    }

    #[test]
    fn test_zero_balance_subscription_still_counts_as_active() {
        // Only one-time rows self-expire on a zero balance
        let records = vec![record(
            0,
            RecordStatus::Active,
            PlanType::Monthly,
            false,
            Some("A"),
            T1,
        )];
        let recon = reconcile(&records);
        assert!(recon.stale_record_ids.is_empty());
        assert_eq!(recon.total_credits, 0);
        assert!(recon.representative_active);
    }

    #[test]
    fn test_representative_prefers_non_canceled_subscription() {
        // The example from the reconciliation rules: a newer but canceled
        // subscription must lose to an older live one.
        let a = record(10, RecordStatus::Active, PlanType::Monthly, false, Some("A"), T1);
        let b = record(20, RecordStatus::Active, PlanType::Monthly, true, Some("B"), T2);
        let recon = reconcile(&[a.clone(), b]);
        let rep = recon.representative.unwrap();
        assert_eq!(rep.subscription_id.as_deref(), Some("A"));
        assert!(!rep.subscription_status_canceled);
    }

    #[test]
    fn test_representative_tier2_credits_without_subscription() {
        // No live subscription rows: fall through to active rows with a
        // positive balance (one-time packs)
        let records = vec![
            record(0, RecordStatus::Active, PlanType::Monthly, true, Some("A"), T1),
            record(15, RecordStatus::Active, PlanType::OneTime, false, None, T2),
        ];
        let recon = reconcile(&records);
        let rep = recon.representative.unwrap();
        assert_eq!(rep.credits, 15);
        assert_eq!(rep.plan_type, PlanType::OneTime);
    }

    #[test]
    fn test_representative_tier3_most_recent_active_even_if_canceled() {
        let records = vec![
            record(0, RecordStatus::Active, PlanType::Monthly, true, Some("A"), T1),
            record(0, RecordStatus::Active, PlanType::Yearly, true, Some("B"), T2),
        ];
        let recon = reconcile(&records);
        let rep = recon.representative.unwrap();
        assert_eq!(rep.subscription_id.as_deref(), Some("B"));
        assert!(recon.representative_active);
    }

    #[test]
    fn test_representative_tier4_most_recent_of_any_status() {
        let records = vec![
            record(0, RecordStatus::Expired, PlanType::Monthly, false, Some("A"), T1),
            record(0, RecordStatus::Expired, PlanType::Yearly, true, Some("B"), T3),
            record(0, RecordStatus::Expired, PlanType::Monthly, true, Some("C"), T2),
        ];
        let recon = reconcile(&records);
        let rep = recon.representative.unwrap();
        assert_eq!(rep.subscription_id.as_deref(), Some("B"));
        assert!(!recon.representative_active);
    }

    #[test]
    fn test_summary_zero_state() {
        let recon = reconcile(&[]);
        assert!(recon.representative.is_none());
        let summary = summarize(&recon, false);
        assert_eq!(summary.credits, 0);
        assert_eq!(summary.membership_status, "inactive");
        assert!(summary.can_buy);
    }

    #[test]
    fn test_summary_active_subscription_blocks_buying() {
        let records = vec![record(
            100,
            RecordStatus::Active,
            PlanType::Yearly,
            false,
            Some("A"),
            T1,
        )];
        let summary = summarize(&reconcile(&records), true);
        assert_eq!(summary.membership_status, "active");
        assert!(!summary.can_buy);
        assert!(summary.has_ever_had_subscription);
    }

    #[test]
    fn test_summary_soft_canceled_subscription_allows_buying() {
        // Canceled-but-active: access continues, renewal will not happen,
        // so a new purchase is allowed
        let records = vec![record(
            60,
            RecordStatus::Active,
            PlanType::Monthly,
            true,
            Some("A"),
            T1,
        )];
        let summary = summarize(&reconcile(&records), true);
        assert_eq!(summary.membership_status, "active");
        assert!(summary.subscription_status_canceled);
        assert!(summary.can_buy);
    }

    #[test]
    fn test_total_spans_multiple_subscriptions() {
        let records = vec![
            record(40, RecordStatus::Active, PlanType::Monthly, true, Some("A"), T1),
            record(150, RecordStatus::Active, PlanType::Monthly, false, Some("B"), T2),
            record(10, RecordStatus::Active, PlanType::OneTime, false, None, T3),
        ];
        let recon = reconcile(&records);
        assert_eq!(recon.total_credits, 200);
        // Display metadata comes from the live subscription
        assert_eq!(
            recon.representative.unwrap().subscription_id.as_deref(),
            Some("B")
        );
    }
}
