//! Subscription cancellation
//!
//! Soft-cancel: the subscription stops renewing at the provider, the
//! local record is flagged canceled with an expiry, and access continues
//! until that expiry. Already-paid-for credits are never revoked.

use std::sync::Arc;

use async_trait::async_trait;
use genpire_shared::{PlanType, UserId};
use time::OffsetDateTime;

use crate::error::{BillingError, BillingResult};
use crate::outbox::NotificationOutbox;
use crate::period::{first_of_next_month, next_anniversary};
use crate::providers::ProviderRegistry;
use crate::records::{CreditRecord, CreditStore};

pub const CANCELLATION_CONFIRMATION: &str = "cancellation_confirmation";

/// Result of a cancellation request
#[derive(Debug, Clone)]
pub struct CancellationOutcome {
    /// When access ends; renewal will not happen after this
    pub expires_at: OffsetDateTime,
    /// Set when the provider cancel succeeded but the local record update
    /// failed. The cancellation itself stands; only the mirror lags.
    pub warning: Option<String>,
}

/// Storage operations the cancellation flow needs. Postgres in
/// production; the seam lets tests exercise the flow without a database.
#[async_trait]
trait CancellationRecords: Send + Sync {
    async fn find_by_subscription(
        &self,
        user_id: UserId,
        subscription_id: &str,
    ) -> BillingResult<Option<CreditRecord>>;

    /// Flag the record canceled and enqueue the confirmation e-mail in
    /// one transaction.
    async fn record_cancellation(
        &self,
        record: &CreditRecord,
        expires_at: OffsetDateTime,
    ) -> BillingResult<()>;
}

struct PgCancellationRecords {
    store: CreditStore,
    outbox: NotificationOutbox,
}

#[async_trait]
impl CancellationRecords for PgCancellationRecords {
    async fn find_by_subscription(
        &self,
        user_id: UserId,
        subscription_id: &str,
    ) -> BillingResult<Option<CreditRecord>> {
        self.store.find_by_subscription(user_id, subscription_id).await
    }

    async fn record_cancellation(
        &self,
        record: &CreditRecord,
        expires_at: OffsetDateTime,
    ) -> BillingResult<()> {
        let mut tx = self.store.pool().begin().await?;

        self.store
            .mark_canceled_in_tx(&mut tx, record.id, expires_at)
            .await?;

        let user_id = UserId(record.user_id);
        if let Some(email) = self.store.user_email_in_tx(&mut tx, user_id).await? {
            let payload = serde_json::json!({
                "email": email,
                "end_date": expires_at.unix_timestamp(),
            });
            self.outbox
                .enqueue_in_tx(&mut tx, user_id, CANCELLATION_CONFIRMATION, &payload)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct CancellationService {
    records: Arc<dyn CancellationRecords>,
    providers: ProviderRegistry,
}

impl CancellationService {
    pub fn new(store: CreditStore, providers: ProviderRegistry, outbox: NotificationOutbox) -> Self {
        Self {
            records: Arc::new(PgCancellationRecords { store, outbox }),
            providers,
        }
    }

    #[cfg(test)]
    fn with_records(records: Arc<dyn CancellationRecords>, providers: ProviderRegistry) -> Self {
        Self { records, providers }
    }

    /// Cancel a subscription owned by `user_id`.
    ///
    /// The lookup is scoped to the requesting user, so a subscription id
    /// belonging to someone else behaves exactly like an unknown one.
    /// Once the provider call succeeds the cancellation is reported as
    /// successful even if the local mirror write fails.
    pub async fn cancel(
        &self,
        user_id: UserId,
        subscription_id: &str,
        reason: Option<&str>,
    ) -> BillingResult<CancellationOutcome> {
        if subscription_id.trim().is_empty() {
            return Err(BillingError::InvalidInput(
                "subscription_id must not be empty".to_string(),
            ));
        }

        let record = self
            .records
            .find_by_subscription(user_id, subscription_id)
            .await?
            .ok_or_else(|| BillingError::SubscriptionNotFound(subscription_id.to_string()))?;

        // Repeat cancellations are idempotent once the expiry is known
        if record.subscription_status_canceled {
            if let Some(expires_at) = record.expires_at {
                tracing::info!(
                    user_id = %user_id,
                    subscription_id = %subscription_id,
                    "Subscription already canceled, returning existing expiry"
                );
                return Ok(CancellationOutcome {
                    expires_at,
                    warning: None,
                });
            }
        }

        let provider = record.provider();
        let adapter = self.providers.get(provider);

        let provider_period_end = adapter.cancel_subscription(subscription_id, reason).await?;

        // Prefer what the provider reports; fall back to local period
        // math when it reports nothing (PayPal's cancel is bodyless).
        let expires_at = match provider_period_end {
            Some(end) => end,
            None => local_period_end(&record, OffsetDateTime::now_utc())?,
        };

        match self.records.record_cancellation(&record, expires_at).await {
            Ok(()) => {
                tracing::info!(
                    user_id = %user_id,
                    subscription_id = %subscription_id,
                    provider = %provider,
                    expires_at = %expires_at,
                    "Subscription canceled"
                );
                Ok(CancellationOutcome {
                    expires_at,
                    warning: None,
                })
            }
            Err(e) => {
                // Provider-side cancel already happened; report success
                // with a warning instead of a hard failure.
                tracing::error!(
                    user_id = %user_id,
                    subscription_id = %subscription_id,
                    error = %e,
                    "Provider cancel succeeded but local record update failed"
                );
                Ok(CancellationOutcome {
                    expires_at,
                    warning: Some(
                        "Subscription canceled at provider; local record update is pending"
                            .to_string(),
                    ),
                })
            }
        }
    }
}

/// Local fallback for the post-cancellation expiry: yearly plans run to
/// the next anniversary of the original purchase, monthly plans to the
/// 1st of next month at the original time-of-day.
fn local_period_end(record: &CreditRecord, now: OffsetDateTime) -> BillingResult<OffsetDateTime> {
    match record.plan_type {
        PlanType::Yearly => Ok(next_anniversary(record.created_at, now)),
        PlanType::Monthly => Ok(first_of_next_month(record.created_at, now)),
        PlanType::OneTime => Err(BillingError::InvalidInput(
            "one-time purchases have no subscription to cancel".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::providers::ProviderAdapter;
    use genpire_shared::{MembershipTier, ProviderKind, RecordStatus};
    use time::macros::datetime;
    use uuid::Uuid;

    fn record(plan_type: PlanType, created_at: OffsetDateTime) -> CreditRecord {
        CreditRecord {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            credits: 100,
            status: RecordStatus::Active,
            plan_type,
            membership: MembershipTier::Pro,
            subscription_id: Some("sub_1".to_string()),
            payment_provider: Some(ProviderKind::Paypal),
            subscription_status_canceled: false,
            created_at,
            expires_at: None,
        }
    }

    /// In-memory stand-in for the Postgres-backed records
    struct FakeRecords {
        record: Option<CreditRecord>,
        fail_write: bool,
        writes: AtomicUsize,
    }

    #[async_trait]
    impl CancellationRecords for FakeRecords {
        async fn find_by_subscription(
            &self,
            _user_id: UserId,
            _subscription_id: &str,
        ) -> BillingResult<Option<CreditRecord>> {
            Ok(self.record.clone())
        }

        async fn record_cancellation(
            &self,
            _record: &CreditRecord,
            _expires_at: OffsetDateTime,
        ) -> BillingResult<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            if self.fail_write {
                Err(BillingError::Internal(
                    "connection closed mid-transaction".to_string(),
                ))
            } else {
                Ok(())
            }
        }
    }

    /// Provider that counts calls and reports a fixed period end
    struct FakeProvider {
        kind: ProviderKind,
        calls: Arc<AtomicUsize>,
        period_end: Option<OffsetDateTime>,
    }

    #[async_trait]
    impl ProviderAdapter for FakeProvider {
        fn kind(&self) -> ProviderKind {
            self.kind
        }

        async fn cancel_subscription(
            &self,
            _subscription_id: &str,
            _reason: Option<&str>,
        ) -> BillingResult<Option<OffsetDateTime>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.period_end)
        }
    }

    fn test_service(
        record: Option<CreditRecord>,
        fail_write: bool,
        period_end: Option<OffsetDateTime>,
    ) -> (CancellationService, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let polar = Arc::new(FakeProvider {
            kind: ProviderKind::Polar,
            calls: calls.clone(),
            period_end,
        });
        let paypal = Arc::new(FakeProvider {
            kind: ProviderKind::Paypal,
            calls: calls.clone(),
            period_end,
        });
        let records = Arc::new(FakeRecords {
            record,
            fail_write,
            writes: AtomicUsize::new(0),
        });
        let service =
            CancellationService::with_records(records, ProviderRegistry::new(polar, paypal));
        (service, calls)
    }

    #[tokio::test]
    async fn test_unknown_subscription_never_contacts_provider() {
        let (service, provider_calls) = test_service(None, false, None);

        let err = service
            .cancel(UserId(Uuid::new_v4()), "sub_unknown", None)
            .await
            .unwrap_err();

        assert!(matches!(err, BillingError::SubscriptionNotFound(_)));
        assert_eq!(provider_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_local_write_failure_still_reports_success_with_warning() {
        let rec = record(PlanType::Monthly, datetime!(2025-01-05 10:00:00 UTC));
        let user_id = UserId(rec.user_id);
        let period_end = datetime!(2025-03-01 10:00:00 UTC);
        let (service, provider_calls) = test_service(Some(rec), true, Some(period_end));

        let outcome = service.cancel(user_id, "sub_1", None).await.unwrap();

        assert_eq!(provider_calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.expires_at, period_end);
        assert!(outcome.warning.is_some());
    }

    #[tokio::test]
    async fn test_repeat_cancel_returns_existing_expiry_without_provider_call() {
        let mut rec = record(PlanType::Monthly, datetime!(2025-01-05 10:00:00 UTC));
        rec.subscription_status_canceled = true;
        rec.expires_at = Some(datetime!(2025-02-01 10:00:00 UTC));
        let user_id = UserId(rec.user_id);
        let (service, provider_calls) = test_service(Some(rec), false, None);

        let outcome = service.cancel(user_id, "sub_1", None).await.unwrap();

        assert_eq!(outcome.expires_at, datetime!(2025-02-01 10:00:00 UTC));
        assert!(outcome.warning.is_none());
        assert_eq!(provider_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_yearly_fallback_is_next_anniversary() {
        let rec = record(PlanType::Yearly, datetime!(2024-03-15 00:00:00 UTC));
        let end = local_period_end(&rec, datetime!(2025-01-10 00:00:00 UTC)).unwrap();
        assert_eq!(end, datetime!(2025-03-15 00:00:00 UTC));
    }

    #[test]
    fn test_monthly_fallback_is_first_of_next_month() {
        let rec = record(PlanType::Monthly, datetime!(2024-11-20 09:30:00 UTC));
        let end = local_period_end(&rec, datetime!(2025-01-10 14:00:00 UTC)).unwrap();
        assert_eq!(end, datetime!(2025-02-01 09:30:00 UTC));
    }

    #[test]
    fn test_one_time_records_cannot_be_canceled() {
        let rec = record(PlanType::OneTime, datetime!(2025-01-01 00:00:00 UTC));
        let err = local_period_end(&rec, datetime!(2025-01-10 00:00:00 UTC)).unwrap_err();
        assert!(matches!(err, BillingError::InvalidInput(_)));
    }

    #[test]
    fn test_legacy_null_provider_resolves_to_paypal() {
        let mut rec = record(PlanType::Monthly, datetime!(2025-01-01 00:00:00 UTC));
        rec.payment_provider = None;
        assert_eq!(rec.provider(), ProviderKind::Paypal);
    }
}
