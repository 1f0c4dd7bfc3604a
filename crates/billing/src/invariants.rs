//! Billing Invariants Module
//!
//! Runnable consistency checks over the credit ledger. These can be run
//! after any mutation or webhook replay to verify the system is in a
//! valid state; the worker runs them daily.
//!
//! ## Design Principles
//!
//! 1. **Executable**: Each invariant is a real SQL query that can be run
//! 2. **Explanatory**: Violations include enough context to debug
//! 3. **Non-destructive**: Checks only read, never write

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;

/// Result of running a single invariant check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantViolation {
    /// Which invariant was violated
    pub invariant: String,
    /// User(s) affected
    pub user_ids: Vec<Uuid>,
    /// Human-readable description of the violation
    pub description: String,
    /// Additional context for debugging
    pub context: serde_json::Value,
    /// Severity level
    pub severity: ViolationSeverity,
}

/// Severity of an invariant violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationSeverity {
    /// Critical - users may be charged or credited incorrectly
    Critical,
    /// High - data inconsistency that needs attention
    High,
    /// Medium - potential issue, should investigate
    Medium,
    /// Low - minor inconsistency, informational
    Low,
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationSeverity::Critical => write!(f, "CRITICAL"),
            ViolationSeverity::High => write!(f, "HIGH"),
            ViolationSeverity::Medium => write!(f, "MEDIUM"),
            ViolationSeverity::Low => write!(f, "LOW"),
        }
    }
}

/// Summary of all invariant checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantCheckSummary {
    /// When the check was run
    pub checked_at: OffsetDateTime,
    /// Total number of checks run
    pub checks_run: usize,
    /// Number of checks that passed
    pub checks_passed: usize,
    /// Number of checks that failed
    pub checks_failed: usize,
    /// List of all violations found
    pub violations: Vec<InvariantViolation>,
    /// Overall health status
    pub healthy: bool,
}

#[derive(Debug, sqlx::FromRow)]
struct StaleOneTimeRow {
    record_id: Uuid,
    user_id: Uuid,
    created_at: OffsetDateTime,
}

#[derive(Debug, sqlx::FromRow)]
struct MultipleActiveSubsRow {
    user_id: Uuid,
    sub_count: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct CanceledNoExpiryRow {
    record_id: Uuid,
    user_id: Uuid,
    subscription_id: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
struct NegativeCreditsRow {
    record_id: Uuid,
    user_id: Uuid,
    credits: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct SubWithoutProviderRow {
    record_id: Uuid,
    user_id: Uuid,
    subscription_id: String,
}

/// Service for running billing invariant checks
pub struct InvariantChecker {
    pool: PgPool,
}

impl InvariantChecker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all invariant checks and return summary
    pub async fn run_all_checks(&self) -> BillingResult<InvariantCheckSummary> {
        let now = OffsetDateTime::now_utc();
        let mut violations = Vec::new();

        violations.extend(self.check_no_stale_one_time_records().await?);
        violations.extend(self.check_single_active_subscription().await?);
        violations.extend(self.check_canceled_has_expiry().await?);
        violations.extend(self.check_no_negative_credits().await?);
        violations.extend(self.check_subscription_rows_have_provider().await?);

        let checks_run = 5;
        let checks_failed = violations
            .iter()
            .map(|v| &v.invariant)
            .collect::<std::collections::HashSet<_>>()
            .len();
        let checks_passed = checks_run - checks_failed;

        Ok(InvariantCheckSummary {
            checked_at: now,
            checks_run,
            checks_passed,
            checks_failed,
            healthy: violations.is_empty(),
            violations,
        })
    }

    /// Invariant 1: No long-lived stale one-time records
    ///
    /// Zero-balance one-time rows are expired lazily on summary fetches,
    /// so a recent one is normal. One older than a day means the user
    /// never fetched a summary or the cleanup is broken.
    async fn check_no_stale_one_time_records(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<StaleOneTimeRow> = sqlx::query_as(
            r#"
            SELECT id as record_id, user_id, created_at
            FROM user_credits
            WHERE status = 'active'
              AND plan_type = 'one_time'
              AND credits = 0
              AND created_at < NOW() - INTERVAL '1 day'
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "no_stale_one_time_records".to_string(),
                user_ids: vec![row.user_id],
                description: "Zero-balance one-time record still active after 24h".to_string(),
                context: serde_json::json!({
                    "record_id": row.record_id,
                    "created_at": row.created_at.to_string(),
                }),
                severity: ViolationSeverity::Low,
            })
            .collect())
    }

    /// Invariant 2: At most 1 live subscription row per user
    ///
    /// Purchases expire all prior active rows in the same transaction, so
    /// two non-canceled subscription rows mean double-billing.
    async fn check_single_active_subscription(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<MultipleActiveSubsRow> = sqlx::query_as(
            r#"
            SELECT user_id, COUNT(*) as sub_count
            FROM user_credits
            WHERE status = 'active'
              AND subscription_status_canceled = FALSE
              AND subscription_id IS NOT NULL
            GROUP BY user_id
            HAVING COUNT(*) > 1
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "single_active_subscription".to_string(),
                user_ids: vec![row.user_id],
                description: format!(
                    "User has {} live subscription records (expected at most 1)",
                    row.sub_count
                ),
                context: serde_json::json!({
                    "subscription_count": row.sub_count,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 3: Canceled records have an expiry
    ///
    /// A canceled record without `expires_at` leaves access open-ended;
    /// cancellation always writes one.
    async fn check_canceled_has_expiry(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<CanceledNoExpiryRow> = sqlx::query_as(
            r#"
            SELECT id as record_id, user_id, subscription_id
            FROM user_credits
            WHERE subscription_status_canceled = TRUE
              AND expires_at IS NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "canceled_has_expiry".to_string(),
                user_ids: vec![row.user_id],
                description: "Canceled record has no expires_at date".to_string(),
                context: serde_json::json!({
                    "record_id": row.record_id,
                    "subscription_id": row.subscription_id,
                }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Invariant 4: Credit balances never go negative
    async fn check_no_negative_credits(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<NegativeCreditsRow> = sqlx::query_as(
            "SELECT id as record_id, user_id, credits FROM user_credits WHERE credits < 0",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "no_negative_credits".to_string(),
                user_ids: vec![row.user_id],
                description: format!("Record has negative credit balance ({})", row.credits),
                context: serde_json::json!({
                    "record_id": row.record_id,
                    "credits": row.credits,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 5: Rows with a subscription_id name their provider
    ///
    /// NULL providers are tolerated on legacy rows and resolve to PayPal,
    /// so this is informational, not a hard failure.
    async fn check_subscription_rows_have_provider(
        &self,
    ) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<SubWithoutProviderRow> = sqlx::query_as(
            r#"
            SELECT id as record_id, user_id, subscription_id
            FROM user_credits
            WHERE subscription_id IS NOT NULL
              AND payment_provider IS NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "subscription_rows_have_provider".to_string(),
                user_ids: vec![row.user_id],
                description: "Subscription record has no payment_provider (legacy PayPal assumed)"
                    .to_string(),
                context: serde_json::json!({
                    "record_id": row.record_id,
                    "subscription_id": row.subscription_id,
                }),
                severity: ViolationSeverity::Low,
            })
            .collect())
    }
}
