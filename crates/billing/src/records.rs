//! Credit record storage
//!
//! One `user_credits` row per purchase or subscription period. Rows are
//! never deleted; status only moves active -> expired.

use genpire_shared::{MembershipTier, PlanType, ProviderKind, RecordStatus, UserId};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;

/// A single credit record as stored in `user_credits`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub credits: i64,
    pub status: RecordStatus,
    pub plan_type: PlanType,
    pub membership: MembershipTier,
    pub subscription_id: Option<String>,
    /// NULL on legacy rows, treated as PayPal by convention
    pub payment_provider: Option<ProviderKind>,
    pub subscription_status_canceled: bool,
    pub created_at: OffsetDateTime,
    pub expires_at: Option<OffsetDateTime>,
}

impl CreditRecord {
    /// Resolved provider for this record (legacy NULL means PayPal)
    pub fn provider(&self) -> ProviderKind {
        self.payment_provider.unwrap_or(ProviderKind::Paypal)
    }
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for CreditRecord {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            credits: row.try_get("credits")?,
            status: row.try_get("status")?,
            plan_type: row.try_get("plan_type")?,
            membership: row.try_get("membership")?,
            subscription_id: row.try_get("subscription_id")?,
            payment_provider: row.try_get("payment_provider")?,
            subscription_status_canceled: row.try_get("subscription_status_canceled")?,
            created_at: row.try_get("created_at")?,
            expires_at: row.try_get("expires_at")?,
        })
    }
}

const RECORD_COLUMNS: &str = r#"
    id,
    user_id,
    credits,
    status,
    plan_type,
    membership,
    subscription_id,
    payment_provider,
    subscription_status_canceled,
    created_at,
    expires_at
"#;

/// Fields for inserting a new credit record
#[derive(Debug, Clone)]
pub struct NewCreditRecord {
    pub user_id: UserId,
    pub credits: i64,
    pub plan_type: PlanType,
    pub membership: MembershipTier,
    pub subscription_id: Option<String>,
    pub payment_provider: ProviderKind,
    pub expires_at: OffsetDateTime,
}

/// Data access for `user_credits` and the `payments` audit table
#[derive(Clone)]
pub struct CreditStore {
    pool: PgPool,
}

impl CreditStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// All records for a user, oldest first
    pub async fn fetch_for_user(&self, user_id: UserId) -> BillingResult<Vec<CreditRecord>> {
        let records: Vec<CreditRecord> = sqlx::query_as(&format!(
            "SELECT {RECORD_COLUMNS} FROM user_credits WHERE user_id = $1 ORDER BY created_at ASC"
        ))
        .bind(user_id.0)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Flip a set of records to expired. Used by the ledger's stale-row
    /// cleanup; idempotent in outcome.
    pub async fn expire_records(&self, ids: &[Uuid]) -> BillingResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            "UPDATE user_credits SET status = 'expired' WHERE id = ANY($1) AND status = 'active'",
        )
        .bind(ids)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Look up a record by provider subscription reference, scoped to the
    /// requesting user so one user cannot cancel another's subscription.
    pub async fn find_by_subscription(
        &self,
        user_id: UserId,
        subscription_id: &str,
    ) -> BillingResult<Option<CreditRecord>> {
        let record: Option<CreditRecord> = sqlx::query_as(&format!(
            "SELECT {RECORD_COLUMNS} FROM user_credits WHERE subscription_id = $1 AND user_id = $2"
        ))
        .bind(subscription_id)
        .bind(user_id.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// Mark a record soft-canceled within a transaction. The record stays
    /// active and usable until `expires_at`; only renewal stops.
    pub async fn mark_canceled_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        record_id: Uuid,
        expires_at: OffsetDateTime,
    ) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE user_credits
            SET subscription_status_canceled = TRUE, expires_at = $2
            WHERE id = $1
            "#,
        )
        .bind(record_id)
        .bind(expires_at)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Look up a user's e-mail within a transaction
    pub async fn user_email_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_id: UserId,
    ) -> BillingResult<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT email FROM users WHERE id = $1")
            .bind(user_id.0)
            .fetch_optional(&mut **tx)
            .await?;

        Ok(row.map(|r| r.0))
    }

    /// Whether the user has ever held a pro-tier record, any status
    pub async fn has_ever_had_pro(&self, user_id: UserId) -> BillingResult<bool> {
        let exists: (bool,) = sqlx::query_as(
            "SELECT EXISTS(SELECT 1 FROM user_credits WHERE user_id = $1 AND membership = 'pro')",
        )
        .bind(user_id.0)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists.0)
    }

    // =========================================================================
    // Transactional helpers used by the purchase recorder
    // =========================================================================

    /// Lock and return the user's active records within a transaction.
    /// FOR UPDATE serializes concurrent purchases for the same user.
    pub async fn lock_active_for_user(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_id: UserId,
    ) -> BillingResult<Vec<CreditRecord>> {
        let records: Vec<CreditRecord> = sqlx::query_as(&format!(
            r#"
            SELECT {RECORD_COLUMNS}
            FROM user_credits
            WHERE user_id = $1 AND status = 'active'
            ORDER BY created_at ASC
            FOR UPDATE
            "#
        ))
        .bind(user_id.0)
        .fetch_all(&mut **tx)
        .await?;

        Ok(records)
    }

    /// Expire all of the user's active records within a transaction
    pub async fn expire_active_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_id: UserId,
    ) -> BillingResult<u64> {
        let result = sqlx::query(
            "UPDATE user_credits SET status = 'expired' WHERE user_id = $1 AND status = 'active'",
        )
        .bind(user_id.0)
        .execute(&mut **tx)
        .await?;

        Ok(result.rows_affected())
    }

    /// Insert a new credit record within a transaction, returning its id
    pub async fn insert_record_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        record: &NewCreditRecord,
    ) -> BillingResult<Uuid> {
        let id: (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO user_credits (
                user_id,
                credits,
                status,
                plan_type,
                membership,
                subscription_id,
                payment_provider,
                expires_at
            )
            VALUES ($1, $2, 'active', $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(record.user_id.0)
        .bind(record.credits)
        .bind(record.plan_type)
        .bind(record.membership)
        .bind(&record.subscription_id)
        .bind(record.payment_provider)
        .bind(record.expires_at)
        .fetch_one(&mut **tx)
        .await?;

        Ok(id.0)
    }

    /// Write one payment audit row within a transaction
    #[allow(clippy::too_many_arguments)]
    pub async fn insert_payment_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_id: UserId,
        credit_record_id: Uuid,
        amount_cents: i64,
        membership: MembershipTier,
        plan_type: PlanType,
        provider: ProviderKind,
        subscription_id: Option<&str>,
    ) -> BillingResult<Uuid> {
        let id: (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO payments (
                user_id,
                credit_record_id,
                amount_cents,
                membership,
                plan_type,
                payment_provider,
                subscription_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(user_id.0)
        .bind(credit_record_id)
        .bind(amount_cents)
        .bind(membership)
        .bind(plan_type)
        .bind(provider)
        .bind(subscription_id)
        .fetch_one(&mut **tx)
        .await?;

        Ok(id.0)
    }

    /// Load the user's e-mail and offer flag, locked for the duration of
    /// the purchase transaction
    pub async fn lock_user_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_id: UserId,
    ) -> BillingResult<Option<(String, bool)>> {
        let row: Option<(String, bool)> =
            sqlx::query_as("SELECT email, has_offer FROM users WHERE id = $1 FOR UPDATE")
                .bind(user_id.0)
                .fetch_optional(&mut **tx)
                .await?;

        Ok(row)
    }

    /// Clear the one-time offer flag once a purchase consumed it
    pub async fn consume_offer_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_id: UserId,
    ) -> BillingResult<()> {
        sqlx::query("UPDATE users SET has_offer = FALSE WHERE id = $1")
            .bind(user_id.0)
            .execute(&mut **tx)
            .await?;

        Ok(())
    }
}
