//! Notification outbox
//!
//! Confirmation e-mails are enqueued in the same transaction as the
//! purchase they announce and delivered later by the worker with
//! bounded retries. A crashed process therefore never loses a
//! notification and never sends one for a rolled-back purchase.

use genpire_shared::UserId;
use serde_json::Value;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::BillingResult;

/// A claimed outbox entry ready for delivery
#[derive(Debug, Clone)]
pub struct PendingNotification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub notification_type: String,
    pub payload: Value,
    pub attempts: i32,
    pub max_attempts: i32,
}

#[derive(Clone)]
pub struct NotificationOutbox {
    pool: PgPool,
}

impl NotificationOutbox {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Enqueue a notification inside the caller's transaction so it
    /// commits or rolls back together with the business write.
    pub async fn enqueue_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_id: UserId,
        notification_type: &str,
        payload: &Value,
    ) -> BillingResult<Uuid> {
        let id: (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO notification_outbox (user_id, notification_type, payload)
            VALUES ($1, $2, $3)
            RETURNING id
            "#,
        )
        .bind(user_id.0)
        .bind(notification_type)
        .bind(payload)
        .fetch_one(&mut **tx)
        .await?;

        Ok(id.0)
    }

    /// Claim up to `limit` due notifications and mark them processing.
    /// FOR UPDATE SKIP LOCKED keeps concurrent workers from claiming the
    /// same rows; failed rows become due again after a 5 minute backoff.
    /// Rows stuck in processing (worker died mid-delivery) are reclaimed
    /// after 10 minutes.
    pub async fn claim_due(&self, limit: i64) -> BillingResult<Vec<PendingNotification>> {
        let mut tx = self.pool.begin().await?;

        let rows: Vec<(Uuid, Uuid, String, Value, i32, i32)> = sqlx::query_as(
            r#"
            SELECT id, user_id, notification_type, payload, attempts, max_attempts
            FROM notification_outbox
            WHERE (
                    status = 'pending'
                    OR (status = 'failed' AND attempts < max_attempts)
                    OR (status = 'processing'
                        AND attempts < max_attempts
                        AND last_attempt_at < NOW() - INTERVAL '10 minutes')
                  )
              AND (last_attempt_at IS NULL OR last_attempt_at < NOW() - INTERVAL '5 minutes')
            ORDER BY created_at ASC
            LIMIT $1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(limit)
        .fetch_all(&mut *tx)
        .await?;

        if rows.is_empty() {
            tx.commit().await?;
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = rows.iter().map(|r| r.0).collect();
        sqlx::query(
            r#"
            UPDATE notification_outbox
            SET status = 'processing', last_attempt_at = NOW(), attempts = attempts + 1
            WHERE id = ANY($1)
            "#,
        )
        .bind(&ids)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(rows
            .into_iter()
            .map(
                |(id, user_id, notification_type, payload, attempts, max_attempts)| {
                    PendingNotification {
                        id,
                        user_id,
                        notification_type,
                        payload,
                        // attempts reflects the claim we just made
                        attempts: attempts + 1,
                        max_attempts,
                    }
                },
            )
            .collect())
    }

    pub async fn mark_sent(&self, id: Uuid) -> BillingResult<()> {
        sqlx::query(
            "UPDATE notification_outbox SET status = 'sent', sent_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Record a delivery failure. The row stays retryable until
    /// `attempts` reaches `max_attempts`.
    pub async fn mark_failed(&self, id: Uuid, error: &str) -> BillingResult<()> {
        sqlx::query("UPDATE notification_outbox SET status = 'failed', last_error = $2 WHERE id = $1")
            .bind(id)
            .bind(error)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Delete old sent/exhausted rows (maintenance job)
    pub async fn cleanup(&self, retention_days: i32) -> BillingResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM notification_outbox
            WHERE created_at < NOW() - make_interval(days => $1)
              AND (status = 'sent' OR (status = 'failed' AND attempts >= max_attempts))
            "#,
        )
        .bind(retention_days)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
