//! Integration tests for the purchase/ledger flow.
//!
//! These run against a real Postgres database. Set DATABASE_URL and run
//! with `cargo test -- --ignored`.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use genpire_billing::{
    CreditStore, LedgerService, NewPurchase, NotificationOutbox, PurchaseService,
    PURCHASE_CONFIRMATION,
};
use genpire_shared::{MembershipTier, PlanType, ProviderKind, UserId};
use sqlx::PgPool;
use uuid::Uuid;

async fn setup_pool() -> PgPool {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
    let pool = genpire_shared::create_pool(&url).await.expect("pool");
    genpire_shared::run_migrations(&pool).await.expect("migrations");
    pool
}

async fn create_test_user(pool: &PgPool, has_offer: bool) -> UserId {
    let email = format!("billing-test-{}@example.com", Uuid::new_v4());
    let id: (Uuid,) =
        sqlx::query_as("INSERT INTO users (email, has_offer) VALUES ($1, $2) RETURNING id")
            .bind(&email)
            .bind(has_offer)
            .fetch_one(pool)
            .await
            .expect("insert user");
    UserId(id.0)
}

fn purchase_service(pool: &PgPool) -> PurchaseService {
    PurchaseService::new(
        CreditStore::new(pool.clone()),
        NotificationOutbox::new(pool.clone()),
    )
}

fn monthly_pro(user_id: UserId, subscription_id: &str) -> NewPurchase {
    NewPurchase {
        user_id,
        membership: MembershipTier::Pro,
        plan_type: PlanType::Monthly,
        provider: ProviderKind::Paypal,
        subscription_id: Some(subscription_id.to_string()),
        amount_cents: 2900,
    }
}

#[tokio::test]
#[ignore] // Requires database
async fn test_purchase_carries_over_and_expires_prior() {
    let pool = setup_pool().await;
    let user_id = create_test_user(&pool, false).await;
    let purchases = purchase_service(&pool);

    let first = purchases
        .record_purchase(monthly_pro(user_id, "sub_flow_1"))
        .await
        .expect("first purchase");
    assert_eq!(first.credits, 150);
    assert_eq!(first.carried_over, 0);

    let second = purchases
        .record_purchase(monthly_pro(user_id, "sub_flow_2"))
        .await
        .expect("second purchase");
    assert_eq!(second.carried_over, 150);
    assert_eq!(second.credits, 300);

    // Prior record is expired, only the new one counts
    let ledger = LedgerService::new(CreditStore::new(pool.clone()));
    let summary = ledger.get_summary(user_id).await.expect("summary");
    assert_eq!(summary.credits, 300);
    assert_eq!(summary.subscription_id.as_deref(), Some("sub_flow_2"));
    assert!(!summary.can_buy);

    let active_count: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM user_credits WHERE user_id = $1 AND status = 'active'",
    )
    .bind(user_id.0)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(active_count.0, 1);
}

#[tokio::test]
#[ignore] // Requires database
async fn test_summary_expires_stale_one_time_rows() {
    let pool = setup_pool().await;
    let user_id = create_test_user(&pool, false).await;

    // A drained one-time pack still marked active
    sqlx::query(
        r#"
        INSERT INTO user_credits (user_id, credits, status, plan_type, membership, payment_provider)
        VALUES ($1, 0, 'active', 'one_time', 'pro', 'paypal')
        "#,
    )
    .bind(user_id.0)
    .execute(&pool)
    .await
    .unwrap();

    let ledger = LedgerService::new(CreditStore::new(pool.clone()));
    let summary = ledger.get_summary(user_id).await.expect("summary");
    assert_eq!(summary.credits, 0);
    assert_eq!(summary.membership_status, "inactive");

    let status: (String,) =
        sqlx::query_as("SELECT status FROM user_credits WHERE user_id = $1")
            .bind(user_id.0)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(status.0, "expired");
}

#[tokio::test]
#[ignore] // Requires database
async fn test_purchase_enqueues_confirmation_and_consumes_offer() {
    let pool = setup_pool().await;
    let user_id = create_test_user(&pool, true).await;
    let purchases = purchase_service(&pool);

    let outcome = purchases
        .record_purchase(monthly_pro(user_id, "sub_flow_3"))
        .await
        .expect("purchase");
    // 150 * 1.25 with the offer active
    assert_eq!(outcome.credits, 188);

    let has_offer: (bool,) = sqlx::query_as("SELECT has_offer FROM users WHERE id = $1")
        .bind(user_id.0)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert!(!has_offer.0);

    let outbox_row: (String, String) = sqlx::query_as(
        "SELECT notification_type, status FROM notification_outbox WHERE user_id = $1",
    )
    .bind(user_id.0)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(outbox_row.0, PURCHASE_CONFIRMATION);
    assert_eq!(outbox_row.1, "pending");
}
