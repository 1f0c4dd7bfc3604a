//! Genpire Background Worker
//!
//! Handles scheduled jobs:
//! - Notification outbox delivery (every minute)
//! - Billing invariant sweep (daily at 5:00 UTC)
//! - Outbox cleanup (daily at 4:00 UTC)

mod outbox_processor;

use std::time::Duration;

use genpire_billing::{BillingEmailService, InvariantChecker, NotificationOutbox};
use sqlx::postgres::PgPoolOptions;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

/// Create a database connection pool
async fn create_db_pool() -> anyhow::Result<sqlx::PgPool> {
    #[allow(clippy::expect_used)] // Fail-fast on startup if required config is missing
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&database_url)
        .await?;

    info!("Database pool created");
    Ok(pool)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    info!("Starting Genpire Worker");

    let pool = create_db_pool().await?;

    let outbox = NotificationOutbox::new(pool.clone());
    let email = BillingEmailService::from_env();
    if !email.is_enabled() {
        warn!("RESEND_API_KEY not set - notifications will be claimed but not delivered");
    }

    let scheduler = JobScheduler::new().await?;

    // Job 1: Deliver outbox notifications every minute
    let outbox_job = outbox.clone();
    let email_job = email.clone();
    scheduler
        .add(Job::new_async("0 * * * * *", move |_uuid, _l| {
            let outbox = outbox_job.clone();
            let email = email_job.clone();
            Box::pin(async move {
                outbox_processor::process_outbox(&outbox, &email).await;
            })
        })?)
        .await?;
    info!("Scheduled: Notification outbox delivery (every minute)");

    // Job 2: Billing invariant sweep daily at 5:00 UTC
    let invariant_pool = pool.clone();
    scheduler
        .add(Job::new_async("0 0 5 * * *", move |_uuid, _l| {
            let pool = invariant_pool.clone();
            Box::pin(async move {
                info!("Running billing invariant checks");
                let checker = InvariantChecker::new(pool);
                match checker.run_all_checks().await {
                    Ok(summary) if summary.healthy => {
                        info!(
                            checks_run = summary.checks_run,
                            "All billing invariants hold"
                        );
                    }
                    Ok(summary) => {
                        for violation in &summary.violations {
                            error!(
                                invariant = %violation.invariant,
                                severity = %violation.severity,
                                description = %violation.description,
                                context = %violation.context,
                                "Billing invariant violated"
                            );
                        }
                        error!(
                            checks_failed = summary.checks_failed,
                            violations = summary.violations.len(),
                            "Billing invariant sweep found violations"
                        );
                    }
                    Err(e) => {
                        error!(error = %e, "Billing invariant sweep failed to run");
                    }
                }
            })
        })?)
        .await?;
    info!("Scheduled: Billing invariant sweep (daily 5:00 UTC)");

    // Job 3: Outbox cleanup daily at 4:00 UTC
    let cleanup_outbox = outbox.clone();
    scheduler
        .add(Job::new_async("0 0 4 * * *", move |_uuid, _l| {
            let outbox = cleanup_outbox.clone();
            Box::pin(async move {
                match outbox.cleanup(30).await {
                    Ok(deleted) if deleted > 0 => {
                        info!(deleted = deleted, "Cleaned up old outbox entries");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "Outbox cleanup failed");
                    }
                }
            })
        })?)
        .await?;
    info!("Scheduled: Outbox cleanup (daily 4:00 UTC)");

    scheduler.start().await?;
    info!("Worker started, all jobs scheduled");

    // Keep the worker alive
    loop {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        info!("Worker heartbeat");
    }
}
