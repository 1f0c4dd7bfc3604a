// Billing crate clippy configuration
#![allow(clippy::too_many_arguments)] // Payment audit rows carry many columns
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Genpire Billing Module
//!
//! The credit ledger behind Genpire's plans: every purchase or
//! subscription period is one `user_credits` row, and this crate
//! reconciles those rows into a single summary, cancels subscriptions at
//! the provider, and records purchases with credit carry-over.
//!
//! ## Features
//!
//! - **Ledger Reconciliation**: one pure function interprets a user's
//!   credit rows (totals, representative record, stale-row cleanup)
//! - **Cancellation**: soft-cancel at Polar or PayPal, access kept until
//!   period end
//! - **Purchase Recording**: transactional carry-over, payment audit,
//!   offer consumption
//! - **Webhooks**: verified Polar `order.paid` ingestion
//! - **Email Notifications**: purchase and cancellation confirmations,
//!   delivered through a transactional outbox
//! - **Invariants**: runnable consistency checks over the ledger

pub mod cancel;
pub mod email;
pub mod error;
pub mod invariants;
pub mod ledger;
pub mod outbox;
pub mod period;
pub mod providers;
pub mod purchase;
pub mod records;
pub mod webhooks;


pub use cancel::{CancellationOutcome, CancellationService, CANCELLATION_CONFIRMATION};
pub use email::{BillingEmailService, EmailConfig};
pub use error::{BillingError, BillingResult};
pub use invariants::{InvariantCheckSummary, InvariantChecker, InvariantViolation, ViolationSeverity};
pub use ledger::{CreditSummary, LedgerService};
pub use outbox::{NotificationOutbox, PendingNotification};
pub use providers::{
    PayPalClient, PayPalConfig, PolarClient, PolarConfig, ProviderAdapter, ProviderRegistry,
};
pub use purchase::{NewPurchase, PurchaseOutcome, PurchaseService, PURCHASE_CONFIRMATION};
pub use records::{CreditRecord, CreditStore, NewCreditRecord};
pub use webhooks::PolarWebhookHandler;

use std::sync::Arc;

use sqlx::PgPool;

/// Everything the API and worker need, wired from one pool and config
#[derive(Clone)]
pub struct BillingService {
    pub ledger: LedgerService,
    pub cancellation: CancellationService,
    pub purchases: PurchaseService,
    pub webhooks: PolarWebhookHandler,
    pub outbox: NotificationOutbox,
    pub store: CreditStore,
}

impl BillingService {
    pub fn new(
        pool: PgPool,
        polar: PolarConfig,
        paypal: PayPalConfig,
        polar_webhook_secret: String,
    ) -> Self {
        let store = CreditStore::new(pool.clone());
        let outbox = NotificationOutbox::new(pool);
        let providers = ProviderRegistry::new(
            Arc::new(PolarClient::new(polar)),
            Arc::new(PayPalClient::new(paypal)),
        );
        let purchases = PurchaseService::new(store.clone(), outbox.clone());

        Self {
            ledger: LedgerService::new(store.clone()),
            cancellation: CancellationService::new(store.clone(), providers, outbox.clone()),
            webhooks: PolarWebhookHandler::new(polar_webhook_secret, purchases.clone()),
            purchases,
            outbox,
            store,
        }
    }
}
