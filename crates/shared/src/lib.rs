#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Shared types and database utilities for Genpire services

pub mod db;
pub mod types;

pub use db::{create_migration_pool, create_pool, run_migrations};
pub use types::{MembershipTier, PlanType, ProviderKind, RecordStatus, UserId};
