//! Common types used across Genpire billing services

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// ID Wrappers
// =============================================================================

/// User ID wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for UserId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Enums
// =============================================================================

/// Billing cadence of a credit record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PlanType {
    Monthly,
    Yearly,
    OneTime,
}

impl PlanType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
            Self::OneTime => "one_time",
        }
    }

    /// Whether this plan renews at the payment provider
    pub fn is_subscription(&self) -> bool {
        !matches!(self, Self::OneTime)
    }
}

impl std::fmt::Display for PlanType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PlanType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "monthly" => Ok(Self::Monthly),
            "yearly" | "annual" => Ok(Self::Yearly),
            "one_time" | "onetime" => Ok(Self::OneTime),
            other => Err(format!("Unknown plan type: {}", other)),
        }
    }
}

/// Lifecycle status of a credit record; monotonic active -> expired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Active,
    Expired,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Expired => "expired",
        }
    }
}

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Membership tier for a purchase
/// Pricing ladder: Saver (75 credits) -> Pro (150) -> Super (150 + perks)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MembershipTier {
    Saver,
    Pro,
    Super,
}

impl MembershipTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Saver => "saver",
            Self::Pro => "pro",
            Self::Super => "super",
        }
    }
}

impl std::fmt::Display for MembershipTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for MembershipTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "saver" => Ok(Self::Saver),
            "pro" => Ok(Self::Pro),
            "super" => Ok(Self::Super),
            other => Err(format!("Unknown membership tier: {}", other)),
        }
    }
}

/// Payment provider backing a credit record
/// A NULL provider column on legacy rows means PayPal by convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Polar,
    Paypal,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Polar => "polar",
            Self::Paypal => "paypal",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "polar" => Ok(Self::Polar),
            "paypal" => Ok(Self::Paypal),
            other => Err(format!("Unknown payment provider: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_plan_type_round_trip() {
        assert_eq!(PlanType::from_str("yearly").unwrap(), PlanType::Yearly);
        assert_eq!(PlanType::from_str("annual").unwrap(), PlanType::Yearly);
        assert_eq!(PlanType::OneTime.as_str(), "one_time");
        assert!(PlanType::from_str("weekly").is_err());
    }

    #[test]
    fn test_plan_type_is_subscription() {
        assert!(PlanType::Monthly.is_subscription());
        assert!(PlanType::Yearly.is_subscription());
        assert!(!PlanType::OneTime.is_subscription());
    }

    #[test]
    fn test_membership_tier_parse() {
        assert_eq!(
            MembershipTier::from_str("PRO").unwrap(),
            MembershipTier::Pro
        );
        assert_eq!(MembershipTier::Super.to_string(), "super");
    }

    #[test]
    fn test_provider_kind_parse() {
        assert_eq!(ProviderKind::from_str("polar").unwrap(), ProviderKind::Polar);
        assert_eq!(ProviderKind::Paypal.as_str(), "paypal");
        assert!(ProviderKind::from_str("stripe").is_err());
    }
}
