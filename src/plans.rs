//! Pricing plan catalog.
//!
//! Plans are immutable catalog entries published by an external catalog
//! management process; the client reads them and binds subscriptions to
//! them, it never creates or edits them.
//!
//! # Example
//!
//! ```rust,ignore
//! use tollgate::{Plans, PlanTier, BillingCycle};
//! use rust_decimal::Decimal;
//!
//! let plans = Plans::builder()
//!     .plan(PlanTier::Pro, BillingCycle::Monthly)
//!         .name("Pro")
//!         .price(Decimal::new(2900, 2), "usd")
//!         .features(["api_access", "priority_support"])
//!         .trial_days(14)
//!         .api_call_limit(100_000)
//!         .done()
//!     .build();
//!
//! let pro = plans.find(PlanTier::Pro, BillingCycle::Monthly).unwrap();
//! assert!(pro.has_feature("api_access"));
//! ```

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Plan tier ordering doubles as the upgrade ordering: a change to a
/// lower tier is a downgrade and is rejected by the upgrade path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanTier {
    Free,
    Pro,
    Enterprise,
}

impl PlanTier {
    /// Convert to the wire string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Pro => "pro",
            Self::Enterprise => "enterprise",
        }
    }
}

impl std::str::FromStr for PlanTier {
    type Err = PlanTierParseError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "free" => Ok(Self::Free),
            "pro" => Ok(Self::Pro),
            "enterprise" => Ok(Self::Enterprise),
            _ => Err(PlanTierParseError(s.to_string())),
        }
    }
}

impl std::fmt::Display for PlanTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when parsing an unknown plan tier string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanTierParseError(pub String);

impl std::fmt::Display for PlanTierParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Unknown plan tier: {}", self.0)
    }
}

impl std::error::Error for PlanTierParseError {}

/// Billing interval for a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingCycle {
    /// Billed monthly.
    Monthly,
    /// Billed yearly.
    Yearly,
}

impl BillingCycle {
    /// Convert to the wire string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
        }
    }

    /// Length of one billing period in days.
    #[must_use]
    pub fn period_days(&self) -> i64 {
        match self {
            Self::Monthly => 30,
            Self::Yearly => 365,
        }
    }
}

impl std::str::FromStr for BillingCycle {
    type Err = BillingCycleParseError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "monthly" | "month" => Ok(Self::Monthly),
            "yearly" | "year" | "annual" => Ok(Self::Yearly),
            _ => Err(BillingCycleParseError(s.to_string())),
        }
    }
}

impl std::fmt::Display for BillingCycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when parsing an unknown billing cycle string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillingCycleParseError(pub String);

impl std::fmt::Display for BillingCycleParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Unknown billing cycle: {}", self.0)
    }
}

impl std::error::Error for BillingCycleParseError {}

/// Per-resource quota ceilings for a plan. `None` means unlimited.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanLimits {
    /// Maximum API calls per billing period.
    pub api_calls: Option<i64>,
    /// Maximum tokens per billing period.
    pub tokens: Option<i64>,
    /// Maximum storage in megabytes.
    pub storage_mb: Option<i64>,
    /// Additional named limits beyond the built-in resources.
    #[serde(default)]
    pub custom: HashMap<String, i64>,
}

impl PlanLimits {
    /// Look up a limit by resource name.
    #[must_use]
    pub fn get(&self, resource: &str) -> Option<i64> {
        match resource {
            "api_calls" => self.api_calls,
            "tokens" => self.tokens,
            "storage_mb" => self.storage_mb,
            other => self.custom.get(other).copied(),
        }
    }
}

/// A published catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingPlan {
    /// Catalog identifier.
    pub id: Uuid,
    /// Display name shown to users.
    pub name: String,
    /// Plan tier.
    pub tier: PlanTier,
    /// Billing interval.
    pub cycle: BillingCycle,
    /// Recurring price per period in `currency`.
    pub price: Decimal,
    /// ISO 4217 currency code, lowercase.
    pub currency: String,
    /// Features available on this plan.
    pub features: HashSet<String>,
    /// Per-resource quota ceilings.
    pub limits: PlanLimits,
    /// Trial period in days (None = no trial).
    pub trial_days: Option<u32>,
    /// One-time setup fee charged on the first invoice.
    pub setup_fee: Decimal,
    /// Whether the plan is available for new subscriptions.
    pub is_active: bool,
    /// Published timestamp.
    pub created_at: DateTime<Utc>,
}

impl PricingPlan {
    /// Check if this plan has a specific feature.
    #[must_use]
    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.contains(feature)
    }

    /// Check if this plan is free of recurring charges.
    #[must_use]
    pub fn is_free(&self) -> bool {
        self.tier == PlanTier::Free || self.price.is_zero()
    }

    /// Check if this plan offers a trial.
    #[must_use]
    pub fn has_trial(&self) -> bool {
        self.trial_days.is_some_and(|d| d > 0)
    }
}

/// The plan catalog, keyed by tier and billing cycle.
#[derive(Debug, Clone, Default)]
pub struct Plans {
    plans: HashMap<(PlanTier, BillingCycle), PricingPlan>,
}

impl Plans {
    /// Create an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder for constructing a catalog in code.
    #[must_use]
    pub fn builder() -> PlansBuilder {
        PlansBuilder::new()
    }

    /// Build a catalog from plans fetched off the backend.
    ///
    /// Inactive plans are kept; `find` filters them out, `get` does not.
    #[must_use]
    pub fn from_fetched(fetched: Vec<PricingPlan>) -> Self {
        let plans = fetched
            .into_iter()
            .map(|p| ((p.tier, p.cycle), p))
            .collect();
        Self { plans }
    }

    /// Add a single plan, replacing any existing entry for its tier/cycle.
    pub fn add(&mut self, plan: PricingPlan) {
        self.plans.insert((plan.tier, plan.cycle), plan);
    }

    /// Find an active plan by tier and cycle.
    #[must_use]
    pub fn find(&self, tier: PlanTier, cycle: BillingCycle) -> Option<&PricingPlan> {
        self.plans
            .get(&(tier, cycle))
            .filter(|p| p.is_active)
    }

    /// Get a plan by tier and cycle regardless of active status.
    #[must_use]
    pub fn get(&self, tier: PlanTier, cycle: BillingCycle) -> Option<&PricingPlan> {
        self.plans.get(&(tier, cycle))
    }

    /// Get a plan by its catalog id.
    #[must_use]
    pub fn get_by_id(&self, id: Uuid) -> Option<&PricingPlan> {
        self.plans.values().find(|p| p.id == id)
    }

    /// Check if any plan exists for a tier.
    #[must_use]
    pub fn contains_tier(&self, tier: PlanTier) -> bool {
        self.plans.keys().any(|(t, _)| *t == tier)
    }

    /// Number of plans in the catalog.
    #[must_use]
    pub fn len(&self) -> usize {
        self.plans.len()
    }

    /// Check if the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }

    /// Iterate over all plans.
    pub fn iter(&self) -> impl Iterator<Item = &PricingPlan> {
        self.plans.values()
    }
}

/// Builder for a [`Plans`] catalog.
#[derive(Debug, Default)]
pub struct PlansBuilder {
    plans: Vec<PricingPlan>,
}

impl PlansBuilder {
    /// Create a new builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start configuring a plan for the given tier and cycle.
    #[must_use]
    pub fn plan(self, tier: PlanTier, cycle: BillingCycle) -> PlanBuilder {
        PlanBuilder {
            parent: self,
            plan: PricingPlan {
                id: Uuid::new_v4(),
                name: String::new(),
                tier,
                cycle,
                price: Decimal::ZERO,
                currency: "usd".to_string(),
                features: HashSet::new(),
                limits: PlanLimits::default(),
                trial_days: None,
                setup_fee: Decimal::ZERO,
                is_active: true,
                created_at: Utc::now(),
            },
        }
    }

    /// Finish and produce the catalog.
    #[must_use]
    pub fn build(self) -> Plans {
        let mut plans = Plans::new();
        for plan in self.plans {
            plans.add(plan);
        }
        plans
    }
}

/// Builder for a single plan within a [`PlansBuilder`].
#[derive(Debug)]
pub struct PlanBuilder {
    parent: PlansBuilder,
    plan: PricingPlan,
}

impl PlanBuilder {
    /// Set the display name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.plan.name = name.into();
        self
    }

    /// Set the recurring price and currency.
    #[must_use]
    pub fn price(mut self, price: Decimal, currency: impl Into<String>) -> Self {
        self.plan.price = price;
        self.plan.currency = currency.into().to_lowercase();
        self
    }

    /// Set the features available on this plan.
    #[must_use]
    pub fn features<I, S>(mut self, features: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.plan.features = features.into_iter().map(Into::into).collect();
        self
    }

    /// Set the trial period in days.
    #[must_use]
    pub fn trial_days(mut self, days: u32) -> Self {
        self.plan.trial_days = Some(days);
        self
    }

    /// Set the one-time setup fee.
    #[must_use]
    pub fn setup_fee(mut self, fee: Decimal) -> Self {
        self.plan.setup_fee = fee;
        self
    }

    /// Set the API call limit per billing period.
    #[must_use]
    pub fn api_call_limit(mut self, limit: i64) -> Self {
        self.plan.limits.api_calls = Some(limit);
        self
    }

    /// Set the token limit per billing period.
    #[must_use]
    pub fn token_limit(mut self, limit: i64) -> Self {
        self.plan.limits.tokens = Some(limit);
        self
    }

    /// Set the storage limit in megabytes.
    #[must_use]
    pub fn storage_limit_mb(mut self, limit: i64) -> Self {
        self.plan.limits.storage_mb = Some(limit);
        self
    }

    /// Set an additional named limit.
    #[must_use]
    pub fn custom_limit(mut self, resource: impl Into<String>, limit: i64) -> Self {
        self.plan.limits.custom.insert(resource.into(), limit);
        self
    }

    /// Mark the plan as unavailable for new subscriptions.
    #[must_use]
    pub fn inactive(mut self) -> Self {
        self.plan.is_active = false;
        self
    }

    /// Finish this plan and return to the catalog builder.
    #[must_use]
    pub fn done(mut self) -> PlansBuilder {
        self.parent.plans.push(self.plan);
        self.parent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_plans() -> Plans {
        Plans::builder()
            .plan(PlanTier::Free, BillingCycle::Monthly)
                .name("Free")
                .api_call_limit(1_000)
                .done()
            .plan(PlanTier::Pro, BillingCycle::Monthly)
                .name("Pro")
                .price(Decimal::new(2900, 2), "usd")
                .features(["api_access", "priority_support"])
                .trial_days(14)
                .api_call_limit(100_000)
                .token_limit(5_000_000)
                .done()
            .plan(PlanTier::Enterprise, BillingCycle::Yearly)
                .name("Enterprise")
                .price(Decimal::new(990000, 2), "usd")
                .features(["api_access", "priority_support", "sso"])
                .done()
            .build()
    }

    #[test]
    fn test_builder_and_lookup() {
        let plans = sample_plans();
        assert_eq!(plans.len(), 3);

        let pro = plans.find(PlanTier::Pro, BillingCycle::Monthly).unwrap();
        assert_eq!(pro.name, "Pro");
        assert_eq!(pro.price, Decimal::new(2900, 2));
        assert!(pro.has_feature("api_access"));
        assert!(!pro.has_feature("sso"));
        assert!(pro.has_trial());
        assert_eq!(pro.limits.get("api_calls"), Some(100_000));
        assert_eq!(pro.limits.get("storage_mb"), None);

        assert!(plans.find(PlanTier::Enterprise, BillingCycle::Monthly).is_none());
        assert!(plans.contains_tier(PlanTier::Enterprise));
    }

    #[test]
    fn test_inactive_plans_hidden_from_find() {
        let plans = Plans::builder()
            .plan(PlanTier::Pro, BillingCycle::Monthly)
                .name("Legacy Pro")
                .inactive()
                .done()
            .build();

        assert!(plans.find(PlanTier::Pro, BillingCycle::Monthly).is_none());
        assert!(plans.get(PlanTier::Pro, BillingCycle::Monthly).is_some());
    }

    #[test]
    fn test_tier_ordering_for_downgrade_checks() {
        assert!(PlanTier::Free < PlanTier::Pro);
        assert!(PlanTier::Pro < PlanTier::Enterprise);
    }

    #[test]
    fn test_free_plan_detection() {
        let plans = sample_plans();
        assert!(plans.find(PlanTier::Free, BillingCycle::Monthly).unwrap().is_free());
        assert!(!plans.find(PlanTier::Pro, BillingCycle::Monthly).unwrap().is_free());
    }

    #[test]
    fn test_tier_round_trip() {
        for tier in [PlanTier::Free, PlanTier::Pro, PlanTier::Enterprise] {
            assert_eq!(tier.as_str().parse::<PlanTier>().unwrap(), tier);
        }
        assert!("platinum".parse::<PlanTier>().is_err());
    }
}
