//! Tollgate - billing domain model and client orchestration for SaaS apps
//!
//! Tollgate implements the billing side of a SaaS dashboard as a plain
//! library: plan catalog, subscription and invoice lifecycles, metered
//! usage with quota alerting, and an async orchestrator that talks to an
//! external billing backend over HTTP JSON while keeping a local cache
//! consistent.
//!
//! # Features
//!
//! - **Domain types**: plans, subscriptions, invoices, payments, usage
//!   records, with their invariants enforced in constructors and guarded
//!   transitions
//! - **Quota engine**: pure computation of usage percentages and
//!   threshold warnings from raw counters
//! - **Orchestrator**: sequences backend calls, invalidates the cache
//!   after mutations, coalesces concurrent refreshes, and falls back to
//!   last-known-good snapshots marked stale
//! - **Live client**: reqwest-based backend client with retries, a
//!   circuit breaker, and idempotency keys for usage tracking
//! - **Testing**: an in-memory mock backend behind the `test-billing`
//!   feature
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use tollgate::{
//!     BillingCache, BillingCycle, BillingOrchestrator, LiveBillingClient,
//!     PaymentProvider, PlanTier,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     tollgate::init_tracing();
//!
//!     let client = LiveBillingClient::with_default_config(
//!         "https://api.example.com",
//!         std::env::var("BILLING_API_TOKEN")?,
//!     )?;
//!     let billing = BillingOrchestrator::new(
//!         client,
//!         BillingCache::new(Duration::from_secs(60)),
//!     );
//!
//!     let subscription = billing
//!         .create_subscription(
//!             PlanTier::Pro,
//!             BillingCycle::Monthly,
//!             PaymentProvider::Stripe,
//!             Some("pm_123".to_string()),
//!         )
//!         .await?;
//!     println!("subscribed to {}", subscription.tier);
//!
//!     let quota = billing.quota_status().await?;
//!     for warning in &quota.value.warnings {
//!         eprintln!("{}", warning.message);
//!     }
//!     Ok(())
//! }
//! ```

#![allow(async_fn_in_trait)] // client and audit traits are used via generics

pub mod audit;
pub mod cache;
pub mod client;
mod error;
pub mod invoice;
pub mod live_client;
pub mod orchestrator;
pub mod payment;
pub mod plans;
pub mod quota;
pub mod subscription;
pub mod usage;
pub mod validation;

// Re-exports for public API
pub use audit::{AuditEvent, AuditLogger, NoOpAuditLogger, TracingAuditLogger};
pub use cache::{BillingCache, Snapshot};
pub use client::{
    BillingApiClient, CreateSubscriptionRequest, GenerateInvoiceRequest, InvoiceKind,
};
pub use error::{BillingError, Result};
pub use invoice::{Invoice, InvoiceLineItem, InvoiceStatus, InvoiceStatusParseError};
pub use live_client::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, InvalidApiTokenError, LiveBillingClient,
    LiveBillingClientConfig,
};
pub use orchestrator::{BillingOrchestrator, ReconcileDifference, ReconcileResult};
pub use payment::{Payment, PaymentProvider, PaymentStatus, PaymentStatusParseError};
pub use plans::{
    BillingCycle, BillingCycleParseError, PlanBuilder, PlanLimits, PlanTier, PlanTierParseError,
    Plans, PlansBuilder, PricingPlan,
};
pub use quota::{
    QuotaEngine, QuotaInfo, QuotaResource, QuotaSeverity, QuotaUsage, QuotaWarning, RateLimit,
    ResourceCounters, ResourceQuota, DEFAULT_CRITICAL_THRESHOLD, DEFAULT_WARNING_THRESHOLD,
};
pub use subscription::{Subscription, SubscriptionStatus, SubscriptionStatusParseError};
pub use usage::{UsageKind, UsageKindParseError, UsageRecord};

// Test exports
#[cfg(any(test, feature = "test-billing"))]
pub use client::test::MockBillingClient;

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing/logging with sensible defaults
///
/// This should be called early in your application, typically in main().
///
/// # Environment Variables
///
/// - `RUST_LOG`: Set log level (e.g., "info", "debug", "tollgate=debug")
/// - `TOLLGATE_LOG_JSON`: Set to "true" for JSON formatted logs
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json_logs = std::env::var("TOLLGATE_LOG_JSON")
        .map(|v| v.parse::<bool>().unwrap_or(false))
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
