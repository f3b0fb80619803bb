//! Billing backend client contract.
//!
//! The orchestrator talks to the external billing backend exclusively
//! through [`BillingApiClient`]. The production implementation is
//! [`LiveBillingClient`](crate::live_client::LiveBillingClient); a
//! [`MockBillingClient`](test::MockBillingClient) backed by in-memory
//! state is available for tests.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::invoice::Invoice;
use crate::payment::PaymentProvider;
use crate::plans::{BillingCycle, PlanTier, PricingPlan};
use crate::quota::QuotaUsage;
use crate::subscription::Subscription;
use crate::usage::UsageRecord;

/// Request payload for subscription creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateSubscriptionRequest {
    /// Plan tier to subscribe to.
    pub tier: PlanTier,
    /// Billing interval.
    pub cycle: BillingCycle,
    /// Gateway that will collect payment.
    pub provider: PaymentProvider,
    /// Stored payment method; required unless the plan is free.
    pub payment_method_id: Option<String>,
    /// Caller-supplied context, validated at the boundary.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// What a generated invoice bills for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceKind {
    /// The recurring subscription charge for a period.
    Subscription,
    /// Metered usage charges over a period.
    Usage,
    /// A manually assembled statement.
    Manual,
}

impl InvoiceKind {
    /// Convert to the wire string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Subscription => "subscription",
            Self::Usage => "usage",
            Self::Manual => "manual",
        }
    }
}

/// Request payload for invoice generation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerateInvoiceRequest {
    /// What the invoice bills for.
    pub kind: InvoiceKind,
    /// Billing window start; defaults to the current period on the backend.
    pub period_start: Option<DateTime<Utc>>,
    /// Billing window end.
    pub period_end: Option<DateTime<Utc>>,
}

/// Operations the external billing backend must support.
///
/// All calls are one request/response round trip; the backend is the
/// durable source of truth and every mutation returns the authoritative
/// post-mutation entity.
pub trait BillingApiClient: Send + Sync {
    /// Fetch the published plan catalog.
    async fn list_plans(&self) -> Result<Vec<PricingPlan>>;

    /// Fetch the caller's current subscription, if any.
    async fn current_subscription(&self) -> Result<Option<Subscription>>;

    /// Create a subscription.
    ///
    /// Fails with `PaymentRequired` when a paid plan has no payment
    /// method and `NotFound` for an unknown plan.
    async fn create_subscription(&self, request: CreateSubscriptionRequest)
        -> Result<Subscription>;

    /// Cancel a subscription, immediately or at period end.
    async fn cancel_subscription(
        &self,
        subscription_id: Uuid,
        at_period_end: bool,
    ) -> Result<Subscription>;

    /// Move a subscription to a higher tier. The backend recomputes
    /// proration and resets the billing anchor.
    async fn upgrade_subscription(
        &self,
        subscription_id: Uuid,
        new_tier: PlanTier,
    ) -> Result<Subscription>;

    /// Revert a scheduled cancel-at-period-end.
    async fn resume_subscription(&self, subscription_id: Uuid) -> Result<Subscription>;

    /// Fetch raw quota counters for the caller.
    async fn quota_usage(&self) -> Result<QuotaUsage>;

    /// Append a usage record.
    ///
    /// Deduplicated on the record's idempotency key: a backend duplicate
    /// response is treated as success, so retrying after a timeout is
    /// safe and counts the event at most once.
    async fn track_usage(&self, record: &UsageRecord) -> Result<()>;

    /// List the caller's invoices.
    async fn list_invoices(&self) -> Result<Vec<Invoice>>;

    /// Generate an invoice for a period.
    async fn generate_invoice(&self, request: GenerateInvoiceRequest) -> Result<Invoice>;

    /// Download the rendered PDF for an invoice the caller owns.
    async fn download_invoice(&self, invoice_id: Uuid) -> Result<Vec<u8>>;
}

/// Mock billing backend for testing.
#[cfg(any(test, feature = "test-billing"))]
pub mod test {
    use super::*;
    use crate::error::BillingError;
    use crate::invoice::{InvoiceLineItem, InvoiceStatus};
    use crate::plans::Plans;
    use crate::quota::{QuotaResource, ResourceCounters};
    use crate::subscription::SubscriptionStatus;
    use chrono::Duration;
    use rust_decimal::Decimal;
    use std::collections::{BTreeMap, HashSet};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Arc, Mutex, RwLock};

    /// In-memory stand-in for the billing backend.
    ///
    /// Holds the durable state a real backend would (subscription,
    /// usage counters, invoices) and reproduces its contract: guarded
    /// transitions respond with `Conflict`, duplicate usage keys are
    /// absorbed, and terminal subscriptions reject mutation.
    #[derive(Clone)]
    pub struct MockBillingClient {
        inner: Arc<MockInner>,
    }

    struct MockInner {
        plans: Plans,
        subscription: RwLock<Option<Subscription>>,
        usage_records: RwLock<Vec<UsageRecord>>,
        seen_keys: RwLock<HashSet<Uuid>>,
        counters: RwLock<BTreeMap<QuotaResource, ResourceCounters>>,
        invoices: RwLock<Vec<Invoice>>,
        invoice_counter: AtomicU64,
        quota_calls: AtomicU64,
        fail_next: Mutex<Option<BillingError>>,
    }

    impl Default for MockBillingClient {
        fn default() -> Self {
            Self::with_plans(default_catalog())
        }
    }

    /// The catalog the mock serves unless one is supplied.
    pub fn default_catalog() -> Plans {
        Plans::builder()
            .plan(PlanTier::Free, BillingCycle::Monthly)
                .name("Free")
                .api_call_limit(1_000)
                .done()
            .plan(PlanTier::Pro, BillingCycle::Monthly)
                .name("Pro")
                .price(Decimal::new(2900, 2), "usd")
                .features(["api_access"])
                .trial_days(14)
                .api_call_limit(100_000)
                .token_limit(5_000_000)
                .done()
            .plan(PlanTier::Enterprise, BillingCycle::Monthly)
                .name("Enterprise")
                .price(Decimal::new(49900, 2), "usd")
                .features(["api_access", "sso"])
                .api_call_limit(0)
                .done()
            .build()
    }

    impl MockBillingClient {
        /// Create a mock serving the default catalog.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Create a mock serving a specific catalog.
        #[must_use]
        pub fn with_plans(plans: Plans) -> Self {
            let mut counters = BTreeMap::new();
            for resource in [QuotaResource::ApiCalls, QuotaResource::Tokens] {
                counters.insert(
                    resource,
                    ResourceCounters {
                        limit: 0,
                        used: 0,
                        reset_at: None,
                    },
                );
            }
            Self {
                inner: Arc::new(MockInner {
                    plans,
                    subscription: RwLock::new(None),
                    usage_records: RwLock::new(Vec::new()),
                    seen_keys: RwLock::new(HashSet::new()),
                    counters: RwLock::new(counters),
                    invoices: RwLock::new(Vec::new()),
                    invoice_counter: AtomicU64::new(0),
                    quota_calls: AtomicU64::new(0),
                    fail_next: Mutex::new(None),
                }),
            }
        }

        /// Make the next call fail with the given error.
        pub fn fail_next(&self, err: BillingError) {
            *self.inner.fail_next.lock().unwrap() = Some(err);
        }

        /// Seed a subscription directly (for tests).
        pub fn seed_subscription(&self, subscription: Subscription) {
            *self.inner.subscription.write().unwrap() = Some(subscription);
        }

        /// All usage records accepted so far (for tests).
        pub fn usage_records(&self) -> Vec<UsageRecord> {
            self.inner.usage_records.read().unwrap().clone()
        }

        /// How many times the quota endpoint was hit (for tests).
        pub fn quota_call_count(&self) -> u64 {
            self.inner.quota_calls.load(Ordering::SeqCst)
        }

        fn take_failure(&self) -> Result<()> {
            match self.inner.fail_next.lock().unwrap().take() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }

        fn require_subscription(&self, subscription_id: Uuid) -> Result<Subscription> {
            let guard = self.inner.subscription.read().unwrap();
            match guard.as_ref() {
                Some(sub) if sub.id == subscription_id => Ok(sub.clone()),
                _ => Err(BillingError::NotFound {
                    entity: "subscription",
                    id: subscription_id.to_string(),
                }),
            }
        }

        fn limits_for_active_plan(&self) -> BTreeMap<QuotaResource, i64> {
            let mut limits = BTreeMap::new();
            let guard = self.inner.subscription.read().unwrap();
            if let Some(sub) = guard.as_ref() {
                if let Some(plan) = self.inner.plans.get(sub.tier, sub.cycle) {
                    limits.insert(
                        QuotaResource::ApiCalls,
                        plan.limits.api_calls.unwrap_or(0),
                    );
                    limits.insert(QuotaResource::Tokens, plan.limits.tokens.unwrap_or(0));
                    limits.insert(
                        QuotaResource::Storage,
                        plan.limits.storage_mb.unwrap_or(0),
                    );
                }
            }
            limits
        }
    }

    impl BillingApiClient for MockBillingClient {
        async fn list_plans(&self) -> Result<Vec<PricingPlan>> {
            self.take_failure()?;
            Ok(self.inner.plans.iter().cloned().collect())
        }

        async fn current_subscription(&self) -> Result<Option<Subscription>> {
            self.take_failure()?;
            Ok(self.inner.subscription.read().unwrap().clone())
        }

        async fn create_subscription(
            &self,
            request: CreateSubscriptionRequest,
        ) -> Result<Subscription> {
            self.take_failure()?;
            let plan = self
                .inner
                .plans
                .find(request.tier, request.cycle)
                .ok_or(BillingError::NotFound {
                    entity: "plan",
                    id: format!("{}/{}", request.tier, request.cycle),
                })?;

            if !plan.is_free() && request.payment_method_id.is_none() {
                return Err(BillingError::PaymentRequired {
                    message: "a payment method is required for paid plans".to_string(),
                });
            }

            let now = Utc::now();
            let trial = plan.trial_days.filter(|d| *d > 0);
            let subscription = Subscription {
                id: Uuid::new_v4(),
                user_id: Uuid::new_v4(),
                plan_id: plan.id,
                tier: plan.tier,
                cycle: plan.cycle,
                status: if trial.is_some() {
                    SubscriptionStatus::Trial
                } else {
                    SubscriptionStatus::Active
                },
                current_period_start: now,
                current_period_end: now + Duration::days(plan.cycle.period_days()),
                trial_start: trial.map(|_| now),
                trial_end: trial.map(|d| now + Duration::days(i64::from(d))),
                cancel_at_period_end: false,
                cancelled_at: None,
                auto_renew: true,
                unit_price: plan.price,
                quantity: 1,
            };

            *self.inner.subscription.write().unwrap() = Some(subscription.clone());
            Ok(subscription)
        }

        async fn cancel_subscription(
            &self,
            subscription_id: Uuid,
            at_period_end: bool,
        ) -> Result<Subscription> {
            self.take_failure()?;
            let mut sub = self.require_subscription(subscription_id)?;
            if sub.status.is_terminal() {
                return Err(BillingError::Conflict {
                    message: format!("subscription is already {}", sub.status),
                });
            }

            let now = Utc::now();
            if at_period_end {
                sub.cancel_at_period_end = true;
                sub.cancelled_at = Some(now);
            } else {
                sub.status = SubscriptionStatus::Cancelled;
                sub.cancelled_at = Some(now);
                sub.cancel_at_period_end = false;
            }

            *self.inner.subscription.write().unwrap() = Some(sub.clone());
            Ok(sub)
        }

        async fn upgrade_subscription(
            &self,
            subscription_id: Uuid,
            new_tier: PlanTier,
        ) -> Result<Subscription> {
            self.take_failure()?;
            let mut sub = self.require_subscription(subscription_id)?;
            if sub.status.is_terminal() {
                return Err(BillingError::Conflict {
                    message: format!("subscription is {}", sub.status),
                });
            }

            let plan = self
                .inner
                .plans
                .find(new_tier, sub.cycle)
                .ok_or(BillingError::NotFound {
                    entity: "plan",
                    id: format!("{}/{}", new_tier, sub.cycle),
                })?;

            // Upgrade resets the billing anchor.
            let now = Utc::now();
            sub.plan_id = plan.id;
            sub.tier = plan.tier;
            sub.unit_price = plan.price;
            sub.current_period_start = now;
            sub.current_period_end = now + Duration::days(plan.cycle.period_days());
            if sub.status == SubscriptionStatus::Trial {
                sub.status = SubscriptionStatus::Active;
                sub.trial_end = Some(now);
            }

            *self.inner.subscription.write().unwrap() = Some(sub.clone());
            Ok(sub)
        }

        async fn resume_subscription(&self, subscription_id: Uuid) -> Result<Subscription> {
            self.take_failure()?;
            let mut sub = self.require_subscription(subscription_id)?;
            if !sub.cancel_at_period_end {
                return Err(BillingError::Conflict {
                    message: "subscription is not scheduled for cancellation".to_string(),
                });
            }
            sub.cancel_at_period_end = false;
            sub.cancelled_at = None;
            *self.inner.subscription.write().unwrap() = Some(sub.clone());
            Ok(sub)
        }

        async fn quota_usage(&self) -> Result<QuotaUsage> {
            self.take_failure()?;
            self.inner.quota_calls.fetch_add(1, Ordering::SeqCst);

            let limits = self.limits_for_active_plan();
            let mut resources = self.inner.counters.read().unwrap().clone();
            for (resource, limit) in limits {
                resources
                    .entry(resource)
                    .or_insert(ResourceCounters {
                        limit: 0,
                        used: 0,
                        reset_at: None,
                    })
                    .limit = limit;
            }

            let features = {
                let guard = self.inner.subscription.read().unwrap();
                guard
                    .as_ref()
                    .and_then(|sub| self.inner.plans.get(sub.tier, sub.cycle))
                    .map(|plan| plan.features.iter().cloned().collect())
                    .unwrap_or_default()
            };

            Ok(QuotaUsage {
                resources,
                rate_limit: None,
                features,
            })
        }

        async fn track_usage(&self, record: &UsageRecord) -> Result<()> {
            self.take_failure()?;

            // Duplicate key: already applied, report success without
            // touching the counters.
            {
                let mut seen = self.inner.seen_keys.write().unwrap();
                if !seen.insert(record.idempotency_key) {
                    return Ok(());
                }
            }

            self.inner.usage_records.write().unwrap().push(record.clone());

            let mut counters = self.inner.counters.write().unwrap();
            let entry = counters
                .entry(QuotaResource::ApiCalls)
                .or_insert(ResourceCounters {
                    limit: 0,
                    used: 0,
                    reset_at: None,
                });
            entry.used += 1;
            if record.total_tokens > 0 {
                let entry = counters
                    .entry(QuotaResource::Tokens)
                    .or_insert(ResourceCounters {
                        limit: 0,
                        used: 0,
                        reset_at: None,
                    });
                entry.used += record.total_tokens as i64;
            }
            Ok(())
        }

        async fn list_invoices(&self) -> Result<Vec<Invoice>> {
            self.take_failure()?;
            Ok(self.inner.invoices.read().unwrap().clone())
        }

        async fn generate_invoice(&self, request: GenerateInvoiceRequest) -> Result<Invoice> {
            self.take_failure()?;
            let guard = self.inner.subscription.read().unwrap();
            let sub = guard.as_ref().ok_or(BillingError::Validation {
                message: "no subscription to invoice".to_string(),
            })?;

            let currency = self
                .inner
                .plans
                .get(sub.tier, sub.cycle)
                .map(|p| p.currency.clone())
                .unwrap_or_else(|| "usd".to_string());
            let seq = self.inner.invoice_counter.fetch_add(1, Ordering::SeqCst) + 1;
            let now = Utc::now();
            let mut invoice = Invoice::draft(
                sub.user_id,
                Some(sub.id),
                format!("INV-{:04}", seq),
                vec![InvoiceLineItem::new(
                    format!("{} ({}, {})", request.kind.as_str(), sub.tier, sub.cycle),
                    sub.quantity,
                    sub.unit_price,
                )],
                Decimal::ZERO,
                currency,
            );
            invoice
                .issue(now, now + Duration::days(30))
                .expect("fresh draft is issuable");
            debug_assert_eq!(invoice.status, InvoiceStatus::Pending);

            self.inner.invoices.write().unwrap().push(invoice.clone());
            Ok(invoice)
        }

        async fn download_invoice(&self, invoice_id: Uuid) -> Result<Vec<u8>> {
            self.take_failure()?;
            let invoices = self.inner.invoices.read().unwrap();
            let invoice = invoices
                .iter()
                .find(|inv| inv.id == invoice_id)
                .ok_or(BillingError::NotFound {
                    entity: "invoice",
                    id: invoice_id.to_string(),
                })?;
            Ok(format!("%PDF-1.4 mock invoice {}", invoice.number).into_bytes())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test::MockBillingClient;
    use super::*;
    use crate::error::BillingError;
    use crate::usage::UsageKind;

    fn pro_request() -> CreateSubscriptionRequest {
        CreateSubscriptionRequest {
            tier: PlanTier::Pro,
            cycle: BillingCycle::Monthly,
            provider: PaymentProvider::Stripe,
            payment_method_id: Some("pm_test_visa".to_string()),
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_create_requires_payment_method_for_paid_plan() {
        let client = MockBillingClient::new();
        let mut request = pro_request();
        request.payment_method_id = None;

        let err = client.create_subscription(request).await.unwrap_err();
        assert!(matches!(err, BillingError::PaymentRequired { .. }));

        // Free plan needs none.
        let free = CreateSubscriptionRequest {
            tier: PlanTier::Free,
            cycle: BillingCycle::Monthly,
            provider: PaymentProvider::Manual,
            payment_method_id: None,
            metadata: HashMap::new(),
        };
        assert!(client.create_subscription(free).await.is_ok());
    }

    #[tokio::test]
    async fn test_trial_plan_starts_in_trial() {
        let client = MockBillingClient::new();
        let sub = client.create_subscription(pro_request()).await.unwrap();
        assert!(sub.is_trial());
        assert!(sub.trial_end.is_some());
    }

    #[tokio::test]
    async fn test_duplicate_usage_key_absorbed() {
        let client = MockBillingClient::new();
        let record = UsageRecord::new(Uuid::new_v4(), UsageKind::ApiCall, Utc::now());

        client.track_usage(&record).await.unwrap();
        client.track_usage(&record).await.unwrap();

        assert_eq!(client.usage_records().len(), 1);
    }

    #[tokio::test]
    async fn test_download_unknown_invoice_is_not_found() {
        let client = MockBillingClient::new();
        let err = client.download_invoice(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, BillingError::NotFound { .. }));
    }
}
