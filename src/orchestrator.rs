//! Billing orchestrator.
//!
//! Sequences operations against the billing backend and keeps the local
//! [`BillingCache`] consistent. The backend is the durable source of
//! truth: every mutation stores the backend's authoritative response and
//! invalidates derived entities (quota, invoices) instead of patching
//! them locally, and a failed or aborted call writes nothing, so the
//! cache can never hold a partial update.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use tollgate::{
//!     BillingCache, BillingOrchestrator, BillingCycle, LiveBillingClient,
//!     PaymentProvider, PlanTier,
//! };
//!
//! let client = LiveBillingClient::with_default_config(base_url, token)?;
//! let billing = BillingOrchestrator::new(client, BillingCache::new(Duration::from_secs(60)));
//!
//! let sub = billing
//!     .create_subscription(
//!         PlanTier::Pro,
//!         BillingCycle::Monthly,
//!         PaymentProvider::Stripe,
//!         Some("pm_123".to_string()),
//!     )
//!     .await?;
//!
//! let quota = billing.quota_status().await?;
//! for warning in &quota.value.warnings {
//!     println!("{}", warning.message);
//! }
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::audit::{AuditEvent, AuditLogger, NoOpAuditLogger};
use crate::cache::{BillingCache, Snapshot};
use crate::client::{
    BillingApiClient, CreateSubscriptionRequest, GenerateInvoiceRequest, InvoiceKind,
};
use crate::error::{BillingError, Result};
use crate::invoice::Invoice;
use crate::payment::PaymentProvider;
use crate::plans::{BillingCycle, PlanTier, Plans};
use crate::quota::{QuotaEngine, QuotaInfo};
use crate::subscription::Subscription;
use crate::usage::UsageRecord;
use crate::validation::{validate_metadata, validate_payment_method_id};

/// Client-side billing action layer.
///
/// Holds no durable state beyond the injected cache; construct one per
/// authenticated session (the caller identity lives in the client's
/// credentials).
pub struct BillingOrchestrator<C: BillingApiClient, A: AuditLogger = NoOpAuditLogger> {
    client: C,
    cache: BillingCache,
    audit: A,
    engine: QuotaEngine,
    /// Monotonic request counter; responses carry their request's number
    /// so a slow response cannot clobber a newer one.
    request_seq: AtomicU64,
    /// Set while a quota refresh is in flight so concurrent dashboard
    /// timers coalesce onto one request.
    quota_refresh_in_flight: AtomicBool,
}

impl<C: BillingApiClient> BillingOrchestrator<C, NoOpAuditLogger> {
    /// Create an orchestrator without audit logging.
    #[must_use]
    pub fn new(client: C, cache: BillingCache) -> Self {
        Self::with_audit(client, cache, NoOpAuditLogger)
    }
}

impl<C: BillingApiClient, A: AuditLogger> BillingOrchestrator<C, A> {
    /// Create an orchestrator with an audit logger.
    #[must_use]
    pub fn with_audit(client: C, cache: BillingCache, audit: A) -> Self {
        Self {
            client,
            cache,
            audit,
            engine: QuotaEngine::new(),
            request_seq: AtomicU64::new(0),
            quota_refresh_in_flight: AtomicBool::new(false),
        }
    }

    /// Replace the quota engine (custom thresholds).
    #[must_use]
    pub fn with_quota_engine(mut self, engine: QuotaEngine) -> Self {
        self.engine = engine;
        self
    }

    fn next_seq(&self) -> u64 {
        self.request_seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Fetch the plan catalog.
    pub async fn plans(&self) -> Result<Plans> {
        let fetched = self.client.list_plans().await?;
        Ok(Plans::from_fetched(fetched))
    }

    /// The caller's current subscription, with time-driven transitions
    /// folded in so a lapsed trial never reads as `Trial`.
    ///
    /// Serves the cache while fresh. When the backend is unreachable the
    /// last-known-good snapshot is returned marked stale rather than
    /// pretending there is no subscription.
    pub async fn subscription(&self) -> Result<Option<Snapshot<Subscription>>> {
        let now = Utc::now();
        if let Some(snap) = self.cache.subscription(now) {
            if !snap.stale {
                return Ok(Some(effective_view(snap, now)));
            }
        }

        let seq = self.next_seq();
        match self.client.current_subscription().await {
            Ok(Some(sub)) => {
                let fetched_at = Utc::now();
                self.cache.store_subscription(sub.clone(), fetched_at, seq);
                Ok(Some(Snapshot {
                    value: sub.with_effective_status(fetched_at),
                    fetched_at,
                    stale: false,
                }))
            }
            Ok(None) => {
                self.cache.invalidate_subscription();
                Ok(None)
            }
            Err(err) if err.is_retryable() => match self.cache.subscription(now) {
                Some(snap) => Ok(Some(mark_stale(effective_view(snap, now)))),
                None => Err(err),
            },
            Err(err) => Err(err),
        }
    }

    /// Current quota state, read through the quota engine.
    ///
    /// Dashboard refresh timers may fire concurrently; while one refresh
    /// is in flight, others are served the last-known-good snapshot
    /// instead of stacking redundant requests.
    pub async fn quota_status(&self) -> Result<Snapshot<QuotaInfo>> {
        let now = Utc::now();
        if let Some(snap) = self.cache.quota(now) {
            if !snap.stale {
                return Ok(snap);
            }
        }

        let coalesced = self.quota_refresh_in_flight.swap(true, Ordering::SeqCst);
        if coalesced {
            // Another refresh is running. Serve stale data if there is
            // any; with a cold cache there is nothing to coalesce onto,
            // so fall through and fetch (without owning the flag).
            if let Some(snap) = self.cache.quota(now) {
                return Ok(mark_stale(snap));
            }
        }

        let seq = self.next_seq();
        let result = self.client.quota_usage().await;
        if !coalesced {
            self.quota_refresh_in_flight.store(false, Ordering::SeqCst);
        }

        match result {
            Ok(usage) => {
                let fetched_at = Utc::now();
                let info = self.engine.compute(&usage, fetched_at)?;
                self.cache.store_quota(info.clone(), fetched_at, seq);
                Ok(Snapshot {
                    value: info,
                    fetched_at,
                    stale: false,
                })
            }
            Err(err) if err.is_retryable() => match self.cache.quota(now) {
                Some(snap) => Ok(mark_stale(snap)),
                None => Err(err),
            },
            Err(err) => Err(err),
        }
    }

    /// The caller's invoices, with stale fallback on transient failures.
    pub async fn invoices(&self) -> Result<Snapshot<Vec<Invoice>>> {
        let now = Utc::now();
        if let Some(snap) = self.cache.invoices(now) {
            if !snap.stale {
                return Ok(snap);
            }
        }

        let seq = self.next_seq();
        match self.client.list_invoices().await {
            Ok(invoices) => {
                let fetched_at = Utc::now();
                self.cache.store_invoices(invoices.clone(), fetched_at, seq);
                Ok(Snapshot {
                    value: invoices,
                    fetched_at,
                    stale: false,
                })
            }
            Err(err) if err.is_retryable() => match self.cache.invoices(now) {
                Some(snap) => Ok(mark_stale(snap)),
                None => Err(err),
            },
            Err(err) => Err(err),
        }
    }

    /// Download the rendered PDF for an invoice the caller owns.
    pub async fn download_invoice(&self, invoice_id: Uuid) -> Result<Vec<u8>> {
        let bytes = self.client.download_invoice(invoice_id).await?;
        self.audit
            .log(AuditEvent::InvoiceDownloaded { invoice_id })
            .await;
        Ok(bytes)
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Create a subscription.
    ///
    /// Paid tiers require a payment method up front; the check runs
    /// before any network traffic so the common mistake fails fast.
    pub async fn create_subscription(
        &self,
        tier: PlanTier,
        cycle: BillingCycle,
        provider: PaymentProvider,
        payment_method_id: Option<String>,
    ) -> Result<Subscription> {
        self.create_subscription_with_metadata(
            tier,
            cycle,
            provider,
            payment_method_id,
            HashMap::new(),
        )
        .await
    }

    /// Create a subscription with caller-supplied metadata.
    pub async fn create_subscription_with_metadata(
        &self,
        tier: PlanTier,
        cycle: BillingCycle,
        provider: PaymentProvider,
        payment_method_id: Option<String>,
        metadata: HashMap<String, String>,
    ) -> Result<Subscription> {
        if let Some(ref id) = payment_method_id {
            validate_payment_method_id(id)?;
        }
        validate_metadata(&metadata)?;
        if tier != PlanTier::Free && payment_method_id.is_none() {
            return Err(BillingError::PaymentRequired {
                message: format!("the {} plan requires a payment method", tier),
            });
        }

        let subscription = self
            .client
            .create_subscription(CreateSubscriptionRequest {
                tier,
                cycle,
                provider,
                payment_method_id,
                metadata,
            })
            .await?;

        self.apply_subscription_mutation(&subscription);
        self.audit
            .log(AuditEvent::SubscriptionCreated {
                subscription_id: subscription.id,
                plan_tier: subscription.tier.as_str().to_string(),
            })
            .await;
        Ok(subscription)
    }

    /// Cancel a subscription, immediately or at period end.
    ///
    /// Guarded by the known current state: cancelling an already
    /// terminal subscription fails locally with
    /// [`BillingError::InvalidSubscriptionState`] and touches nothing.
    pub async fn cancel_subscription(
        &self,
        subscription_id: Uuid,
        at_period_end: bool,
    ) -> Result<Subscription> {
        let current = self.require_subscription(subscription_id).await?;
        current.ensure_operable("cancel")?;

        let subscription = self
            .client
            .cancel_subscription(subscription_id, at_period_end)
            .await?;

        self.apply_subscription_mutation(&subscription);
        self.audit
            .log(AuditEvent::SubscriptionCancelled {
                subscription_id,
                at_period_end,
            })
            .await;
        Ok(subscription)
    }

    /// Move a subscription to a higher tier.
    ///
    /// Downgrades are a distinct flow and are rejected here; the backend
    /// recomputes proration and resets the billing anchor, so the cache
    /// takes the returned entity wholesale.
    pub async fn upgrade_subscription(
        &self,
        subscription_id: Uuid,
        new_tier: PlanTier,
    ) -> Result<Subscription> {
        let current = self.require_subscription(subscription_id).await?;
        current.ensure_operable("upgrade")?;
        if new_tier <= current.tier {
            return Err(BillingError::validation(format!(
                "cannot change {} to {} through upgrade; downgrades are a separate operation",
                current.tier, new_tier
            )));
        }

        let from_tier = current.tier;
        let subscription = self
            .client
            .upgrade_subscription(subscription_id, new_tier)
            .await?;

        self.apply_subscription_mutation(&subscription);
        self.audit
            .log(AuditEvent::SubscriptionUpgraded {
                subscription_id,
                from_tier: from_tier.as_str().to_string(),
                to_tier: subscription.tier.as_str().to_string(),
            })
            .await;
        Ok(subscription)
    }

    /// Revert a scheduled cancel-at-period-end.
    pub async fn resume_subscription(&self, subscription_id: Uuid) -> Result<Subscription> {
        let current = self.require_subscription(subscription_id).await?;
        current.ensure_operable("resume")?;
        if !current.cancel_at_period_end {
            return Err(BillingError::validation(
                "subscription is not scheduled for cancellation",
            ));
        }

        let subscription = self.client.resume_subscription(subscription_id).await?;
        self.apply_subscription_mutation(&subscription);
        self.audit
            .log(AuditEvent::SubscriptionResumed { subscription_id })
            .await;
        Ok(subscription)
    }

    /// Track a metered usage event.
    ///
    /// Safe to retry after a timeout: the record's idempotency key makes
    /// the backend apply it at most once, and a duplicate response is
    /// already success by the time it reaches here.
    pub async fn track_usage(&self, record: &UsageRecord) -> Result<()> {
        self.client.track_usage(record).await?;
        // Counters moved server-side; recompute on next read.
        self.cache.invalidate_quota();
        self.audit
            .log(AuditEvent::UsageTracked {
                record_id: record.id,
                kind: record.kind.as_str().to_string(),
                idempotency_key: record.idempotency_key,
            })
            .await;
        Ok(())
    }

    /// Generate an invoice for a period.
    pub async fn generate_invoice(
        &self,
        kind: InvoiceKind,
        period_start: Option<DateTime<Utc>>,
        period_end: Option<DateTime<Utc>>,
    ) -> Result<Invoice> {
        if let (Some(start), Some(end)) = (period_start, period_end) {
            if end <= start {
                return Err(BillingError::validation(
                    "invoice period end must be after period start",
                ));
            }
        }

        let invoice = self
            .client
            .generate_invoice(GenerateInvoiceRequest {
                kind,
                period_start,
                period_end,
            })
            .await?;

        self.cache.invalidate_invoices();
        self.audit
            .log(AuditEvent::InvoiceGenerated {
                invoice_id: invoice.id,
                number: invoice.number.clone(),
            })
            .await;
        Ok(invoice)
    }

    // ------------------------------------------------------------------
    // Reconciliation
    // ------------------------------------------------------------------

    /// Compare the cached subscription with the backend's view.
    ///
    /// Useful as a periodic health check to catch missed invalidations.
    /// With `update_local`, divergence is resolved by taking the
    /// backend's state.
    pub async fn reconcile(&self, update_local: bool) -> Result<ReconcileResult> {
        let now = Utc::now();
        let local = match self.cache.subscription(now) {
            Some(snap) => snap.value,
            None => return Ok(ReconcileResult::NoLocalSubscription),
        };

        let remote = match self.client.current_subscription().await? {
            Some(sub) => sub,
            None => return Ok(ReconcileResult::NotFoundOnBackend),
        };

        let mut differences = Vec::new();
        if local.status != remote.status {
            differences.push(ReconcileDifference::Status {
                local: local.status.as_str().to_string(),
                remote: remote.status.as_str().to_string(),
            });
        }
        if local.tier != remote.tier {
            differences.push(ReconcileDifference::Tier {
                local: local.tier.as_str().to_string(),
                remote: remote.tier.as_str().to_string(),
            });
        }
        if local.current_period_end != remote.current_period_end {
            differences.push(ReconcileDifference::PeriodEnd {
                local: local.current_period_end,
                remote: remote.current_period_end,
            });
        }
        if local.cancel_at_period_end != remote.cancel_at_period_end {
            differences.push(ReconcileDifference::CancelAtPeriodEnd {
                local: local.cancel_at_period_end,
                remote: remote.cancel_at_period_end,
            });
        }

        if differences.is_empty() {
            return Ok(ReconcileResult::InSync);
        }

        if update_local {
            self.apply_subscription_mutation(&remote);
        }
        Ok(ReconcileResult::Diverged {
            differences,
            updated_local: update_local,
        })
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Resolve the subscription an operation targets, from cache or
    /// backend, verifying it belongs to the caller.
    async fn require_subscription(&self, subscription_id: Uuid) -> Result<Subscription> {
        let now = Utc::now();
        let cached = self
            .cache
            .subscription(now)
            .filter(|snap| !snap.stale)
            .map(|snap| snap.value);

        let subscription = match cached {
            Some(sub) => sub,
            None => {
                let fetched = self.client.current_subscription().await?;
                if let Some(ref sub) = fetched {
                    self.cache
                        .store_subscription(sub.clone(), Utc::now(), self.next_seq());
                }
                fetched.ok_or(BillingError::NotFound {
                    entity: "subscription",
                    id: subscription_id.to_string(),
                })?
            }
        };

        if subscription.id != subscription_id {
            return Err(BillingError::NotFound {
                entity: "subscription",
                id: subscription_id.to_string(),
            });
        }
        Ok(subscription.with_effective_status(now))
    }

    /// Take the backend's post-mutation subscription and drop derived
    /// entities so they are refetched, never locally patched.
    fn apply_subscription_mutation(&self, subscription: &Subscription) {
        let now = Utc::now();
        self.cache
            .store_subscription(subscription.clone(), now, self.next_seq());
        self.cache.invalidate_quota();
    }
}

/// Result of a reconciliation check.
#[derive(Debug, Clone, PartialEq)]
#[must_use]
pub enum ReconcileResult {
    /// Nothing cached locally to compare.
    NoLocalSubscription,
    /// The backend reports no subscription for this caller.
    NotFoundOnBackend,
    /// Local cache matches the backend.
    InSync,
    /// Local cache diverged from the backend.
    Diverged {
        /// Field-level differences found.
        differences: Vec<ReconcileDifference>,
        /// Whether the local cache was updated to match.
        updated_local: bool,
    },
}

/// A field that differs between local cache and backend.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileDifference {
    /// Status differs.
    Status { local: String, remote: String },
    /// Tier differs.
    Tier { local: String, remote: String },
    /// Period end differs.
    PeriodEnd {
        local: DateTime<Utc>,
        remote: DateTime<Utc>,
    },
    /// Cancel-at-period-end flag differs.
    CancelAtPeriodEnd { local: bool, remote: bool },
}

fn effective_view(snap: Snapshot<Subscription>, now: DateTime<Utc>) -> Snapshot<Subscription> {
    Snapshot {
        value: snap.value.with_effective_status(now),
        fetched_at: snap.fetched_at,
        stale: snap.stale,
    }
}

fn mark_stale<T>(snap: Snapshot<T>) -> Snapshot<T> {
    Snapshot {
        stale: true,
        ..snap
    }
}
