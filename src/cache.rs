//! Local billing cache.
//!
//! The backend is the durable source of truth; this cache only smooths
//! reads between round trips. Three rules keep it honest:
//!
//! - Writes carry the sequence number of the request that produced them
//!   and are discarded if a newer response already landed, so "last
//!   response wins" is decided by completion order, never issuance order.
//! - After any mutating call the affected entries are invalidated (or
//!   replaced by the backend's authoritative response), never patched.
//! - Reads past the TTL, or served while the backend is unreachable, are
//!   marked stale so they can never be mistaken for fresh data.

use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::invoice::Invoice;
use crate::quota::QuotaInfo;
use crate::subscription::Subscription;

/// A cached value together with its provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot<T> {
    /// The cached value.
    pub value: T,
    /// When the value was fetched from the backend.
    pub fetched_at: DateTime<Utc>,
    /// True once the entry is older than the cache TTL or was served as
    /// a fallback while the backend was unreachable.
    pub stale: bool,
}

#[derive(Debug, Clone)]
struct Entry<T> {
    value: T,
    fetched_at: DateTime<Utc>,
    seq: u64,
}

/// Cache for the entities the orchestrator reads.
///
/// Explicitly constructed and passed in; there is no ambient singleton
/// billing state anywhere in this crate.
#[derive(Debug)]
pub struct BillingCache {
    ttl: chrono::Duration,
    subscription: RwLock<Option<Entry<Subscription>>>,
    quota: RwLock<Option<Entry<QuotaInfo>>>,
    invoices: RwLock<Option<Entry<Vec<Invoice>>>>,
}

impl BillingCache {
    /// Create a cache whose entries go stale after `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl: chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX),
            subscription: RwLock::new(None),
            quota: RwLock::new(None),
            invoices: RwLock::new(None),
        }
    }

    /// Read the cached subscription, if any.
    #[must_use]
    pub fn subscription(&self, now: DateTime<Utc>) -> Option<Snapshot<Subscription>> {
        read(&self.subscription, now, self.ttl)
    }

    /// Read the cached quota snapshot, if any.
    #[must_use]
    pub fn quota(&self, now: DateTime<Utc>) -> Option<Snapshot<QuotaInfo>> {
        read(&self.quota, now, self.ttl)
    }

    /// Read the cached invoice list, if any.
    #[must_use]
    pub fn invoices(&self, now: DateTime<Utc>) -> Option<Snapshot<Vec<Invoice>>> {
        read(&self.invoices, now, self.ttl)
    }

    /// Store a subscription fetched by request `seq`. Returns false when
    /// a response from a newer request already landed.
    pub fn store_subscription(
        &self,
        value: Subscription,
        now: DateTime<Utc>,
        seq: u64,
    ) -> bool {
        store(&self.subscription, value, now, seq)
    }

    /// Store a quota snapshot fetched by request `seq`.
    pub fn store_quota(&self, value: QuotaInfo, now: DateTime<Utc>, seq: u64) -> bool {
        store(&self.quota, value, now, seq)
    }

    /// Store an invoice list fetched by request `seq`.
    pub fn store_invoices(&self, value: Vec<Invoice>, now: DateTime<Utc>, seq: u64) -> bool {
        store(&self.invoices, value, now, seq)
    }

    /// Drop the cached subscription.
    pub fn invalidate_subscription(&self) {
        self.subscription.write().unwrap().take();
    }

    /// Drop the cached quota snapshot.
    pub fn invalidate_quota(&self) {
        self.quota.write().unwrap().take();
    }

    /// Drop the cached invoice list.
    pub fn invalidate_invoices(&self) {
        self.invoices.write().unwrap().take();
    }

    /// Drop everything.
    pub fn invalidate_all(&self) {
        self.invalidate_subscription();
        self.invalidate_quota();
        self.invalidate_invoices();
    }
}

fn read<T: Clone>(
    slot: &RwLock<Option<Entry<T>>>,
    now: DateTime<Utc>,
    ttl: chrono::Duration,
) -> Option<Snapshot<T>> {
    let guard = slot.read().unwrap();
    guard.as_ref().map(|entry| Snapshot {
        value: entry.value.clone(),
        fetched_at: entry.fetched_at,
        stale: now - entry.fetched_at > ttl,
    })
}

fn store<T>(slot: &RwLock<Option<Entry<T>>>, value: T, now: DateTime<Utc>, seq: u64) -> bool {
    let mut guard = slot.write().unwrap();
    if let Some(existing) = guard.as_ref() {
        if existing.seq > seq {
            return false;
        }
    }
    *guard = Some(Entry {
        value,
        fetched_at: now,
        seq,
    });
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plans::{BillingCycle, PlanTier};
    use crate::subscription::SubscriptionStatus;
    use chrono::Duration as ChronoDuration;
    use rust_decimal::Decimal;
    use uuid::Uuid;

    fn sample_subscription(now: DateTime<Utc>) -> Subscription {
        Subscription {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            plan_id: Uuid::new_v4(),
            tier: PlanTier::Pro,
            cycle: BillingCycle::Monthly,
            status: SubscriptionStatus::Active,
            current_period_start: now,
            current_period_end: now + ChronoDuration::days(30),
            trial_start: None,
            trial_end: None,
            cancel_at_period_end: false,
            cancelled_at: None,
            auto_renew: true,
            unit_price: Decimal::new(2900, 2),
            quantity: 1,
        }
    }

    #[test]
    fn test_ttl_marks_stale() {
        let cache = BillingCache::new(Duration::from_secs(60));
        let now = Utc::now();
        cache.store_subscription(sample_subscription(now), now, 1);

        let fresh = cache.subscription(now + ChronoDuration::seconds(30)).unwrap();
        assert!(!fresh.stale);

        let stale = cache.subscription(now + ChronoDuration::seconds(90)).unwrap();
        assert!(stale.stale);
    }

    #[test]
    fn test_out_of_order_response_discarded() {
        let cache = BillingCache::new(Duration::from_secs(60));
        let now = Utc::now();

        let newer = sample_subscription(now);
        let older = sample_subscription(now);

        // Request 2 completes first, then request 1's response arrives late.
        assert!(cache.store_subscription(newer.clone(), now, 2));
        assert!(!cache.store_subscription(older, now, 1));

        assert_eq!(cache.subscription(now).unwrap().value.id, newer.id);
    }

    #[test]
    fn test_invalidation() {
        let cache = BillingCache::new(Duration::from_secs(60));
        let now = Utc::now();
        cache.store_subscription(sample_subscription(now), now, 1);
        assert!(cache.subscription(now).is_some());

        cache.invalidate_subscription();
        assert!(cache.subscription(now).is_none());
    }

    #[test]
    fn test_same_seq_overwrites() {
        // A refetch after invalidation reuses the slot even at equal seq.
        let cache = BillingCache::new(Duration::from_secs(60));
        let now = Utc::now();
        let first = sample_subscription(now);
        let second = sample_subscription(now);
        assert!(cache.store_subscription(first, now, 3));
        assert!(cache.store_subscription(second.clone(), now, 3));
        assert_eq!(cache.subscription(now).unwrap().value.id, second.id);
    }
}
