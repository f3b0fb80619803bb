//! Subscription lifecycle.
//!
//! A subscription binds a user to a plan for a billing period. Status
//! transitions are guarded: callers name the state they expect to leave,
//! and an illegal transition is rejected instead of overwritten. Day
//! counts are derived at read time from the stored timestamps, always in
//! UTC, and are never persisted.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{BillingError, Result};
use crate::plans::{BillingCycle, PlanTier};

/// Subscription status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    /// In trial period, not yet charged.
    Trial,
    /// Active and paid.
    Active,
    /// Renewal payment failed; grace period running.
    PastDue,
    /// Grace period exhausted without payment.
    Unpaid,
    /// Cancelled by the user. Terminal.
    Cancelled,
    /// Lapsed without renewal or trial conversion. Terminal.
    Expired,
}

impl SubscriptionStatus {
    /// Convert to the wire string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trial => "trial",
            Self::Active => "active",
            Self::PastDue => "past_due",
            Self::Unpaid => "unpaid",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }

    /// Check if no further transitions are possible from this state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Expired)
    }

    /// Check whether a transition to `to` is legal from this state.
    ///
    /// Expiry is reachable from every non-terminal state; the rest of the
    /// matrix follows the renewal/grace flow.
    #[must_use]
    pub fn can_transition_to(&self, to: SubscriptionStatus) -> bool {
        use SubscriptionStatus::*;
        match (self, to) {
            (Trial, Active) => true,
            (Active, PastDue) => true,
            (PastDue, Active) => true,
            (PastDue, Unpaid) => true,
            (Active, Cancelled) => true,
            (from, Expired) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl std::str::FromStr for SubscriptionStatus {
    type Err = SubscriptionStatusParseError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "trial" | "trialing" => Ok(Self::Trial),
            "active" => Ok(Self::Active),
            "past_due" => Ok(Self::PastDue),
            "unpaid" => Ok(Self::Unpaid),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            "expired" => Ok(Self::Expired),
            _ => Err(SubscriptionStatusParseError(s.to_string())),
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when parsing an unknown subscription status string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionStatusParseError(pub String);

impl std::fmt::Display for SubscriptionStatusParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Unknown subscription status: {}", self.0)
    }
}

impl std::error::Error for SubscriptionStatusParseError {}

/// A user's binding to a plan for a billing period.
///
/// Only stored fields live here; `is_active`, `days_until_renewal` and
/// friends are computed from them at read time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    /// Subscription identifier.
    pub id: Uuid,
    /// Owning user.
    pub user_id: Uuid,
    /// Catalog plan this subscription is bound to.
    pub plan_id: Uuid,
    /// Plan tier, denormalized for tier comparisons.
    pub tier: PlanTier,
    /// Billing interval.
    pub cycle: BillingCycle,
    /// Lifecycle status.
    pub status: SubscriptionStatus,
    /// Current billing period start.
    pub current_period_start: DateTime<Utc>,
    /// Current billing period end.
    pub current_period_end: DateTime<Utc>,
    /// Trial start, if the subscription began with a trial.
    pub trial_start: Option<DateTime<Utc>>,
    /// Trial end; must be set whenever `status` is `Trial`.
    pub trial_end: Option<DateTime<Utc>>,
    /// Deferred cancellation: remain active until the period lapses.
    pub cancel_at_period_end: bool,
    /// When cancellation was requested.
    pub cancelled_at: Option<DateTime<Utc>>,
    /// Whether the period rolls forward automatically.
    pub auto_renew: bool,
    /// Price per unit per period.
    pub unit_price: Decimal,
    /// Number of units.
    pub quantity: u32,
}

impl Subscription {
    /// Validate the stored-field invariants.
    pub fn validate(&self) -> Result<()> {
        if self.current_period_end <= self.current_period_start {
            return Err(BillingError::validation(
                "current_period_end must be after current_period_start",
            ));
        }
        if self.status == SubscriptionStatus::Trial && self.trial_end.is_none() {
            return Err(BillingError::validation(
                "trial subscriptions must carry a trial_end",
            ));
        }
        if self.quantity == 0 {
            return Err(BillingError::validation("quantity must be at least 1"));
        }
        if self.unit_price.is_sign_negative() {
            return Err(BillingError::validation("unit_price must not be negative"));
        }
        Ok(())
    }

    /// Check if the subscription is usable (active or trialing).
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(
            self.status,
            SubscriptionStatus::Active | SubscriptionStatus::Trial
        )
    }

    /// Check if the subscription is in its trial period.
    #[must_use]
    pub fn is_trial(&self) -> bool {
        self.status == SubscriptionStatus::Trial
    }

    /// Check if the subscription has lapsed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.status == SubscriptionStatus::Expired
    }

    /// Check if the subscription will cancel when the period ends.
    #[must_use]
    pub fn will_cancel(&self) -> bool {
        self.cancel_at_period_end
    }

    /// Days until the current period renews, rounded up. Zero once the
    /// period end has passed.
    #[must_use]
    pub fn days_until_renewal(&self, now: DateTime<Utc>) -> i64 {
        ceil_days(self.current_period_end, now)
    }

    /// Days of trial remaining, rounded up: any fraction of a day counts
    /// as a day, so `trial_end = now + 3 days` reports 3. `None` when not
    /// in trial.
    #[must_use]
    pub fn days_in_trial(&self, now: DateTime<Utc>) -> Option<i64> {
        if !self.is_trial() {
            return None;
        }
        self.trial_end.map(|end| ceil_days(end, now))
    }

    /// Fold time-driven transitions into the stored status.
    ///
    /// The stored status can lag reality between backend syncs: a trial
    /// whose `trial_end` has passed, or an active subscription whose
    /// period lapsed. Reads go through this so a stale `Trial` or
    /// `Active` is never reported past its deadline.
    #[must_use]
    pub fn effective_status(&self, now: DateTime<Utc>) -> SubscriptionStatus {
        use SubscriptionStatus::*;
        match self.status {
            Trial => match self.trial_end {
                Some(end) if now >= end => Expired,
                _ => Trial,
            },
            Active if now >= self.current_period_end => {
                if self.cancel_at_period_end {
                    Cancelled
                } else if self.auto_renew {
                    // Renewal is the backend's job; until the refreshed
                    // period arrives the subscription still reads active.
                    Active
                } else {
                    Expired
                }
            }
            PastDue | Unpaid if now >= self.current_period_end => Expired,
            other => other,
        }
    }

    /// Return a copy with `status` replaced by the effective status.
    #[must_use]
    pub fn with_effective_status(mut self, now: DateTime<Utc>) -> Self {
        let effective = self.effective_status(now);
        if effective != self.status && effective == SubscriptionStatus::Cancelled {
            self.cancelled_at.get_or_insert(self.current_period_end);
        }
        self.status = effective;
        self
    }

    /// Transition to a new status, guarded by the legality matrix.
    ///
    /// Rejects with [`BillingError::InvalidSubscriptionState`] instead of
    /// overwriting; callers racing a webhook re-fetch and retry.
    pub fn transition(&mut self, to: SubscriptionStatus, now: DateTime<Utc>) -> Result<()> {
        if !self.status.can_transition_to(to) {
            return Err(BillingError::InvalidSubscriptionState {
                status: self.status.as_str().to_string(),
                operation: format!("transition to {}", to.as_str()),
            });
        }
        if to == SubscriptionStatus::Cancelled {
            self.cancelled_at.get_or_insert(now);
        }
        self.status = to;
        Ok(())
    }

    /// Guard an operation against terminal states.
    ///
    /// Upgrades, cancellations and resumes are meaningless on a cancelled
    /// or expired subscription; a new subscription must be created instead.
    pub fn ensure_operable(&self, operation: &str) -> Result<()> {
        if self.status.is_terminal() {
            return Err(BillingError::InvalidSubscriptionState {
                status: self.status.as_str().to_string(),
                operation: operation.to_string(),
            });
        }
        Ok(())
    }
}

/// Whole days from `now` until `end`, rounded up, clamped at zero.
fn ceil_days(end: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let secs = (end - now).num_seconds();
    if secs <= 0 {
        0
    } else {
        (secs + 86_399) / 86_400
    }
}
