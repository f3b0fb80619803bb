//! Audit logging for billing operations.
//!
//! Trait-based so applications can route billing events to their own
//! compliance sink; the [`TracingAuditLogger`] covers the common case of
//! structured logs.

use std::fmt;

use uuid::Uuid;

/// Audit event types for billing operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditEvent {
    /// Subscription created through checkout or upgrade-from-nothing.
    SubscriptionCreated {
        subscription_id: Uuid,
        plan_tier: String,
    },
    /// Subscription cancelled, immediately or at period end.
    SubscriptionCancelled {
        subscription_id: Uuid,
        at_period_end: bool,
    },
    /// Subscription moved to a higher tier.
    SubscriptionUpgraded {
        subscription_id: Uuid,
        from_tier: String,
        to_tier: String,
    },
    /// A scheduled cancellation was reverted.
    SubscriptionResumed { subscription_id: Uuid },
    /// A usage event was tracked.
    UsageTracked {
        record_id: Uuid,
        kind: String,
        idempotency_key: Uuid,
    },
    /// An invoice was generated.
    InvoiceGenerated { invoice_id: Uuid, number: String },
    /// An invoice PDF was downloaded.
    InvoiceDownloaded { invoice_id: Uuid },
}

impl fmt::Display for AuditEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SubscriptionCreated {
                subscription_id,
                plan_tier,
            } => {
                write!(f, "Subscription created: sub={}, tier={}", subscription_id, plan_tier)
            }
            Self::SubscriptionCancelled {
                subscription_id,
                at_period_end,
            } => {
                write!(
                    f,
                    "Subscription cancelled: sub={}, at_period_end={}",
                    subscription_id, at_period_end
                )
            }
            Self::SubscriptionUpgraded {
                subscription_id,
                from_tier,
                to_tier,
            } => {
                write!(
                    f,
                    "Subscription upgraded: sub={}, {} -> {}",
                    subscription_id, from_tier, to_tier
                )
            }
            Self::SubscriptionResumed { subscription_id } => {
                write!(f, "Subscription resumed: sub={}", subscription_id)
            }
            Self::UsageTracked {
                record_id,
                kind,
                idempotency_key,
            } => {
                write!(
                    f,
                    "Usage tracked: record={}, kind={}, key={}",
                    record_id, kind, idempotency_key
                )
            }
            Self::InvoiceGenerated { invoice_id, number } => {
                write!(f, "Invoice generated: invoice={}, number={}", invoice_id, number)
            }
            Self::InvoiceDownloaded { invoice_id } => {
                write!(f, "Invoice downloaded: invoice={}", invoice_id)
            }
        }
    }
}

/// Trait for audit logging backends.
///
/// Implementations should handle failures gracefully (e.g., log to
/// stderr) to avoid disrupting billing operations.
#[allow(async_fn_in_trait)]
pub trait AuditLogger: Send + Sync {
    /// Log a billing audit event.
    async fn log(&self, event: AuditEvent);
}

/// No-op audit logger that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpAuditLogger;

impl AuditLogger for NoOpAuditLogger {
    async fn log(&self, _event: AuditEvent) {
        // No-op
    }
}

/// Tracing-based audit logger.
///
/// Logs audit events using the `tracing` crate at INFO level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditLogger;

impl AuditLogger for TracingAuditLogger {
    async fn log(&self, event: AuditEvent) {
        tracing::info!(
            target: "tollgate::audit",
            event_type = event_kind(&event),
            "{}", event
        );
    }
}

/// Get the event kind as a string for structured logging.
fn event_kind(event: &AuditEvent) -> &'static str {
    match event {
        AuditEvent::SubscriptionCreated { .. } => "subscription_created",
        AuditEvent::SubscriptionCancelled { .. } => "subscription_cancelled",
        AuditEvent::SubscriptionUpgraded { .. } => "subscription_upgraded",
        AuditEvent::SubscriptionResumed { .. } => "subscription_resumed",
        AuditEvent::UsageTracked { .. } => "usage_tracked",
        AuditEvent::InvoiceGenerated { .. } => "invoice_generated",
        AuditEvent::InvoiceDownloaded { .. } => "invoice_downloaded",
    }
}
