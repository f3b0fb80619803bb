//! Payment settlement attempts.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{BillingError, Result};

/// Payment status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Created, not yet submitted to the gateway.
    Pending,
    /// Submitted, awaiting gateway result.
    Processing,
    /// Settled successfully.
    Completed,
    /// Gateway declined or errored.
    Failed,
    /// Abandoned before settlement.
    Cancelled,
    /// Settled and later reversed.
    Refunded,
}

impl PaymentStatus {
    /// Convert to the wire string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Refunded => "refunded",
        }
    }

    /// Check whether a transition to `to` is legal from this state.
    #[must_use]
    pub fn can_transition_to(&self, to: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, to),
            (Pending, Processing)
                | (Pending, Cancelled)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Completed, Refunded)
        )
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = PaymentStatusParseError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            "refunded" => Ok(Self::Refunded),
            _ => Err(PaymentStatusParseError(s.to_string())),
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when parsing an unknown payment status string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentStatusParseError(pub String);

impl std::fmt::Display for PaymentStatusParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Unknown payment status: {}", self.0)
    }
}

impl std::error::Error for PaymentStatusParseError {}

/// Supported payment gateways.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentProvider {
    Stripe,
    Paypal,
    /// Invoiced manually, settled out of band.
    Manual,
}

impl PaymentProvider {
    /// Convert to the wire string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stripe => "stripe",
            Self::Paypal => "paypal",
            Self::Manual => "manual",
        }
    }
}

impl std::fmt::Display for PaymentProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One settlement attempt against an invoice or checkout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    /// Payment identifier.
    pub id: Uuid,
    /// Paying user.
    pub user_id: Uuid,
    /// Invoice this payment settles, if any.
    pub invoice_id: Option<Uuid>,
    /// Gateway that processed the attempt.
    pub provider: PaymentProvider,
    /// Lifecycle status.
    pub status: PaymentStatus,
    /// Gross amount charged.
    pub amount: Decimal,
    /// ISO 4217 currency code, lowercase.
    pub currency: String,
    /// Gateway fee taken from the gross amount.
    pub fee: Decimal,
    /// `amount - fee`.
    pub net_amount: Decimal,
    /// When the attempt was created.
    pub created_at: DateTime<Utc>,
    /// When the attempt reached a final state.
    pub settled_at: Option<DateTime<Utc>>,
    /// Gateway failure reason, set on `Failed`.
    pub failure_reason: Option<String>,
}

impl Payment {
    /// Check if the payment settled successfully.
    #[must_use]
    pub fn is_successful(&self) -> bool {
        self.status == PaymentStatus::Completed
    }

    /// Check if the attempt ended without settling.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self.status, PaymentStatus::Failed | PaymentStatus::Cancelled)
    }

    /// Transition to a new status, guarded by the legality matrix.
    pub fn transition(&mut self, to: PaymentStatus, now: DateTime<Utc>) -> Result<()> {
        if !self.status.can_transition_to(to) {
            return Err(BillingError::Conflict {
                message: format!(
                    "payment {} cannot move from {} to {}",
                    self.id, self.status, to
                ),
            });
        }
        if matches!(
            to,
            PaymentStatus::Completed | PaymentStatus::Failed | PaymentStatus::Cancelled
        ) {
            self.settled_at = Some(now);
        }
        self.status = to;
        Ok(())
    }
}
