//! Billing error taxonomy.
//!
//! Every orchestrator operation surfaces one of these variants; nothing is
//! silently swallowed or defaulted. The classification helpers
//! (`is_client_error`, `is_server_error`, `is_retryable`) let callers decide
//! between surfacing an actionable message and retrying.

use rust_decimal::Decimal;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BillingError>;

/// Errors produced by billing operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BillingError {
    /// Malformed request (bad plan type, negative quantity, invalid id).
    /// Surfaced immediately, never retried.
    #[error("Validation failed: {message}")]
    Validation { message: String },

    /// Subscription creation blocked on a missing or invalid payment method.
    #[error("Payment required: {message}")]
    PaymentRequired { message: String },

    /// Operation illegal in the subscription's current lifecycle state.
    /// The caller must re-fetch current state before deciding what to do.
    #[error("Subscription in state '{status}' does not allow {operation}")]
    InvalidSubscriptionState { status: String, operation: String },

    /// Operation illegal in the invoice's current lifecycle state.
    #[error("Invoice in state '{status}' does not allow {operation}")]
    InvalidInvoiceState { status: String, operation: String },

    /// Referenced entity does not exist or does not belong to the caller.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Optimistic-concurrency failure on a state transition. The caller
    /// should re-fetch and decide whether to retry.
    #[error("Conflict: {message}")]
    Conflict { message: String },

    /// Transport-level failure (connection refused, DNS, TLS, aborted).
    #[error("Network error during '{operation}': {message}")]
    Network { operation: String, message: String },

    /// The request did not complete within the configured timeout.
    #[error("Operation '{operation}' timed out after {seconds} seconds")]
    Timeout { operation: String, seconds: u64 },

    /// Payment application would exceed the invoice total.
    #[error("Overpayment on invoice {invoice_id}: {attempted} exceeds outstanding {outstanding}")]
    Overpayment {
        invoice_id: String,
        attempted: Decimal,
        outstanding: Decimal,
    },

    /// Negative counters or limits fed to the quota engine.
    #[error("Invalid quota input: {message}")]
    InvalidQuotaInput { message: String },

    /// The billing backend returned an error response.
    #[error("Billing API error during '{operation}': {message}")]
    Api {
        operation: String,
        message: String,
        code: Option<String>,
        http_status: Option<u16>,
    },

    /// The live client's circuit breaker is open; the backend is not being
    /// called until the reset timeout elapses.
    #[error("Billing backend unavailable: {message}")]
    Unavailable { message: String },

    /// An unexpected internal error occurred.
    #[error("Internal billing error: {message}")]
    Internal { message: String },
}

impl BillingError {
    /// Check if this is a client error (the request itself was wrong).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        match self {
            Self::Validation { .. }
            | Self::PaymentRequired { .. }
            | Self::InvalidSubscriptionState { .. }
            | Self::InvalidInvoiceState { .. }
            | Self::NotFound { .. }
            | Self::Overpayment { .. }
            | Self::InvalidQuotaInput { .. } => true,
            Self::Api { http_status, .. } => {
                matches!(http_status, Some(400..=499))
            }
            _ => false,
        }
    }

    /// Check if this is a server-side error.
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        match self {
            Self::Internal { .. } | Self::Unavailable { .. } => true,
            Self::Api { http_status, .. } => {
                matches!(http_status, Some(500..=599) | None)
            }
            _ => false,
        }
    }

    /// Check if this error is safe to retry.
    ///
    /// Transient transport failures and rate-limit/server responses are
    /// retryable; everything else requires the caller to change the request
    /// or re-fetch state first. Mutating operations must only be retried
    /// with the same idempotency key.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } | Self::Timeout { .. } => true,
            Self::Api { http_status, .. } => {
                matches!(http_status, Some(429) | Some(500..=599))
            }
            _ => false,
        }
    }

    /// Shorthand for a validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Shorthand for an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}
