//! Metered usage events.
//!
//! Usage records are append-only: once tracked they are never mutated.
//! Each record carries a client-generated idempotency key so a retry
//! after a timeout lands as the same logical event on the backend and
//! quota counters increment at most once.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What kind of resource an event metered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageKind {
    ApiCall,
    TokenUsage,
    Storage,
    Bandwidth,
}

impl UsageKind {
    /// Convert to the wire string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ApiCall => "api_call",
            Self::TokenUsage => "token_usage",
            Self::Storage => "storage",
            Self::Bandwidth => "bandwidth",
        }
    }
}

impl std::str::FromStr for UsageKind {
    type Err = UsageKindParseError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "api_call" => Ok(Self::ApiCall),
            "token_usage" => Ok(Self::TokenUsage),
            "storage" => Ok(Self::Storage),
            "bandwidth" => Ok(Self::Bandwidth),
            _ => Err(UsageKindParseError(s.to_string())),
        }
    }
}

impl std::fmt::Display for UsageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when parsing an unknown usage kind string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageKindParseError(pub String);

impl std::fmt::Display for UsageKindParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Unknown usage kind: {}", self.0)
    }
}

impl std::error::Error for UsageKindParseError {}

/// One metered event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Record identifier.
    pub id: Uuid,
    /// User the usage is attributed to.
    pub user_id: Uuid,
    /// API key that produced the usage, if keyed.
    pub api_key_id: Option<Uuid>,
    /// Resource kind.
    pub kind: UsageKind,
    /// Prompt-side tokens.
    pub input_tokens: u64,
    /// Completion-side tokens.
    pub output_tokens: u64,
    /// `input_tokens + output_tokens`.
    pub total_tokens: u64,
    /// Request payload size in bytes.
    pub request_bytes: u64,
    /// Response payload size in bytes.
    pub response_bytes: u64,
    /// End-to-end latency in milliseconds.
    pub response_time_ms: u64,
    /// HTTP status of the metered call.
    pub status_code: u16,
    /// Computed cost of the event.
    pub cost: Decimal,
    /// When the event occurred.
    pub recorded_at: DateTime<Utc>,
    /// Client-generated dedupe key; retries reuse it so the backend
    /// applies the event at most once.
    pub idempotency_key: Uuid,
}

impl UsageRecord {
    /// Create a record for a metered event, generating a fresh
    /// idempotency key.
    #[must_use]
    pub fn new(user_id: Uuid, kind: UsageKind, recorded_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            api_key_id: None,
            kind,
            input_tokens: 0,
            output_tokens: 0,
            total_tokens: 0,
            request_bytes: 0,
            response_bytes: 0,
            response_time_ms: 0,
            status_code: 200,
            cost: Decimal::ZERO,
            recorded_at,
            idempotency_key: Uuid::new_v4(),
        }
    }

    /// Set token counts, keeping the total consistent.
    #[must_use]
    pub fn with_tokens(mut self, input: u64, output: u64) -> Self {
        self.input_tokens = input;
        self.output_tokens = output;
        self.total_tokens = input + output;
        self
    }

    /// Set request/response payload sizes.
    #[must_use]
    pub fn with_payload_sizes(mut self, request_bytes: u64, response_bytes: u64) -> Self {
        self.request_bytes = request_bytes;
        self.response_bytes = response_bytes;
        self
    }

    /// Set the HTTP status of the metered call.
    #[must_use]
    pub fn with_status_code(mut self, status_code: u16) -> Self {
        self.status_code = status_code;
        self
    }

    /// Set the computed cost.
    #[must_use]
    pub fn with_cost(mut self, cost: Decimal) -> Self {
        self.cost = cost;
        self
    }

    /// Attribute the usage to an API key.
    #[must_use]
    pub fn with_api_key(mut self, api_key_id: Uuid) -> Self {
        self.api_key_id = Some(api_key_id);
        self
    }

    /// Check if the metered call succeeded (2xx).
    #[must_use]
    pub fn is_successful(&self) -> bool {
        (200..=299).contains(&self.status_code)
    }
}
