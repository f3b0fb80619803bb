//! Live billing backend client.
//!
//! Production [`BillingApiClient`] implementation over the backend's
//! HTTP JSON API, with retry logic, secure token handling, a circuit
//! breaker, and error mapping into the crate taxonomy.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde_json::json;
use uuid::Uuid;

use crate::client::{BillingApiClient, CreateSubscriptionRequest, GenerateInvoiceRequest};
use crate::error::{BillingError, Result};
use crate::invoice::Invoice;
use crate::plans::{PlanTier, PricingPlan};
use crate::quota::QuotaUsage;
use crate::subscription::Subscription;
use crate::usage::UsageRecord;

/// Header carrying the client-generated dedupe key for usage tracking.
const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for the live billing client.
#[derive(Debug, Clone)]
pub struct LiveBillingClientConfig {
    /// Maximum number of retry attempts for transient failures.
    pub max_retries: u32,
    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,
    /// Maximum delay between retries in milliseconds.
    pub max_delay_ms: u64,
    /// Request timeout in seconds.
    pub timeout_seconds: u64,
    /// Circuit breaker tuning.
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for LiveBillingClientConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            timeout_seconds: 30,
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl LiveBillingClientConfig {
    /// Create a new config with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum retry attempts.
    #[must_use]
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set base delay for exponential backoff.
    #[must_use]
    pub fn base_delay_ms(mut self, ms: u64) -> Self {
        self.base_delay_ms = ms;
        self
    }

    /// Set maximum delay between retries.
    #[must_use]
    pub fn max_delay_ms(mut self, ms: u64) -> Self {
        self.max_delay_ms = ms;
        self
    }

    /// Set request timeout.
    #[must_use]
    pub fn timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    /// Set circuit breaker tuning.
    #[must_use]
    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = config;
        self
    }
}

// ============================================================================
// API Token Validation
// ============================================================================

/// Error returned when API token validation fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidApiTokenError {
    /// Description of why the token is invalid.
    pub reason: String,
}

impl std::fmt::Display for InvalidApiTokenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Invalid billing API token: {}", self.reason)
    }
}

impl std::error::Error for InvalidApiTokenError {}

/// Validate a billing API token.
///
/// Tokens are bearer secrets: non-empty, at least 20 characters, and
/// free of whitespace and control characters.
fn validate_api_token(token: &str) -> std::result::Result<(), InvalidApiTokenError> {
    const MIN_TOKEN_LENGTH: usize = 20;

    if token.is_empty() {
        return Err(InvalidApiTokenError {
            reason: "API token cannot be empty".to_string(),
        });
    }
    if token.len() < MIN_TOKEN_LENGTH {
        return Err(InvalidApiTokenError {
            reason: format!("API token too short (minimum {} characters)", MIN_TOKEN_LENGTH),
        });
    }
    if token.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(InvalidApiTokenError {
            reason: "API token must not contain whitespace or control characters".to_string(),
        });
    }
    Ok(())
}

// ============================================================================
// Circuit Breaker
// ============================================================================

/// Circuit breaker tuning.
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// How long the circuit stays open before a probe is allowed through.
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

/// Current circuit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Requests flow normally.
    Closed,
    /// Failing fast; the backend is not being called.
    Open,
    /// Probe window: one request is allowed through to test recovery.
    HalfOpen,
}

/// Tracks consecutive backend failures and fails fast once the backend
/// looks down, instead of stacking timeouts on a dead dependency.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    consecutive_failures: AtomicU32,
    opened_at: Mutex<Option<Instant>>,
}

impl CircuitBreaker {
    /// Create a breaker with the given tuning.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            consecutive_failures: AtomicU32::new(0),
            opened_at: Mutex::new(None),
        }
    }

    /// Current state.
    pub fn state(&self) -> CircuitState {
        let opened_at = self.opened_at.lock().unwrap();
        match *opened_at {
            None => CircuitState::Closed,
            Some(at) if at.elapsed() >= self.config.reset_timeout => CircuitState::HalfOpen,
            Some(_) => CircuitState::Open,
        }
    }

    /// Check whether a request may proceed.
    pub fn check(&self) -> Result<()> {
        match self.state() {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => Err(BillingError::Unavailable {
                message: "circuit breaker open after repeated backend failures".to_string(),
            }),
        }
    }

    /// Record a successful round trip, closing the circuit.
    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
        self.opened_at.lock().unwrap().take();
    }

    /// Record a failed round trip, opening the circuit at the threshold.
    pub fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures >= self.config.failure_threshold {
            let mut opened_at = self.opened_at.lock().unwrap();
            if opened_at.is_none() {
                tracing::warn!(
                    target: "tollgate::live_client",
                    failures = failures,
                    "Circuit breaker opened"
                );
            }
            *opened_at = Some(Instant::now());
        }
    }
}

// ============================================================================
// Live Billing Client
// ============================================================================

/// Production billing backend client.
///
/// Implements [`BillingApiClient`] with:
/// - Secure token handling using `SecretString`
/// - Retry with exponential backoff for transient failures
/// - Idempotency key propagation for usage tracking
/// - A circuit breaker that fails fast while the backend is down
///
/// # Example
///
/// ```rust,ignore
/// use tollgate::{LiveBillingClient, LiveBillingClientConfig};
///
/// let client = LiveBillingClient::new(
///     "https://api.example.com",
///     std::env::var("BILLING_API_TOKEN")?,
///     LiveBillingClientConfig::default(),
/// )?;
/// ```
pub struct LiveBillingClient {
    http: reqwest::Client,
    base_url: String,
    config: LiveBillingClientConfig,
    token: SecretString,
    breaker: CircuitBreaker,
}

impl LiveBillingClient {
    /// Create a new live client.
    ///
    /// The token is validated and stored securely; it never appears in
    /// debug output.
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<SecretString>,
        config: LiveBillingClientConfig,
    ) -> std::result::Result<Self, InvalidApiTokenError> {
        let token: SecretString = token.into();
        validate_api_token(token.expose_secret())?;

        let base_url: String = base_url.into();
        let breaker = CircuitBreaker::new(config.circuit_breaker);
        Ok(Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            config,
            token,
            breaker,
        })
    }

    /// Create a client with default configuration.
    pub fn with_default_config(
        base_url: impl Into<String>,
        token: impl Into<SecretString>,
    ) -> std::result::Result<Self, InvalidApiTokenError> {
        Self::new(base_url, token, LiveBillingClientConfig::default())
    }

    /// Current circuit breaker state.
    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Execute a request with timeout, retry, and circuit breaking.
    ///
    /// `build` assembles a fresh request for each attempt; the bearer
    /// token is attached here so it lives in exactly one place.
    async fn execute<F>(&self, operation: &str, build: F) -> Result<reqwest::Response>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        self.breaker.check()?;

        let timeout = Duration::from_secs(self.config.timeout_seconds);
        let mut attempts = 0;

        loop {
            let request = build(&self.http).bearer_auth(self.token.expose_secret());
            let outcome = tokio::time::timeout(timeout, request.send()).await;

            match outcome {
                Ok(Ok(response)) => {
                    let status = response.status();
                    if status.is_success() {
                        self.breaker.record_success();
                        return Ok(response);
                    }

                    let retryable = status.as_u16() == 429 || status.is_server_error();
                    if status.is_server_error() {
                        self.breaker.record_failure();
                    }
                    if !retryable || attempts >= self.config.max_retries {
                        return Err(read_error_response(operation, response).await);
                    }
                    log_retry(operation, attempts, &format!("HTTP {}", status), &self.config);
                }
                Ok(Err(err)) => {
                    self.breaker.record_failure();
                    let retryable = err.is_timeout() || err.is_connect() || err.is_request();
                    if !retryable || attempts >= self.config.max_retries {
                        return Err(map_transport_error(operation, &err, timeout));
                    }
                    log_retry(operation, attempts, &err.to_string(), &self.config);
                }
                Err(_elapsed) => {
                    self.breaker.record_failure();
                    if attempts >= self.config.max_retries {
                        return Err(BillingError::Timeout {
                            operation: operation.to_string(),
                            seconds: self.config.timeout_seconds,
                        });
                    }
                    log_retry(operation, attempts, "request timed out", &self.config);
                }
            }

            sleep_with_backoff(attempts, &self.config).await;
            attempts += 1;
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, operation: &str, path: &str) -> Result<T> {
        let url = self.url(path);
        let response = self
            .execute(operation, |http| http.get(&url))
            .await?;
        decode_json(operation, response).await
    }
}

// Debug implementation that doesn't expose the token.
impl std::fmt::Debug for LiveBillingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveBillingClient")
            .field("base_url", &self.base_url)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl BillingApiClient for LiveBillingClient {
    async fn list_plans(&self) -> Result<Vec<PricingPlan>> {
        self.get_json("list_plans", "/billing/plans").await
    }

    async fn current_subscription(&self) -> Result<Option<Subscription>> {
        self.get_json("current_subscription", "/billing/subscription")
            .await
    }

    async fn create_subscription(
        &self,
        request: CreateSubscriptionRequest,
    ) -> Result<Subscription> {
        let url = self.url("/billing/subscription");
        let response = self
            .execute("create_subscription", |http| http.post(&url).json(&request))
            .await
            .map_err(|err| refine_status(err, "plan", request.tier.as_str()))?;
        decode_json("create_subscription", response).await
    }

    async fn cancel_subscription(
        &self,
        subscription_id: Uuid,
        at_period_end: bool,
    ) -> Result<Subscription> {
        let url = self.url(&format!("/billing/subscription/{}/cancel", subscription_id));
        let body = json!({ "at_period_end": at_period_end });
        let response = self
            .execute("cancel_subscription", |http| http.post(&url).json(&body))
            .await
            .map_err(|err| refine_status(err, "subscription", &subscription_id.to_string()))?;
        decode_json("cancel_subscription", response).await
    }

    async fn upgrade_subscription(
        &self,
        subscription_id: Uuid,
        new_tier: PlanTier,
    ) -> Result<Subscription> {
        let url = self.url(&format!("/billing/subscription/{}/upgrade", subscription_id));
        let body = json!({ "new_tier": new_tier });
        let response = self
            .execute("upgrade_subscription", |http| http.post(&url).json(&body))
            .await
            .map_err(|err| refine_status(err, "subscription", &subscription_id.to_string()))?;
        decode_json("upgrade_subscription", response).await
    }

    async fn resume_subscription(&self, subscription_id: Uuid) -> Result<Subscription> {
        let url = self.url(&format!("/billing/subscription/{}/resume", subscription_id));
        let response = self
            .execute("resume_subscription", |http| http.post(&url))
            .await
            .map_err(|err| refine_status(err, "subscription", &subscription_id.to_string()))?;
        decode_json("resume_subscription", response).await
    }

    async fn quota_usage(&self) -> Result<QuotaUsage> {
        self.get_json("quota_usage", "/billing/quota").await
    }

    async fn track_usage(&self, record: &UsageRecord) -> Result<()> {
        let url = self.url("/billing/usage");
        let key = record.idempotency_key.to_string();
        let result = self
            .execute("track_usage", |http| {
                http.post(&url)
                    .header(IDEMPOTENCY_KEY_HEADER, &key)
                    .json(record)
            })
            .await;

        match result {
            Ok(_) => Ok(()),
            // Duplicate key: the event was already applied. At-most-once
            // accounting means a retry landing here succeeded.
            Err(BillingError::Api {
                http_status: Some(409),
                ..
            }) => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn list_invoices(&self) -> Result<Vec<Invoice>> {
        self.get_json("list_invoices", "/billing/invoices").await
    }

    async fn generate_invoice(&self, request: GenerateInvoiceRequest) -> Result<Invoice> {
        let url = self.url("/billing/invoices/generate");
        let response = self
            .execute("generate_invoice", |http| http.post(&url).json(&request))
            .await?;
        decode_json("generate_invoice", response).await
    }

    async fn download_invoice(&self, invoice_id: Uuid) -> Result<Vec<u8>> {
        let url = self.url(&format!("/billing/invoices/{}/pdf", invoice_id));
        let response = self
            .execute("download_invoice", |http| http.get(&url))
            .await
            .map_err(|err| refine_status(err, "invoice", &invoice_id.to_string()))?;
        let bytes = response.bytes().await.map_err(|err| BillingError::Network {
            operation: "download_invoice".to_string(),
            message: err.to_string(),
        })?;
        Ok(bytes.to_vec())
    }
}

// ============================================================================
// Retry Logic
// ============================================================================

/// Log a retry attempt.
fn log_retry(operation: &str, attempts: u32, reason: &str, config: &LiveBillingClientConfig) {
    let delay = calculate_backoff_delay(attempts, config.base_delay_ms, config.max_delay_ms);
    tracing::warn!(
        target: "tollgate::live_client",
        operation = operation,
        attempt = attempts + 1,
        delay_ms = delay.as_millis() as u64,
        reason = reason,
        "Retrying billing API call after transient failure"
    );
}

/// Sleep with exponential backoff.
async fn sleep_with_backoff(attempts: u32, config: &LiveBillingClientConfig) {
    let delay = calculate_backoff_delay(attempts, config.base_delay_ms, config.max_delay_ms);
    tokio::time::sleep(delay).await;
}

/// Calculate backoff delay with exponential growth and jitter.
fn calculate_backoff_delay(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let delay_ms = base_ms.saturating_mul(2_u64.saturating_pow(attempt));
    let delay_ms = delay_ms.min(max_ms);

    // Jitter: 0-25% of the delay.
    let jitter = if delay_ms > 0 {
        fastrand::u64(0..=delay_ms / 4)
    } else {
        0
    };
    Duration::from_millis(delay_ms.saturating_add(jitter))
}

// ============================================================================
// Error Mapping
// ============================================================================

#[derive(serde::Deserialize)]
struct ApiErrorBody {
    message: Option<String>,
    code: Option<String>,
}

/// Turn a non-success response into a [`BillingError::Api`], pulling the
/// message and code out of the JSON error body when present.
async fn read_error_response(operation: &str, response: reqwest::Response) -> BillingError {
    let status = response.status().as_u16();
    let body = response.json::<ApiErrorBody>().await.ok();
    let (message, code) = match body {
        Some(body) => (
            body.message
                .unwrap_or_else(|| format!("backend returned HTTP {}", status)),
            body.code,
        ),
        None => (format!("backend returned HTTP {}", status), None),
    };
    BillingError::Api {
        operation: operation.to_string(),
        message,
        code,
        http_status: Some(status),
    }
}

/// Map a transport-level reqwest failure into the taxonomy.
fn map_transport_error(
    operation: &str,
    err: &reqwest::Error,
    timeout: Duration,
) -> BillingError {
    if err.is_timeout() {
        BillingError::Timeout {
            operation: operation.to_string(),
            seconds: timeout.as_secs(),
        }
    } else {
        BillingError::Network {
            operation: operation.to_string(),
            message: err.to_string(),
        }
    }
}

/// Promote taxonomy-relevant HTTP statuses out of the generic `Api`
/// variant: 402 → `PaymentRequired`, 404 → `NotFound`, 409 → `Conflict`,
/// 422 → `Validation`.
fn refine_status(err: BillingError, entity: &'static str, id: &str) -> BillingError {
    match err {
        BillingError::Api {
            http_status: Some(402),
            message,
            ..
        } => BillingError::PaymentRequired { message },
        BillingError::Api {
            http_status: Some(404),
            ..
        } => BillingError::NotFound {
            entity,
            id: id.to_string(),
        },
        BillingError::Api {
            http_status: Some(409),
            message,
            ..
        } => BillingError::Conflict { message },
        BillingError::Api {
            http_status: Some(422),
            message,
            ..
        } => BillingError::Validation { message },
        other => other,
    }
}

/// Decode a JSON success body, surfacing decode failures distinctly.
async fn decode_json<T: DeserializeOwned>(
    operation: &str,
    response: reqwest::Response,
) -> Result<T> {
    response.json::<T>().await.map_err(|err| BillingError::Api {
        operation: operation.to_string(),
        message: format!("failed to decode response body: {}", err),
        code: None,
        http_status: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_validation() {
        assert!(validate_api_token("").is_err());
        assert!(validate_api_token("short").is_err());
        assert!(validate_api_token("has spaces in the middle 123").is_err());
        assert!(validate_api_token("tk_live_0123456789abcdef0123").is_ok());
    }

    #[test]
    fn test_client_rejects_bad_token() {
        let result =
            LiveBillingClient::with_default_config("https://api.example.com", "nope".to_string());
        assert!(result.is_err());
    }

    #[test]
    fn test_debug_hides_token() {
        let client = LiveBillingClient::with_default_config(
            "https://api.example.com/",
            "tk_live_0123456789abcdef0123".to_string(),
        )
        .unwrap();
        let output = format!("{:?}", client);
        assert!(!output.contains("0123456789abcdef"));
        // Trailing slash normalized away.
        assert!(output.contains("https://api.example.com"));
    }

    #[test]
    fn test_backoff_delay_growth_and_cap() {
        let base = 500;
        let max = 30_000;

        let d0 = calculate_backoff_delay(0, base, max);
        assert!(d0 >= Duration::from_millis(500));
        assert!(d0 <= Duration::from_millis(625));

        let d2 = calculate_backoff_delay(2, base, max);
        assert!(d2 >= Duration::from_millis(2000));
        assert!(d2 <= Duration::from_millis(2500));

        // Capped at max (+25% jitter).
        let d10 = calculate_backoff_delay(10, base, max);
        assert!(d10 <= Duration::from_millis(37_500));
    }

    #[test]
    fn test_circuit_breaker_transitions() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 3,
            reset_timeout: Duration::from_millis(10),
        });

        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.check().is_err());

        // After the reset timeout a probe is allowed through.
        std::thread::sleep(Duration::from_millis(15));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(breaker.check().is_ok());

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_refine_status_mapping() {
        let api = |status: u16| BillingError::Api {
            operation: "op".to_string(),
            message: "oops".to_string(),
            code: None,
            http_status: Some(status),
        };

        assert!(matches!(
            refine_status(api(402), "plan", "pro"),
            BillingError::PaymentRequired { .. }
        ));
        assert!(matches!(
            refine_status(api(404), "invoice", "abc"),
            BillingError::NotFound { entity: "invoice", .. }
        ));
        assert!(matches!(
            refine_status(api(409), "subscription", "abc"),
            BillingError::Conflict { .. }
        ));
        assert!(matches!(
            refine_status(api(422), "plan", "pro"),
            BillingError::Validation { .. }
        ));
        // Server errors pass through untouched.
        assert!(matches!(
            refine_status(api(500), "plan", "pro"),
            BillingError::Api { http_status: Some(500), .. }
        ));
    }
}
