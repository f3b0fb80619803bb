//! Quota engine.
//!
//! Pure computation: raw per-resource counters and plan limits in, a
//! [`QuotaInfo`] snapshot with percentages and threshold warnings out.
//! Nothing here is persisted; the orchestrator recomputes on demand from
//! whatever the backend reports.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{BillingError, Result};

/// Warning threshold in percent; at or above this a `Warning` is emitted.
pub const DEFAULT_WARNING_THRESHOLD: f64 = 70.0;
/// Critical threshold in percent; at or above this an `Error` is emitted.
pub const DEFAULT_CRITICAL_THRESHOLD: f64 = 90.0;

/// A metered resource subject to a quota.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum QuotaResource {
    ApiCalls,
    Tokens,
    Storage,
}

impl QuotaResource {
    /// Convert to the wire string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ApiCalls => "api_calls",
            Self::Tokens => "tokens",
            Self::Storage => "storage",
        }
    }
}

impl std::fmt::Display for QuotaResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Raw counters for one resource as reported by the backend.
/// A `limit` of zero means the resource is unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceCounters {
    /// Ceiling for the current window; zero = unlimited.
    pub limit: i64,
    /// Usage accumulated in the current window.
    pub used: i64,
    /// When the window resets.
    pub reset_at: Option<DateTime<Utc>>,
}

/// Raw quota report off the wire (`GET /billing/quota`). The engine
/// turns this into a [`QuotaInfo`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QuotaUsage {
    /// Per-resource counters.
    pub resources: BTreeMap<QuotaResource, ResourceCounters>,
    /// Request rate ceiling, if the plan imposes one.
    pub rate_limit: Option<RateLimit>,
    /// Features enabled on the active plan.
    #[serde(default)]
    pub features: Vec<String>,
}

/// Request rate ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    /// Sustained requests per minute.
    pub requests_per_minute: u32,
    /// Short-burst allowance above the sustained rate.
    pub burst: u32,
}

/// Computed quota state for one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceQuota {
    /// Ceiling for the current window; zero = unlimited.
    pub limit: i64,
    /// Usage accumulated in the current window.
    pub used: i64,
    /// `max(0, limit - used)`; zero when unlimited.
    pub remaining: i64,
    /// Share of the limit consumed, 0 when unlimited.
    pub percentage_used: f64,
    /// Whether the resource has no ceiling.
    pub unlimited: bool,
    /// When the window resets.
    pub reset_at: Option<DateTime<Utc>>,
}

impl ResourceQuota {
    /// Check if usage has reached or passed the limit.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        !self.unlimited && self.used >= self.limit
    }
}

/// Severity of a quota warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaSeverity {
    /// Approaching the limit.
    Warning,
    /// Critically close to (or past) the limit.
    Error,
}

impl QuotaSeverity {
    /// Convert to the wire string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

/// A threshold crossing worth surfacing to the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaWarning {
    /// Resource that crossed a threshold.
    pub resource: QuotaResource,
    /// Warning or error.
    pub severity: QuotaSeverity,
    /// Percentage of the limit consumed.
    pub percentage_used: f64,
    /// Human-readable summary.
    pub message: String,
}

/// Point-in-time quota snapshot, recomputed on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaInfo {
    /// Per-resource computed state.
    pub resources: BTreeMap<QuotaResource, ResourceQuota>,
    /// Request rate ceiling, if any.
    pub rate_limit: Option<RateLimit>,
    /// Features enabled on the active plan.
    pub features: Vec<String>,
    /// Threshold crossings, most severe resources first in resource order.
    pub warnings: Vec<QuotaWarning>,
    /// When this snapshot was computed.
    pub computed_at: DateTime<Utc>,
}

impl QuotaInfo {
    /// Look up the computed state for a resource.
    #[must_use]
    pub fn resource(&self, resource: QuotaResource) -> Option<&ResourceQuota> {
        self.resources.get(&resource)
    }

    /// Look up the warning for a resource, if one was emitted.
    #[must_use]
    pub fn warning_for(&self, resource: QuotaResource) -> Option<&QuotaWarning> {
        self.warnings.iter().find(|w| w.resource == resource)
    }

    /// Check if a feature is enabled on the active plan.
    #[must_use]
    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.iter().any(|f| f == feature)
    }
}

/// Computes [`QuotaInfo`] snapshots from raw counters.
///
/// Thresholds default to 70% (warning) and 90% (critical) and may be
/// customized, though the defaults are what dashboards are tested
/// against.
#[derive(Debug, Clone, Copy)]
pub struct QuotaEngine {
    warning_threshold: f64,
    critical_threshold: f64,
}

impl Default for QuotaEngine {
    fn default() -> Self {
        Self {
            warning_threshold: DEFAULT_WARNING_THRESHOLD,
            critical_threshold: DEFAULT_CRITICAL_THRESHOLD,
        }
    }
}

impl QuotaEngine {
    /// Create an engine with the default thresholds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an engine with custom thresholds (percentages).
    ///
    /// `warning` must not exceed `critical`.
    pub fn with_thresholds(warning: f64, critical: f64) -> Result<Self> {
        if !(0.0..=100.0).contains(&warning) || !(0.0..=100.0).contains(&critical) {
            return Err(BillingError::InvalidQuotaInput {
                message: "thresholds must be between 0 and 100".to_string(),
            });
        }
        if warning > critical {
            return Err(BillingError::InvalidQuotaInput {
                message: "warning threshold must not exceed critical threshold".to_string(),
            });
        }
        Ok(Self {
            warning_threshold: warning,
            critical_threshold: critical,
        })
    }

    /// Compute a quota snapshot from raw counters.
    ///
    /// Fails with [`BillingError::InvalidQuotaInput`] on negative counters
    /// or limits; a zero limit means unlimited and yields 0% usage.
    pub fn compute(&self, usage: &QuotaUsage, now: DateTime<Utc>) -> Result<QuotaInfo> {
        let mut resources = BTreeMap::new();
        let mut warnings = Vec::new();

        for (resource, counters) in &usage.resources {
            if counters.used < 0 {
                return Err(BillingError::InvalidQuotaInput {
                    message: format!("{} usage is negative: {}", resource, counters.used),
                });
            }
            if counters.limit < 0 {
                return Err(BillingError::InvalidQuotaInput {
                    message: format!("{} limit is negative: {}", resource, counters.limit),
                });
            }

            let unlimited = counters.limit == 0;
            let percentage_used = if unlimited {
                0.0
            } else {
                counters.used as f64 / counters.limit as f64 * 100.0
            };
            let remaining = if unlimited {
                0
            } else {
                (counters.limit - counters.used).max(0)
            };

            if let Some(severity) = self.severity_for(percentage_used) {
                warnings.push(QuotaWarning {
                    resource: *resource,
                    severity,
                    percentage_used,
                    message: match severity {
                        QuotaSeverity::Error => format!(
                            "Critical: {} usage at {:.1}% of limit",
                            resource, percentage_used
                        ),
                        QuotaSeverity::Warning => format!(
                            "{} usage at {:.1}% of limit",
                            resource, percentage_used
                        ),
                    },
                });
            }

            resources.insert(
                *resource,
                ResourceQuota {
                    limit: counters.limit,
                    used: counters.used,
                    remaining,
                    percentage_used,
                    unlimited,
                    reset_at: counters.reset_at,
                },
            );
        }

        Ok(QuotaInfo {
            resources,
            rate_limit: usage.rate_limit,
            features: usage.features.clone(),
            warnings,
            computed_at: now,
        })
    }

    fn severity_for(&self, percentage_used: f64) -> Option<QuotaSeverity> {
        if percentage_used >= self.critical_threshold {
            Some(QuotaSeverity::Error)
        } else if percentage_used >= self.warning_threshold {
            Some(QuotaSeverity::Warning)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage_with(resource: QuotaResource, limit: i64, used: i64) -> QuotaUsage {
        let mut resources = BTreeMap::new();
        resources.insert(
            resource,
            ResourceCounters {
                limit,
                used,
                reset_at: None,
            },
        );
        QuotaUsage {
            resources,
            rate_limit: None,
            features: vec![],
        }
    }

    #[test]
    fn test_percentage_and_remaining() {
        let engine = QuotaEngine::new();
        let info = engine
            .compute(&usage_with(QuotaResource::ApiCalls, 1000, 850), Utc::now())
            .unwrap();

        let api = info.resource(QuotaResource::ApiCalls).unwrap();
        assert_eq!(api.percentage_used, 85.0);
        assert_eq!(api.remaining, 150);
        assert!(!api.unlimited);
        assert!(!api.is_exhausted());
    }

    #[test]
    fn test_warning_thresholds() {
        let engine = QuotaEngine::new();
        let now = Utc::now();

        // 85% -> warning severity.
        let info = engine
            .compute(&usage_with(QuotaResource::ApiCalls, 1000, 850), now)
            .unwrap();
        let warning = info.warning_for(QuotaResource::ApiCalls).unwrap();
        assert_eq!(warning.severity, QuotaSeverity::Warning);

        // 69.9% -> no warning.
        let info = engine
            .compute(&usage_with(QuotaResource::ApiCalls, 1000, 699), now)
            .unwrap();
        assert!(info.warnings.is_empty());

        // Exactly 70% -> warning.
        let info = engine
            .compute(&usage_with(QuotaResource::ApiCalls, 1000, 700), now)
            .unwrap();
        assert_eq!(
            info.warning_for(QuotaResource::ApiCalls).unwrap().severity,
            QuotaSeverity::Warning
        );

        // Exactly 90% -> error.
        let info = engine
            .compute(&usage_with(QuotaResource::Tokens, 1000, 900), now)
            .unwrap();
        let warning = info.warning_for(QuotaResource::Tokens).unwrap();
        assert_eq!(warning.severity, QuotaSeverity::Error);
        assert!(warning.message.starts_with("Critical"));

        // Past the limit -> still error, remaining clamped.
        let info = engine
            .compute(&usage_with(QuotaResource::Storage, 100, 140), now)
            .unwrap();
        let storage = info.resource(QuotaResource::Storage).unwrap();
        assert_eq!(storage.remaining, 0);
        assert!(storage.is_exhausted());
        assert_eq!(
            info.warning_for(QuotaResource::Storage).unwrap().severity,
            QuotaSeverity::Error
        );
    }

    #[test]
    fn test_zero_limit_is_unlimited() {
        let engine = QuotaEngine::new();
        let info = engine
            .compute(&usage_with(QuotaResource::Tokens, 0, 5_000_000), Utc::now())
            .unwrap();

        let tokens = info.resource(QuotaResource::Tokens).unwrap();
        assert!(tokens.unlimited);
        assert_eq!(tokens.percentage_used, 0.0);
        assert!(info.warnings.is_empty());
        assert!(!tokens.is_exhausted());
    }

    #[test]
    fn test_negative_inputs_rejected() {
        let engine = QuotaEngine::new();
        let err = engine
            .compute(&usage_with(QuotaResource::ApiCalls, 1000, -1), Utc::now())
            .unwrap_err();
        assert!(matches!(err, BillingError::InvalidQuotaInput { .. }));

        let err = engine
            .compute(&usage_with(QuotaResource::ApiCalls, -5, 10), Utc::now())
            .unwrap_err();
        assert!(matches!(err, BillingError::InvalidQuotaInput { .. }));
    }

    #[test]
    fn test_custom_thresholds() {
        let engine = QuotaEngine::with_thresholds(50.0, 80.0).unwrap();
        let info = engine
            .compute(&usage_with(QuotaResource::ApiCalls, 100, 60), Utc::now())
            .unwrap();
        assert_eq!(
            info.warning_for(QuotaResource::ApiCalls).unwrap().severity,
            QuotaSeverity::Warning
        );

        assert!(QuotaEngine::with_thresholds(95.0, 80.0).is_err());
        assert!(QuotaEngine::with_thresholds(-1.0, 80.0).is_err());
    }

    #[test]
    fn test_features_and_rate_limit_carried_through() {
        let engine = QuotaEngine::new();
        let mut usage = usage_with(QuotaResource::ApiCalls, 1000, 10);
        usage.rate_limit = Some(RateLimit {
            requests_per_minute: 600,
            burst: 100,
        });
        usage.features = vec!["api_access".to_string()];

        let info = engine.compute(&usage, Utc::now()).unwrap();
        assert!(info.has_feature("api_access"));
        assert!(!info.has_feature("sso"));
        assert_eq!(info.rate_limit.unwrap().requests_per_minute, 600);
    }
}
