//! Alert rules and alert entries.

use crate::sync_monitor::HealthMetrics;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Severity of an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    /// Worth a look.
    Low,
    /// Degraded.
    Medium,
    /// Broken for some users.
    High,
    /// Broken.
    Critical,
}

impl AlertSeverity {
    /// Scales severity with how far a value overshoots its limit.
    ///
    /// `ratio` is `actual / limit` for ceilings and `limit / actual` for
    /// floors, so it is always above 1 for a violation.
    pub fn from_ratio(ratio: f64) -> Self {
        if ratio >= 3.0 {
            AlertSeverity::Critical
        } else if ratio >= 2.0 {
            AlertSeverity::High
        } else if ratio >= 1.5 {
            AlertSeverity::Medium
        } else {
            AlertSeverity::Low
        }
    }
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AlertSeverity::Low => "low",
            AlertSeverity::Medium => "medium",
            AlertSeverity::High => "high",
            AlertSeverity::Critical => "critical",
        };
        f.write_str(label)
    }
}

/// Health metric an alert rule watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertMetric {
    /// Failed items / processed items.
    ErrorRate,
    /// Successful runs / finished runs.
    SuccessRate,
    /// Average run duration in milliseconds.
    AverageDurationMs,
}

impl AlertMetric {
    /// Reads the metric from computed health metrics.
    pub fn read(&self, health: &HealthMetrics) -> f64 {
        match self {
            AlertMetric::ErrorRate => health.error_rate,
            AlertMetric::SuccessRate => health.success_rate,
            AlertMetric::AverageDurationMs => health.average_duration_ms,
        }
    }

    fn describe(&self, value: f64) -> String {
        match self {
            AlertMetric::ErrorRate => format!("error rate {:.1}%", value * 100.0),
            AlertMetric::SuccessRate => format!("success rate {:.1}%", value * 100.0),
            AlertMetric::AverageDurationMs => format!("average duration {value:.0} ms"),
        }
    }
}

/// Direction of a threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    /// Fires when the value is strictly above the threshold.
    Above,
    /// Fires when the value is strictly below the threshold.
    Below,
}

impl Comparison {
    /// Returns true if `value` violates `threshold`.
    pub fn holds(&self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::Above => value > threshold,
            Comparison::Below => value < threshold,
        }
    }
}

/// A registered alert rule.
#[derive(Debug, Clone)]
pub struct AlertCondition {
    /// Rule id; alerts are keyed by it.
    pub id: String,
    /// Watched metric.
    pub metric: AlertMetric,
    /// Threshold direction.
    pub comparison: Comparison,
    /// Threshold value.
    pub threshold: f64,
    /// Time window the metric is computed over.
    pub window: Duration,
    /// Severity of the raised alert.
    pub severity: AlertSeverity,
    /// Minimum finished runs in the window before the rule is evaluated.
    pub min_operations: usize,
}

impl AlertCondition {
    /// Creates a rule.
    pub fn new(
        id: impl Into<String>,
        metric: AlertMetric,
        comparison: Comparison,
        threshold: f64,
        window: Duration,
    ) -> Self {
        Self {
            id: id.into(),
            metric,
            comparison,
            threshold,
            window,
            severity: AlertSeverity::Medium,
            min_operations: 1,
        }
    }

    /// The default rule: error rate above 25% over the last hour.
    pub fn default_error_rate() -> Self {
        Self::new(
            "high-error-rate",
            AlertMetric::ErrorRate,
            Comparison::Above,
            0.25,
            Duration::from_secs(60 * 60),
        )
        .with_severity(AlertSeverity::High)
    }

    /// Sets the severity.
    pub fn with_severity(mut self, severity: AlertSeverity) -> Self {
        self.severity = severity;
        self
    }

    /// Sets the minimum number of runs.
    pub fn with_min_operations(mut self, min: usize) -> Self {
        self.min_operations = min;
        self
    }

    /// Returns the metric value if the rule fires against `health`.
    pub fn evaluate(&self, health: &HealthMetrics) -> Option<f64> {
        if health.total_operations < self.min_operations {
            return None;
        }
        let value = self.metric.read(health);
        self.comparison.holds(value, self.threshold).then_some(value)
    }

    pub(crate) fn message(&self, value: f64) -> String {
        let direction = match self.comparison {
            Comparison::Above => "above",
            Comparison::Below => "below",
        };
        let limit = match self.metric {
            AlertMetric::ErrorRate | AlertMetric::SuccessRate => {
                format!("{:.1}%", self.threshold * 100.0)
            }
            AlertMetric::AverageDurationMs => format!("{:.0} ms", self.threshold),
        };
        format!("{} {direction} {limit}", self.metric.describe(value))
    }
}

/// A raised alert, kept until cleared.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    /// Rule that raised it.
    pub rule_id: String,
    /// Severity.
    pub severity: AlertSeverity,
    /// Human readable description.
    pub message: String,
    /// Metric value at the last evaluation that fired.
    pub value: f64,
    /// First time the rule fired.
    pub first_triggered: DateTime<Utc>,
    /// Last time the rule fired.
    pub last_triggered: DateTime<Utc>,
    /// Number of evaluations that fired.
    pub occurrences: u32,
}
