//! Monitor configuration.

use std::time::Duration;

/// Configuration for the [`SyncMonitor`](crate::SyncMonitor).
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Whether recording is enabled at start.
    pub enabled: bool,
    /// Number of operations kept in the log.
    pub max_operations: usize,
    /// Number of errors reported in [`HealthMetrics::recent_errors`](crate::HealthMetrics).
    pub recent_error_limit: usize,
    /// Window used by the default alert rule and the text report.
    pub default_window: Duration,
}

impl MonitorConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self {
            enabled: true,
            max_operations: 100,
            recent_error_limit: 10,
            default_window: Duration::from_secs(60 * 60),
        }
    }

    /// Sets whether recording starts enabled.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Sets the number of operations kept.
    pub fn with_max_operations(mut self, max: usize) -> Self {
        self.max_operations = max.max(1);
        self
    }

    /// Sets the number of recent errors reported.
    pub fn with_recent_error_limit(mut self, limit: usize) -> Self {
        self.recent_error_limit = limit;
        self
    }

    /// Sets the default window.
    pub fn with_default_window(mut self, window: Duration) -> Self {
        self.default_window = window;
        self
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for the [`PerformanceMonitor`](crate::PerformanceMonitor).
#[derive(Debug, Clone)]
pub struct PerformanceConfig {
    /// Whether recording is enabled at start.
    pub enabled: bool,
    /// Number of completed operation metrics kept.
    pub max_metrics: usize,
    /// Number of resource snapshots kept.
    pub max_snapshots: usize,
    /// Number of threshold alerts kept.
    pub max_alerts: usize,
    /// Multiple of the window average above which a kind is a bottleneck.
    pub bottleneck_factor: f64,
}

impl PerformanceConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self {
            enabled: true,
            max_metrics: 500,
            max_snapshots: 60,
            max_alerts: 100,
            bottleneck_factor: 2.0,
        }
    }

    /// Sets whether recording starts enabled.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Sets the metric history size.
    pub fn with_max_metrics(mut self, max: usize) -> Self {
        self.max_metrics = max.max(1);
        self
    }

    /// Sets the resource ring size.
    pub fn with_max_snapshots(mut self, max: usize) -> Self {
        self.max_snapshots = max.max(1);
        self
    }

    /// Sets the bottleneck factor.
    pub fn with_bottleneck_factor(mut self, factor: f64) -> Self {
        self.bottleneck_factor = factor;
        self
    }
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self::new()
    }
}
