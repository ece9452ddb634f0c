//! Sync operation log, health metrics and alerting.
//!
//! The monitor keeps a bounded, insertion-ordered log of sync runs. The
//! executor drives each record through its lifecycle:
//!
//! ```rust,ignore
//! monitor.start_operation("run-1", NetworkType::Wifi, 10);
//! monitor.update_phase("run-1", SyncPhase::Uploading);
//! monitor.update_progress("run-1", OperationCounts { processed: 3, succeeded: 3, ..Default::default() });
//! monitor.add_marker("run-1", "uploading", 120);
//! monitor.complete_operation("run-1", OperationStatus::Succeeded);
//! ```
//!
//! Every mutation targets the record with the given sync id and is a no-op
//! when monitoring is disabled, when the id is unknown, or once the record
//! is completed.

use crate::alerts::{Alert, AlertCondition};
use crate::config::MonitorConfig;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use readsync_protocol::{Clock, NetworkType, SyncPhase, SystemClock};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Lifecycle status of a monitored run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// Still in flight.
    Running,
    /// Finished without being blocked or cancelled.
    Succeeded,
    /// Blocked by a precondition or aborted by an unexpected error.
    Failed,
    /// Stopped by the caller.
    Cancelled,
}

impl OperationStatus {
    /// Returns true once the run has ended.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OperationStatus::Running)
    }
}

/// Item counters of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OperationCounts {
    /// Items looked at.
    pub processed: u64,
    /// Items synced.
    pub succeeded: u64,
    /// Items that failed.
    pub failed: u64,
    /// Conflicts detected.
    pub conflicts_detected: u64,
    /// Conflicts resolved automatically.
    pub conflicts_resolved: u64,
}

/// Monitor record of one sync run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncOperationMetrics {
    /// Run identifier.
    pub sync_id: String,
    /// Last phase reported.
    pub phase: SyncPhase,
    /// Lifecycle status.
    pub status: OperationStatus,
    /// Network class at start.
    pub network_type: NetworkType,
    /// Upload batch size in effect.
    pub batch_size: u32,
    /// Item counters.
    pub counts: OperationCounts,
    /// Named timings in milliseconds. Phase markers use the phase label.
    pub markers: BTreeMap<String, u64>,
    /// Errors in the order they were recorded.
    pub errors: Vec<String>,
    /// Start time.
    pub started_at: DateTime<Utc>,
    /// End time, once completed.
    pub ended_at: Option<DateTime<Utc>>,
}

impl SyncOperationMetrics {
    fn new(
        sync_id: &str,
        network_type: NetworkType,
        batch_size: u32,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            sync_id: sync_id.to_string(),
            phase: SyncPhase::Initializing,
            status: OperationStatus::Running,
            network_type,
            batch_size,
            counts: OperationCounts::default(),
            markers: BTreeMap::new(),
            errors: Vec::new(),
            started_at,
            ended_at: None,
        }
    }

    /// Wall time of the run, once completed.
    pub fn duration(&self) -> Option<Duration> {
        self.ended_at
            .and_then(|ended| (ended - self.started_at).to_std().ok())
    }
}

/// An error attributed to the run it happened in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecentError {
    /// Run identifier.
    pub sync_id: String,
    /// Error text.
    pub message: String,
    /// Start time of the run.
    pub at: DateTime<Utc>,
}

/// Health metrics derived from the operation log.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HealthMetrics {
    /// Completed runs in the window.
    pub total_operations: usize,
    /// Runs that succeeded.
    pub successful_operations: usize,
    /// Runs that failed.
    pub failed_operations: usize,
    /// Runs that were cancelled.
    pub cancelled_operations: usize,
    /// Successful runs / completed runs; 0 with no runs.
    pub success_rate: f64,
    /// Failed items / processed items; 0 with nothing processed.
    pub error_rate: f64,
    /// Average duration of completed runs in milliseconds.
    pub average_duration_ms: f64,
    /// Completed runs per network class.
    pub network_distribution: BTreeMap<NetworkType, usize>,
    /// Average phase marker value per phase, in milliseconds.
    pub phase_performance: BTreeMap<SyncPhase, f64>,
    /// Most recent errors, newest last.
    pub recent_errors: Vec<RecentError>,
}

/// Bounded log of sync runs with derived health and alerts.
pub struct SyncMonitor {
    config: MonitorConfig,
    enabled: AtomicBool,
    operations: RwLock<VecDeque<SyncOperationMetrics>>,
    conditions: RwLock<Vec<AlertCondition>>,
    alerts: RwLock<BTreeMap<String, Alert>>,
    clock: Arc<dyn Clock>,
}

impl SyncMonitor {
    /// Creates a monitor with the default alert rule registered.
    pub fn new(config: MonitorConfig) -> Self {
        let enabled = AtomicBool::new(config.enabled);
        Self {
            config,
            enabled,
            operations: RwLock::new(VecDeque::new()),
            conditions: RwLock::new(vec![AlertCondition::default_error_rate()]),
            alerts: RwLock::new(BTreeMap::new()),
            clock: Arc::new(SystemClock),
        }
    }

    /// Stamps runs and alerts with `clock`. Health windows are measured
    /// back from its current time.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Enables or disables recording.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Returns true if recording is enabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Opens a record for a new run, evicting the oldest beyond capacity.
    pub fn start_operation(&self, sync_id: &str, network_type: NetworkType, batch_size: u32) {
        if !self.is_enabled() {
            return;
        }
        let started_at = self.clock.now();
        let mut operations = self.operations.write();
        operations.push_back(SyncOperationMetrics::new(
            sync_id,
            network_type,
            batch_size,
            started_at,
        ));
        while operations.len() > self.config.max_operations {
            operations.pop_front();
        }
    }

    /// Records a phase transition.
    pub fn update_phase(&self, sync_id: &str, phase: SyncPhase) {
        self.with_running(sync_id, |op| op.phase = phase);
    }

    /// Replaces the item counters.
    pub fn update_progress(&self, sync_id: &str, counts: OperationCounts) {
        self.with_running(sync_id, |op| op.counts = counts);
    }

    /// Sets a named timing.
    pub fn add_marker(&self, sync_id: &str, name: &str, millis: u64) {
        self.with_running(sync_id, |op| {
            op.markers.insert(name.to_string(), millis);
        });
    }

    /// Appends an error.
    pub fn record_error(&self, sync_id: &str, message: impl Into<String>) {
        let message = message.into();
        self.with_running(sync_id, |op| op.errors.push(message));
    }

    /// Freezes the record and evaluates alert rules.
    ///
    /// Returns the completed record, `None` if nothing was completed.
    pub fn complete_operation(
        &self,
        sync_id: &str,
        status: OperationStatus,
    ) -> Option<SyncOperationMetrics> {
        let ended_at = self.clock.now();
        let completed = self.with_running(sync_id, |op| {
            op.status = if status.is_terminal() {
                status
            } else {
                OperationStatus::Succeeded
            };
            op.phase = SyncPhase::Completed;
            op.ended_at = Some(ended_at);
            op.clone()
        })?;

        tracing::debug!(
            sync_id,
            status = ?completed.status,
            processed = completed.counts.processed,
            failed = completed.counts.failed,
            "sync operation completed"
        );
        self.check_alerts();
        Some(completed)
    }

    /// Returns the record of a run.
    pub fn operation(&self, sync_id: &str) -> Option<SyncOperationMetrics> {
        self.operations
            .read()
            .iter()
            .rev()
            .find(|op| op.sync_id == sync_id)
            .cloned()
    }

    /// Returns every record, oldest first.
    pub fn operations(&self) -> Vec<SyncOperationMetrics> {
        self.operations.read().iter().cloned().collect()
    }

    /// Drops the operation log.
    pub fn clear_history(&self) {
        self.operations.write().clear();
    }

    /// Computes health metrics over completed runs started within `window`
    /// (all completed runs when `None`).
    pub fn health(&self, window: Option<Duration>) -> HealthMetrics {
        let cutoff = window
            .and_then(|w| chrono::Duration::from_std(w).ok())
            .map(|w| self.clock.now() - w);
        let operations = self.operations.read();
        let completed = operations
            .iter()
            .filter(|op| op.status.is_terminal())
            .filter(|op| cutoff.map_or(true, |cutoff| op.started_at >= cutoff));

        let mut health = HealthMetrics::default();
        let mut processed = 0u64;
        let mut failed_items = 0u64;
        let mut total_duration_ms = 0f64;
        let mut phase_totals: BTreeMap<SyncPhase, (f64, usize)> = BTreeMap::new();
        let mut errors = Vec::new();

        for op in completed {
            health.total_operations += 1;
            match op.status {
                OperationStatus::Succeeded => health.successful_operations += 1,
                OperationStatus::Failed => health.failed_operations += 1,
                OperationStatus::Cancelled => health.cancelled_operations += 1,
                OperationStatus::Running => {}
            }
            processed += op.counts.processed;
            failed_items += op.counts.failed;
            total_duration_ms += op.duration().map_or(0.0, |d| d.as_secs_f64() * 1000.0);
            *health.network_distribution.entry(op.network_type).or_insert(0) += 1;

            for (name, millis) in &op.markers {
                if let Some(phase) = SyncPhase::from_label(name) {
                    let entry = phase_totals.entry(phase).or_insert((0.0, 0));
                    entry.0 += *millis as f64;
                    entry.1 += 1;
                }
            }
            errors.extend(op.errors.iter().map(|message| RecentError {
                sync_id: op.sync_id.clone(),
                message: message.clone(),
                at: op.started_at,
            }));
        }

        if health.total_operations > 0 {
            let total = health.total_operations as f64;
            health.success_rate = health.successful_operations as f64 / total;
            health.average_duration_ms = total_duration_ms / total;
        }
        if processed > 0 {
            health.error_rate = failed_items as f64 / processed as f64;
        }
        health.phase_performance = phase_totals
            .into_iter()
            .map(|(phase, (sum, n))| (phase, sum / n as f64))
            .collect();

        let skip = errors.len().saturating_sub(self.config.recent_error_limit);
        health.recent_errors = errors.into_iter().skip(skip).collect();
        health
    }

    /// Registers an alert rule, replacing any rule with the same id.
    pub fn add_condition(&self, condition: AlertCondition) {
        let mut conditions = self.conditions.write();
        conditions.retain(|c| c.id != condition.id);
        conditions.push(condition);
    }

    /// Removes an alert rule. Returns true if it existed.
    pub fn remove_condition(&self, id: &str) -> bool {
        let mut conditions = self.conditions.write();
        let before = conditions.len();
        conditions.retain(|c| c.id != id);
        conditions.len() != before
    }

    /// Returns the registered rules.
    pub fn conditions(&self) -> Vec<AlertCondition> {
        self.conditions.read().clone()
    }

    /// Evaluates every rule and returns the alerts that fired.
    ///
    /// A firing rule creates or refreshes the alert keyed by its id; rules
    /// that do not fire leave existing alerts untouched.
    pub fn check_alerts(&self) -> Vec<Alert> {
        let conditions = self.conditions.read().clone();
        let now = self.clock.now();
        let mut fired = Vec::new();

        for condition in &conditions {
            let health = self.health(Some(condition.window));
            let Some(value) = condition.evaluate(&health) else {
                continue;
            };
            let message = condition.message(value);
            let mut alerts = self.alerts.write();
            let alert = alerts
                .entry(condition.id.clone())
                .and_modify(|alert| {
                    alert.value = value;
                    alert.message = message.clone();
                    alert.last_triggered = now;
                    alert.occurrences += 1;
                })
                .or_insert_with(|| {
                    tracing::warn!(rule = %condition.id, %message, "sync alert raised");
                    Alert {
                        rule_id: condition.id.clone(),
                        severity: condition.severity,
                        message: message.clone(),
                        value,
                        first_triggered: now,
                        last_triggered: now,
                        occurrences: 1,
                    }
                });
            fired.push(alert.clone());
        }
        fired
    }

    /// Returns the active alerts, keyed by rule id order.
    pub fn active_alerts(&self) -> Vec<Alert> {
        self.alerts.read().values().cloned().collect()
    }

    /// Clears one alert. Returns true if it was active.
    pub fn clear_alert(&self, rule_id: &str) -> bool {
        self.alerts.write().remove(rule_id).is_some()
    }

    /// Clears every alert.
    pub fn clear_alerts(&self) {
        self.alerts.write().clear();
    }

    /// Renders a text health report over the default window.
    pub fn generate_report(&self) -> String {
        let health = self.health(Some(self.config.default_window));
        let alerts = self.active_alerts();
        let running = self
            .operations
            .read()
            .iter()
            .filter(|op| !op.status.is_terminal())
            .count();

        let mut out = String::new();
        let _ = writeln!(out, "Sync health report ({})", self.clock.now().to_rfc3339());
        let _ = writeln!(
            out,
            "  operations: {} (succeeded {}, failed {}, cancelled {}, running {})",
            health.total_operations,
            health.successful_operations,
            health.failed_operations,
            health.cancelled_operations,
            running
        );
        let _ = writeln!(out, "  success rate: {:.1}%", health.success_rate * 100.0);
        let _ = writeln!(out, "  error rate: {:.1}%", health.error_rate * 100.0);
        let _ = writeln!(out, "  average duration: {:.0} ms", health.average_duration_ms);

        if !health.network_distribution.is_empty() {
            let networks: Vec<String> = health
                .network_distribution
                .iter()
                .map(|(network, n)| format!("{network}={n}"))
                .collect();
            let _ = writeln!(out, "  networks: {}", networks.join(", "));
        }
        if !health.phase_performance.is_empty() {
            let _ = writeln!(out, "  phases:");
            for (phase, avg) in &health.phase_performance {
                let _ = writeln!(out, "    {phase}: {avg:.0} ms");
            }
        }

        if alerts.is_empty() {
            let _ = writeln!(out, "  alerts: none");
        } else {
            let _ = writeln!(out, "  alerts:");
            for alert in &alerts {
                let _ = writeln!(
                    out,
                    "    [{}] {}: {} (x{})",
                    alert.severity, alert.rule_id, alert.message, alert.occurrences
                );
            }
        }

        if !health.recent_errors.is_empty() {
            let _ = writeln!(out, "  recent errors:");
            for error in &health.recent_errors {
                let _ = writeln!(out, "    {}: {}", error.sync_id, error.message);
            }
        }
        out
    }

    fn with_running<R>(
        &self,
        sync_id: &str,
        f: impl FnOnce(&mut SyncOperationMetrics) -> R,
    ) -> Option<R> {
        if !self.is_enabled() {
            return None;
        }
        let mut operations = self.operations.write();
        operations
            .iter_mut()
            .rev()
            .find(|op| op.sync_id == sync_id && !op.status.is_terminal())
            .map(f)
    }
}

impl Default for SyncMonitor {
    fn default() -> Self {
        Self::new(MonitorConfig::default())
    }
}

impl std::fmt::Debug for SyncMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncMonitor")
            .field("enabled", &self.is_enabled())
            .field("operations", &self.operations.read().len())
            .field("alerts", &self.alerts.read().len())
            .finish()
    }
}
