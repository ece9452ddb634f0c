//! Per-operation performance metrics and threshold alerts.
//!
//! Storage and network calls are bracketed with [`PerformanceMonitor::start`]
//! and [`PerformanceMonitor::end`]. Completed metrics are checked against a
//! per-kind [`PerformanceThreshold`] table; violations become
//! [`PerformanceAlert`]s whose severity scales with how far the limit was
//! exceeded.

use crate::alerts::AlertSeverity;
use crate::config::PerformanceConfig;
use crate::report::PerformanceReport;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use readsync_protocol::{Clock, SyncPhase, SystemClock};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Kind of timed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Local store: list dirty records.
    ListModified,
    /// Local store: read one record.
    GetRecord,
    /// Local store: insert.
    CreateRecord,
    /// Local store: update.
    UpdateRecord,
    /// Local store: delete.
    DeleteRecord,
    /// Local store: read the checkpoint.
    ReadCheckpoint,
    /// Local store: write the checkpoint.
    WriteCheckpoint,
    /// One upload batch, remote calls included.
    UploadBatch,
    /// One download page, remote call included.
    DownloadPage,
}

impl OperationKind {
    /// Every kind, in declaration order.
    pub const ALL: [OperationKind; 9] = [
        OperationKind::ListModified,
        OperationKind::GetRecord,
        OperationKind::CreateRecord,
        OperationKind::UpdateRecord,
        OperationKind::DeleteRecord,
        OperationKind::ReadCheckpoint,
        OperationKind::WriteCheckpoint,
        OperationKind::UploadBatch,
        OperationKind::DownloadPage,
    ];

    /// Returns the snake_case label.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::ListModified => "list_modified",
            OperationKind::GetRecord => "get_record",
            OperationKind::CreateRecord => "create_record",
            OperationKind::UpdateRecord => "update_record",
            OperationKind::DeleteRecord => "delete_record",
            OperationKind::ReadCheckpoint => "read_checkpoint",
            OperationKind::WriteCheckpoint => "write_checkpoint",
            OperationKind::UploadBatch => "upload_batch",
            OperationKind::DownloadPage => "download_page",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Limits for one operation kind. Used for alerting only.
#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceThreshold {
    /// Longest acceptable duration.
    pub max_duration: Duration,
    /// Lowest acceptable throughput in records per second.
    pub min_throughput: Option<f64>,
    /// Highest acceptable resident memory.
    pub max_memory_bytes: Option<u64>,
    /// Highest acceptable CPU usage.
    pub max_cpu_percent: Option<f32>,
}

impl PerformanceThreshold {
    /// Creates a duration-only threshold.
    pub fn new(max_duration: Duration) -> Self {
        Self {
            max_duration,
            min_throughput: None,
            max_memory_bytes: None,
            max_cpu_percent: None,
        }
    }

    /// Sets the throughput floor.
    pub fn with_min_throughput(mut self, records_per_sec: f64) -> Self {
        self.min_throughput = Some(records_per_sec);
        self
    }

    /// Sets the memory ceiling.
    pub fn with_max_memory(mut self, bytes: u64) -> Self {
        self.max_memory_bytes = Some(bytes);
        self
    }

    /// Sets the CPU ceiling.
    pub fn with_max_cpu(mut self, percent: f32) -> Self {
        self.max_cpu_percent = Some(percent);
        self
    }

    /// The default limits for `kind`.
    pub fn default_for(kind: OperationKind) -> Self {
        const MEMORY: u64 = 512 * 1024 * 1024;
        let base = match kind {
            OperationKind::ListModified => {
                Self::new(Duration::from_secs(2)).with_min_throughput(50.0)
            }
            OperationKind::GetRecord => Self::new(Duration::from_millis(200)),
            OperationKind::CreateRecord
            | OperationKind::UpdateRecord
            | OperationKind::DeleteRecord => Self::new(Duration::from_millis(500)),
            OperationKind::ReadCheckpoint | OperationKind::WriteCheckpoint => {
                Self::new(Duration::from_millis(100))
            }
            OperationKind::UploadBatch | OperationKind::DownloadPage => {
                Self::new(Duration::from_secs(10)).with_min_throughput(1.0)
            }
        };
        base.with_max_memory(MEMORY).with_max_cpu(90.0)
    }
}

/// A completed, timed operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceMetric {
    /// Caller-chosen operation id.
    pub operation_id: String,
    /// Operation kind.
    pub kind: OperationKind,
    /// Sync phase the operation ran in.
    pub phase: SyncPhase,
    /// Start time.
    pub started_at: DateTime<Utc>,
    /// Measured duration.
    pub duration: Duration,
    /// Records handled.
    pub record_count: u64,
    /// Records per second.
    pub throughput: f64,
    /// Whether the operation succeeded.
    pub success: bool,
    /// Errors encountered.
    pub error_count: u32,
}

/// Which limit was exceeded.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "violation", rename_all = "snake_case")]
pub enum ThresholdViolation {
    /// Took too long.
    Duration {
        /// Measured duration.
        actual: Duration,
        /// Configured limit.
        limit: Duration,
    },
    /// Too few records per second.
    Throughput {
        /// Measured throughput.
        actual: f64,
        /// Configured floor.
        floor: f64,
    },
    /// Resident memory too high.
    Memory {
        /// Sampled bytes.
        actual: u64,
        /// Configured limit.
        limit: u64,
    },
    /// CPU usage too high.
    Cpu {
        /// Sampled percentage.
        actual: f32,
        /// Configured limit.
        limit: f32,
    },
}

impl ThresholdViolation {
    /// How far the limit was exceeded; above 1 for every violation.
    pub fn ratio(&self) -> f64 {
        match self {
            ThresholdViolation::Duration { actual, limit } => {
                actual.as_secs_f64() / limit.as_secs_f64().max(f64::EPSILON)
            }
            ThresholdViolation::Throughput { actual, floor } => {
                if *actual <= 0.0 {
                    f64::INFINITY
                } else {
                    floor / actual
                }
            }
            ThresholdViolation::Memory { actual, limit } => {
                *actual as f64 / (*limit).max(1) as f64
            }
            ThresholdViolation::Cpu { actual, limit } => {
                f64::from(*actual) / f64::from(limit.max(f32::EPSILON))
            }
        }
    }
}

impl fmt::Display for ThresholdViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThresholdViolation::Duration { actual, limit } => {
                write!(f, "took {actual:?}, limit {limit:?}")
            }
            ThresholdViolation::Throughput { actual, floor } => {
                write!(f, "throughput {actual:.1} rec/s, floor {floor:.1} rec/s")
            }
            ThresholdViolation::Memory { actual, limit } => {
                write!(f, "memory {actual} bytes, limit {limit} bytes")
            }
            ThresholdViolation::Cpu { actual, limit } => {
                write!(f, "cpu {actual:.1}%, limit {limit:.1}%")
            }
        }
    }
}

/// A threshold violation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceAlert {
    /// Operation that violated the threshold.
    pub operation_id: String,
    /// Its kind.
    pub kind: OperationKind,
    /// The exceeded limit.
    pub violation: ThresholdViolation,
    /// Severity from the exceed ratio.
    pub severity: AlertSeverity,
    /// When the alert was raised.
    pub raised_at: DateTime<Utc>,
}

/// Resource usage as reported by a probe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ResourceUsage {
    /// Resident memory.
    pub memory_bytes: u64,
    /// CPU usage.
    pub cpu_percent: f32,
    /// Disk used by the store.
    pub disk_bytes: u64,
    /// Bytes transferred.
    pub network_bytes: u64,
}

/// A sampled [`ResourceUsage`] with context.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceUsageSnapshot {
    /// Sample time.
    pub captured_at: DateTime<Utc>,
    /// Resident memory.
    pub memory_bytes: u64,
    /// CPU usage.
    pub cpu_percent: f32,
    /// Disk used by the store.
    pub disk_bytes: u64,
    /// Bytes transferred.
    pub network_bytes: u64,
    /// Operations in flight at sample time.
    pub active_operations: usize,
}

/// Source of resource usage samples.
pub trait ResourceProbe: Send + Sync {
    /// Samples current usage.
    fn sample(&self) -> ResourceUsage;
}

struct InFlight {
    kind: OperationKind,
    phase: SyncPhase,
    started: Instant,
    started_at: DateTime<Utc>,
}

/// Times operations and checks them against thresholds.
pub struct PerformanceMonitor {
    config: PerformanceConfig,
    enabled: AtomicBool,
    in_flight: Mutex<HashMap<String, InFlight>>,
    metrics: RwLock<VecDeque<PerformanceMetric>>,
    thresholds: RwLock<HashMap<OperationKind, PerformanceThreshold>>,
    alerts: RwLock<VecDeque<PerformanceAlert>>,
    snapshots: RwLock<VecDeque<ResourceUsageSnapshot>>,
    probe: Option<Arc<dyn ResourceProbe>>,
    clock: Arc<dyn Clock>,
}

impl PerformanceMonitor {
    /// Creates a monitor with the default threshold table and no probe.
    pub fn new(config: PerformanceConfig) -> Self {
        let thresholds = OperationKind::ALL
            .iter()
            .map(|kind| (*kind, PerformanceThreshold::default_for(*kind)))
            .collect();
        let enabled = AtomicBool::new(config.enabled);
        Self {
            config,
            enabled,
            in_flight: Mutex::new(HashMap::new()),
            metrics: RwLock::new(VecDeque::new()),
            thresholds: RwLock::new(thresholds),
            alerts: RwLock::new(VecDeque::new()),
            snapshots: RwLock::new(VecDeque::new()),
            probe: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Stamps metrics, snapshots and alerts with `clock`.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Attaches a resource probe.
    pub fn with_probe(mut self, probe: Arc<dyn ResourceProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Enables or disables recording. Disabling drops in-flight timings.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
        if !enabled {
            self.in_flight.lock().clear();
        }
    }

    /// Returns true if recording is enabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Starts timing an operation.
    pub fn start(&self, operation_id: &str, kind: OperationKind, phase: SyncPhase) {
        if !self.is_enabled() {
            return;
        }
        self.in_flight.lock().insert(
            operation_id.to_string(),
            InFlight {
                kind,
                phase,
                started: Instant::now(),
                started_at: self.clock.now(),
            },
        );
    }

    /// Finishes timing an operation and checks its threshold.
    ///
    /// Returns `None` for unknown ids or while disabled.
    pub fn end(
        &self,
        operation_id: &str,
        record_count: u64,
        success: bool,
        error_count: u32,
    ) -> Option<PerformanceMetric> {
        if !self.is_enabled() {
            return None;
        }
        let flight = self.in_flight.lock().remove(operation_id)?;
        let duration = flight.started.elapsed();
        let metric = PerformanceMetric {
            operation_id: operation_id.to_string(),
            kind: flight.kind,
            phase: flight.phase,
            started_at: flight.started_at,
            duration,
            record_count,
            throughput: throughput(record_count, duration),
            success,
            error_count,
        };

        {
            let mut metrics = self.metrics.write();
            metrics.push_back(metric.clone());
            while metrics.len() > self.config.max_metrics {
                metrics.pop_front();
            }
        }
        self.check_thresholds(&metric);
        Some(metric)
    }

    /// Replaces the threshold for `kind`.
    pub fn set_threshold(&self, kind: OperationKind, threshold: PerformanceThreshold) {
        self.thresholds.write().insert(kind, threshold);
    }

    /// Returns the threshold for `kind`.
    pub fn threshold(&self, kind: OperationKind) -> PerformanceThreshold {
        self.thresholds
            .read()
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| PerformanceThreshold::default_for(kind))
    }

    /// Number of operations currently being timed.
    pub fn active_operations(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Completed metrics, oldest first.
    pub fn metrics(&self) -> Vec<PerformanceMetric> {
        self.metrics.read().iter().cloned().collect()
    }

    /// Raised alerts, oldest first.
    pub fn alerts(&self) -> Vec<PerformanceAlert> {
        self.alerts.read().iter().cloned().collect()
    }

    /// Clears raised alerts.
    pub fn clear_alerts(&self) {
        self.alerts.write().clear();
    }

    /// Samples the probe into the snapshot ring.
    ///
    /// Returns `None` without a probe or while disabled.
    pub fn sample_resources(&self) -> Option<ResourceUsageSnapshot> {
        if !self.is_enabled() {
            return None;
        }
        let usage = self.probe.as_ref()?.sample();
        let snapshot = ResourceUsageSnapshot {
            captured_at: self.clock.now(),
            memory_bytes: usage.memory_bytes,
            cpu_percent: usage.cpu_percent,
            disk_bytes: usage.disk_bytes,
            network_bytes: usage.network_bytes,
            active_operations: self.active_operations(),
        };
        let mut snapshots = self.snapshots.write();
        snapshots.push_back(snapshot.clone());
        while snapshots.len() > self.config.max_snapshots {
            snapshots.pop_front();
        }
        Some(snapshot)
    }

    /// Resource snapshots, oldest first.
    pub fn snapshots(&self) -> Vec<ResourceUsageSnapshot> {
        self.snapshots.read().iter().cloned().collect()
    }

    /// Builds a report over metrics started within `window`.
    pub fn report(&self, window: Duration) -> PerformanceReport {
        let now = self.clock.now();
        let cutoff = chrono::Duration::from_std(window)
            .ok()
            .map(|w| now - w);
        let in_window = |at: &DateTime<Utc>| cutoff.map_or(true, |cutoff| *at >= cutoff);

        let metrics: Vec<PerformanceMetric> = self
            .metrics
            .read()
            .iter()
            .filter(|m| in_window(&m.started_at))
            .cloned()
            .collect();
        let alert_count = self
            .alerts
            .read()
            .iter()
            .filter(|a| in_window(&a.raised_at))
            .count();
        PerformanceReport::build(window, now, &metrics, alert_count, self.config.bottleneck_factor)
    }

    fn check_thresholds(&self, metric: &PerformanceMetric) {
        let threshold = self.threshold(metric.kind);
        let mut violations = Vec::new();

        if metric.duration > threshold.max_duration {
            violations.push(ThresholdViolation::Duration {
                actual: metric.duration,
                limit: threshold.max_duration,
            });
        }
        // Throughput is meaningless for operations that move no records.
        if let Some(floor) = threshold.min_throughput {
            if metric.record_count > 0 && metric.throughput < floor {
                violations.push(ThresholdViolation::Throughput {
                    actual: metric.throughput,
                    floor,
                });
            }
        }
        if let Some(snapshot) = self.sample_resources() {
            if let Some(limit) = threshold.max_memory_bytes {
                if snapshot.memory_bytes > limit {
                    violations.push(ThresholdViolation::Memory {
                        actual: snapshot.memory_bytes,
                        limit,
                    });
                }
            }
            if let Some(limit) = threshold.max_cpu_percent {
                if snapshot.cpu_percent > limit {
                    violations.push(ThresholdViolation::Cpu {
                        actual: snapshot.cpu_percent,
                        limit,
                    });
                }
            }
        }

        if violations.is_empty() {
            return;
        }
        let raised_at = self.clock.now();
        let mut alerts = self.alerts.write();
        for violation in violations {
            let severity = AlertSeverity::from_ratio(violation.ratio());
            tracing::warn!(
                operation = %metric.operation_id,
                kind = %metric.kind,
                %severity,
                "performance threshold exceeded: {violation}"
            );
            alerts.push_back(PerformanceAlert {
                operation_id: metric.operation_id.clone(),
                kind: metric.kind,
                violation,
                severity,
                raised_at,
            });
        }
        while alerts.len() > self.config.max_alerts {
            alerts.pop_front();
        }
    }
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new(PerformanceConfig::default())
    }
}

impl fmt::Debug for PerformanceMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PerformanceMonitor")
            .field("enabled", &self.is_enabled())
            .field("metrics", &self.metrics.read().len())
            .field("alerts", &self.alerts.read().len())
            .field("has_probe", &self.probe.is_some())
            .finish()
    }
}

fn throughput(record_count: u64, duration: Duration) -> f64 {
    // Sub-millisecond operations are counted as one millisecond.
    let secs = duration.as_secs_f64().max(0.001);
    record_count as f64 / secs
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProbe(ResourceUsage);

    impl ResourceProbe for FixedProbe {
        fn sample(&self) -> ResourceUsage {
            self.0
        }
    }

    #[test]
    fn start_end_records_metric() {
        let monitor = PerformanceMonitor::default();
        monitor.start("op-1", OperationKind::GetRecord, SyncPhase::Downloading);
        assert_eq!(monitor.active_operations(), 1);

        let metric = monitor.end("op-1", 1, true, 0).unwrap();
        assert_eq!(metric.kind, OperationKind::GetRecord);
        assert_eq!(metric.phase, SyncPhase::Downloading);
        assert!(metric.throughput > 0.0);
        assert_eq!(monitor.metrics().len(), 1);
        assert_eq!(monitor.active_operations(), 0);
    }

    #[test]
    fn unknown_id_and_disabled_return_none() {
        let monitor = PerformanceMonitor::default();
        assert!(monitor.end("missing", 0, true, 0).is_none());

        monitor.start("op", OperationKind::GetRecord, SyncPhase::Uploading);
        monitor.set_enabled(false);
        assert!(monitor.end("op", 0, true, 0).is_none());
        monitor.set_enabled(true);
        assert!(monitor.end("op", 0, true, 0).is_none());
    }

    #[test]
    fn history_is_bounded() {
        let monitor = PerformanceMonitor::new(PerformanceConfig::new().with_max_metrics(3));
        for i in 0..5 {
            let id = format!("op-{i}");
            monitor.start(&id, OperationKind::ReadCheckpoint, SyncPhase::Downloading);
            monitor.end(&id, 0, true, 0);
        }
        let ids: Vec<String> = monitor
            .metrics()
            .into_iter()
            .map(|m| m.operation_id)
            .collect();
        assert_eq!(ids, vec!["op-2", "op-3", "op-4"]);
    }

    #[test]
    fn duration_violation_raises_alert() {
        let monitor = PerformanceMonitor::default();
        monitor.set_threshold(
            OperationKind::GetRecord,
            PerformanceThreshold::new(Duration::ZERO),
        );
        monitor.start("slow", OperationKind::GetRecord, SyncPhase::Uploading);
        std::thread::sleep(Duration::from_millis(2));
        monitor.end("slow", 1, true, 0);

        let alerts = monitor.alerts();
        assert_eq!(alerts.len(), 1);
        assert!(matches!(alerts[0].violation, ThresholdViolation::Duration { .. }));
        assert_eq!(alerts[0].severity, AlertSeverity::Critical);

        monitor.clear_alerts();
        assert!(monitor.alerts().is_empty());
    }

    #[test]
    fn severity_follows_exceed_ratio() {
        let violation = ThresholdViolation::Duration {
            actual: Duration::from_millis(1600),
            limit: Duration::from_millis(1000),
        };
        assert_eq!(AlertSeverity::from_ratio(violation.ratio()), AlertSeverity::Medium);

        let violation = ThresholdViolation::Throughput {
            actual: 10.0,
            floor: 25.0,
        };
        assert_eq!(AlertSeverity::from_ratio(violation.ratio()), AlertSeverity::High);
    }

    #[test]
    fn resource_ring_and_limits() {
        let probe = Arc::new(FixedProbe(ResourceUsage {
            memory_bytes: 2048,
            cpu_percent: 95.0,
            disk_bytes: 0,
            network_bytes: 0,
        }));
        let monitor = PerformanceMonitor::new(PerformanceConfig::new().with_max_snapshots(2))
            .with_probe(probe);
        monitor.set_threshold(
            OperationKind::CreateRecord,
            PerformanceThreshold::new(Duration::from_secs(60))
                .with_max_memory(1024)
                .with_max_cpu(90.0),
        );

        for _ in 0..3 {
            monitor.sample_resources();
        }
        assert_eq!(monitor.snapshots().len(), 2);

        monitor.start("c", OperationKind::CreateRecord, SyncPhase::Downloading);
        monitor.end("c", 1, true, 0);
        let alerts = monitor.alerts();
        assert_eq!(alerts.len(), 2);
        assert!(alerts
            .iter()
            .any(|a| matches!(a.violation, ThresholdViolation::Memory { .. })
                && a.severity == AlertSeverity::High));
        assert!(alerts
            .iter()
            .any(|a| matches!(a.violation, ThresholdViolation::Cpu { .. })
                && a.severity == AlertSeverity::Low));
    }

    #[test]
    fn alerts_serialize_with_their_violation() {
        let alert = PerformanceAlert {
            operation_id: "op-7".to_string(),
            kind: OperationKind::UploadBatch,
            violation: ThresholdViolation::Duration {
                actual: Duration::from_secs(3),
                limit: Duration::from_secs(1),
            },
            severity: AlertSeverity::Critical,
            raised_at: Utc::now(),
        };
        let json = serde_json::to_value(&alert).unwrap();
        assert_eq!(json["violation"]["violation"], "duration");
        assert_eq!(json["violation"]["limit"]["secs"], 1);
        assert_eq!(json["kind"], "upload_batch");

        let cpu = ThresholdViolation::Cpu {
            actual: 95.0,
            limit: 90.0,
        };
        let json = serde_json::to_value(&cpu).unwrap();
        assert_eq!(json["violation"], "cpu");
        assert_eq!(json["limit"], 90.0);
    }

    #[test]
    fn no_probe_means_no_snapshot() {
        let monitor = PerformanceMonitor::default();
        assert!(monitor.sample_resources().is_none());
        assert!(monitor.snapshots().is_empty());
    }
}
