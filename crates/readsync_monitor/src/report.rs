//! Windowed performance reports.

use crate::performance::{OperationKind, PerformanceMetric};
use chrono::{DateTime, Utc};
use readsync_protocol::SyncPhase;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::Duration;

/// Aggregates for one sync phase.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PhaseSummary {
    /// Operations recorded.
    pub operations: usize,
    /// Operations that failed.
    pub failures: usize,
    /// Records handled.
    pub total_records: u64,
    /// Average duration in milliseconds.
    pub average_duration_ms: f64,
    /// Average throughput in records per second.
    pub average_throughput: f64,
}

/// Aggregates for one operation kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct KindSummary {
    /// Operations recorded.
    pub operations: usize,
    /// Operations that failed.
    pub failures: usize,
    /// Average duration in milliseconds.
    pub average_duration_ms: f64,
}

impl KindSummary {
    /// Failed operations / operations.
    pub fn failure_rate(&self) -> f64 {
        if self.operations == 0 {
            0.0
        } else {
            self.failures as f64 / self.operations as f64
        }
    }
}

/// Why a kind was flagged.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum BottleneckReason {
    /// Average duration far above the window average.
    SlowAverage {
        /// Kind average in milliseconds.
        average_ms: f64,
        /// Window average in milliseconds.
        window_average_ms: f64,
    },
    /// Failure rate far above the window failure rate.
    HighFailureRate {
        /// Kind failure rate.
        rate: f64,
        /// Window failure rate.
        window_rate: f64,
    },
}

/// An operation kind that stands out in the window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bottleneck {
    /// The flagged kind.
    pub kind: OperationKind,
    /// Why it was flagged.
    pub reason: BottleneckReason,
}

/// Performance summary over a time window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceReport {
    /// Window covered.
    pub window: Duration,
    /// Generation time.
    pub generated_at: DateTime<Utc>,
    /// Operations in the window.
    pub total_operations: usize,
    /// Failed operations in the window.
    pub failed_operations: usize,
    /// Threshold alerts raised in the window.
    pub alert_count: usize,
    /// Per-phase aggregates.
    pub phases: BTreeMap<SyncPhase, PhaseSummary>,
    /// Per-kind aggregates.
    pub kinds: BTreeMap<OperationKind, KindSummary>,
    /// Kinds that stand out.
    pub bottlenecks: Vec<Bottleneck>,
    /// Suggested follow-ups.
    pub recommendations: Vec<String>,
}

impl PerformanceReport {
    pub(crate) fn build(
        window: Duration,
        generated_at: DateTime<Utc>,
        metrics: &[PerformanceMetric],
        alert_count: usize,
        factor: f64,
    ) -> Self {
        let mut phases: BTreeMap<SyncPhase, PhaseSummary> = BTreeMap::new();
        let mut kinds: BTreeMap<OperationKind, KindSummary> = BTreeMap::new();
        let mut total_ms = 0.0;
        let mut failed = 0;

        for metric in metrics {
            let ms = metric.duration.as_secs_f64() * 1000.0;
            total_ms += ms;
            if !metric.success {
                failed += 1;
            }

            let phase = phases.entry(metric.phase).or_default();
            phase.operations += 1;
            phase.total_records += metric.record_count;
            phase.average_duration_ms += ms;
            phase.average_throughput += metric.throughput;
            if !metric.success {
                phase.failures += 1;
            }

            let kind = kinds.entry(metric.kind).or_default();
            kind.operations += 1;
            kind.average_duration_ms += ms;
            if !metric.success {
                kind.failures += 1;
            }
        }

        // Sums were accumulated in the average fields.
        for phase in phases.values_mut() {
            let n = phase.operations as f64;
            phase.average_duration_ms /= n;
            phase.average_throughput /= n;
        }
        for kind in kinds.values_mut() {
            kind.average_duration_ms /= kind.operations as f64;
        }

        let total = metrics.len();
        let (window_average_ms, window_rate) = if total == 0 {
            (0.0, 0.0)
        } else {
            (total_ms / total as f64, failed as f64 / total as f64)
        };

        let mut bottlenecks = Vec::new();
        for (kind, summary) in &kinds {
            if window_average_ms > 0.0 && summary.average_duration_ms > factor * window_average_ms {
                bottlenecks.push(Bottleneck {
                    kind: *kind,
                    reason: BottleneckReason::SlowAverage {
                        average_ms: summary.average_duration_ms,
                        window_average_ms,
                    },
                });
            }
            let rate = summary.failure_rate();
            if window_rate > 0.0 && rate > factor * window_rate {
                bottlenecks.push(Bottleneck {
                    kind: *kind,
                    reason: BottleneckReason::HighFailureRate { rate, window_rate },
                });
            }
        }

        let recommendations = recommend(&bottlenecks, alert_count, window_rate);

        Self {
            window,
            generated_at,
            total_operations: total,
            failed_operations: failed,
            alert_count,
            phases,
            kinds,
            bottlenecks,
            recommendations,
        }
    }

    /// Renders the report as text.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Performance report ({}s window, generated {})",
            self.window.as_secs(),
            self.generated_at.to_rfc3339()
        );
        let _ = writeln!(
            out,
            "  operations: {} ({} failed), alerts: {}",
            self.total_operations, self.failed_operations, self.alert_count
        );

        if !self.phases.is_empty() {
            let _ = writeln!(out, "  phases:");
            for (phase, summary) in &self.phases {
                let _ = writeln!(
                    out,
                    "    {phase}: {} ops, {} failed, {} records, avg {:.1} ms, {:.1} rec/s",
                    summary.operations,
                    summary.failures,
                    summary.total_records,
                    summary.average_duration_ms,
                    summary.average_throughput
                );
            }
        }

        if self.bottlenecks.is_empty() {
            let _ = writeln!(out, "  bottlenecks: none");
        } else {
            let _ = writeln!(out, "  bottlenecks:");
            for bottleneck in &self.bottlenecks {
                let detail = match &bottleneck.reason {
                    BottleneckReason::SlowAverage {
                        average_ms,
                        window_average_ms,
                    } => format!("avg {average_ms:.1} ms vs window {window_average_ms:.1} ms"),
                    BottleneckReason::HighFailureRate { rate, window_rate } => format!(
                        "failure rate {:.1}% vs window {:.1}%",
                        rate * 100.0,
                        window_rate * 100.0
                    ),
                };
                let _ = writeln!(out, "    {}: {detail}", bottleneck.kind);
            }
        }

        let _ = writeln!(out, "  recommendations:");
        for recommendation in &self.recommendations {
            let _ = writeln!(out, "    - {recommendation}");
        }
        out
    }
}

fn recommend(bottlenecks: &[Bottleneck], alert_count: usize, window_rate: f64) -> Vec<String> {
    let mut out = Vec::new();
    for bottleneck in bottlenecks {
        let text = match (&bottleneck.reason, bottleneck.kind) {
            (BottleneckReason::SlowAverage { .. }, OperationKind::UploadBatch) => {
                "upload batches are slow; consider a smaller batch size".to_string()
            }
            (BottleneckReason::SlowAverage { .. }, OperationKind::DownloadPage) => {
                "download pages are slow; consider metadata-only downloads on slow networks"
                    .to_string()
            }
            (BottleneckReason::SlowAverage { .. }, OperationKind::ListModified) => {
                "listing modified records is slow; index the dirty flag".to_string()
            }
            (BottleneckReason::SlowAverage { .. }, kind) => {
                format!("{kind} is slow relative to other operations")
            }
            (BottleneckReason::HighFailureRate { .. }, kind) => {
                format!("{kind} fails often; check connectivity and retry settings")
            }
        };
        if !out.contains(&text) {
            out.push(text);
        }
    }
    if window_rate > 0.5 {
        out.push("more than half of operations failed; sync may be misconfigured".to_string());
    }
    if alert_count > 0 {
        out.push(format!("review {alert_count} threshold violation(s)"));
    }
    if out.is_empty() {
        out.push("no bottlenecks detected".to_string());
    }
    out
}
