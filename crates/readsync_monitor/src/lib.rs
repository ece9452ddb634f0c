//! # readsync monitor
//!
//! Operational visibility for the readsync engine.
//!
//! This crate provides:
//! - `SyncMonitor`: a bounded log of sync runs, derived health metrics,
//!   rule-based alerts and a text report
//! - `PerformanceMonitor`: per-operation duration/throughput metrics,
//!   threshold alerts, a resource usage ring and bottleneck reports
//!
//! Both monitors are passive: they never influence control flow, and every
//! recording call is a no-op while monitoring is disabled.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod alerts;
mod config;
mod performance;
mod report;
mod sync_monitor;

pub use alerts::{Alert, AlertCondition, AlertMetric, AlertSeverity, Comparison};
pub use config::{MonitorConfig, PerformanceConfig};
pub use performance::{
    OperationKind, PerformanceAlert, PerformanceMetric, PerformanceMonitor, PerformanceThreshold,
    ResourceProbe, ResourceUsage, ResourceUsageSnapshot, ThresholdViolation,
};
pub use report::{Bottleneck, BottleneckReason, KindSummary, PerformanceReport, PhaseSummary};
pub use sync_monitor::{
    HealthMetrics, OperationCounts, OperationStatus, RecentError, SyncMonitor,
    SyncOperationMetrics,
};
