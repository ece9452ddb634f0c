//! Simulate command implementation.
//!
//! Wires an engine to the in-memory collaborators, seeds both sides and runs
//! a sync, then prints the result with the monitors' reports.

use crate::error::CliResult;
use chrono::Utc;
use readsync_engine::memory::{
    MemoryConnectivity, MemoryLocalStore, MemoryRemoteApi, RecordingSink, StaticAuth,
};
use readsync_engine::{
    EngineOptions, NetworkStatus, SyncCollaborators, SyncEvent, SyncExecutor, SyncRunResult,
    SystemClock,
};
use readsync_monitor::{HealthMetrics, PerformanceMonitor, PerformanceReport, SyncMonitor};
use readsync_protocol::{ConflictStrategy, Record, RecordId};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const REPORT_WINDOW: Duration = Duration::from_secs(60 * 60);

/// What to seed before the run.
#[derive(Debug, Clone)]
pub struct Scenario {
    /// Dirty local-only records.
    pub dirty: usize,
    /// Remote-only records.
    pub remote: usize,
    /// Records edited on both sides.
    pub conflicts: usize,
    /// Network label.
    pub network: String,
    /// Metered connection.
    pub metered: bool,
    /// Conflict strategy override.
    pub strategy: Option<ConflictStrategy>,
    /// Remote latency in milliseconds.
    pub latency_ms: u64,
}

/// Outcome of a simulation.
#[derive(Debug, Serialize)]
pub struct Simulation {
    /// Runs in execution order.
    pub runs: Vec<SyncRunResult>,
    /// Conflicts waiting for a manual decision.
    pub pending_conflicts: usize,
    /// Records on the remote side afterwards.
    pub remote_records: usize,
    /// Records still dirty locally.
    pub local_dirty: usize,
    /// State events dispatched.
    pub events: usize,
    /// Run monitor health.
    pub health: HealthMetrics,
    /// Performance report.
    pub performance: PerformanceReport,
    #[serde(skip)]
    report: String,
}

/// Seeds and runs the scenario.
///
/// Edited-on-both-sides records only conflict on download, so a scenario
/// with conflicts runs a download first and a full sync after it.
pub async fn execute(prefs: Option<&Path>, scenario: &Scenario) -> CliResult<Simulation> {
    let mut config = super::load_configuration(prefs).await;
    if let Some(strategy) = scenario.strategy {
        config.conflict_strategy = strategy;
    }

    let store = Arc::new(MemoryLocalStore::new());
    let remote = Arc::new(MemoryRemoteApi::new());
    if scenario.latency_ms > 0 {
        remote.set_latency(Some(Duration::from_millis(scenario.latency_ms)));
    }
    let sink = Arc::new(RecordingSink::new());
    let sync_monitor = Arc::new(SyncMonitor::default());
    let performance = Arc::new(PerformanceMonitor::default());
    let executor = SyncExecutor::new(
        SyncCollaborators {
            store: store.clone(),
            remote: remote.clone(),
            connectivity: Arc::new(MemoryConnectivity::new(NetworkStatus::from_label(
                &scenario.network,
                scenario.metered,
            ))),
            auth: Arc::new(StaticAuth::new(true)),
            sink: sink.clone(),
            clock: Arc::new(SystemClock),
            sync_monitor: sync_monitor.clone(),
            performance: performance.clone(),
        },
        EngineOptions::new(),
    );
    executor.update_configuration(config);

    seed(&store, &remote, scenario);
    tracing::info!(
        dirty = scenario.dirty,
        remote = scenario.remote,
        conflicts = scenario.conflicts,
        network = %scenario.network,
        "starting simulation"
    );

    let mut runs = Vec::new();
    if scenario.conflicts > 0 {
        runs.push(executor.sync_down().await);
    }
    runs.push(executor.full_sync(false).await);

    let events = sink
        .events()
        .iter()
        .filter(|e| !matches!(e, SyncEvent::PhaseChanged { .. }))
        .count();
    Ok(Simulation {
        runs,
        pending_conflicts: executor.pending_conflicts().len(),
        remote_records: remote.records().len(),
        local_dirty: store.dirty_count(),
        events,
        health: sync_monitor.health(Some(REPORT_WINDOW)),
        performance: performance.report(REPORT_WINDOW),
        report: sync_monitor.generate_report(),
    })
}

/// Runs the simulate command.
pub async fn run(prefs: Option<&Path>, scenario: &Scenario, format: &str) -> CliResult<()> {
    let simulation = execute(prefs, scenario).await?;
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&simulation)?),
        _ => print_text_output(&simulation),
    }
    Ok(())
}

fn seed(store: &MemoryLocalStore, remote: &MemoryRemoteApi, scenario: &Scenario) {
    let now = Utc::now();
    let earlier = now - chrono::Duration::minutes(10);

    for n in 0..scenario.dirty {
        store.insert(
            Record::new_local(format!("Draft {n}"), format!("https://example.com/d/{n}"), now)
                .with_content(format!("Draft body {n}.")),
        );
    }
    for n in 0..scenario.remote {
        remote.insert(
            Record::new(
                RecordId::remote(format!("remote-{n}")),
                format!("Remote article {n}"),
                format!("https://example.com/r/{n}"),
                earlier,
            )
            .with_content(format!("Remote body {n}.")),
        );
    }
    for n in 0..scenario.conflicts {
        let base = Record::new(
            RecordId::remote(format!("shared-{n}")),
            format!("Shared article {n}"),
            format!("https://example.com/s/{n}"),
            earlier,
        );
        let mut local = base.clone();
        local.mark_synced(earlier);
        local.title = format!("Shared article {n} (edited here)");
        local.touch(now - chrono::Duration::minutes(2));
        store.insert(local);

        let mut theirs = base.with_tags(["edited-remotely"]);
        theirs.title = format!("Shared article {n} (edited remotely)");
        theirs.touch(now - chrono::Duration::minutes(1));
        remote.insert(theirs.with_dirty(false));
    }
}

fn print_text_output(simulation: &Simulation) {
    for run in &simulation.runs {
        let mark = if run.success { "✓" } else { "✗" };
        println!(
            "{mark} Run {} ended in {} after {:?}",
            run.sync_id, run.phase, run.duration
        );
        println!(
            "  synced: {}, conflicts: {}, errors: {}",
            run.synced_count, run.conflict_count, run.error_count
        );
        for error in &run.errors {
            match &error.record_id {
                Some(id) => println!("    [{}] {id}: {}", error.phase, error.message),
                None => println!("    [{}] {}", error.phase, error.message),
            }
        }
    }
    println!();
    println!("Remote records: {}", simulation.remote_records);
    println!("Local dirty records: {}", simulation.local_dirty);
    println!("Pending conflicts: {}", simulation.pending_conflicts);
    println!("State events: {}", simulation.events);
    println!();
    print!("{}", simulation.report);
    println!();
    print!("{}", simulation.performance.render());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario() -> Scenario {
        Scenario {
            dirty: 3,
            remote: 2,
            conflicts: 0,
            network: "wifi".to_string(),
            metered: false,
            strategy: None,
            latency_ms: 0,
        }
    }

    #[tokio::test]
    async fn uploads_and_downloads_everything_on_wifi() {
        let simulation = execute(None, &scenario()).await.unwrap();
        assert_eq!(simulation.runs.len(), 1);
        let run = &simulation.runs[0];
        assert!(run.success, "{:?}", run.errors);
        assert_eq!(simulation.remote_records, 5);
        assert_eq!(simulation.local_dirty, 0);
        assert_eq!(simulation.health.total_operations, 1);
    }

    #[tokio::test]
    async fn offline_runs_are_blocked() {
        let offline = Scenario {
            network: "none".to_string(),
            ..scenario()
        };
        let simulation = execute(None, &offline).await.unwrap();
        let run = &simulation.runs[0];
        assert!(!run.success);
        assert_eq!(run.first_error(), Some("no network connection"));
        assert_eq!(simulation.remote_records, 2);
        assert_eq!(simulation.local_dirty, 3);
    }

    #[tokio::test]
    async fn manual_strategy_leaves_conflicts_pending() {
        let conflicting = Scenario {
            dirty: 0,
            remote: 0,
            conflicts: 2,
            strategy: Some(ConflictStrategy::Manual),
            ..scenario()
        };
        let simulation = execute(None, &conflicting).await.unwrap();
        assert_eq!(simulation.runs.len(), 2);
        assert_eq!(simulation.runs[0].conflict_count, 2);
        assert_eq!(simulation.pending_conflicts, 2);
    }

    #[tokio::test]
    async fn remote_wins_clears_conflicts() {
        let conflicting = Scenario {
            dirty: 0,
            remote: 0,
            conflicts: 1,
            strategy: Some(ConflictStrategy::RemoteWins),
            ..scenario()
        };
        let simulation = execute(None, &conflicting).await.unwrap();
        assert_eq!(simulation.runs[0].conflict_count, 1);
        assert_eq!(simulation.pending_conflicts, 0);
        assert_eq!(simulation.local_dirty, 0);
    }
}
