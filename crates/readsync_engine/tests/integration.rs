//! End-to-end tests for the executor and scheduler over in-memory collaborators.

use readsync_engine::{
    BlockReason, EngineOptions, LocalStore, NetworkStatus, RemoteError, RetryConfig,
    SchedulerOptions, SyncEvent, SyncState, NEXT_SYNC_KEY,
};
use readsync_monitor::{OperationKind, OperationStatus};
use readsync_protocol::{
    ConflictStrategy, Record, RecordId, RecordPatch, SyncConfigurationPatch, SyncInterval,
    SyncPhase, WinnerSide,
};
use readsync_testkit::prelude::*;
use std::time::Duration;

#[tokio::test]
async fn uploads_every_dirty_record_in_batches() {
    let harness = EngineHarness::new();
    harness.configure(|c| c.batch_size = 10);
    harness.seed_dirty(25);

    let result = harness.executor.full_sync(false).await;
    assert!(result.success, "{:?}", result.errors);
    assert_eq!(result.synced_count, 25);
    assert_eq!(harness.remote.create_calls(), 25);
    assert_eq!(harness.store.dirty_count(), 0);
    assert!(harness.store.records().iter().all(|r| r.id.is_remote()));

    let batches = harness
        .performance
        .metrics()
        .into_iter()
        .filter(|m| m.kind == OperationKind::UploadBatch)
        .count();
    assert_eq!(batches, 3);
}

#[tokio::test]
async fn scheduling_sets_next_sync_one_interval_ahead() {
    let harness = EngineHarness::new();
    harness.scheduler.initialize().await.unwrap();
    harness
        .scheduler
        .update_preferences(
            &SyncConfigurationPatch::new()
                .with_background_enabled(true)
                .with_interval(SyncInterval::Minutes(60)),
        )
        .await
        .unwrap();

    let expected = (HARNESS_EPOCH_MILLIS + 3_600_000).to_string();
    assert_eq!(harness.prefs.value(NEXT_SYNC_KEY), Some(expected));
    assert_eq!(harness.host.interval(), Some(Duration::from_secs(3_600)));
}

#[tokio::test]
async fn wifi_only_on_cellular_makes_no_remote_calls() {
    let harness = EngineHarness::new();
    harness.configure(|c| c.wifi_only = true);
    harness.connectivity.set_status(NetworkStatus::cellular());
    harness.seed_dirty(3);

    let result = harness.executor.full_sync(false).await;
    assert!(!result.success);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.first_error(), Some("Wi-Fi connection required"));
    assert_eq!(harness.remote.total_calls(), 0);
    assert_eq!(harness.store.dirty_count(), 3);
    assert_eq!(harness.executor.state(), SyncState::Failed);

    let op = harness.sync_monitor.operation(&result.sync_id).unwrap();
    assert_eq!(op.status, OperationStatus::Failed);
}

#[tokio::test(start_paused = true)]
async fn stop_cancels_an_in_flight_run() {
    let harness = EngineHarness::new();
    harness.remote.set_latency(Some(Duration::from_millis(50)));
    harness.seed_dirty(10);

    let executor = harness.executor.clone();
    let run = tokio::spawn(async move { executor.full_sync(false).await });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(harness.executor.is_running());

    harness.executor.stop();
    let result = run.await.unwrap();

    assert!(!result.success);
    assert!(result.was_cancelled());
    assert_eq!(result.phase, SyncPhase::Uploading);
    assert_eq!(result.errors.last().unwrap().message, "sync cancelled");
    assert_eq!(harness.remote.create_calls(), 1);
    assert_eq!(harness.store.checkpoint(), None);
    assert!(!harness.executor.is_running());
    assert_eq!(harness.executor.state(), SyncState::Cancelled);
}

#[tokio::test(start_paused = true)]
async fn concurrent_runs_admit_exactly_one() {
    let harness = EngineHarness::new();
    harness.remote.set_latency(Some(Duration::from_millis(5)));
    harness.seed_remote(2);

    let (a, b) = tokio::join!(
        harness.executor.full_sync(false),
        harness.executor.full_sync(false)
    );
    let blocked: Vec<_> = [&a, &b]
        .into_iter()
        .filter(|r| r.blocked_reason() == Some(BlockReason::AlreadyRunning))
        .collect();
    assert_eq!(blocked.len(), 1);
    assert_eq!(blocked[0].first_error(), Some("sync already in progress"));
    assert!(a.success != b.success);
    assert_eq!(harness.sync_monitor.operations().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn forced_run_ignores_the_running_flag() {
    let harness = EngineHarness::new();
    harness.remote.set_latency(Some(Duration::from_millis(5)));

    let (a, b) = tokio::join!(
        harness.executor.full_sync(false),
        harness.executor.full_sync(true)
    );
    assert!(a.success);
    assert!(b.success);
    assert_eq!(harness.sync_monitor.operations().len(), 2);
}

#[tokio::test]
async fn item_failures_raise_the_error_rate_alert() {
    let harness = EngineHarness::new();
    harness.seed_dirty(2);
    harness
        .store
        .insert(Record::new_local("", "https://example.com/a", at(10)));
    harness
        .store
        .insert(Record::new_local("  ", "https://example.com/b", at(11)));

    let result = harness.executor.sync_up().await;
    assert!(result.success);
    assert_eq!(result.synced_count, 2);
    assert_eq!(result.error_count, 2);

    let health = harness.sync_monitor.health(None);
    assert!((health.error_rate - 0.5).abs() < f64::EPSILON);
    let alerts = harness.sync_monitor.active_alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].rule_id, "high-error-rate");
}

#[tokio::test]
async fn manual_conflict_round_trip() {
    let harness = EngineHarness::new();
    harness.configure(|c| c.conflict_strategy = ConflictStrategy::Manual);
    let original = remote_article(1);
    harness.seed_synced(&original);

    let remote_edit = edited_locally(&original, "Edited remotely", at(3_000)).with_dirty(false);
    harness.remote.insert(remote_edit);
    harness
        .store
        .insert(edited_locally(&original, "Edited here", at(3_100)));

    let result = harness.executor.sync_down().await;
    assert_eq!(result.conflict_count, 1);
    let pending = harness.executor.pending_conflicts();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].kind.label(), "content_changed");

    let decided = harness
        .executor
        .apply_manual_resolution(pending[0].id, &RecordPatch::new().with_favorite(true))
        .await
        .unwrap();
    assert_eq!(decided.title, "Edited remotely");
    assert!(decided.favorite);
    assert!(decided.dirty);
    assert!(harness.executor.pending_conflicts().is_empty());
    assert!(harness.sink.events().iter().any(|e| matches!(
        e,
        SyncEvent::ConflictResolved {
            winner: WinnerSide::Merged,
            ..
        }
    )));

    let result = harness.executor.full_sync(false).await;
    assert!(result.success);
    let uploaded = harness.remote.record("article-1").unwrap();
    assert_eq!(uploaded.title, "Edited remotely");
    assert!(uploaded.favorite);
    assert_eq!(harness.store.dirty_count(), 0);
}

#[tokio::test]
async fn remote_deletion_resolved_manually_is_recreated() {
    let harness = EngineHarness::new();
    harness.configure(|c| c.conflict_strategy = ConflictStrategy::Manual);
    let gone = Record::new(RecordId::remote("gone"), "Gone", "https://g", at(1)).with_dirty(true);
    harness.store.insert(gone.clone());

    harness.executor.sync_up().await;
    let pending = harness.executor.pending_conflicts();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].kind.label(), "remote_deleted");

    let decided = harness
        .executor
        .apply_manual_resolution(pending[0].id, &RecordPatch::new())
        .await
        .unwrap();
    assert!(!decided.id.is_remote());
    assert!(harness.store.record(&gone.id).is_none());

    let result = harness.executor.sync_up().await;
    assert_eq!(result.synced_count, 1);
    assert_eq!(harness.remote.records().len(), 1);
    assert_eq!(harness.remote.records()[0].title, "Gone");
    assert!(harness.store.records()[0].id.is_remote());
}

#[tokio::test]
async fn local_wins_keeps_local_edit_for_the_next_upload() {
    let harness = EngineHarness::new();
    harness.configure(|c| c.conflict_strategy = ConflictStrategy::LocalWins);
    let original = remote_article(2);
    harness.seed_synced(&original);
    harness
        .remote
        .insert(edited_locally(&original, "Remote title", at(3_000)).with_dirty(false));
    harness
        .store
        .insert(edited_locally(&original, "Local title", at(2_500)));

    let result = harness.executor.sync_down().await;
    assert_eq!(result.conflict_count, 1);
    let local = harness.store.record(&original.id).unwrap();
    assert_eq!(local.title, "Local title");
    assert!(local.dirty);

    harness.executor.sync_up().await;
    assert_eq!(
        harness.remote.record("article-2").unwrap().title,
        "Local title"
    );
}

#[tokio::test]
async fn checkpoint_limits_later_downloads() {
    let harness = EngineHarness::new();
    harness.seed_remote(3);

    let first = harness.executor.sync_down().await;
    assert_eq!(first.synced_count, 3);
    assert_eq!(
        harness.store.checkpoint(),
        Some(at_millis(HARNESS_EPOCH_MILLIS))
    );

    let second = harness.executor.sync_down().await;
    assert_eq!(second.synced_count, 0);

    let fresh = remote_article(9).with_modified_at(at_millis(HARNESS_EPOCH_MILLIS + 1_000));
    harness.remote.insert(fresh);
    let third = harness.executor.sync_down().await;
    assert_eq!(third.synced_count, 1);
}

#[tokio::test]
async fn upload_only_runs_leave_the_checkpoint_alone() {
    let harness = EngineHarness::new();
    harness.seed_dirty(1);
    harness.executor.sync_up().await;
    assert_eq!(harness.store.checkpoint(), None);
}

#[tokio::test]
async fn downloads_follow_every_page() {
    let harness = EngineHarness::with_options(
        EngineOptions::new()
            .with_page_size(2)
            .with_retry(RetryConfig::no_retry()),
        SchedulerOptions::default(),
    );
    harness.seed_remote(5);

    let result = harness.executor.sync_down().await;
    assert_eq!(result.synced_count, 5);
    assert_eq!(harness.remote.list_calls(), 3);
    assert_eq!(harness.store.records().len(), 5);
}

fn paged_harness(options: EngineOptions) -> EngineHarness {
    EngineHarness::with_options(
        options.with_page_size(2).with_retry(RetryConfig::no_retry()),
        SchedulerOptions::default(),
    )
}

#[tokio::test]
async fn a_failed_page_keeps_the_previous_checkpoint() {
    let harness = paged_harness(EngineOptions::new());
    harness.seed_remote(5);
    harness.remote.fail_page(2, RemoteError::Timeout);

    let first = harness.executor.sync_down().await;
    assert!(first.success);
    assert_eq!(first.synced_count, 2);
    assert_eq!(first.first_error(), Some("request timed out"));
    assert_eq!(harness.store.checkpoint(), None);

    let second = harness.executor.sync_down().await;
    assert!(second.errors.is_empty(), "{:?}", second.errors);
    assert_eq!(harness.store.records().len(), 5);
    assert_eq!(
        harness.store.checkpoint(),
        Some(at_millis(HARNESS_EPOCH_MILLIS))
    );
}

#[tokio::test]
async fn the_page_limit_keeps_the_previous_checkpoint() {
    let harness = paged_harness(EngineOptions::new().with_max_pages(1));
    harness.seed_remote(5);

    let result = harness.executor.sync_down().await;
    assert_eq!(result.synced_count, 2);
    assert_eq!(
        result.first_error(),
        Some("download stopped at the page limit (1 pages)")
    );
    assert_eq!(harness.remote.list_calls(), 1);
    assert_eq!(harness.store.checkpoint(), None);
}

#[tokio::test]
async fn a_full_run_reports_its_phases_in_order() {
    let harness = EngineHarness::new();
    let result = harness.executor.full_sync(false).await;

    let phases: Vec<SyncPhase> = harness
        .sink
        .events()
        .into_iter()
        .filter_map(|e| match e {
            SyncEvent::PhaseChanged { sync_id, phase } if sync_id == result.sync_id => Some(phase),
            _ => None,
        })
        .collect();
    assert_eq!(
        phases,
        vec![
            SyncPhase::Initializing,
            SyncPhase::Uploading,
            SyncPhase::Downloading,
            SyncPhase::Finalizing,
            SyncPhase::Completed,
        ]
    );
    assert!(matches!(
        harness.sink.events().last(),
        Some(SyncEvent::RunCompleted { result: completed }) if *completed == result
    ));
}

#[tokio::test]
async fn unauthenticated_runs_touch_nothing() {
    let harness = EngineHarness::new();
    harness.auth.set(false);
    harness.seed_dirty(2);
    harness.seed_remote(2);

    let result = harness.executor.full_sync(false).await;
    assert_eq!(result.blocked_reason(), Some(BlockReason::NotAuthenticated));
    assert_eq!(harness.remote.total_calls(), 0);
    assert!(!harness.store.is_initialized());
}
