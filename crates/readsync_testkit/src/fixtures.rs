//! Record fixtures and an in-memory engine harness.
//!
//! The harness wires a [`SyncExecutor`] and a [`BackgroundScheduler`] to the
//! in-memory collaborators from `readsync_engine::memory`, keeping a typed
//! handle to each so tests can arrange and inspect state.

use chrono::{DateTime, TimeZone, Utc};
use readsync_engine::memory::{
    ManualClock, MemoryBackgroundHost, MemoryBootNotifier, MemoryConnectivity, MemoryLocalStore,
    MemoryPreferences, MemoryRemoteApi, RecordingSink, StaticAuth,
};
use readsync_engine::{
    BackgroundScheduler, EngineOptions, NetworkStatus, RetryConfig, SchedulerCollaborators,
    SchedulerOptions, SyncCollaborators, SyncExecutor,
};
use readsync_monitor::{PerformanceMonitor, SyncMonitor};
use readsync_protocol::{Record, RecordId, SyncConfiguration};
use std::sync::Arc;

/// Epoch milliseconds the harness clock starts at.
pub const HARNESS_EPOCH_MILLIS: i64 = 1_700_000_000_000;

/// A UTC time `secs` seconds after the Unix epoch.
pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .expect("timestamp in range")
}

/// A UTC time from epoch milliseconds.
pub fn at_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .expect("timestamp in range")
}

/// A clean remote article numbered `n`.
pub fn remote_article(n: usize) -> Record {
    Record::new(
        RecordId::remote(format!("article-{n}")),
        format!("Article {n}"),
        format!("https://example.com/articles/{n}"),
        at(1_000 + n as i64),
    )
    .with_content(format!("Body of article {n}."))
}

/// A dirty local-only article numbered `n`.
pub fn local_article(n: usize) -> Record {
    Record::new_local(
        format!("Draft {n}"),
        format!("https://example.com/drafts/{n}"),
        at(2_000 + n as i64),
    )
    .with_content(format!("Draft body {n}."))
}

/// `record` edited locally: new title, newer timestamp, dirty.
pub fn edited_locally(record: &Record, title: &str, modified_at: DateTime<Utc>) -> Record {
    let mut edited = record.clone();
    edited.title = title.to_string();
    edited.touch(modified_at);
    edited
}

/// An engine wired to in-memory collaborators.
pub struct EngineHarness {
    /// Local record store.
    pub store: Arc<MemoryLocalStore>,
    /// Remote API.
    pub remote: Arc<MemoryRemoteApi>,
    /// Connectivity sensor.
    pub connectivity: Arc<MemoryConnectivity>,
    /// Boot notifier.
    pub boot: Arc<MemoryBootNotifier>,
    /// Background host.
    pub host: Arc<MemoryBackgroundHost>,
    /// Preference storage.
    pub prefs: Arc<MemoryPreferences>,
    /// Event sink.
    pub sink: Arc<RecordingSink>,
    /// Authentication flag.
    pub auth: Arc<StaticAuth>,
    /// Clock, starting at [`HARNESS_EPOCH_MILLIS`].
    pub clock: Arc<ManualClock>,
    /// Run monitor, stamped by [`EngineHarness::clock`].
    pub sync_monitor: Arc<SyncMonitor>,
    /// Performance monitor.
    pub performance: Arc<PerformanceMonitor>,
    /// The executor.
    pub executor: Arc<SyncExecutor>,
    /// The scheduler, not yet initialized.
    pub scheduler: Arc<BackgroundScheduler>,
}

impl EngineHarness {
    /// Creates a harness on Wi-Fi, authenticated, with retries disabled.
    pub fn new() -> Self {
        Self::with_options(
            EngineOptions::new().with_retry(RetryConfig::no_retry()),
            SchedulerOptions::default(),
        )
    }

    /// Creates a harness with explicit options.
    pub fn with_options(engine: EngineOptions, scheduler: SchedulerOptions) -> Self {
        let store = Arc::new(MemoryLocalStore::new());
        let remote = Arc::new(MemoryRemoteApi::new());
        let connectivity = Arc::new(MemoryConnectivity::new(NetworkStatus::wifi()));
        let boot = Arc::new(MemoryBootNotifier::new());
        let host = Arc::new(MemoryBackgroundHost::new());
        let prefs = Arc::new(MemoryPreferences::new());
        let sink = Arc::new(RecordingSink::new());
        let auth = Arc::new(StaticAuth::new(true));
        let clock = Arc::new(ManualClock::new(at_millis(HARNESS_EPOCH_MILLIS)));
        let sync_monitor = Arc::new(SyncMonitor::default().with_clock(clock.clone()));
        let performance = Arc::new(PerformanceMonitor::default().with_clock(clock.clone()));

        let executor = Arc::new(SyncExecutor::new(
            SyncCollaborators {
                store: store.clone(),
                remote: remote.clone(),
                connectivity: connectivity.clone(),
                auth: auth.clone(),
                sink: sink.clone(),
                clock: clock.clone(),
                sync_monitor: sync_monitor.clone(),
                performance: performance.clone(),
            },
            engine,
        ));
        let scheduler = BackgroundScheduler::new(
            executor.clone(),
            SchedulerCollaborators {
                host: host.clone(),
                connectivity: connectivity.clone(),
                boot: boot.clone(),
                preferences: prefs.clone(),
                sink: sink.clone(),
                clock: clock.clone(),
            },
            scheduler,
        );

        Self {
            store,
            remote,
            connectivity,
            boot,
            host,
            prefs,
            sink,
            auth,
            clock,
            sync_monitor,
            performance,
            executor,
            scheduler,
        }
    }

    /// Replaces the executor configuration.
    pub fn configure(&self, configure: impl FnOnce(&mut SyncConfiguration)) {
        let mut config = self.executor.configuration();
        configure(&mut config);
        self.executor.update_configuration(config);
    }

    /// Inserts `count` dirty local-only records and returns their ids.
    pub fn seed_dirty(&self, count: usize) -> Vec<RecordId> {
        (0..count)
            .map(|n| {
                let record = local_article(n);
                let id = record.id.clone();
                self.store.insert(record);
                id
            })
            .collect()
    }

    /// Inserts `count` records on the remote side only.
    pub fn seed_remote(&self, count: usize) -> Vec<Record> {
        (0..count)
            .map(|n| {
                let record = remote_article(n);
                self.remote.insert(record.clone());
                record
            })
            .collect()
    }

    /// Inserts `record` on both sides, clean locally.
    pub fn seed_synced(&self, record: &Record) {
        self.remote.insert(record.clone());
        let mut local = record.clone();
        local.mark_synced(record.modified_at);
        self.store.insert(local);
    }
}

impl Default for EngineHarness {
    fn default() -> Self {
        Self::new()
    }
}
