//! Background scheduler.
//!
//! Registers the periodic trigger with the platform host, reacts to
//! connectivity and boot notifications, throttles triggers and keeps the
//! persisted configuration, last/next sync times and run history.
//!
//! Platform callbacks hold only a weak reference to the scheduler, so
//! dropping the last `Arc` stops them from doing anything.

use crate::collaborators::{
    BackgroundHost, BootNotifier, Clock, ConnectivitySensor, NetworkStatus, PreferenceStore,
    StateSink, Subscription, SyncEvent, TriggerFuture, TriggerHandler,
};
use crate::config::SchedulerOptions;
use crate::error::{HostError, SyncError, SyncResult};
use crate::executor::{BlockReason, SyncExecutor, SyncRunResult};
use crate::gate::{DenyReason, GateDecision};
use crate::preferences::{SyncHistoryEntry, SyncPreferences, SyncTrigger};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use readsync_protocol::{SyncConfiguration, SyncConfigurationPatch};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;

/// Lifecycle state of the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    /// `initialize` has not run, or `cleanup` has.
    Uninitialized,
    /// Idle with a periodic trigger registered.
    IdleScheduled,
    /// Idle without a periodic trigger.
    IdleUnscheduled,
    /// A scheduler-initiated run is in flight.
    Running,
}

/// Why a trigger did not start a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The scheduler is not initialized.
    NotInitialized,
    /// A run is already in flight.
    AlreadyRunning,
    /// The last successful sync is too recent.
    Throttled,
    /// The network gate refused.
    Gate(DenyReason),
    /// No scheduled sync is due.
    NotDue,
}

/// What a trigger did.
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerOutcome {
    /// A run happened.
    Ran(SyncRunResult),
    /// Nothing ran.
    Skipped(SkipReason),
}

impl TriggerOutcome {
    /// Returns the run result, if a run happened.
    pub fn result(&self) -> Option<&SyncRunResult> {
        match self {
            TriggerOutcome::Ran(result) => Some(result),
            TriggerOutcome::Skipped(_) => None,
        }
    }

    /// Returns the skip reason, if nothing ran.
    pub fn skip_reason(&self) -> Option<SkipReason> {
        match self {
            TriggerOutcome::Ran(_) => None,
            TriggerOutcome::Skipped(reason) => Some(*reason),
        }
    }
}

/// Snapshot returned by [`BackgroundScheduler::status`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchedulerStatus {
    /// Lifecycle state.
    pub state: SchedulerState,
    /// Configuration in effect.
    pub configuration: SyncConfiguration,
    /// Last successful sync.
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Next scheduled sync.
    pub next_sync_at: Option<DateTime<Utc>>,
    /// The platform host has a handler registered.
    pub is_registered: bool,
    /// A run is in flight.
    pub executor_running: bool,
}

/// Collaborators injected into a [`BackgroundScheduler`].
#[derive(Clone)]
pub struct SchedulerCollaborators {
    /// Platform host for periodic work.
    pub host: Arc<dyn BackgroundHost>,
    /// Connectivity sensor for change notifications.
    pub connectivity: Arc<dyn ConnectivitySensor>,
    /// Boot-completed notifier.
    pub boot: Arc<dyn BootNotifier>,
    /// Preference storage.
    pub preferences: Arc<dyn PreferenceStore>,
    /// State-broadcast sink.
    pub sink: Arc<dyn StateSink>,
    /// Wall clock.
    pub clock: Arc<dyn Clock>,
}

/// Decrements the running counter.
struct RunningGuard<'a>(&'a AtomicUsize);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Drives the [`SyncExecutor`] from platform triggers.
pub struct BackgroundScheduler {
    executor: Arc<SyncExecutor>,
    host: Arc<dyn BackgroundHost>,
    connectivity: Arc<dyn ConnectivitySensor>,
    boot: Arc<dyn BootNotifier>,
    prefs: SyncPreferences,
    sink: Arc<dyn StateSink>,
    clock: Arc<dyn Clock>,
    options: SchedulerOptions,
    initialized: AtomicBool,
    scheduled: AtomicBool,
    running: AtomicUsize,
    subscriptions: Mutex<Vec<Subscription>>,
    lifecycle: tokio::sync::Mutex<()>,
    self_ref: Weak<BackgroundScheduler>,
}

impl BackgroundScheduler {
    /// Creates a scheduler around `executor`.
    pub fn new(
        executor: Arc<SyncExecutor>,
        collaborators: SchedulerCollaborators,
        options: SchedulerOptions,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            executor,
            host: collaborators.host,
            connectivity: collaborators.connectivity,
            boot: collaborators.boot,
            prefs: SyncPreferences::new(collaborators.preferences),
            sink: collaborators.sink,
            clock: collaborators.clock,
            options,
            initialized: AtomicBool::new(false),
            scheduled: AtomicBool::new(false),
            running: AtomicUsize::new(0),
            subscriptions: Mutex::new(Vec::new()),
            lifecycle: tokio::sync::Mutex::new(()),
            self_ref: self_ref.clone(),
        })
    }

    /// Loads the persisted configuration, subscribes to platform
    /// notifications and registers the periodic trigger if enabled.
    ///
    /// Calling it again is a no-op.
    pub async fn initialize(&self) -> SyncResult<()> {
        let _lifecycle = self.lifecycle.lock().await;
        if self.initialized.load(Ordering::SeqCst) {
            tracing::debug!("background scheduler already initialized");
            return Ok(());
        }

        let handle = Handle::try_current()
            .map_err(|e| HostError::Unavailable(format!("no async runtime: {e}")))?;
        let config = self.prefs.load_configuration().await;
        self.executor.update_configuration(config.clone());

        let mut subscriptions = Vec::with_capacity(2);
        let weak = self.self_ref.clone();
        let runtime = handle.clone();
        subscriptions.push(self.connectivity.subscribe(Arc::new(
            move |status: NetworkStatus| {
                let Some(scheduler) = weak.upgrade() else {
                    return;
                };
                runtime.spawn(async move {
                    scheduler.on_connectivity_change(status).await;
                });
            },
        )));
        let weak = self.self_ref.clone();
        subscriptions.push(self.boot.subscribe_boot_completed(Arc::new(move || {
            let Some(scheduler) = weak.upgrade() else {
                return;
            };
            handle.spawn(async move {
                scheduler.on_boot().await;
            });
        })));
        *self.subscriptions.lock() = subscriptions;
        self.initialized.store(true, Ordering::SeqCst);

        if config.wants_schedule() {
            self.schedule_locked(&config).await?;
        }
        tracing::info!(
            background = config.background_enabled,
            interval = %config.interval,
            "background scheduler initialized"
        );
        Ok(())
    }

    /// Registers the periodic trigger for the current configuration.
    pub async fn schedule(&self) -> SyncResult<()> {
        self.ensure_initialized()?;
        let _lifecycle = self.lifecycle.lock().await;
        let config = self.executor.configuration();
        self.schedule_locked(&config).await
    }

    /// Removes the periodic trigger and the next-sync time.
    pub async fn unschedule(&self) -> SyncResult<()> {
        self.ensure_initialized()?;
        let _lifecycle = self.lifecycle.lock().await;
        self.unschedule_locked().await
    }

    /// Merges `patch` into the configuration, persists it and reschedules.
    pub async fn update_preferences(
        &self,
        patch: &SyncConfigurationPatch,
    ) -> SyncResult<SyncConfiguration> {
        self.ensure_initialized()?;
        let _lifecycle = self.lifecycle.lock().await;

        let config = self.executor.configuration().merged(patch);
        config.validate()?;
        self.prefs.save_configuration(&config).await?;
        self.executor.update_configuration(config.clone());
        self.sink.dispatch(SyncEvent::ConfigChanged {
            configuration: config.clone(),
        });
        tracing::info!(
            background = config.background_enabled,
            interval = %config.interval,
            strategy = %config.conflict_strategy,
            "sync preferences updated"
        );

        if config.wants_schedule() {
            self.schedule_locked(&config).await?;
        } else if self.scheduled.load(Ordering::SeqCst) {
            self.unschedule_locked().await?;
        }
        Ok(config)
    }

    /// Handles a trigger: skip if running, throttled or denied by the
    /// gate; otherwise run a full sync and record it.
    pub async fn trigger(&self, trigger: SyncTrigger) -> TriggerOutcome {
        if !self.initialized.load(Ordering::SeqCst) {
            return TriggerOutcome::Skipped(SkipReason::NotInitialized);
        }
        if self.executor.is_running() {
            tracing::debug!(%trigger, "sync trigger skipped, already running");
            return TriggerOutcome::Skipped(SkipReason::AlreadyRunning);
        }
        if self.is_throttled().await {
            tracing::debug!(%trigger, "sync trigger throttled");
            return TriggerOutcome::Skipped(SkipReason::Throttled);
        }

        let config = self.executor.configuration();
        let (_, decision) = self.executor.gate().check(&config).await;
        if let GateDecision::Denied(reason) = decision {
            tracing::info!(%trigger, %reason, "sync trigger skipped by network gate");
            return TriggerOutcome::Skipped(SkipReason::Gate(reason));
        }

        let result = self.run_and_record(trigger).await;
        if result.blocked_reason() == Some(BlockReason::AlreadyRunning) {
            return TriggerOutcome::Skipped(SkipReason::AlreadyRunning);
        }
        TriggerOutcome::Ran(result)
    }

    /// Reacts to a connectivity change: runs only when online and a
    /// scheduled sync is due.
    pub async fn on_connectivity_change(&self, status: NetworkStatus) -> TriggerOutcome {
        if !status.is_online() {
            return TriggerOutcome::Skipped(SkipReason::Gate(DenyReason::NoConnection));
        }
        if !self.is_due().await {
            tracing::debug!(network = %status.network_type, "connectivity changed, no sync due");
            return TriggerOutcome::Skipped(SkipReason::NotDue);
        }
        self.trigger(SyncTrigger::Connectivity).await
    }

    /// Reacts to boot completion: re-registers the periodic trigger and
    /// runs if a scheduled sync was missed.
    pub async fn on_boot(&self) -> TriggerOutcome {
        if !self.initialized.load(Ordering::SeqCst) {
            return TriggerOutcome::Skipped(SkipReason::NotInitialized);
        }
        let due = self.is_due().await;
        let config = self.executor.configuration();
        if config.wants_schedule() {
            let _lifecycle = self.lifecycle.lock().await;
            if let Err(e) = self.schedule_locked(&config).await {
                tracing::warn!(error = %e, "failed to re-register background sync after boot");
            }
        }
        if !due {
            return TriggerOutcome::Skipped(SkipReason::NotDue);
        }
        self.trigger(SyncTrigger::Boot).await
    }

    /// Runs a full sync now. No throttle; the executor reports gate and
    /// authentication refusals in the result.
    pub async fn sync_now(&self) -> SyncRunResult {
        self.run_and_record(SyncTrigger::Manual).await
    }

    /// Unsubscribes from platform notifications and unregisters the
    /// periodic trigger.
    pub async fn cleanup(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        let subscriptions = std::mem::take(&mut *self.subscriptions.lock());
        drop(subscriptions);
        if let Err(e) = self.host.unregister().await {
            tracing::warn!(error = %e, "failed to unregister background sync during cleanup");
        }
        self.scheduled.store(false, Ordering::SeqCst);
        self.initialized.store(false, Ordering::SeqCst);
        tracing::info!("background scheduler cleaned up");
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SchedulerState {
        if !self.initialized.load(Ordering::SeqCst) {
            SchedulerState::Uninitialized
        } else if self.running.load(Ordering::SeqCst) > 0 {
            SchedulerState::Running
        } else if self.scheduled.load(Ordering::SeqCst) {
            SchedulerState::IdleScheduled
        } else {
            SchedulerState::IdleUnscheduled
        }
    }

    /// Snapshot of the scheduler and its persisted times.
    pub async fn status(&self) -> SchedulerStatus {
        let next_sync_at = self
            .prefs
            .next_sync_millis()
            .await
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single());
        SchedulerStatus {
            state: self.state(),
            configuration: self.executor.configuration(),
            last_sync_at: self.prefs.last_sync_time().await,
            next_sync_at,
            is_registered: self.host.is_registered().await,
            executor_running: self.executor.is_running(),
        }
    }

    /// Run history, oldest first.
    pub async fn history(&self) -> Vec<SyncHistoryEntry> {
        self.prefs.history().await
    }

    /// The executor driven by this scheduler.
    pub fn executor(&self) -> &Arc<SyncExecutor> {
        &self.executor
    }

    fn ensure_initialized(&self) -> SyncResult<()> {
        if self.initialized.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SyncError::SchedulerNotInitialized)
        }
    }

    /// Caller holds `lifecycle`.
    async fn schedule_locked(&self, config: &SyncConfiguration) -> SyncResult<()> {
        let Some(interval) = config.interval.as_duration() else {
            return self.unschedule_locked().await;
        };

        if let Err(e) = self.host.unregister().await {
            tracing::warn!(error = %e, "failed to unregister previous background sync");
        }
        let weak = self.self_ref.clone();
        let handler: TriggerHandler = Arc::new(move || -> TriggerFuture {
            let weak = weak.clone();
            Box::pin(async move {
                if let Some(scheduler) = weak.upgrade() {
                    scheduler.trigger(SyncTrigger::Background).await;
                }
            })
        });
        self.host.register(handler, interval).await?;

        let next = self.next_sync_after(interval);
        self.prefs
            .set_next_sync_millis(next.timestamp_millis())
            .await?;
        self.scheduled.store(true, Ordering::SeqCst);
        self.sink
            .dispatch(SyncEvent::Scheduled { next_sync_at: next });
        tracing::info!(
            interval_secs = interval.as_secs(),
            next_sync = %next,
            "background sync scheduled"
        );
        Ok(())
    }

    /// Caller holds `lifecycle`.
    async fn unschedule_locked(&self) -> SyncResult<()> {
        if let Err(e) = self.host.unregister().await {
            tracing::warn!(error = %e, "failed to unregister background sync");
        }
        self.prefs.clear_next_sync().await?;
        self.scheduled.store(false, Ordering::SeqCst);
        self.sink.dispatch(SyncEvent::Unscheduled);
        tracing::info!("background sync unscheduled");
        Ok(())
    }

    async fn run_and_record(&self, trigger: SyncTrigger) -> SyncRunResult {
        self.running.fetch_add(1, Ordering::SeqCst);
        let _running = RunningGuard(&self.running);

        tracing::info!(%trigger, "sync triggered");
        let result = self.executor.full_sync(false).await;
        if result.blocked_reason() == Some(BlockReason::AlreadyRunning) {
            return result;
        }

        let finished_at = self.clock.now();
        if result.success {
            if let Err(e) = self.prefs.set_last_sync_time(finished_at).await {
                tracing::warn!(error = %e, "failed to persist last sync time");
            }
        }

        let entry = SyncHistoryEntry {
            sync_id: result.sync_id.clone(),
            trigger,
            finished_at,
            success: result.success,
            synced_count: result.synced_count,
            conflict_count: result.conflict_count,
            error_count: result.error_count,
            duration_ms: result.duration.as_millis() as u64,
            first_error: result.first_error().map(str::to_string),
        };
        if let Err(e) = self
            .prefs
            .append_history(entry, self.options.history_limit)
            .await
        {
            tracing::warn!(error = %e, "failed to persist sync history");
        }

        if self.scheduled.load(Ordering::SeqCst) {
            if let Some(interval) = self.executor.configuration().interval.as_duration() {
                let next = self.next_sync_after(interval);
                if let Err(e) = self.prefs.set_next_sync_millis(next.timestamp_millis()).await {
                    tracing::warn!(error = %e, "failed to persist next sync time");
                }
            }
        }
        result
    }

    async fn is_throttled(&self) -> bool {
        let Some(last) = self.prefs.last_sync_time().await else {
            return false;
        };
        let elapsed = (self.clock.now() - last).num_milliseconds();
        elapsed >= 0 && (elapsed as u128) < self.options.throttle_window.as_millis()
    }

    async fn is_due(&self) -> bool {
        match self.prefs.next_sync_millis().await {
            Some(next) => next <= self.clock.now().timestamp_millis(),
            None => false,
        }
    }

    fn next_sync_after(&self, interval: Duration) -> DateTime<Utc> {
        self.clock.now() + chrono::Duration::milliseconds(interval.as_millis() as i64)
    }
}

impl fmt::Debug for BackgroundScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackgroundScheduler")
            .field("state", &self.state())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineOptions, RetryConfig};
    use crate::executor::SyncCollaborators;
    use crate::memory::{
        ManualClock, MemoryBackgroundHost, MemoryBootNotifier, MemoryConnectivity,
        MemoryLocalStore, MemoryPreferences, MemoryRemoteApi, RecordingSink, StaticAuth,
    };
    use crate::preferences::{CONFIGURATION_KEY, LAST_SYNC_KEY, NEXT_SYNC_KEY};
    use readsync_monitor::{PerformanceMonitor, SyncMonitor};
    use readsync_protocol::{ProtocolError, SyncInterval};

    const T: i64 = 1_700_000_000_000;

    struct Fixture {
        remote: Arc<MemoryRemoteApi>,
        connectivity: Arc<MemoryConnectivity>,
        boot: Arc<MemoryBootNotifier>,
        host: Arc<MemoryBackgroundHost>,
        prefs: Arc<MemoryPreferences>,
        sink: Arc<RecordingSink>,
        clock: Arc<ManualClock>,
        scheduler: Arc<BackgroundScheduler>,
    }

    fn fixture() -> Fixture {
        let remote = Arc::new(MemoryRemoteApi::new());
        let connectivity = Arc::new(MemoryConnectivity::new(NetworkStatus::wifi()));
        let boot = Arc::new(MemoryBootNotifier::new());
        let host = Arc::new(MemoryBackgroundHost::new());
        let prefs = Arc::new(MemoryPreferences::new());
        let sink = Arc::new(RecordingSink::new());
        let clock = Arc::new(ManualClock::new(Utc.timestamp_millis_opt(T).unwrap()));

        let executor = Arc::new(SyncExecutor::new(
            SyncCollaborators {
                store: Arc::new(MemoryLocalStore::new()),
                remote: remote.clone(),
                connectivity: connectivity.clone(),
                auth: Arc::new(StaticAuth::new(true)),
                sink: sink.clone(),
                clock: clock.clone(),
                sync_monitor: Arc::new(SyncMonitor::default()),
                performance: Arc::new(PerformanceMonitor::default()),
            },
            EngineOptions::new().with_retry(RetryConfig::no_retry()),
        ));
        let scheduler = BackgroundScheduler::new(
            executor,
            SchedulerCollaborators {
                host: host.clone(),
                connectivity: connectivity.clone(),
                boot: boot.clone(),
                preferences: prefs.clone(),
                sink: sink.clone(),
                clock: clock.clone(),
            },
            SchedulerOptions::default(),
        );
        Fixture {
            remote,
            connectivity,
            boot,
            host,
            prefs,
            sink,
            clock,
            scheduler,
        }
    }

    fn enabled_hourly() -> SyncConfigurationPatch {
        SyncConfigurationPatch::new()
            .with_background_enabled(true)
            .with_interval(SyncInterval::Minutes(60))
    }

    #[tokio::test]
    async fn initialize_restores_persisted_schedule() {
        let f = fixture();
        let config = SyncConfiguration {
            background_enabled: true,
            interval: SyncInterval::Minutes(60),
            ..SyncConfiguration::default()
        };
        f.prefs.insert(CONFIGURATION_KEY, config.to_json().unwrap());

        f.scheduler.initialize().await.unwrap();
        assert_eq!(f.scheduler.state(), SchedulerState::IdleScheduled);
        assert_eq!(f.host.interval(), Some(Duration::from_secs(3600)));
        let expected = (T + 3_600_000).to_string();
        assert_eq!(f.prefs.value(NEXT_SYNC_KEY).as_deref(), Some(expected.as_str()));
        assert_eq!(f.connectivity.subscriber_count(), 1);
        assert_eq!(f.boot.subscriber_count(), 1);

        f.scheduler.initialize().await.unwrap();
        assert_eq!(f.host.register_calls(), 1);
    }

    #[tokio::test]
    async fn preferences_require_initialization() {
        let f = fixture();
        let result = f.scheduler.update_preferences(&enabled_hourly()).await;
        assert!(matches!(result, Err(SyncError::SchedulerNotInitialized)));
        assert_eq!(f.scheduler.state(), SchedulerState::Uninitialized);
    }

    #[tokio::test]
    async fn update_preferences_reschedules_stop_before_start() {
        let f = fixture();
        f.scheduler.initialize().await.unwrap();
        assert_eq!(f.scheduler.state(), SchedulerState::IdleUnscheduled);

        f.host.fail_unregister(true);
        let config = f.scheduler.update_preferences(&enabled_hourly()).await.unwrap();
        assert!(config.background_enabled);
        assert_eq!(f.host.unregister_calls(), 1);
        assert_eq!(f.host.register_calls(), 1);
        assert_eq!(f.scheduler.state(), SchedulerState::IdleScheduled);
        assert!(f.prefs.value(CONFIGURATION_KEY).is_some());

        let events = f.sink.events();
        assert!(events
            .iter()
            .any(|e| matches!(e, SyncEvent::ConfigChanged { .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, SyncEvent::Scheduled { .. })));

        f.host.fail_unregister(false);
        f.scheduler
            .update_preferences(&SyncConfigurationPatch::new().with_interval(SyncInterval::Manual))
            .await
            .unwrap();
        assert_eq!(f.scheduler.state(), SchedulerState::IdleUnscheduled);
        assert!(f.prefs.value(NEXT_SYNC_KEY).is_none());
        assert!(!f.host.is_registered().await);
    }

    #[tokio::test]
    async fn invalid_preferences_are_rejected() {
        let f = fixture();
        f.scheduler.initialize().await.unwrap();
        let result = f
            .scheduler
            .update_preferences(&SyncConfigurationPatch::new().with_batch_size(0))
            .await;
        assert!(matches!(
            result,
            Err(SyncError::Protocol(ProtocolError::InvalidBatchSize))
        ));
        assert!(f.prefs.value(CONFIGURATION_KEY).is_none());
    }

    #[tokio::test]
    async fn trigger_is_throttled_after_recent_sync() {
        let f = fixture();
        f.scheduler.initialize().await.unwrap();
        f.prefs.insert(LAST_SYNC_KEY, (T - 2_000).to_string());

        let outcome = f.scheduler.trigger(SyncTrigger::Background).await;
        assert_eq!(outcome.skip_reason(), Some(SkipReason::Throttled));
        assert_eq!(f.remote.total_calls(), 0);

        f.clock.advance(Duration::from_secs(4));
        let outcome = f.scheduler.trigger(SyncTrigger::Background).await;
        assert!(outcome.result().unwrap().success);
    }

    #[tokio::test]
    async fn trigger_respects_network_gate() {
        let f = fixture();
        f.scheduler.initialize().await.unwrap();
        f.scheduler
            .update_preferences(&SyncConfigurationPatch::new().with_wifi_only(true))
            .await
            .unwrap();
        f.connectivity.set_status(NetworkStatus::cellular());

        let outcome = f.scheduler.trigger(SyncTrigger::Background).await;
        assert_eq!(
            outcome.skip_reason(),
            Some(SkipReason::Gate(DenyReason::WifiRequired))
        );
        assert_eq!(f.remote.total_calls(), 0);
        assert!(f.scheduler.history().await.is_empty());
    }

    #[tokio::test]
    async fn background_fire_runs_and_records_history() {
        let f = fixture();
        f.scheduler.initialize().await.unwrap();
        f.scheduler.update_preferences(&enabled_hourly()).await.unwrap();

        f.clock.advance(Duration::from_secs(60));
        assert!(f.host.fire().await);

        let history = f.scheduler.history().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].trigger, SyncTrigger::Background);
        assert!(history[0].success);

        let status = f.scheduler.status().await;
        assert_eq!(status.state, SchedulerState::IdleScheduled);
        assert_eq!(status.last_sync_at, Some(f.clock.now()));
        assert_eq!(
            status.next_sync_at.map(|at| at.timestamp_millis()),
            Some(T + 60_000 + 3_600_000)
        );
        assert!(status.is_registered);
        assert!(!status.executor_running);
    }

    #[tokio::test]
    async fn connectivity_runs_only_when_due() {
        let f = fixture();
        f.scheduler.initialize().await.unwrap();
        f.scheduler.update_preferences(&enabled_hourly()).await.unwrap();

        let outcome = f
            .scheduler
            .on_connectivity_change(NetworkStatus::wifi())
            .await;
        assert_eq!(outcome.skip_reason(), Some(SkipReason::NotDue));

        let outcome = f
            .scheduler
            .on_connectivity_change(NetworkStatus::offline())
            .await;
        assert_eq!(
            outcome.skip_reason(),
            Some(SkipReason::Gate(DenyReason::NoConnection))
        );

        f.clock.advance(Duration::from_secs(3600));
        let outcome = f
            .scheduler
            .on_connectivity_change(NetworkStatus::wifi().unreachable())
            .await;
        assert_eq!(
            outcome.skip_reason(),
            Some(SkipReason::Gate(DenyReason::NoConnection))
        );

        let outcome = f
            .scheduler
            .on_connectivity_change(NetworkStatus::wifi())
            .await;
        assert!(outcome.result().is_some());
        assert_eq!(
            f.scheduler.history().await[0].trigger,
            SyncTrigger::Connectivity
        );
    }

    #[tokio::test]
    async fn connectivity_callback_spawns_due_sync() {
        let f = fixture();
        f.scheduler.initialize().await.unwrap();
        f.scheduler.update_preferences(&enabled_hourly()).await.unwrap();
        f.clock.advance(Duration::from_secs(7200));

        f.connectivity.set_status(NetworkStatus::wifi());
        let scheduler = f.scheduler.clone();
        tokio::time::timeout(Duration::from_secs(5), async move {
            while scheduler.history().await.is_empty() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn boot_reregisters_and_runs_missed_sync() {
        let f = fixture();
        f.scheduler.initialize().await.unwrap();
        f.scheduler.update_preferences(&enabled_hourly()).await.unwrap();
        f.clock.advance(Duration::from_secs(7200));

        let outcome = f.scheduler.on_boot().await;
        assert_eq!(f.host.register_calls(), 2);
        assert_eq!(outcome.result().unwrap().errors.len(), 0);
        assert_eq!(f.scheduler.history().await[0].trigger, SyncTrigger::Boot);
    }

    #[tokio::test]
    async fn sync_now_ignores_throttle() {
        let f = fixture();
        f.scheduler.initialize().await.unwrap();
        f.prefs.insert(LAST_SYNC_KEY, T.to_string());

        let result = f.scheduler.sync_now().await;
        assert!(result.success);
        assert_eq!(f.scheduler.history().await[0].trigger, SyncTrigger::Manual);
    }

    #[tokio::test]
    async fn cleanup_unsubscribes_and_unregisters() {
        let f = fixture();
        f.scheduler.initialize().await.unwrap();
        f.scheduler.update_preferences(&enabled_hourly()).await.unwrap();

        f.scheduler.cleanup().await;
        assert_eq!(f.scheduler.state(), SchedulerState::Uninitialized);
        assert_eq!(f.connectivity.subscriber_count(), 0);
        assert_eq!(f.boot.subscriber_count(), 0);
        assert!(!f.host.is_registered().await);
        assert_eq!(
            f.scheduler.trigger(SyncTrigger::Background).await.skip_reason(),
            Some(SkipReason::NotInitialized)
        );
    }
}
