//! Sync executor.
//!
//! Runs bidirectional reconciliation between the local store and the remote
//! API: upload dirty records, download remote changes, resolve conflicts and
//! persist the checkpoint.
//!
//! ## Run lifecycle
//!
//! 1. A non-forced run claims the running flag before its first suspension
//!    point; a second caller observes the claim and gets an
//!    "already in progress" result.
//! 2. Preconditions (authentication, network gate, storage) are checked
//!    before any store or API call.
//! 3. Upload, download and conflict resolution run in order. Per-item
//!    failures are collected, never raised, and one phase failing does not
//!    abort the next.
//! 4. Finalize writes the checkpoint only after a download that consumed
//!    every page and applied every item. A cancelled, failed or truncated
//!    download keeps the previous checkpoint so the missed changes are
//!    listed again by the next run.
//!
//! Cancellation is cooperative: [`SyncExecutor::stop`] flips the token of
//! every in-flight run, and tokens are checked between batches, items and
//! pages.

use crate::collaborators::{
    AuthProvider, Clock, ConnectivitySensor, ListQuery, LocalStore, NetworkStatus, RemoteApi,
    StateSink, SyncEvent,
};
use crate::config::EngineOptions;
use crate::error::{RemoteError, RemoteResult, SyncError, SyncResult};
use crate::gate::{DenyReason, GateDecision, NetworkGate};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use readsync_monitor::{
    OperationCounts, OperationKind, OperationStatus, PerformanceMonitor, SyncMonitor,
};
use readsync_protocol::{
    classify, ConflictKind, ConflictStrategy, Record, RecordId, RecordPatch, Resolution,
    ResolutionOutcome, SyncConfiguration, SyncConflict, SyncPhase, WinnerSide,
};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// The current state of the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// No run has happened yet.
    Idle,
    /// A run is in flight.
    Syncing,
    /// The last run completed.
    Synced,
    /// The last run was blocked.
    Failed,
    /// The last run was cancelled.
    Cancelled,
}

impl SyncState {
    /// Returns true if a run is in flight.
    pub fn is_active(&self) -> bool {
        matches!(self, SyncState::Syncing)
    }

    /// Returns true if a new run can start without forcing.
    pub fn can_start_sync(&self) -> bool {
        !self.is_active()
    }
}

/// Statistics about sync runs.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncStats {
    /// Runs that completed.
    pub runs_completed: u64,
    /// Runs refused by a precondition.
    pub runs_blocked: u64,
    /// Runs that were cancelled.
    pub runs_cancelled: u64,
    /// Records synced in either direction.
    pub records_synced: u64,
    /// Conflicts detected.
    pub conflicts_detected: u64,
    /// Conflicts resolved, automatically or manually.
    pub conflicts_resolved: u64,
    /// Remote call retries.
    pub retries: u64,
    /// Last completed run.
    pub last_sync_time: Option<DateTime<Utc>>,
    /// First error of the last run that had one.
    pub last_error: Option<String>,
}

/// Why a run was refused before doing any work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    /// Another non-forced run holds the running flag.
    AlreadyRunning,
    /// No credentials.
    NotAuthenticated,
    /// The network gate refused.
    Network(DenyReason),
    /// The local store could not be initialized.
    StorageNotInitialized,
}

impl BlockReason {
    /// Converts to the equivalent error.
    pub fn into_error(self) -> SyncError {
        match self {
            BlockReason::AlreadyRunning => SyncError::AlreadyRunning,
            BlockReason::NotAuthenticated => SyncError::NotAuthenticated,
            BlockReason::Network(reason) => SyncError::NetworkDenied(reason),
            BlockReason::StorageNotInitialized => SyncError::StorageNotInitialized,
        }
    }
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.into_error())
    }
}

/// Classification of a [`RunError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunErrorKind {
    /// The run was refused; this is the only error of the run.
    Blocked(BlockReason),
    /// One item or one phase step failed.
    Item {
        /// Whether a later run may succeed unchanged.
        retryable: bool,
    },
    /// The run was cancelled.
    Aborted,
}

/// An error recorded during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunError {
    /// Phase the error happened in.
    pub phase: SyncPhase,
    /// The record involved, if any.
    pub record_id: Option<RecordId>,
    /// Classification.
    pub kind: RunErrorKind,
    /// Error text.
    pub message: String,
}

impl RunError {
    fn blocked(phase: SyncPhase, reason: BlockReason) -> Self {
        Self {
            phase,
            record_id: None,
            kind: RunErrorKind::Blocked(reason),
            message: reason.to_string(),
        }
    }

    fn aborted(phase: SyncPhase) -> Self {
        Self {
            phase,
            record_id: None,
            kind: RunErrorKind::Aborted,
            message: SyncError::Cancelled.to_string(),
        }
    }

    fn item(phase: SyncPhase, record_id: Option<RecordId>, error: &SyncError) -> Self {
        Self {
            phase,
            record_id,
            kind: RunErrorKind::Item {
                retryable: error.is_retryable(),
            },
            message: error.to_string(),
        }
    }

    /// Returns true if a later run may succeed unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, RunErrorKind::Item { retryable: true })
    }

    /// Returns true for the cancellation entry.
    pub fn is_aborted(&self) -> bool {
        matches!(self.kind, RunErrorKind::Aborted)
    }
}

/// Terminal result of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncRunResult {
    /// Run identifier.
    pub sync_id: String,
    /// True iff the run was neither blocked nor cancelled.
    pub success: bool,
    /// Records synced in either direction.
    pub synced_count: u64,
    /// Conflicts detected.
    pub conflict_count: u64,
    /// Errors recorded.
    pub error_count: u64,
    /// Wall time of the run.
    pub duration: Duration,
    /// Last phase reached.
    pub phase: SyncPhase,
    /// Errors in the order they happened.
    pub errors: Vec<RunError>,
}

impl SyncRunResult {
    fn already_running() -> Self {
        Self {
            sync_id: Uuid::new_v4().to_string(),
            success: false,
            synced_count: 0,
            conflict_count: 0,
            error_count: 1,
            duration: Duration::ZERO,
            phase: SyncPhase::Idle,
            errors: vec![RunError::blocked(SyncPhase::Idle, BlockReason::AlreadyRunning)],
        }
    }

    /// The reason the run was refused, if it was.
    pub fn blocked_reason(&self) -> Option<BlockReason> {
        self.errors.iter().find_map(|e| match e.kind {
            RunErrorKind::Blocked(reason) => Some(reason),
            _ => None,
        })
    }

    /// Returns true if the run was cancelled.
    pub fn was_cancelled(&self) -> bool {
        self.errors.iter().any(RunError::is_aborted)
    }

    /// Text of the first error.
    pub fn first_error(&self) -> Option<&str> {
        self.errors.first().map(|e| e.message.as_str())
    }

    /// Converts a blocked or cancelled run into an error.
    pub fn into_result(self) -> SyncResult<Self> {
        if let Some(reason) = self.blocked_reason() {
            return Err(reason.into_error());
        }
        if self.was_cancelled() {
            return Err(SyncError::Cancelled);
        }
        Ok(self)
    }
}

/// Collaborators injected into a [`SyncExecutor`].
#[derive(Clone)]
pub struct SyncCollaborators {
    /// Local record store.
    pub store: Arc<dyn LocalStore>,
    /// Remote article API.
    pub remote: Arc<dyn RemoteApi>,
    /// Connectivity sensor.
    pub connectivity: Arc<dyn ConnectivitySensor>,
    /// Authentication flag.
    pub auth: Arc<dyn AuthProvider>,
    /// State-broadcast sink.
    pub sink: Arc<dyn StateSink>,
    /// Wall clock.
    pub clock: Arc<dyn Clock>,
    /// Run log and alerts.
    pub sync_monitor: Arc<SyncMonitor>,
    /// Operation timings.
    pub performance: Arc<PerformanceMonitor>,
}

#[derive(Debug, Clone, Copy)]
enum RunKind {
    Full,
    Upload,
    Download,
}

impl RunKind {
    fn uploads(self) -> bool {
        matches!(self, RunKind::Full | RunKind::Upload)
    }

    fn downloads(self) -> bool {
        matches!(self, RunKind::Full | RunKind::Download)
    }
}

enum UploadOutcome {
    Synced,
    Removed,
    Queued,
}

enum DownloadOutcome {
    Applied,
    Deferred,
}

/// Per-run mutable state. Never shared between runs.
struct RunContext {
    sync_id: String,
    started_at: DateTime<Utc>,
    started: Instant,
    token: Arc<AtomicBool>,
    config: SyncConfiguration,
    phase: SyncPhase,
    counts: OperationCounts,
    synced: u64,
    conflicts: u64,
    errors: Vec<RunError>,
    detected: Vec<SyncConflict>,
    /// Remote ids written by this run's upload.
    uploaded: HashSet<String>,
    /// Set when some remote change was not applied locally.
    download_gap: bool,
    cancelled: bool,
    op_seq: u64,
}

impl RunContext {
    fn new(
        sync_id: String,
        started_at: DateTime<Utc>,
        token: Arc<AtomicBool>,
        config: SyncConfiguration,
    ) -> Self {
        Self {
            sync_id,
            started_at,
            started: Instant::now(),
            token,
            config,
            phase: SyncPhase::Idle,
            counts: OperationCounts::default(),
            synced: 0,
            conflicts: 0,
            errors: Vec::new(),
            detected: Vec::new(),
            uploaded: HashSet::new(),
            download_gap: false,
            cancelled: false,
            op_seq: 0,
        }
    }

    fn is_cancelled(&mut self) -> bool {
        if !self.cancelled && self.token.load(Ordering::SeqCst) {
            self.cancelled = true;
        }
        self.cancelled
    }

    fn next_op(&mut self) -> String {
        self.op_seq += 1;
        format!("{}:{}", self.sync_id, self.op_seq)
    }
}

/// Releases the running flag.
struct ClaimGuard<'a>(&'a AtomicBool);

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Unregisters a run's cancellation token.
struct TokenGuard<'a> {
    tokens: &'a Mutex<HashMap<String, Arc<AtomicBool>>>,
    sync_id: String,
}

impl Drop for TokenGuard<'_> {
    fn drop(&mut self) {
        self.tokens.lock().remove(&self.sync_id);
    }
}

/// Runs sync between the local store and the remote API.
pub struct SyncExecutor {
    store: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteApi>,
    gate: NetworkGate,
    auth: Arc<dyn AuthProvider>,
    sink: Arc<dyn StateSink>,
    clock: Arc<dyn Clock>,
    sync_monitor: Arc<SyncMonitor>,
    performance: Arc<PerformanceMonitor>,
    options: EngineOptions,
    config: RwLock<SyncConfiguration>,
    claimed: AtomicBool,
    tokens: Mutex<HashMap<String, Arc<AtomicBool>>>,
    pending: RwLock<Vec<SyncConflict>>,
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
}

impl SyncExecutor {
    /// Creates an executor with the default configuration.
    pub fn new(collaborators: SyncCollaborators, options: EngineOptions) -> Self {
        Self {
            store: collaborators.store,
            remote: collaborators.remote,
            gate: NetworkGate::new(collaborators.connectivity),
            auth: collaborators.auth,
            sink: collaborators.sink,
            clock: collaborators.clock,
            sync_monitor: collaborators.sync_monitor,
            performance: collaborators.performance,
            options,
            config: RwLock::new(SyncConfiguration::default()),
            claimed: AtomicBool::new(false),
            tokens: Mutex::new(HashMap::new()),
            pending: RwLock::new(Vec::new()),
            state: RwLock::new(SyncState::Idle),
            stats: RwLock::new(SyncStats::default()),
        }
    }

    /// Upload, download, resolve and finalize.
    ///
    /// A forced run skips the running-flag claim.
    pub async fn full_sync(&self, force: bool) -> SyncRunResult {
        self.run(RunKind::Full, force).await
    }

    /// Uploads dirty records only. The checkpoint is left untouched.
    pub async fn sync_up(&self) -> SyncRunResult {
        self.run(RunKind::Upload, false).await
    }

    /// Downloads remote changes only.
    pub async fn sync_down(&self) -> SyncRunResult {
        self.run(RunKind::Download, false).await
    }

    /// Cancels every in-flight run.
    pub fn stop(&self) {
        let tokens = self.tokens.lock();
        for token in tokens.values() {
            token.store(true, Ordering::SeqCst);
        }
        tracing::info!(runs = tokens.len(), "sync stop requested");
    }

    /// Returns true while any run is in flight.
    pub fn is_running(&self) -> bool {
        self.claimed.load(Ordering::SeqCst) || !self.tokens.lock().is_empty()
    }

    /// Conflicts waiting for a manual decision, in detection order.
    pub fn pending_conflicts(&self) -> Vec<SyncConflict> {
        self.pending.read().clone()
    }

    /// Applies a person's decision to a pending conflict.
    ///
    /// The patch is applied on top of the remote snapshot (the local one when
    /// the remote record was deleted). The result is stamped with the current
    /// time and kept dirty so the decision is uploaded by the next run. A
    /// decision on a remotely deleted record gets a fresh local id so the
    /// next upload re-creates it.
    pub async fn apply_manual_resolution(
        &self,
        conflict_id: Uuid,
        patch: &RecordPatch,
    ) -> SyncResult<Record> {
        let mut conflict = {
            let mut pending = self.pending.write();
            let index = pending
                .iter()
                .position(|c| c.id == conflict_id)
                .ok_or(SyncError::ConflictNotFound(conflict_id))?;
            pending.remove(index)
        };

        let now = self.clock.now();
        let stored = match self.store_manual_decision(&conflict, patch, now).await {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(%conflict_id, error = %e, "manual resolution failed, conflict kept");
                let mut pending = self.pending.write();
                if !pending.iter().any(|c| c.record_id == conflict.record_id) {
                    pending.push(conflict);
                }
                return Err(e);
            }
        };

        let local = conflict.kind.local();
        let discards_local = !stored.content_eq(local);
        let discards_remote = conflict
            .kind
            .remote()
            .map_or(false, |remote| !stored.content_eq(remote));
        let winner = match (discards_local, discards_remote) {
            (true, true) => WinnerSide::Merged,
            (true, false) => WinnerSide::Remote,
            _ => WinnerSide::Local,
        };
        conflict.resolve(Resolution {
            strategy: ConflictStrategy::Manual,
            winner,
            resolved_at: now,
            data_loss: discards_local || discards_remote,
            confidence: 1.0,
        });

        self.stats.write().conflicts_resolved += 1;
        self.sink.dispatch(SyncEvent::ConflictResolved {
            conflict_id,
            record_id: conflict.record_id.clone(),
            winner,
        });
        tracing::info!(%conflict_id, record = %stored.id, "manual resolution applied");
        Ok(stored)
    }

    /// Replaces the configuration used by subsequent runs.
    pub fn update_configuration(&self, config: SyncConfiguration) {
        *self.config.write() = config;
    }

    /// Returns the configuration in effect.
    pub fn configuration(&self) -> SyncConfiguration {
        self.config.read().clone()
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// The network gate used for preconditions.
    pub fn gate(&self) -> &NetworkGate {
        &self.gate
    }

    /// The run monitor.
    pub fn sync_monitor(&self) -> &Arc<SyncMonitor> {
        &self.sync_monitor
    }

    /// The performance monitor.
    pub fn performance(&self) -> &Arc<PerformanceMonitor> {
        &self.performance
    }

    async fn run(&self, kind: RunKind, force: bool) -> SyncRunResult {
        // Claimed before the first await so a concurrent caller observes it.
        let _claim = if force {
            None
        } else {
            if self
                .claimed
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                tracing::info!("sync already in progress");
                return SyncRunResult::already_running();
            }
            Some(ClaimGuard(&self.claimed))
        };

        let sync_id = Uuid::new_v4().to_string();
        let token = Arc::new(AtomicBool::new(false));
        self.tokens.lock().insert(sync_id.clone(), token.clone());
        let _token = TokenGuard {
            tokens: &self.tokens,
            sync_id: sync_id.clone(),
        };

        let mut ctx = RunContext::new(sync_id, self.clock.now(), token, self.configuration());
        *self.state.write() = SyncState::Syncing;
        tracing::info!(sync_id = %ctx.sync_id, ?kind, force, "sync started");

        let status = self.gate.status().await;
        self.sync_monitor
            .start_operation(&ctx.sync_id, status.network_type, ctx.config.batch_size);
        self.set_phase(&mut ctx, SyncPhase::Initializing);

        if let Err(reason) = self.check_preconditions(&status, &ctx.config).await {
            return self.finish_blocked(ctx, reason);
        }

        if kind.uploads() && !ctx.is_cancelled() {
            self.set_phase(&mut ctx, SyncPhase::Uploading);
            let started = Instant::now();
            self.upload(&mut ctx).await;
            self.sync_monitor
                .add_marker(&ctx.sync_id, SyncPhase::Uploading.as_str(), millis(started));
        }

        if kind.downloads() && !ctx.is_cancelled() {
            self.set_phase(&mut ctx, SyncPhase::Downloading);
            let started = Instant::now();
            self.download(&mut ctx).await;
            self.sync_monitor
                .add_marker(&ctx.sync_id, SyncPhase::Downloading.as_str(), millis(started));

            if !ctx.detected.is_empty() && !ctx.is_cancelled() {
                self.set_phase(&mut ctx, SyncPhase::ResolvingConflicts);
                let started = Instant::now();
                self.resolve_detected(&mut ctx).await;
                self.sync_monitor.add_marker(
                    &ctx.sync_id,
                    SyncPhase::ResolvingConflicts.as_str(),
                    millis(started),
                );
            }
        }

        self.finalize(ctx, kind).await
    }

    async fn check_preconditions(
        &self,
        status: &NetworkStatus,
        config: &SyncConfiguration,
    ) -> Result<(), BlockReason> {
        if !self.auth.is_authenticated().await {
            return Err(BlockReason::NotAuthenticated);
        }
        if let GateDecision::Denied(reason) = NetworkGate::evaluate(status, config) {
            return Err(BlockReason::Network(reason));
        }
        if !self.store.is_initialized() {
            if let Err(e) = self.store.initialize().await {
                tracing::warn!(error = %e, "local store initialization failed");
                return Err(BlockReason::StorageNotInitialized);
            }
        }
        Ok(())
    }

    async fn upload(&self, ctx: &mut RunContext) {
        let op = ctx.next_op();
        self.performance
            .start(&op, OperationKind::ListModified, ctx.phase);
        let dirty = match self.store.list_modified().await {
            Ok(records) => {
                self.performance.end(&op, records.len() as u64, true, 0);
                records
            }
            Err(e) => {
                self.performance.end(&op, 0, false, 1);
                self.record_failure(ctx, None, e.into());
                return;
            }
        };
        tracing::debug!(sync_id = %ctx.sync_id, count = dirty.len(), "uploading dirty records");

        let batch_size = ctx.config.batch_size.max(1) as usize;
        for batch in dirty.chunks(batch_size) {
            if ctx.is_cancelled() {
                return;
            }
            let op = ctx.next_op();
            self.performance
                .start(&op, OperationKind::UploadBatch, ctx.phase);
            let (mut synced, mut failed) = (0u64, 0u32);

            for record in batch {
                if ctx.is_cancelled() {
                    break;
                }
                ctx.counts.processed += 1;
                match self.upload_record(ctx, record).await {
                    Ok(UploadOutcome::Synced) => {
                        synced += 1;
                        ctx.synced += 1;
                        ctx.counts.succeeded += 1;
                    }
                    Ok(UploadOutcome::Removed | UploadOutcome::Queued) => {}
                    Err(SyncError::Cancelled) => break,
                    Err(e) => {
                        failed += 1;
                        self.record_failure(ctx, Some(record.id.clone()), e);
                    }
                }
            }

            self.performance.end(&op, synced, failed == 0, failed);
            self.sync_monitor.update_progress(&ctx.sync_id, ctx.counts);
        }
    }

    async fn upload_record(
        &self,
        ctx: &mut RunContext,
        record: &Record,
    ) -> SyncResult<UploadOutcome> {
        record.validate()?;

        let Some(remote_id) = record.id.as_remote() else {
            self.create_remote(ctx, record).await?;
            return Ok(UploadOutcome::Synced);
        };

        let patch = RecordPatch::from_record(record).for_remote();
        let token = ctx.token.clone();
        let updated = self
            .with_retry(&token, || self.remote.update(remote_id, &patch))
            .await;
        if ctx.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        match updated {
            Ok(_) => {
                ctx.uploaded.insert(remote_id.to_string());
                let synced = RecordPatch::synced(self.clock.now());
                self.timed(
                    ctx,
                    OperationKind::UpdateRecord,
                    self.store.update(&record.id, &synced),
                )
                .await?;
                tracing::debug!(record = %record.id, "uploaded update");
                Ok(UploadOutcome::Synced)
            }
            Err(RemoteError::NotFound(_)) => self.handle_remote_deleted(ctx, record).await,
            Err(e) => Err(e.into()),
        }
    }

    /// Creates `record` remotely and re-keys the local copy to the canonical id.
    async fn create_remote(&self, ctx: &mut RunContext, record: &Record) -> SyncResult<Record> {
        let token = ctx.token.clone();
        let created = self
            .with_retry(&token, || self.remote.create(record))
            .await;
        if ctx.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let mut canonical = created?;
        if let Some(remote_id) = canonical.id.as_remote() {
            ctx.uploaded.insert(remote_id.to_string());
        }
        canonical.mark_synced(self.clock.now());
        let stored = self
            .timed(ctx, OperationKind::CreateRecord, self.store.create(canonical))
            .await?;
        if stored.id != record.id {
            self.timed(ctx, OperationKind::DeleteRecord, self.store.delete(&record.id))
                .await?;
        }
        tracing::debug!(from = %record.id, to = %stored.id, "uploaded new record");
        Ok(stored)
    }

    async fn handle_remote_deleted(
        &self,
        ctx: &mut RunContext,
        record: &Record,
    ) -> SyncResult<UploadOutcome> {
        let conflict = SyncConflict::new(
            ConflictKind::RemoteDeleted {
                local: record.clone(),
            },
            self.clock.now(),
        );
        self.note_conflict(ctx, &conflict);

        let strategy = ctx.config.conflict_strategy;
        match strategy {
            ConflictStrategy::Manual => {
                tracing::info!(record = %record.id, "remote deletion queued for manual resolution");
                self.queue_pending(conflict);
                Ok(UploadOutcome::Queued)
            }
            ConflictStrategy::RemoteWins => {
                self.timed(ctx, OperationKind::DeleteRecord, self.store.delete(&record.id))
                    .await?;
                self.mark_resolved(ctx, conflict, strategy, WinnerSide::Remote, true);
                Ok(UploadOutcome::Removed)
            }
            _ => {
                self.create_remote(ctx, record).await?;
                self.mark_resolved(ctx, conflict, strategy, WinnerSide::Local, false);
                Ok(UploadOutcome::Synced)
            }
        }
    }

    async fn download(&self, ctx: &mut RunContext) {
        let since = match self
            .timed(
                ctx,
                OperationKind::ReadCheckpoint,
                self.store.last_sync_checkpoint(),
            )
            .await
        {
            Ok(since) => since,
            Err(e) => {
                ctx.download_gap = true;
                self.record_failure(ctx, None, e.into());
                return;
            }
        };

        let token = ctx.token.clone();
        let mut page = 1u32;
        let mut consumed = 0u64;
        loop {
            if ctx.is_cancelled() {
                return;
            }
            let query = ListQuery {
                since,
                page,
                page_size: self.options.page_size,
                full_content: ctx.config.download_full_content,
            };
            let op = ctx.next_op();
            self.performance
                .start(&op, OperationKind::DownloadPage, ctx.phase);
            let listed = self.with_retry(&token, || self.remote.list(&query)).await;
            if ctx.is_cancelled() {
                self.performance.end(&op, 0, false, 0);
                return;
            }
            let remote_page = match listed {
                Ok(remote_page) => remote_page,
                Err(e) => {
                    self.performance.end(&op, 0, false, 1);
                    ctx.download_gap = true;
                    self.record_failure(ctx, None, e.into());
                    return;
                }
            };

            let item_count = remote_page.items.len() as u64;
            tracing::debug!(
                sync_id = %ctx.sync_id,
                page,
                items = item_count,
                total_pages = remote_page.total_pages,
                "downloaded page"
            );
            let mut failed = 0u32;
            for item in remote_page.items {
                if ctx.is_cancelled() {
                    break;
                }
                // Our own upload echoed back by the listing.
                if item
                    .id
                    .as_remote()
                    .map_or(false, |id| ctx.uploaded.contains(id))
                {
                    continue;
                }
                ctx.counts.processed += 1;
                let record_id = item.id.clone();
                match self.download_record(ctx, item).await {
                    Ok(DownloadOutcome::Applied) => {
                        ctx.synced += 1;
                        ctx.counts.succeeded += 1;
                    }
                    Ok(DownloadOutcome::Deferred) => {}
                    Err(e) => {
                        failed += 1;
                        ctx.download_gap = true;
                        self.record_failure(ctx, Some(record_id), e);
                    }
                }
            }
            self.performance.end(&op, item_count, failed == 0, failed);
            self.sync_monitor.update_progress(&ctx.sync_id, ctx.counts);

            consumed += item_count;
            if item_count == 0
                || page >= remote_page.total_pages
                || consumed >= remote_page.total_items
            {
                return;
            }
            if page >= self.options.max_pages {
                ctx.download_gap = true;
                self.record_failure(ctx, None, SyncError::PageLimitReached(page));
                return;
            }
            page += 1;
        }
    }

    async fn download_record(
        &self,
        ctx: &mut RunContext,
        remote: Record,
    ) -> SyncResult<DownloadOutcome> {
        let now = self.clock.now();
        let local = self
            .timed(ctx, OperationKind::GetRecord, self.store.get(&remote.id))
            .await?;

        let Some(local) = local else {
            let mut fresh = remote;
            fresh.mark_synced(now);
            self.timed(ctx, OperationKind::CreateRecord, self.store.create(fresh))
                .await?;
            return Ok(DownloadOutcome::Applied);
        };

        if !local.dirty {
            let mut fresh = remote;
            fresh.mark_synced(now);
            let patch = RecordPatch::from_record(&fresh);
            self.timed(
                ctx,
                OperationKind::UpdateRecord,
                self.store.update(&local.id, &patch),
            )
            .await?;
            return Ok(DownloadOutcome::Applied);
        }

        match classify(&local, &remote) {
            None => {
                let patch = RecordPatch::synced(now);
                self.timed(
                    ctx,
                    OperationKind::UpdateRecord,
                    self.store.update(&local.id, &patch),
                )
                .await?;
                Ok(DownloadOutcome::Applied)
            }
            Some(kind) => {
                let conflict = SyncConflict::new(kind, now);
                self.note_conflict(ctx, &conflict);
                ctx.detected.push(conflict);
                Ok(DownloadOutcome::Deferred)
            }
        }
    }

    async fn resolve_detected(&self, ctx: &mut RunContext) {
        let detected = std::mem::take(&mut ctx.detected);
        let strategy = ctx.config.conflict_strategy;

        for conflict in detected {
            if ctx.is_cancelled() {
                return;
            }
            let Some(remote) = conflict.kind.remote() else {
                continue;
            };
            match strategy.resolve(conflict.kind.local(), remote, self.clock.now()) {
                ResolutionOutcome::Resolved { winner, resolution } => {
                    let record_id = conflict.record_id.clone();
                    let patch = RecordPatch::from_record(&winner);
                    let applied = self
                        .timed(
                            ctx,
                            OperationKind::UpdateRecord,
                            self.store.update(&record_id, &patch),
                        )
                        .await;
                    match applied {
                        Ok(_) => {
                            if !winner.dirty {
                                ctx.synced += 1;
                                ctx.counts.succeeded += 1;
                            }
                            tracing::debug!(
                                record = %record_id,
                                winner = ?resolution.winner,
                                "conflict resolved"
                            );
                            self.finish_resolution(ctx, conflict, resolution);
                        }
                        Err(e) => {
                            ctx.download_gap = true;
                            self.record_failure(ctx, Some(record_id), e.into());
                        }
                    }
                }
                ResolutionOutcome::Unresolved => {
                    tracing::info!(
                        record = %conflict.record_id,
                        kind = conflict.kind.label(),
                        "conflict queued for manual resolution"
                    );
                    self.queue_pending(conflict);
                }
            }
        }
    }

    async fn finalize(&self, mut ctx: RunContext, kind: RunKind) -> SyncRunResult {
        if ctx.is_cancelled() {
            let aborted = RunError::aborted(ctx.phase);
            self.sync_monitor
                .record_error(&ctx.sync_id, aborted.message.clone());
            ctx.errors.push(aborted);
            tracing::info!(sync_id = %ctx.sync_id, phase = %ctx.phase, "sync cancelled");
            return self.complete(ctx, OperationStatus::Cancelled);
        }

        self.set_phase(&mut ctx, SyncPhase::Finalizing);
        if kind.downloads() && ctx.download_gap {
            tracing::info!(
                sync_id = %ctx.sync_id,
                "download incomplete, keeping previous checkpoint"
            );
        } else if kind.downloads() {
            let checkpoint = ctx.started_at;
            if let Err(e) = self
                .timed(
                    &mut ctx,
                    OperationKind::WriteCheckpoint,
                    self.store.set_last_sync_checkpoint(checkpoint),
                )
                .await
            {
                self.record_failure(&mut ctx, None, e.into());
            }
        }
        self.set_phase(&mut ctx, SyncPhase::Completed);
        self.complete(ctx, OperationStatus::Succeeded)
    }

    fn finish_blocked(&self, mut ctx: RunContext, reason: BlockReason) -> SyncRunResult {
        let error = RunError::blocked(ctx.phase, reason);
        tracing::warn!(sync_id = %ctx.sync_id, reason = %error.message, "sync blocked");
        self.sync_monitor
            .record_error(&ctx.sync_id, error.message.clone());
        ctx.errors.push(error);
        self.complete(ctx, OperationStatus::Failed)
    }

    fn complete(&self, ctx: RunContext, status: OperationStatus) -> SyncRunResult {
        self.sync_monitor.update_progress(&ctx.sync_id, ctx.counts);
        self.sync_monitor.complete_operation(&ctx.sync_id, status);

        let result = SyncRunResult {
            sync_id: ctx.sync_id,
            success: status == OperationStatus::Succeeded,
            synced_count: ctx.synced,
            conflict_count: ctx.conflicts,
            error_count: ctx.errors.len() as u64,
            duration: ctx.started.elapsed(),
            phase: ctx.phase,
            errors: ctx.errors,
        };

        {
            let mut stats = self.stats.write();
            match status {
                OperationStatus::Succeeded => {
                    stats.runs_completed += 1;
                    stats.last_sync_time = Some(self.clock.now());
                }
                OperationStatus::Cancelled => stats.runs_cancelled += 1,
                _ => stats.runs_blocked += 1,
            }
            stats.records_synced += result.synced_count;
            stats.conflicts_detected += result.conflict_count;
            stats.conflicts_resolved += ctx.counts.conflicts_resolved;
            if let Some(first) = result.first_error() {
                stats.last_error = Some(first.to_string());
            }
        }
        *self.state.write() = match status {
            OperationStatus::Succeeded => SyncState::Synced,
            OperationStatus::Cancelled => SyncState::Cancelled,
            _ => SyncState::Failed,
        };

        tracing::info!(
            sync_id = %result.sync_id,
            success = result.success,
            synced = result.synced_count,
            conflicts = result.conflict_count,
            errors = result.error_count,
            duration_ms = result.duration.as_millis() as u64,
            "sync finished"
        );
        self.sink.dispatch(SyncEvent::RunCompleted {
            result: result.clone(),
        });
        result
    }

    fn set_phase(&self, ctx: &mut RunContext, phase: SyncPhase) {
        ctx.phase = phase;
        self.sync_monitor.update_phase(&ctx.sync_id, phase);
        self.sink.dispatch(SyncEvent::PhaseChanged {
            sync_id: ctx.sync_id.clone(),
            phase,
        });
        tracing::debug!(sync_id = %ctx.sync_id, %phase, "sync phase");
    }

    fn note_conflict(&self, ctx: &mut RunContext, conflict: &SyncConflict) {
        ctx.conflicts += 1;
        ctx.counts.conflicts_detected += 1;
        tracing::info!(
            record = %conflict.record_id,
            kind = conflict.kind.label(),
            "conflict detected"
        );
        self.sink.dispatch(SyncEvent::ConflictDetected {
            conflict: conflict.clone(),
        });
    }

    fn mark_resolved(
        &self,
        ctx: &mut RunContext,
        conflict: SyncConflict,
        strategy: ConflictStrategy,
        winner: WinnerSide,
        data_loss: bool,
    ) {
        let resolution = Resolution {
            strategy,
            winner,
            resolved_at: self.clock.now(),
            data_loss,
            confidence: 1.0,
        };
        self.finish_resolution(ctx, conflict, resolution);
    }

    fn finish_resolution(
        &self,
        ctx: &mut RunContext,
        mut conflict: SyncConflict,
        resolution: Resolution,
    ) {
        let winner = resolution.winner;
        conflict.resolve(resolution);
        ctx.counts.conflicts_resolved += 1;
        self.sink.dispatch(SyncEvent::ConflictResolved {
            conflict_id: conflict.id,
            record_id: conflict.record_id,
            winner,
        });
    }

    /// Queues a conflict for a manual decision, replacing any older entry
    /// for the same record.
    fn queue_pending(&self, conflict: SyncConflict) {
        let mut pending = self.pending.write();
        pending.retain(|c| c.record_id != conflict.record_id);
        pending.push(conflict);
    }

    fn record_failure(&self, ctx: &mut RunContext, record_id: Option<RecordId>, error: SyncError) {
        if record_id.is_some() {
            ctx.counts.failed += 1;
        }
        tracing::warn!(
            sync_id = %ctx.sync_id,
            phase = %ctx.phase,
            record = ?record_id,
            retryable = error.is_retryable(),
            error = %error,
            "sync step failed"
        );
        self.sync_monitor.record_error(&ctx.sync_id, error.to_string());
        ctx.errors.push(RunError::item(ctx.phase, record_id, &error));
    }

    async fn store_manual_decision(
        &self,
        conflict: &SyncConflict,
        patch: &RecordPatch,
        now: DateTime<Utc>,
    ) -> SyncResult<Record> {
        let local = conflict.kind.local();
        let base = conflict.kind.remote().unwrap_or(local);
        let mut decided = base.patched(patch);
        decided.modified_at = now;
        decided.dirty = true;

        if let ConflictKind::RemoteDeleted { .. } = conflict.kind {
            decided.id = RecordId::new_local();
            decided.synced_at = None;
            let stored = self.store.create(decided).await?;
            if let Err(e) = self.store.delete(&local.id).await {
                if let Err(undo) = self.store.delete(&stored.id).await {
                    tracing::warn!(
                        record = %stored.id,
                        error = %undo,
                        "could not remove re-keyed copy"
                    );
                }
                return Err(e.into());
            }
            Ok(stored)
        } else {
            decided.id = local.id.clone();
            let full = RecordPatch::from_record(&decided);
            Ok(self.store.update(&decided.id, &full).await?)
        }
    }

    /// Times a storage call through the performance monitor.
    async fn timed<T, E>(
        &self,
        ctx: &mut RunContext,
        kind: OperationKind,
        call: impl Future<Output = Result<T, E>>,
    ) -> Result<T, E> {
        let op = ctx.next_op();
        self.performance.start(&op, kind, ctx.phase);
        let result = call.await;
        let ok = result.is_ok();
        self.performance.end(&op, u64::from(ok), ok, u32::from(!ok));
        result
    }

    /// Retries transient remote failures with exponential backoff.
    async fn with_retry<T, F, Fut>(&self, token: &AtomicBool, mut call: F) -> RemoteResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = RemoteResult<T>>,
    {
        let retry = &self.options.retry;
        let mut attempt = 0u32;
        loop {
            if attempt > 0 {
                tokio::time::sleep(retry.delay_for_attempt(attempt)).await;
                self.stats.write().retries += 1;
            }
            match call().await {
                Ok(value) => return Ok(value),
                Err(e)
                    if e.is_retryable()
                        && attempt + 1 < retry.max_attempts
                        && !token.load(Ordering::SeqCst) =>
                {
                    tracing::debug!(attempt, error = %e, "retrying remote call");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl fmt::Debug for SyncExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncExecutor")
            .field("state", &self.state())
            .field("running", &self.is_running())
            .field("pending_conflicts", &self.pending.read().len())
            .finish_non_exhaustive()
    }
}

fn millis(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::error::StoreError;
    use crate::memory::{
        ManualClock, MemoryConnectivity, MemoryLocalStore, MemoryRemoteApi, RecordingSink,
        StaticAuth,
    };
    use chrono::TimeZone;

    struct Fixture {
        store: Arc<MemoryLocalStore>,
        remote: Arc<MemoryRemoteApi>,
        connectivity: Arc<MemoryConnectivity>,
        auth: Arc<StaticAuth>,
        sink: Arc<RecordingSink>,
        executor: SyncExecutor,
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryLocalStore::new());
        let remote = Arc::new(MemoryRemoteApi::new());
        let connectivity = Arc::new(MemoryConnectivity::new(NetworkStatus::wifi()));
        let auth = Arc::new(StaticAuth::new(true));
        let sink = Arc::new(RecordingSink::new());
        let executor = SyncExecutor::new(
            SyncCollaborators {
                store: store.clone(),
                remote: remote.clone(),
                connectivity: connectivity.clone(),
                auth: auth.clone(),
                sink: sink.clone(),
                clock: Arc::new(ManualClock::new(at(10_000))),
                sync_monitor: Arc::new(SyncMonitor::default()),
                performance: Arc::new(PerformanceMonitor::default()),
            },
            EngineOptions::new().with_retry(RetryConfig::no_retry()),
        );
        Fixture {
            store,
            remote,
            connectivity,
            auth,
            sink,
            executor,
        }
    }

    #[test]
    fn sync_state_checks() {
        assert!(SyncState::Idle.can_start_sync());
        assert!(SyncState::Failed.can_start_sync());
        assert!(!SyncState::Syncing.can_start_sync());
        assert!(SyncState::Syncing.is_active());
    }

    #[tokio::test]
    async fn unauthenticated_run_is_blocked() {
        let f = fixture();
        f.auth.set(false);
        let result = f.executor.full_sync(false).await;

        assert!(!result.success);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.first_error(), Some("not authenticated"));
        assert_eq!(result.blocked_reason(), Some(BlockReason::NotAuthenticated));
        assert_eq!(f.remote.total_calls(), 0);
        assert_eq!(f.executor.state(), SyncState::Failed);
        assert!(matches!(
            result.into_result(),
            Err(SyncError::NotAuthenticated)
        ));
    }

    #[tokio::test]
    async fn offline_run_reports_gate_reason() {
        let f = fixture();
        f.connectivity.set_status(NetworkStatus::offline());
        let result = f.executor.sync_down().await;
        assert_eq!(result.first_error(), Some("no network connection"));
        assert_eq!(f.remote.total_calls(), 0);
    }

    #[tokio::test]
    async fn storage_initialization_failure_blocks() {
        let f = fixture();
        f.store.fail_initialize(true);
        let result = f.executor.full_sync(false).await;
        assert_eq!(result.first_error(), Some("storage not initialized"));
        assert_eq!(result.synced_count, 0);
    }

    #[tokio::test]
    async fn local_record_is_created_and_rekeyed() {
        let f = fixture();
        let local = Record::new_local("Draft", "https://example.com/draft", at(100));
        let local_id = local.id.clone();
        f.store.insert(local);

        let result = f.executor.sync_up().await;
        assert!(result.success, "{:?}", result.errors);
        assert_eq!(result.synced_count, 1);

        assert!(f.store.record(&local_id).is_none());
        let records = f.store.records();
        assert_eq!(records.len(), 1);
        assert!(records[0].id.is_remote());
        assert!(!records[0].dirty);
        assert_eq!(records[0].synced_at, Some(at(10_000)));
    }

    #[tokio::test]
    async fn malformed_record_fails_without_remote_call() {
        let f = fixture();
        f.store
            .insert(Record::new_local("", "https://example.com/x", at(100)));
        let result = f.executor.sync_up().await;

        assert!(result.success);
        assert_eq!(result.error_count, 1);
        assert!(!result.errors[0].is_retryable());
        assert_eq!(f.remote.create_calls(), 0);
    }

    #[tokio::test]
    async fn remote_deletion_with_remote_wins_deletes_local() {
        let f = fixture();
        f.executor.update_configuration(SyncConfiguration {
            conflict_strategy: ConflictStrategy::RemoteWins,
            ..SyncConfiguration::default()
        });
        let record = Record::new(RecordId::remote("gone"), "Gone", "https://g", at(1))
            .with_dirty(true);
        f.store.insert(record.clone());

        let result = f.executor.sync_up().await;
        assert_eq!(result.conflict_count, 1);
        assert!(f.store.record(&record.id).is_none());
    }

    #[tokio::test]
    async fn remote_deletion_with_manual_is_queued() {
        let f = fixture();
        f.executor.update_configuration(SyncConfiguration {
            conflict_strategy: ConflictStrategy::Manual,
            ..SyncConfiguration::default()
        });
        let record = Record::new(RecordId::remote("gone"), "Gone", "https://g", at(1))
            .with_dirty(true);
        f.store.insert(record.clone());

        f.executor.sync_up().await;
        let pending = f.executor.pending_conflicts();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].kind.label(), "remote_deleted");
        assert!(f.store.record(&record.id).unwrap().dirty);
    }

    #[tokio::test]
    async fn remote_deletion_otherwise_recreates() {
        let f = fixture();
        let record = Record::new(RecordId::remote("gone"), "Gone", "https://g", at(1))
            .with_dirty(true);
        f.store.insert(record.clone());

        let result = f.executor.sync_up().await;
        assert_eq!(result.synced_count, 1);
        assert_eq!(f.remote.create_calls(), 1);
        assert!(f.store.record(&record.id).is_none());
        assert_eq!(f.remote.records().len(), 1);
    }

    #[tokio::test]
    async fn download_creates_overwrites_and_marks_clean() {
        let f = fixture();
        let a = Record::new(RecordId::remote("a"), "A", "https://a", at(1));
        let b = Record::new(RecordId::remote("b"), "B remote", "https://b", at(1));
        let c = Record::new(RecordId::remote("c"), "C", "https://c", at(1));
        f.remote.insert(a.clone());
        f.remote.insert(b.clone());
        f.remote.insert(c.clone());

        f.store.insert(b.clone().with_summary("stale").with_dirty(false));
        f.store.insert(c.clone().with_dirty(true));

        let result = f.executor.sync_down().await;
        assert!(result.success);
        assert_eq!(result.synced_count, 3);
        assert_eq!(result.conflict_count, 0);

        assert!(f.store.record(&a.id).is_some());
        assert_eq!(f.store.record(&b.id).unwrap().summary, "");
        assert!(!f.store.record(&c.id).unwrap().dirty);
        assert_eq!(f.store.checkpoint(), Some(at(10_000)));
    }

    #[tokio::test]
    async fn dirty_divergent_record_is_resolved_by_strategy() {
        let f = fixture();
        let remote = Record::new(RecordId::remote("x"), "Remote", "https://x", at(1))
            .with_modified_at(at(500));
        let local = Record::new(RecordId::remote("x"), "Local", "https://x", at(1))
            .with_modified_at(at(200))
            .with_dirty(true);
        f.remote.insert(remote);
        f.store.insert(local);

        let result = f.executor.sync_down().await;
        assert_eq!(result.conflict_count, 1);
        let stored = f.store.record(&RecordId::remote("x")).unwrap();
        assert_eq!(stored.title, "Remote");
        assert!(!stored.dirty);
        assert!(f
            .sink
            .events()
            .iter()
            .any(|e| matches!(e, SyncEvent::ConflictResolved { winner: WinnerSide::Remote, .. })));
    }

    #[tokio::test]
    async fn manual_resolution_applies_patch_on_remote_snapshot() {
        let f = fixture();
        f.executor.update_configuration(SyncConfiguration {
            conflict_strategy: ConflictStrategy::Manual,
            ..SyncConfiguration::default()
        });
        f.remote
            .insert(Record::new(RecordId::remote("x"), "Remote", "https://x", at(1)));
        f.store.insert(
            Record::new(RecordId::remote("x"), "Local", "https://x", at(1)).with_dirty(true),
        );

        f.executor.sync_down().await;
        let pending = f.executor.pending_conflicts();
        assert_eq!(pending.len(), 1);
        assert_eq!(
            f.store.record(&RecordId::remote("x")).unwrap().title,
            "Local"
        );

        let decided = f
            .executor
            .apply_manual_resolution(pending[0].id, &RecordPatch::new().with_read(true))
            .await
            .unwrap();
        assert_eq!(decided.title, "Remote");
        assert!(decided.read);
        assert!(decided.dirty);
        assert_eq!(decided.modified_at, at(10_000));
        assert!(f.executor.pending_conflicts().is_empty());

        let missing = f
            .executor
            .apply_manual_resolution(pending[0].id, &RecordPatch::new())
            .await;
        assert!(matches!(missing, Err(SyncError::ConflictNotFound(_))));
    }

    #[tokio::test]
    async fn retryable_remote_failures_are_retried() {
        let f = fixture();
        let executor = SyncExecutor::new(
            SyncCollaborators {
                store: f.store.clone(),
                remote: f.remote.clone(),
                connectivity: f.connectivity.clone(),
                auth: f.auth.clone(),
                sink: f.sink.clone(),
                clock: Arc::new(ManualClock::new(at(10_000))),
                sync_monitor: Arc::new(SyncMonitor::default()),
                performance: Arc::new(PerformanceMonitor::default()),
            },
            EngineOptions::new().with_retry(
                RetryConfig::new(3)
                    .with_initial_delay(Duration::from_millis(1))
                    .with_jitter(false),
            ),
        );
        f.remote.fail_next(RemoteError::Timeout);
        f.remote.fail_next(RemoteError::server(503, "busy"));
        f.store
            .insert(Record::new_local("Draft", "https://example.com/d", at(100)));

        let result = executor.sync_up().await;
        assert_eq!(result.synced_count, 1, "{:?}", result.errors);
        assert_eq!(f.remote.create_calls(), 3);
        assert_eq!(executor.stats().retries, 2);
    }

    #[tokio::test]
    async fn non_retryable_failure_is_collected() {
        let f = fixture();
        f.remote.fail_next(RemoteError::Validation("url rejected".into()));
        f.store
            .insert(Record::new_local("Draft", "https://example.com/d", at(100)));

        let result = f.executor.full_sync(false).await;
        assert!(result.success);
        assert_eq!(result.error_count, 1);
        assert!(!result.errors[0].is_retryable());
        assert_eq!(result.errors[0].phase, SyncPhase::Uploading);
        assert_eq!(f.remote.create_calls(), 1);
        assert_eq!(f.executor.state(), SyncState::Synced);
    }

    #[tokio::test]
    async fn monitors_see_the_run() {
        let f = fixture();
        f.remote
            .insert(Record::new(RecordId::remote("a"), "A", "https://a", at(1)));
        let result = f.executor.full_sync(false).await;

        let op = f.executor.sync_monitor().operation(&result.sync_id).unwrap();
        assert_eq!(op.status, OperationStatus::Succeeded);
        assert_eq!(op.counts.processed, 1);
        assert!(op.markers.contains_key("downloading"));

        let kinds: Vec<OperationKind> = f
            .executor
            .performance()
            .metrics()
            .into_iter()
            .map(|m| m.kind)
            .collect();
        assert!(kinds.contains(&OperationKind::ListModified));
        assert!(kinds.contains(&OperationKind::DownloadPage));
        assert!(kinds.contains(&OperationKind::WriteCheckpoint));
    }

    #[tokio::test]
    async fn full_sync_skips_its_own_uploads_on_download() {
        let f = fixture();
        f.store
            .insert(Record::new_local("Draft", "https://example.com/d", at(100)));
        f.remote
            .insert(Record::new(RecordId::remote("a"), "A", "https://a", at(1)));

        let result = f.executor.full_sync(false).await;
        assert!(result.success, "{:?}", result.errors);
        assert_eq!(result.synced_count, 2);
        let op = f.executor.sync_monitor().operation(&result.sync_id).unwrap();
        assert_eq!(op.counts.processed, 2);
        assert_eq!(f.store.records().len(), 2);
    }

    #[tokio::test]
    async fn repeated_conflicts_keep_one_pending_entry() {
        let f = fixture();
        f.executor.update_configuration(SyncConfiguration {
            conflict_strategy: ConflictStrategy::Manual,
            ..SyncConfiguration::default()
        });
        f.remote
            .insert(Record::new(RecordId::remote("x"), "Remote", "https://x", at(1)));
        f.store.insert(
            Record::new(RecordId::remote("x"), "Local", "https://x", at(1)).with_dirty(true),
        );
        f.executor.sync_down().await;
        let first = f.executor.pending_conflicts();
        assert_eq!(first.len(), 1);

        f.remote.insert(
            Record::new(RecordId::remote("x"), "Remote v2", "https://x", at(1))
                .with_modified_at(at(20_000)),
        );
        let result = f.executor.sync_down().await;
        assert_eq!(result.conflict_count, 1);

        let pending = f.executor.pending_conflicts();
        assert_eq!(pending.len(), 1);
        assert_ne!(pending[0].id, first[0].id);
        assert_eq!(pending[0].kind.remote().unwrap().title, "Remote v2");
    }

    #[tokio::test]
    async fn failed_rekey_leaves_no_extra_copy() {
        let f = fixture();
        f.executor.update_configuration(SyncConfiguration {
            conflict_strategy: ConflictStrategy::Manual,
            ..SyncConfiguration::default()
        });
        let record = Record::new(RecordId::remote("gone"), "Gone", "https://g", at(1))
            .with_dirty(true);
        f.store.insert(record.clone());
        f.executor.sync_up().await;
        let conflict_id = f.executor.pending_conflicts()[0].id;

        f.store
            .fail_next_delete(StoreError::Backend("disk full".into()));
        let failed = f
            .executor
            .apply_manual_resolution(conflict_id, &RecordPatch::new())
            .await;
        assert!(matches!(failed, Err(SyncError::Store(_))));
        assert_eq!(f.executor.pending_conflicts().len(), 1);
        assert_eq!(f.store.records(), vec![record.clone()]);

        let decided = f
            .executor
            .apply_manual_resolution(conflict_id, &RecordPatch::new())
            .await
            .unwrap();
        assert!(!decided.id.is_remote());
        let records = f.store.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, decided.id);
        assert!(f.executor.pending_conflicts().is_empty());
    }
}
