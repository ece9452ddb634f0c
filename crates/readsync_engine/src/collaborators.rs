//! Collaborator interfaces consumed by the engine.
//!
//! The engine owns none of the systems it synchronizes between. The local
//! record store, the remote article API, the connectivity sensor, the
//! platform background host, preference storage, the state-broadcast sink,
//! authentication and time are all injected as `Arc<dyn Trait>`.
//!
//! In-memory implementations live in [`crate::memory`].

use crate::error::{HostResult, RemoteResult, StoreResult};
use crate::executor::SyncRunResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use readsync_protocol::{
    NetworkType, Record, RecordId, RecordPatch, SyncConfiguration, SyncConflict, SyncPhase,
    WinnerSide,
};
pub use readsync_protocol::{Clock, SystemClock};
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// The persistent local record store.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Opens the store. Called lazily before the first run.
    async fn initialize(&self) -> StoreResult<()>;

    /// Returns true once the store is usable.
    fn is_initialized(&self) -> bool;

    /// Returns every record with the dirty flag set.
    async fn list_modified(&self) -> StoreResult<Vec<Record>>;

    /// Reads one record.
    async fn get(&self, id: &RecordId) -> StoreResult<Option<Record>>;

    /// Inserts a record.
    async fn create(&self, record: Record) -> StoreResult<Record>;

    /// Applies a patch to an existing record.
    async fn update(&self, id: &RecordId, patch: &RecordPatch) -> StoreResult<Record>;

    /// Removes a record.
    async fn delete(&self, id: &RecordId) -> StoreResult<()>;

    /// Reads the download checkpoint.
    async fn last_sync_checkpoint(&self) -> StoreResult<Option<DateTime<Utc>>>;

    /// Persists the download checkpoint.
    async fn set_last_sync_checkpoint(&self, at: DateTime<Utc>) -> StoreResult<()>;
}

/// Parameters of a remote list call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    /// Only records modified after this time.
    pub since: Option<DateTime<Utc>>,
    /// 1-based page number.
    pub page: u32,
    /// Items per page.
    pub page_size: u32,
    /// Include article bodies.
    pub full_content: bool,
}

/// One page of a remote list call.
#[derive(Debug, Clone, PartialEq)]
pub struct RemotePage {
    /// Records on this page.
    pub items: Vec<Record>,
    /// Page number.
    pub page: u32,
    /// Total pages for the query.
    pub total_pages: u32,
    /// Total items for the query.
    pub total_items: u64,
}

/// The remote article API.
///
/// Records exchanged with the remote side always carry
/// [`RecordId::Remote`] ids; the local-only fields are ignored.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Lists records changed since a checkpoint, one page at a time.
    async fn list(&self, query: &ListQuery) -> RemoteResult<RemotePage>;

    /// Fetches one record.
    async fn get(&self, id: &str) -> RemoteResult<Record>;

    /// Creates a record and returns it with its canonical id.
    async fn create(&self, record: &Record) -> RemoteResult<Record>;

    /// Updates a record.
    async fn update(&self, id: &str, patch: &RecordPatch) -> RemoteResult<Record>;

    /// Deletes a record.
    async fn delete(&self, id: &str) -> RemoteResult<()>;
}

/// Current connectivity as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NetworkStatus {
    /// A network interface is up.
    pub connected: bool,
    /// The internet is reachable over it.
    pub reachable: bool,
    /// Class of the active network.
    pub network_type: NetworkType,
    /// The connection is metered.
    pub is_expensive: bool,
}

impl NetworkStatus {
    /// No network.
    pub fn offline() -> Self {
        Self {
            connected: false,
            reachable: false,
            network_type: NetworkType::None,
            is_expensive: false,
        }
    }

    /// Unmetered Wi-Fi.
    pub fn wifi() -> Self {
        Self {
            connected: true,
            reachable: true,
            network_type: NetworkType::Wifi,
            is_expensive: false,
        }
    }

    /// Metered mobile data.
    pub fn cellular() -> Self {
        Self {
            connected: true,
            reachable: true,
            network_type: NetworkType::Cellular,
            is_expensive: true,
        }
    }

    /// Returns true if connected with the internet reachable.
    pub fn is_online(&self) -> bool {
        self.connected && self.reachable && self.network_type != NetworkType::None
    }

    /// The same interface with the internet unreachable behind it.
    pub fn unreachable(self) -> Self {
        Self {
            reachable: false,
            ..self
        }
    }

    /// Builds a status from a platform network label.
    pub fn from_label(label: &str, is_expensive: bool) -> Self {
        let network_type = NetworkType::classify(label);
        let connected = network_type != NetworkType::None;
        Self {
            connected,
            reachable: connected,
            network_type,
            is_expensive,
        }
    }
}

/// Guard for a callback registration. Dropping it unsubscribes.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Creates a subscription that runs `cancel` when dropped.
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A subscription with nothing to undo.
    pub fn noop() -> Self {
        Self { cancel: None }
    }

    /// Unsubscribes now.
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// Callback for connectivity changes.
pub type ConnectivityCallback = Arc<dyn Fn(NetworkStatus) + Send + Sync>;

/// Callback for boot-completed notifications.
pub type BootCallback = Arc<dyn Fn() + Send + Sync>;

/// Future returned by a [`TriggerHandler`].
pub type TriggerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Handler invoked by the background host on each periodic trigger.
pub type TriggerHandler = Arc<dyn Fn() -> TriggerFuture + Send + Sync>;

/// Platform connectivity sensor.
#[async_trait]
pub trait ConnectivitySensor: Send + Sync {
    /// Reads the current status.
    async fn current(&self) -> NetworkStatus;

    /// Registers a change callback.
    fn subscribe(&self, callback: ConnectivityCallback) -> Subscription;
}

/// Platform boot-completed notifier.
pub trait BootNotifier: Send + Sync {
    /// Registers a boot-completed callback.
    fn subscribe_boot_completed(&self, callback: BootCallback) -> Subscription;
}

/// Platform host for periodic background work.
#[async_trait]
pub trait BackgroundHost: Send + Sync {
    /// Registers the periodic handler, replacing any existing one.
    async fn register(&self, handler: TriggerHandler, interval: Duration) -> HostResult<()>;

    /// Removes the periodic handler.
    async fn unregister(&self) -> HostResult<()>;

    /// Returns true if a handler is registered.
    async fn is_registered(&self) -> bool;
}

/// Key-value string storage for user preferences.
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    /// Reads a value.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Writes a value.
    async fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Removes a value.
    async fn remove(&self, key: &str) -> StoreResult<()>;
}

/// Events broadcast to the application state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SyncEvent {
    /// A run entered a new phase.
    PhaseChanged {
        /// Run identifier.
        sync_id: String,
        /// New phase.
        phase: SyncPhase,
    },
    /// A conflict was detected.
    ConflictDetected {
        /// The conflict, unresolved.
        conflict: SyncConflict,
    },
    /// A conflict was resolved, automatically or manually.
    ConflictResolved {
        /// Conflict identifier.
        conflict_id: Uuid,
        /// The record in conflict.
        record_id: RecordId,
        /// Which version was kept.
        winner: WinnerSide,
    },
    /// The user's configuration changed.
    ConfigChanged {
        /// The new configuration.
        configuration: SyncConfiguration,
    },
    /// A background trigger was registered.
    Scheduled {
        /// When the next background sync is due.
        next_sync_at: DateTime<Utc>,
    },
    /// Background sync was unregistered.
    Unscheduled,
    /// A run finished.
    RunCompleted {
        /// The terminal result.
        result: SyncRunResult,
    },
}

/// Fire-and-forget sink for [`SyncEvent`]s.
pub trait StateSink: Send + Sync {
    /// Dispatches an event. Must not block.
    fn dispatch(&self, event: SyncEvent);
}

/// Source of the "is authenticated" flag.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Returns true if API credentials are available.
    async fn is_authenticated(&self) -> bool;
}
