//! # readsync engine
//!
//! Offline-first sync between a local article store and a remote article API.
//!
//! This crate provides:
//! - Sync executor (upload → download → resolve conflicts → finalize)
//! - Network gate over connectivity and user preferences
//! - Background scheduler driven by platform triggers
//! - Retry with exponential backoff for transient remote failures
//! - Collaborator traits plus in-memory implementations
//!
//! ## Architecture
//!
//! The executor owns no storage. The local store, remote API, connectivity
//! sensor, background host, preference storage, state sink, authentication
//! and clock are injected as trait objects. The monitors from
//! `readsync_monitor` are shared handles the executor feeds as it runs.
//!
//! ## Key Invariants
//!
//! - At most one non-forced run is in flight at any time
//! - No store or API call happens when a precondition fails
//! - Per-item failures are collected, never raised
//! - The checkpoint only moves after a download that was not cancelled
//! - A record is never clean locally while its latest edits are unsynced

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod collaborators;
mod config;
mod error;
mod executor;
mod gate;
pub mod memory;
mod preferences;
mod scheduler;

pub use collaborators::{
    AuthProvider, BackgroundHost, BootCallback, BootNotifier, Clock, ConnectivityCallback,
    ConnectivitySensor, ListQuery, LocalStore, NetworkStatus, PreferenceStore, RemoteApi,
    RemotePage, StateSink, Subscription, SyncEvent, SystemClock, TriggerFuture, TriggerHandler,
};
pub use config::{EngineOptions, RetryConfig, SchedulerOptions};
pub use error::{
    HostError, HostResult, RemoteError, RemoteResult, StoreError, StoreResult, SyncError,
    SyncResult,
};
pub use executor::{
    BlockReason, RunError, RunErrorKind, SyncCollaborators, SyncExecutor, SyncRunResult,
    SyncState, SyncStats,
};
pub use gate::{DenyReason, GateDecision, NetworkGate};
pub use preferences::{
    SyncHistoryEntry, SyncPreferences, SyncTrigger, CONFIGURATION_KEY, HISTORY_KEY,
    LAST_SYNC_KEY, NEXT_SYNC_KEY,
};
pub use scheduler::{
    BackgroundScheduler, SchedulerCollaborators, SchedulerState, SchedulerStatus, SkipReason,
    TriggerOutcome,
};
