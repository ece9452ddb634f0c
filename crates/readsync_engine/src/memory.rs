//! In-memory collaborators for tests, demos and the simulator.
//!
//! Every type here is thread-safe and can be shared through an `Arc`. The
//! helpers that are not part of a trait (`insert`, counters, failure
//! injection) exist so tests can arrange and inspect state directly.

use crate::collaborators::{
    AuthProvider, BackgroundHost, BootCallback, BootNotifier, Clock, ConnectivityCallback,
    ConnectivitySensor, ListQuery, LocalStore, NetworkStatus, PreferenceStore, RemoteApi,
    RemotePage, StateSink, Subscription, SyncEvent, TriggerHandler,
};
use crate::error::{HostError, HostResult, RemoteError, RemoteResult, StoreError, StoreResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use readsync_protocol::{Record, RecordId, RecordPatch};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// An in-memory local record store.
///
/// Starts uninitialized; [`LocalStore::initialize`] succeeds unless
/// [`MemoryLocalStore::fail_initialize`] was set. The arrangement helpers
/// work regardless of the initialization state.
#[derive(Debug, Default)]
pub struct MemoryLocalStore {
    records: RwLock<BTreeMap<RecordId, Record>>,
    checkpoint: RwLock<Option<DateTime<Utc>>>,
    initialized: AtomicBool,
    fail_initialize: AtomicBool,
    delete_failures: Mutex<VecDeque<StoreError>>,
}

impl MemoryLocalStore {
    /// Creates an empty, uninitialized store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent initialization attempts fail.
    pub fn fail_initialize(&self, fail: bool) {
        self.fail_initialize.store(fail, Ordering::SeqCst);
    }

    /// Makes the next delete fail with `error`.
    pub fn fail_next_delete(&self, error: StoreError) {
        self.delete_failures.lock().push_back(error);
    }

    /// Inserts or replaces a record.
    pub fn insert(&self, record: Record) {
        self.records.write().insert(record.id.clone(), record);
    }

    /// Reads a record.
    #[must_use]
    pub fn record(&self, id: &RecordId) -> Option<Record> {
        self.records.read().get(id).cloned()
    }

    /// Returns every record, ordered by id.
    #[must_use]
    pub fn records(&self) -> Vec<Record> {
        self.records.read().values().cloned().collect()
    }

    /// Number of dirty records.
    #[must_use]
    pub fn dirty_count(&self) -> usize {
        self.records.read().values().filter(|r| r.dirty).count()
    }

    /// The stored download checkpoint.
    #[must_use]
    pub fn checkpoint(&self) -> Option<DateTime<Utc>> {
        *self.checkpoint.read()
    }

    /// Overrides the download checkpoint.
    pub fn set_checkpoint(&self, at: Option<DateTime<Utc>>) {
        *self.checkpoint.write() = at;
    }

    fn ensure_initialized(&self) -> StoreResult<()> {
        if self.initialized.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::NotInitialized)
        }
    }
}

#[async_trait]
impl LocalStore for MemoryLocalStore {
    async fn initialize(&self) -> StoreResult<()> {
        if self.fail_initialize.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("simulated initialization failure".into()));
        }
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    async fn list_modified(&self) -> StoreResult<Vec<Record>> {
        self.ensure_initialized()?;
        Ok(self
            .records
            .read()
            .values()
            .filter(|r| r.dirty)
            .cloned()
            .collect())
    }

    async fn get(&self, id: &RecordId) -> StoreResult<Option<Record>> {
        self.ensure_initialized()?;
        Ok(self.record(id))
    }

    async fn create(&self, record: Record) -> StoreResult<Record> {
        self.ensure_initialized()?;
        let mut records = self.records.write();
        if records.contains_key(&record.id) {
            return Err(StoreError::AlreadyExists(record.id.to_string()));
        }
        records.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn update(&self, id: &RecordId, patch: &RecordPatch) -> StoreResult<Record> {
        self.ensure_initialized()?;
        let mut records = self.records.write();
        let record = records
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        record.apply_patch(patch);
        Ok(record.clone())
    }

    async fn delete(&self, id: &RecordId) -> StoreResult<()> {
        self.ensure_initialized()?;
        if let Some(error) = self.delete_failures.lock().pop_front() {
            return Err(error);
        }
        self.records
            .write()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn last_sync_checkpoint(&self) -> StoreResult<Option<DateTime<Utc>>> {
        self.ensure_initialized()?;
        Ok(self.checkpoint())
    }

    async fn set_last_sync_checkpoint(&self, at: DateTime<Utc>) -> StoreResult<()> {
        self.ensure_initialized()?;
        self.set_checkpoint(Some(at));
        Ok(())
    }
}

#[derive(Debug, Default)]
struct CallCounters {
    list: AtomicUsize,
    get: AtomicUsize,
    create: AtomicUsize,
    update: AtomicUsize,
    delete: AtomicUsize,
}

/// An in-memory remote article API.
///
/// Created records get ids `r1`, `r2`, and so on. Injected failures are
/// consumed one per call, in order, by whichever call comes next. Page
/// failures are consumed by the next listing of that page only.
#[derive(Debug, Default)]
pub struct MemoryRemoteApi {
    records: RwLock<BTreeMap<String, Record>>,
    next_id: AtomicU64,
    failures: Mutex<VecDeque<RemoteError>>,
    page_failures: Mutex<HashMap<u32, VecDeque<RemoteError>>>,
    latency: RwLock<Option<Duration>>,
    calls: CallCounters,
}

impl MemoryRemoteApi {
    /// Creates an empty remote.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every call by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.write() = latency;
    }

    /// Makes the next call fail with `error`.
    pub fn fail_next(&self, error: RemoteError) {
        self.failures.lock().push_back(error);
    }

    /// Makes the next listing of `page` fail with `error`.
    pub fn fail_page(&self, page: u32, error: RemoteError) {
        self.page_failures
            .lock()
            .entry(page)
            .or_default()
            .push_back(error);
    }

    /// Inserts or replaces a record under its remote id.
    pub fn insert(&self, record: Record) {
        let key = remote_key(&record.id);
        self.records.write().insert(key, record);
    }

    /// Removes a record, simulating a deletion by another client.
    pub fn remove(&self, id: &str) -> Option<Record> {
        self.records.write().remove(id)
    }

    /// Reads a record.
    #[must_use]
    pub fn record(&self, id: &str) -> Option<Record> {
        self.records.read().get(id).cloned()
    }

    /// Returns every record, ordered by id.
    #[must_use]
    pub fn records(&self) -> Vec<Record> {
        self.records.read().values().cloned().collect()
    }

    /// Number of list calls.
    pub fn list_calls(&self) -> usize {
        self.calls.list.load(Ordering::SeqCst)
    }

    /// Number of get calls.
    pub fn get_calls(&self) -> usize {
        self.calls.get.load(Ordering::SeqCst)
    }

    /// Number of create calls.
    pub fn create_calls(&self) -> usize {
        self.calls.create.load(Ordering::SeqCst)
    }

    /// Number of update calls.
    pub fn update_calls(&self) -> usize {
        self.calls.update.load(Ordering::SeqCst)
    }

    /// Number of delete calls.
    pub fn delete_calls(&self) -> usize {
        self.calls.delete.load(Ordering::SeqCst)
    }

    /// Number of calls of any kind.
    pub fn total_calls(&self) -> usize {
        self.list_calls()
            + self.get_calls()
            + self.create_calls()
            + self.update_calls()
            + self.delete_calls()
    }

    async fn simulate(&self, counter: &AtomicUsize) -> RemoteResult<()> {
        counter.fetch_add(1, Ordering::SeqCst);
        let latency = *self.latency.read();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let failure = self.failures.lock().pop_front();
        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

fn remote_key(id: &RecordId) -> String {
    match id.as_remote() {
        Some(remote) => remote.to_string(),
        None => id.to_string(),
    }
}

#[async_trait]
impl RemoteApi for MemoryRemoteApi {
    async fn list(&self, query: &ListQuery) -> RemoteResult<RemotePage> {
        self.simulate(&self.calls.list).await?;
        let page_failure = self
            .page_failures
            .lock()
            .get_mut(&query.page)
            .and_then(VecDeque::pop_front);
        if let Some(error) = page_failure {
            return Err(error);
        }

        let mut matching: Vec<Record> = self
            .records
            .read()
            .values()
            .filter(|r| query.since.map_or(true, |since| r.modified_at > since))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.modified_at.cmp(&b.modified_at).then(a.id.cmp(&b.id)));

        let page_size = query.page_size.max(1) as usize;
        let total_items = matching.len() as u64;
        let total_pages = matching.len().div_ceil(page_size) as u32;
        let skip = (query.page.max(1) as usize - 1) * page_size;
        let items = matching
            .into_iter()
            .skip(skip)
            .take(page_size)
            .map(|mut record| {
                if !query.full_content {
                    record.content.clear();
                }
                record
            })
            .collect();

        Ok(RemotePage {
            items,
            page: query.page,
            total_pages,
            total_items,
        })
    }

    async fn get(&self, id: &str) -> RemoteResult<Record> {
        self.simulate(&self.calls.get).await?;
        self.record(id)
            .ok_or_else(|| RemoteError::NotFound(id.to_string()))
    }

    async fn create(&self, record: &Record) -> RemoteResult<Record> {
        self.simulate(&self.calls.create).await?;
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let mut created = record.clone();
        created.id = RecordId::remote(format!("r{n}"));
        created.dirty = false;
        created.synced_at = None;
        self.insert(created.clone());
        Ok(created)
    }

    async fn update(&self, id: &str, patch: &RecordPatch) -> RemoteResult<Record> {
        self.simulate(&self.calls.update).await?;
        let mut records = self.records.write();
        let record = records
            .get_mut(id)
            .ok_or_else(|| RemoteError::NotFound(id.to_string()))?;
        record.apply_patch(patch);
        Ok(record.clone())
    }

    async fn delete(&self, id: &str) -> RemoteResult<()> {
        self.simulate(&self.calls.delete).await?;
        self.remove(id)
            .map(|_| ())
            .ok_or_else(|| RemoteError::NotFound(id.to_string()))
    }
}

type Registry<T> = Arc<Mutex<HashMap<u64, T>>>;

fn register<T: Send + 'static>(registry: &Registry<T>, next: &AtomicU64, value: T) -> Subscription {
    let id = next.fetch_add(1, Ordering::SeqCst);
    registry.lock().insert(id, value);
    let weak = Arc::downgrade(registry);
    Subscription::new(move || {
        if let Some(registry) = weak.upgrade() {
            registry.lock().remove(&id);
        }
    })
}

/// A connectivity sensor driven by the test.
pub struct MemoryConnectivity {
    status: RwLock<NetworkStatus>,
    subscribers: Registry<ConnectivityCallback>,
    next_id: AtomicU64,
}

impl MemoryConnectivity {
    /// Creates a sensor reporting `status`.
    #[must_use]
    pub fn new(status: NetworkStatus) -> Self {
        Self {
            status: RwLock::new(status),
            subscribers: Arc::default(),
            next_id: AtomicU64::new(0),
        }
    }

    /// Changes the status and notifies subscribers.
    pub fn set_status(&self, status: NetworkStatus) {
        *self.status.write() = status;
        let callbacks: Vec<ConnectivityCallback> =
            self.subscribers.lock().values().cloned().collect();
        for callback in callbacks {
            callback(status);
        }
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

#[async_trait]
impl ConnectivitySensor for MemoryConnectivity {
    async fn current(&self) -> NetworkStatus {
        *self.status.read()
    }

    fn subscribe(&self, callback: ConnectivityCallback) -> Subscription {
        register(&self.subscribers, &self.next_id, callback)
    }
}

/// A boot notifier fired by the test.
#[derive(Default)]
pub struct MemoryBootNotifier {
    subscribers: Registry<BootCallback>,
    next_id: AtomicU64,
}

impl MemoryBootNotifier {
    /// Creates a notifier with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifies every subscriber that boot completed.
    pub fn fire(&self) {
        let callbacks: Vec<BootCallback> = self.subscribers.lock().values().cloned().collect();
        for callback in callbacks {
            callback();
        }
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

impl BootNotifier for MemoryBootNotifier {
    fn subscribe_boot_completed(&self, callback: BootCallback) -> Subscription {
        register(&self.subscribers, &self.next_id, callback)
    }
}

/// A background host that only fires when the test says so.
#[derive(Default)]
pub struct MemoryBackgroundHost {
    registered: Mutex<Option<(TriggerHandler, Duration)>>,
    register_calls: AtomicUsize,
    unregister_calls: AtomicUsize,
    fail_register: AtomicBool,
    fail_unregister: AtomicBool,
}

impl MemoryBackgroundHost {
    /// Creates a host with nothing registered.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent registrations fail.
    pub fn fail_register(&self, fail: bool) {
        self.fail_register.store(fail, Ordering::SeqCst);
    }

    /// Makes subsequent unregistrations fail.
    pub fn fail_unregister(&self, fail: bool) {
        self.fail_unregister.store(fail, Ordering::SeqCst);
    }

    /// Interval of the registered handler.
    pub fn interval(&self) -> Option<Duration> {
        self.registered.lock().as_ref().map(|(_, interval)| *interval)
    }

    /// Number of register calls.
    pub fn register_calls(&self) -> usize {
        self.register_calls.load(Ordering::SeqCst)
    }

    /// Number of unregister calls.
    pub fn unregister_calls(&self) -> usize {
        self.unregister_calls.load(Ordering::SeqCst)
    }

    /// Runs the registered handler to completion. Returns false if nothing
    /// is registered.
    pub async fn fire(&self) -> bool {
        let handler = self
            .registered
            .lock()
            .as_ref()
            .map(|(handler, _)| handler.clone());
        match handler {
            Some(handler) => {
                handler().await;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl BackgroundHost for MemoryBackgroundHost {
    async fn register(&self, handler: TriggerHandler, interval: Duration) -> HostResult<()> {
        self.register_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_register.load(Ordering::SeqCst) {
            return Err(HostError::Registration("simulated registration failure".into()));
        }
        *self.registered.lock() = Some((handler, interval));
        Ok(())
    }

    async fn unregister(&self) -> HostResult<()> {
        self.unregister_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_unregister.load(Ordering::SeqCst) {
            return Err(HostError::Unavailable("simulated host failure".into()));
        }
        *self.registered.lock() = None;
        Ok(())
    }

    async fn is_registered(&self) -> bool {
        self.registered.lock().is_some()
    }
}

/// In-memory preference storage.
#[derive(Debug, Default)]
pub struct MemoryPreferences {
    values: RwLock<BTreeMap<String, String>>,
}

impl MemoryPreferences {
    /// Creates empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes a raw value.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<String>) {
        self.values.write().insert(key.into(), value.into());
    }

    /// Reads a raw value.
    #[must_use]
    pub fn value(&self, key: &str) -> Option<String> {
        self.values.read().get(key).cloned()
    }

    /// Copy of every stored value.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.values.read().clone()
    }
}

#[async_trait]
impl PreferenceStore for MemoryPreferences {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.value(key))
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.insert(key, value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> StoreResult<()> {
        self.values.write().remove(key);
        Ok(())
    }
}

/// A sink that records every event.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SyncEvent>>,
}

impl RecordingSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Events dispatched so far, oldest first.
    pub fn events(&self) -> Vec<SyncEvent> {
        self.events.lock().clone()
    }

    /// Forgets recorded events.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl StateSink for RecordingSink {
    fn dispatch(&self, event: SyncEvent) {
        self.events.lock().push(event);
    }
}

/// An authentication flag set by the test.
#[derive(Debug)]
pub struct StaticAuth {
    authenticated: AtomicBool,
}

impl StaticAuth {
    /// Creates the flag.
    #[must_use]
    pub fn new(authenticated: bool) -> Self {
        Self {
            authenticated: AtomicBool::new(authenticated),
        }
    }

    /// Changes the flag.
    pub fn set(&self, authenticated: bool) {
        self.authenticated.store(authenticated, Ordering::SeqCst);
    }
}

#[async_trait]
impl AuthProvider for StaticAuth {
    async fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: RwLock<DateTime<Utc>>,
}

impl ManualClock {
    /// Creates a clock stopped at `now`.
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(now),
        }
    }

    /// Moves the clock to `now`.
    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.write() = now;
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        let by = chrono::Duration::milliseconds(by.as_millis() as i64);
        *self.now.write() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read()
    }
}
