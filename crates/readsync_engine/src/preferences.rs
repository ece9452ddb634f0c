//! Persisted scheduler state on top of a [`PreferenceStore`].
//!
//! Values are JSON documents (configuration, history) or decimal strings
//! (timestamps in epoch milliseconds). Malformed values are treated as
//! absent.

use crate::collaborators::PreferenceStore;
use crate::error::{StoreError, StoreResult};
use chrono::{DateTime, TimeZone, Utc};
use readsync_protocol::SyncConfiguration;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Key of the user's sync configuration.
pub const CONFIGURATION_KEY: &str = "sync.configuration";
/// Key of the last successful sync time.
pub const LAST_SYNC_KEY: &str = "sync.last_sync_time";
/// Key of the next scheduled sync time.
pub const NEXT_SYNC_KEY: &str = "sync.next_sync_time";
/// Key of the run history.
pub const HISTORY_KEY: &str = "sync.history";

/// What started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTrigger {
    /// Periodic background trigger.
    Background,
    /// Connectivity came back while a sync was due.
    Connectivity,
    /// Device finished booting.
    Boot,
    /// The user asked.
    Manual,
}

impl fmt::Display for SyncTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SyncTrigger::Background => "background",
            SyncTrigger::Connectivity => "connectivity",
            SyncTrigger::Boot => "boot",
            SyncTrigger::Manual => "manual",
        };
        f.write_str(label)
    }
}

/// One persisted history entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncHistoryEntry {
    /// Run identifier.
    pub sync_id: String,
    /// What started the run.
    pub trigger: SyncTrigger,
    /// When the run finished.
    pub finished_at: DateTime<Utc>,
    /// Whether the run succeeded.
    pub success: bool,
    /// Records synced.
    pub synced_count: u64,
    /// Conflicts detected.
    pub conflict_count: u64,
    /// Errors recorded.
    pub error_count: u64,
    /// Run duration in milliseconds.
    pub duration_ms: u64,
    /// First error, if any.
    #[serde(default)]
    pub first_error: Option<String>,
}

/// Typed access to the scheduler's preference keys.
#[derive(Clone)]
pub struct SyncPreferences {
    store: Arc<dyn PreferenceStore>,
}

impl SyncPreferences {
    /// Wraps a preference store.
    pub fn new(store: Arc<dyn PreferenceStore>) -> Self {
        Self { store }
    }

    /// Loads the configuration, falling back to defaults when absent or
    /// malformed.
    pub async fn load_configuration(&self) -> SyncConfiguration {
        match self.store.get(CONFIGURATION_KEY).await {
            Ok(Some(json)) => SyncConfiguration::from_json(&json).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "stored sync configuration is malformed, using defaults");
                SyncConfiguration::default()
            }),
            Ok(None) => SyncConfiguration::default(),
            Err(e) => {
                tracing::warn!(error = %e, "failed to read sync configuration, using defaults");
                SyncConfiguration::default()
            }
        }
    }

    /// Persists the configuration.
    pub async fn save_configuration(&self, config: &SyncConfiguration) -> StoreResult<()> {
        let json = serde_json::to_string(config)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        self.store.set(CONFIGURATION_KEY, &json).await
    }

    /// Last successful sync time.
    pub async fn last_sync_time(&self) -> Option<DateTime<Utc>> {
        self.read_millis(LAST_SYNC_KEY)
            .await
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
    }

    /// Persists the last successful sync time.
    pub async fn set_last_sync_time(&self, at: DateTime<Utc>) -> StoreResult<()> {
        self.store
            .set(LAST_SYNC_KEY, &at.timestamp_millis().to_string())
            .await
    }

    /// Next scheduled sync time in epoch milliseconds.
    pub async fn next_sync_millis(&self) -> Option<i64> {
        self.read_millis(NEXT_SYNC_KEY).await
    }

    /// Persists the next scheduled sync time in epoch milliseconds.
    pub async fn set_next_sync_millis(&self, millis: i64) -> StoreResult<()> {
        self.store.set(NEXT_SYNC_KEY, &millis.to_string()).await
    }

    /// Removes the next scheduled sync time.
    pub async fn clear_next_sync(&self) -> StoreResult<()> {
        self.store.remove(NEXT_SYNC_KEY).await
    }

    /// Reads the run history, oldest first.
    pub async fn history(&self) -> Vec<SyncHistoryEntry> {
        match self.store.get(HISTORY_KEY).await {
            Ok(Some(json)) => serde_json::from_str(&json).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "stored sync history is malformed, starting over");
                Vec::new()
            }),
            Ok(None) => Vec::new(),
            Err(e) => {
                tracing::warn!(error = %e, "failed to read sync history");
                Vec::new()
            }
        }
    }

    /// Appends an entry, evicting the oldest beyond `limit`.
    pub async fn append_history(&self, entry: SyncHistoryEntry, limit: usize) -> StoreResult<()> {
        let mut history = self.history().await;
        history.push(entry);
        let excess = history.len().saturating_sub(limit);
        history.drain(..excess);
        let json = serde_json::to_string(&history)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        self.store.set(HISTORY_KEY, &json).await
    }

    async fn read_millis(&self, key: &str) -> Option<i64> {
        match self.store.get(key).await {
            Ok(Some(raw)) => match raw.trim().parse::<i64>() {
                Ok(ms) => Some(ms),
                Err(_) => {
                    tracing::warn!(key, value = %raw, "ignoring malformed timestamp preference");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(key, error = %e, "failed to read preference");
                None
            }
        }
    }
}

impl fmt::Debug for SyncPreferences {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncPreferences").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryPreferences;
    use readsync_protocol::SyncInterval;

    fn prefs() -> (Arc<MemoryPreferences>, SyncPreferences) {
        let store = Arc::new(MemoryPreferences::new());
        (store.clone(), SyncPreferences::new(store))
    }

    fn entry(n: usize) -> SyncHistoryEntry {
        SyncHistoryEntry {
            sync_id: format!("run-{n}"),
            trigger: SyncTrigger::Background,
            finished_at: Utc.timestamp_opt(n as i64, 0).unwrap(),
            success: true,
            synced_count: 1,
            conflict_count: 0,
            error_count: 0,
            duration_ms: 5,
            first_error: None,
        }
    }

    #[tokio::test]
    async fn configuration_defaults_when_missing_or_corrupt() {
        let (store, prefs) = prefs();
        assert_eq!(prefs.load_configuration().await, SyncConfiguration::default());

        store.insert(CONFIGURATION_KEY, "{not json");
        assert_eq!(prefs.load_configuration().await, SyncConfiguration::default());

        let config = SyncConfiguration {
            background_enabled: true,
            interval: SyncInterval::Manual,
            ..SyncConfiguration::default()
        };
        prefs.save_configuration(&config).await.unwrap();
        assert_eq!(prefs.load_configuration().await, config);
        assert!(store.value(CONFIGURATION_KEY).unwrap().contains("\"interval\":-1"));
    }

    #[tokio::test]
    async fn timestamps_roundtrip_as_millis() {
        let (store, prefs) = prefs();
        let at = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        prefs.set_last_sync_time(at).await.unwrap();
        assert_eq!(prefs.last_sync_time().await, Some(at));
        assert_eq!(store.value(LAST_SYNC_KEY).as_deref(), Some("1700000000123"));

        prefs.set_next_sync_millis(42).await.unwrap();
        assert_eq!(prefs.next_sync_millis().await, Some(42));
        prefs.clear_next_sync().await.unwrap();
        assert_eq!(prefs.next_sync_millis().await, None);

        store.insert(NEXT_SYNC_KEY, "soon");
        assert_eq!(prefs.next_sync_millis().await, None);
    }

    #[tokio::test]
    async fn history_is_capped_oldest_first() {
        let (store, prefs) = prefs();
        for n in 0..25 {
            prefs.append_history(entry(n), 20).await.unwrap();
        }
        let history = prefs.history().await;
        assert_eq!(history.len(), 20);
        assert_eq!(history[0].sync_id, "run-5");
        assert_eq!(history[19].sync_id, "run-24");

        store.insert(HISTORY_KEY, "[garbage");
        assert!(prefs.history().await.is_empty());
    }
}
