//! CLI command implementations.

pub mod gate;
pub mod prefs;
pub mod simulate;

use crate::file_prefs::FilePreferenceStore;
use readsync_engine::SyncPreferences;
use readsync_protocol::SyncConfiguration;
use std::path::Path;
use std::sync::Arc;

/// Typed preferences over the file at `path`.
pub fn preferences(path: &Path) -> SyncPreferences {
    SyncPreferences::new(Arc::new(FilePreferenceStore::open(path)))
}

/// Loads the configuration from `path`, or the defaults without one.
pub async fn load_configuration(path: Option<&Path>) -> SyncConfiguration {
    match path {
        Some(path) => preferences(path).load_configuration().await,
        None => SyncConfiguration::default(),
    }
}
