//! JSON-file preference store.
//!
//! All keys live in one JSON object. Every write rewrites the file through a
//! sibling temporary file and a rename, so a crash leaves either the old or
//! the new document on disk.

use crate::error::{CliError, CliResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use readsync_engine::{PreferenceStore, StoreError, StoreResult};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// A [`PreferenceStore`] persisted as a single JSON object.
#[derive(Debug)]
pub struct FilePreferenceStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FilePreferenceStore {
    /// Opens the store at `path`. The file is created on first write.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// The backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads every stored key. A missing file is an empty store.
    pub fn read_all(&self) -> CliResult<BTreeMap<String, String>> {
        let _guard = self.lock.lock();
        self.load()
    }

    fn load(&self) -> CliResult<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let text = fs::read_to_string(&self.path)?;
        if text.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&text).map_err(|source| CliError::Json {
            path: self.path.display().to_string(),
            source,
        })
    }

    fn save(&self, values: &BTreeMap<String, String>) -> CliResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(values)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn modify(&self, change: impl FnOnce(&mut BTreeMap<String, String>)) -> StoreResult<()> {
        let _guard = self.lock.lock();
        let mut values = self.load().map_err(backend)?;
        change(&mut values);
        self.save(&values).map_err(backend)
    }
}

fn backend(error: CliError) -> StoreError {
    StoreError::Backend(error.to_string())
}

#[async_trait]
impl PreferenceStore for FilePreferenceStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.read_all().map_err(backend)?.remove(key))
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        tracing::debug!(key, path = %self.path.display(), "writing preference");
        self.modify(|values| {
            values.insert(key.to_string(), value.to_string());
        })
    }

    async fn remove(&self, key: &str) -> StoreResult<()> {
        self.modify(|values| {
            values.remove(key);
        })
    }
}
