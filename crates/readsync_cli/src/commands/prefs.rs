//! Preference commands.

use crate::error::CliResult;
use crate::file_prefs::FilePreferenceStore;
use chrono::{DateTime, TimeZone, Utc};
use clap::Args;
use readsync_engine::{SyncHistoryEntry, CONFIGURATION_KEY};
use readsync_protocol::{
    ConflictStrategy, SyncConfiguration, SyncConfigurationPatch, SyncInterval,
};
use serde::Serialize;
use std::path::Path;

/// Settings accepted by `prefs set`. Omitted flags keep their stored value.
#[derive(Debug, Default, Args)]
pub struct SetArgs {
    /// Enable or disable background sync
    #[arg(long)]
    pub enabled: Option<bool>,

    /// Interval in minutes, or -1 for manual only
    #[arg(long, allow_negative_numbers = true)]
    pub interval: Option<i64>,

    /// Only sync on Wi-Fi
    #[arg(long)]
    pub wifi_only: Option<bool>,

    /// Allow sync on mobile data
    #[arg(long)]
    pub allow_cellular: Option<bool>,

    /// Allow sync on metered connections
    #[arg(long)]
    pub allow_metered: Option<bool>,

    /// Conflict strategy
    #[arg(long)]
    pub strategy: Option<ConflictStrategy>,

    /// Records per upload batch
    #[arg(long)]
    pub batch_size: Option<u32>,
}

impl SetArgs {
    /// Converts the flags into a configuration patch.
    pub fn to_patch(&self) -> CliResult<SyncConfigurationPatch> {
        let mut patch = SyncConfigurationPatch::new();
        if let Some(enabled) = self.enabled {
            patch = patch.with_background_enabled(enabled);
        }
        if let Some(interval) = self.interval {
            patch = patch.with_interval(SyncInterval::try_from(interval)?);
        }
        if let Some(wifi_only) = self.wifi_only {
            patch = patch.with_wifi_only(wifi_only);
        }
        if let Some(allow) = self.allow_cellular {
            patch = patch.with_allow_cellular(allow);
        }
        if let Some(allow) = self.allow_metered {
            patch = patch.with_allow_metered(allow);
        }
        if let Some(strategy) = self.strategy {
            patch = patch.with_conflict_strategy(strategy);
        }
        if let Some(batch_size) = self.batch_size {
            patch = patch.with_batch_size(batch_size);
        }
        Ok(patch)
    }
}

/// Stored preferences as shown by `prefs show`.
#[derive(Debug, Serialize)]
pub struct PrefsView {
    /// Preferences file.
    pub path: String,
    /// Effective configuration.
    pub configuration: SyncConfiguration,
    /// Whether a configuration is stored, as opposed to defaults.
    pub stored: bool,
    /// Last successful sync.
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Next scheduled sync.
    pub next_sync_at: Option<DateTime<Utc>>,
    /// Recorded runs, oldest first.
    pub history: Vec<SyncHistoryEntry>,
}

/// Reads the stored preferences.
pub async fn view(path: &Path) -> CliResult<PrefsView> {
    let stored = FilePreferenceStore::open(path)
        .read_all()?
        .contains_key(CONFIGURATION_KEY);
    let prefs = super::preferences(path);
    Ok(PrefsView {
        path: path.display().to_string(),
        configuration: prefs.load_configuration().await,
        stored,
        last_sync_at: prefs.last_sync_time().await,
        next_sync_at: prefs
            .next_sync_millis()
            .await
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single()),
        history: prefs.history().await,
    })
}

/// Runs `prefs show`.
pub async fn show(path: &Path, format: &str) -> CliResult<()> {
    let view = view(path).await?;
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&view)?),
        _ => print_text_output(&view),
    }
    Ok(())
}

/// Merges `args` into the stored configuration and saves it.
pub async fn apply(path: &Path, args: &SetArgs) -> CliResult<SyncConfiguration> {
    let prefs = super::preferences(path);
    let merged = prefs.load_configuration().await.merged(&args.to_patch()?);
    merged.validate()?;
    prefs.save_configuration(&merged).await?;
    tracing::info!(path = %path.display(), "sync preferences updated");
    Ok(merged)
}

/// Runs `prefs set`.
pub async fn set(path: &Path, args: &SetArgs) -> CliResult<()> {
    let config = apply(path, args).await?;
    println!("✓ Preferences saved to {:?}", path);
    print_configuration(&config);
    Ok(())
}

/// Runs `prefs reset`.
pub async fn reset(path: &Path) -> CliResult<()> {
    use readsync_engine::PreferenceStore;

    FilePreferenceStore::open(path).remove(CONFIGURATION_KEY).await?;
    println!("✓ Configuration reset to defaults");
    Ok(())
}

fn print_configuration(config: &SyncConfiguration) {
    println!("  Background sync: {}", config.background_enabled);
    println!("  Interval: {}", config.interval);
    println!("  Wi-Fi only: {}", config.wifi_only);
    println!("  Allow cellular: {}", config.allow_cellular);
    println!("  Allow metered: {}", config.allow_metered);
    println!("  Full content: {}", config.download_full_content);
    println!("  Conflict strategy: {}", config.conflict_strategy);
    println!("  Batch size: {}", config.batch_size);
}

fn print_text_output(view: &PrefsView) {
    println!("Preferences: {}", view.path);
    if !view.stored {
        println!("  (no stored configuration, showing defaults)");
    }
    print_configuration(&view.configuration);
    match view.last_sync_at {
        Some(at) => println!("  Last sync: {}", at.to_rfc3339()),
        None => println!("  Last sync: never"),
    }
    if let Some(at) = view.next_sync_at {
        println!("  Next sync: {}", at.to_rfc3339());
    }
    if !view.history.is_empty() {
        println!("  History:");
        for entry in &view.history {
            println!(
                "    {} {:<12} {} synced={} conflicts={} errors={}",
                entry.finished_at.to_rfc3339(),
                entry.trigger.to_string(),
                if entry.success { "ok    " } else { "failed" },
                entry.synced_count,
                entry.conflict_count,
                entry.error_count
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CliError;
    use tempfile::tempdir;

    #[tokio::test]
    async fn defaults_without_a_file() {
        let dir = tempdir().unwrap();
        let view = view(&dir.path().join("prefs.json")).await.unwrap();
        assert!(!view.stored);
        assert_eq!(view.configuration, SyncConfiguration::default());
        assert!(view.history.is_empty());
    }

    #[tokio::test]
    async fn set_merges_into_stored_configuration() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("prefs.json");

        let first = SetArgs {
            wifi_only: Some(true),
            interval: Some(30),
            ..SetArgs::default()
        };
        apply(&path, &first).await.unwrap();

        let second = SetArgs {
            strategy: Some(ConflictStrategy::Merge),
            ..SetArgs::default()
        };
        let config = apply(&path, &second).await.unwrap();
        assert!(config.wifi_only);
        assert_eq!(config.interval, SyncInterval::Minutes(30));
        assert_eq!(config.conflict_strategy, ConflictStrategy::Merge);

        let view = view(&path).await.unwrap();
        assert!(view.stored);
        assert_eq!(view.configuration, config);
    }

    #[tokio::test]
    async fn invalid_settings_are_rejected_and_not_saved() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("prefs.json");

        let bad_interval = SetArgs {
            interval: Some(0),
            ..SetArgs::default()
        };
        assert!(matches!(
            apply(&path, &bad_interval).await,
            Err(CliError::Protocol(_))
        ));

        let bad_batch = SetArgs {
            batch_size: Some(0),
            ..SetArgs::default()
        };
        assert!(apply(&path, &bad_batch).await.is_err());
        assert!(!view(&path).await.unwrap().stored);
    }

    #[tokio::test]
    async fn reset_restores_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("prefs.json");
        let args = SetArgs {
            enabled: Some(true),
            ..SetArgs::default()
        };
        apply(&path, &args).await.unwrap();

        reset(&path).await.unwrap();
        let view = view(&path).await.unwrap();
        assert!(!view.stored);
        assert_eq!(view.configuration, SyncConfiguration::default());
    }
}
