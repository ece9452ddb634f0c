//! Small shared enums: network classes and sync phases.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Class of the network the device is currently attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkType {
    /// Wi-Fi.
    Wifi,
    /// Mobile data.
    Cellular,
    /// Wired connection.
    Ethernet,
    /// Connected through something else (VPN, bluetooth, ...).
    Other,
    /// No network.
    None,
}

impl NetworkType {
    /// Maps a platform network label to a network class.
    ///
    /// Unknown labels map to [`NetworkType::Other`].
    pub fn classify(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "wifi" | "wi-fi" | "wlan" => NetworkType::Wifi,
            "cellular" | "mobile" | "2g" | "3g" | "4g" | "5g" | "lte" => NetworkType::Cellular,
            "ethernet" | "wired" => NetworkType::Ethernet,
            "none" | "offline" | "unknown_offline" | "" => NetworkType::None,
            _ => NetworkType::Other,
        }
    }

    /// Returns the lowercase label.
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkType::Wifi => "wifi",
            NetworkType::Cellular => "cellular",
            NetworkType::Ethernet => "ethernet",
            NetworkType::Other => "other",
            NetworkType::None => "none",
        }
    }
}

impl fmt::Display for NetworkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phase of a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    /// Nothing running.
    Idle,
    /// Checking preconditions.
    Initializing,
    /// Pushing dirty local records.
    Uploading,
    /// Pulling remote changes.
    Downloading,
    /// Applying conflict resolutions.
    ResolvingConflicts,
    /// Persisting the checkpoint.
    Finalizing,
    /// Run finished.
    Completed,
}

impl SyncPhase {
    /// Returns the snake_case label, also used as the monitor marker name.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPhase::Idle => "idle",
            SyncPhase::Initializing => "initializing",
            SyncPhase::Uploading => "uploading",
            SyncPhase::Downloading => "downloading",
            SyncPhase::ResolvingConflicts => "resolving_conflicts",
            SyncPhase::Finalizing => "finalizing",
            SyncPhase::Completed => "completed",
        }
    }

    /// Parses a label produced by [`SyncPhase::as_str`].
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "idle" => Some(SyncPhase::Idle),
            "initializing" => Some(SyncPhase::Initializing),
            "uploading" => Some(SyncPhase::Uploading),
            "downloading" => Some(SyncPhase::Downloading),
            "resolving_conflicts" => Some(SyncPhase::ResolvingConflicts),
            "finalizing" => Some(SyncPhase::Finalizing),
            "completed" => Some(SyncPhase::Completed),
            _ => None,
        }
    }
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
