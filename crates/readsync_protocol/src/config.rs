//! User sync preferences.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Persisted interval value meaning "manual sync only".
pub const MANUAL_INTERVAL_SENTINEL: i64 = -1;

/// How often background sync runs.
///
/// Persisted as an integer: [`MANUAL_INTERVAL_SENTINEL`] or a positive
/// number of minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub enum SyncInterval {
    /// Never scheduled; sync only when asked.
    Manual,
    /// Every n minutes.
    Minutes(u32),
}

impl SyncInterval {
    /// Returns the interval as a duration, `None` for manual.
    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            SyncInterval::Manual => None,
            SyncInterval::Minutes(minutes) => Some(Duration::from_secs(u64::from(*minutes) * 60)),
        }
    }

    /// Returns true for the manual sentinel.
    pub fn is_manual(&self) -> bool {
        matches!(self, SyncInterval::Manual)
    }
}

impl TryFrom<i64> for SyncInterval {
    type Error = ProtocolError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            MANUAL_INTERVAL_SENTINEL => Ok(SyncInterval::Manual),
            n if n > 0 && n <= i64::from(u32::MAX) => Ok(SyncInterval::Minutes(n as u32)),
            n => Err(ProtocolError::InvalidInterval(n)),
        }
    }
}

impl From<SyncInterval> for i64 {
    fn from(interval: SyncInterval) -> Self {
        match interval {
            SyncInterval::Manual => MANUAL_INTERVAL_SENTINEL,
            SyncInterval::Minutes(minutes) => i64::from(minutes),
        }
    }
}

impl fmt::Display for SyncInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncInterval::Manual => f.write_str("manual"),
            SyncInterval::Minutes(minutes) => write!(f, "{minutes}m"),
        }
    }
}

/// Strategy for resolving a record changed on both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    /// The later modification wins.
    LastWriteWins,
    /// The local record wins and is re-uploaded.
    LocalWins,
    /// The remote record wins.
    RemoteWins,
    /// A person decides; conflicts are queued.
    Manual,
    /// Field-wise merge.
    Merge,
}

impl ConflictStrategy {
    /// Returns true if this strategy resolves conflicts without a person.
    pub fn auto_resolves(&self) -> bool {
        !matches!(self, ConflictStrategy::Manual)
    }

    /// Returns the snake_case label.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictStrategy::LastWriteWins => "last_write_wins",
            ConflictStrategy::LocalWins => "local_wins",
            ConflictStrategy::RemoteWins => "remote_wins",
            ConflictStrategy::Manual => "manual",
            ConflictStrategy::Merge => "merge",
        }
    }
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictStrategy {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "last_write_wins" | "lww" => Ok(ConflictStrategy::LastWriteWins),
            "local_wins" | "local" => Ok(ConflictStrategy::LocalWins),
            "remote_wins" | "remote" => Ok(ConflictStrategy::RemoteWins),
            "manual" => Ok(ConflictStrategy::Manual),
            "merge" => Ok(ConflictStrategy::Merge),
            _ => Err(ProtocolError::UnknownStrategy(s.to_string())),
        }
    }
}

/// The user's sync preferences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfiguration {
    /// Background sync enabled.
    pub background_enabled: bool,
    /// Background interval.
    pub interval: SyncInterval,
    /// Only sync on Wi-Fi.
    pub wifi_only: bool,
    /// Allow sync over mobile data.
    pub allow_cellular: bool,
    /// Allow sync over metered connections.
    pub allow_metered: bool,
    /// Download article bodies, not just metadata.
    pub download_full_content: bool,
    /// Conflict strategy.
    pub conflict_strategy: ConflictStrategy,
    /// Records per upload batch.
    pub batch_size: u32,
}

impl Default for SyncConfiguration {
    fn default() -> Self {
        Self {
            background_enabled: false,
            interval: SyncInterval::Minutes(60),
            wifi_only: false,
            allow_cellular: true,
            allow_metered: false,
            download_full_content: true,
            conflict_strategy: ConflictStrategy::LastWriteWins,
            batch_size: 10,
        }
    }
}

impl SyncConfiguration {
    /// Parses a persisted configuration.
    pub fn from_json(json: &str) -> ProtocolResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serializes for persistence.
    pub fn to_json(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Checks invariants not expressible in the types.
    pub fn validate(&self) -> ProtocolResult<()> {
        if self.batch_size == 0 {
            return Err(ProtocolError::InvalidBatchSize);
        }
        if let SyncInterval::Minutes(0) = self.interval {
            return Err(ProtocolError::InvalidInterval(0));
        }
        Ok(())
    }

    /// Returns true if a periodic background trigger should be registered.
    pub fn wants_schedule(&self) -> bool {
        self.background_enabled && !self.interval.is_manual()
    }

    /// Returns a copy with the patch applied.
    pub fn merged(&self, patch: &SyncConfigurationPatch) -> Self {
        Self {
            background_enabled: patch.background_enabled.unwrap_or(self.background_enabled),
            interval: patch.interval.unwrap_or(self.interval),
            wifi_only: patch.wifi_only.unwrap_or(self.wifi_only),
            allow_cellular: patch.allow_cellular.unwrap_or(self.allow_cellular),
            allow_metered: patch.allow_metered.unwrap_or(self.allow_metered),
            download_full_content: patch
                .download_full_content
                .unwrap_or(self.download_full_content),
            conflict_strategy: patch.conflict_strategy.unwrap_or(self.conflict_strategy),
            batch_size: patch.batch_size.unwrap_or(self.batch_size),
        }
    }
}

/// Partial update of a [`SyncConfiguration`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfigurationPatch {
    /// Background sync enabled.
    pub background_enabled: Option<bool>,
    /// Background interval.
    pub interval: Option<SyncInterval>,
    /// Only sync on Wi-Fi.
    pub wifi_only: Option<bool>,
    /// Allow sync over mobile data.
    pub allow_cellular: Option<bool>,
    /// Allow sync over metered connections.
    pub allow_metered: Option<bool>,
    /// Download article bodies.
    pub download_full_content: Option<bool>,
    /// Conflict strategy.
    pub conflict_strategy: Option<ConflictStrategy>,
    /// Records per upload batch.
    pub batch_size: Option<u32>,
}

impl SyncConfigurationPatch {
    /// Creates an empty patch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables or disables background sync.
    pub fn with_background_enabled(mut self, enabled: bool) -> Self {
        self.background_enabled = Some(enabled);
        self
    }

    /// Sets the interval.
    pub fn with_interval(mut self, interval: SyncInterval) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Sets the Wi-Fi only flag.
    pub fn with_wifi_only(mut self, wifi_only: bool) -> Self {
        self.wifi_only = Some(wifi_only);
        self
    }

    /// Sets the cellular flag.
    pub fn with_allow_cellular(mut self, allow: bool) -> Self {
        self.allow_cellular = Some(allow);
        self
    }

    /// Sets the metered flag.
    pub fn with_allow_metered(mut self, allow: bool) -> Self {
        self.allow_metered = Some(allow);
        self
    }

    /// Sets the conflict strategy.
    pub fn with_conflict_strategy(mut self, strategy: ConflictStrategy) -> Self {
        self.conflict_strategy = Some(strategy);
        self
    }

    /// Sets the batch size.
    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = Some(batch_size);
        self
    }
}
