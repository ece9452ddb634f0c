//! Network gate.
//!
//! Decides whether the current connectivity satisfies the user's network
//! preferences. The checks run in a fixed order and the first failing check
//! names the reason.

use crate::collaborators::{ConnectivitySensor, NetworkStatus};
use readsync_protocol::{NetworkType, SyncConfiguration};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Why the gate refused a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// Offline, or connected without internet reachability.
    NoConnection,
    /// Wi-Fi only, and not on Wi-Fi.
    WifiRequired,
    /// On mobile data with cellular sync disabled.
    CellularDisabled,
    /// On a metered connection with metered sync disabled.
    MeteredDisabled,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DenyReason::NoConnection => "no network connection",
            DenyReason::WifiRequired => "Wi-Fi connection required",
            DenyReason::CellularDisabled => "cellular sync disabled",
            DenyReason::MeteredDisabled => "metered connection sync disabled",
        };
        f.write_str(text)
    }
}

/// Result of [`NetworkGate::evaluate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// The run may proceed.
    Allowed,
    /// The run is refused.
    Denied(DenyReason),
}

impl GateDecision {
    /// Returns true if the run may proceed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, GateDecision::Allowed)
    }

    /// Returns the refusal reason, if any.
    pub fn reason(&self) -> Option<DenyReason> {
        match self {
            GateDecision::Allowed => None,
            GateDecision::Denied(reason) => Some(*reason),
        }
    }
}

/// Connectivity policy backed by a [`ConnectivitySensor`].
#[derive(Clone)]
pub struct NetworkGate {
    sensor: Arc<dyn ConnectivitySensor>,
}

impl NetworkGate {
    /// Creates a gate reading from `sensor`.
    pub fn new(sensor: Arc<dyn ConnectivitySensor>) -> Self {
        Self { sensor }
    }

    /// Evaluates `status` against `config`.
    pub fn evaluate(status: &NetworkStatus, config: &SyncConfiguration) -> GateDecision {
        if !status.is_online() {
            return GateDecision::Denied(DenyReason::NoConnection);
        }
        if config.wifi_only && status.network_type != NetworkType::Wifi {
            return GateDecision::Denied(DenyReason::WifiRequired);
        }
        if status.network_type == NetworkType::Cellular && !config.allow_cellular {
            return GateDecision::Denied(DenyReason::CellularDisabled);
        }
        if status.is_expensive && !config.allow_metered {
            return GateDecision::Denied(DenyReason::MeteredDisabled);
        }
        GateDecision::Allowed
    }

    /// Maps a platform network label to a network class.
    pub fn classify(raw: &str) -> NetworkType {
        NetworkType::classify(raw)
    }

    /// Reads the sensor and evaluates the result.
    pub async fn check(&self, config: &SyncConfiguration) -> (NetworkStatus, GateDecision) {
        let status = self.sensor.current().await;
        let decision = Self::evaluate(&status, config);
        if let GateDecision::Denied(reason) = decision {
            tracing::debug!(network = %status.network_type, %reason, "network gate denied sync");
        }
        (status, decision)
    }

    /// Reads the sensor.
    pub async fn status(&self) -> NetworkStatus {
        self.sensor.current().await
    }
}

impl fmt::Debug for NetworkGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkGate").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SyncConfiguration {
        SyncConfiguration::default()
    }

    #[test]
    fn offline_wins_over_every_other_reason() {
        let config = SyncConfiguration {
            wifi_only: true,
            allow_cellular: false,
            ..config()
        };
        let decision = NetworkGate::evaluate(&NetworkStatus::offline(), &config);
        assert_eq!(decision, GateDecision::Denied(DenyReason::NoConnection));
        assert_eq!(decision.reason().unwrap().to_string(), "no network connection");
    }

    #[test]
    fn connected_but_unreachable_counts_as_offline() {
        let status = NetworkStatus::wifi().unreachable();
        assert!(status.connected);
        assert_eq!(
            NetworkGate::evaluate(&status, &config()),
            GateDecision::Denied(DenyReason::NoConnection)
        );
    }

    #[test]
    fn wifi_only_rejects_cellular_first() {
        let config = SyncConfiguration {
            wifi_only: true,
            allow_cellular: false,
            ..config()
        };
        let decision = NetworkGate::evaluate(&NetworkStatus::cellular(), &config);
        assert_eq!(decision, GateDecision::Denied(DenyReason::WifiRequired));
    }

    #[test]
    fn cellular_then_metered() {
        let config = SyncConfiguration {
            allow_cellular: false,
            ..config()
        };
        assert_eq!(
            NetworkGate::evaluate(&NetworkStatus::cellular(), &config),
            GateDecision::Denied(DenyReason::CellularDisabled)
        );

        let config = SyncConfiguration {
            allow_cellular: true,
            allow_metered: false,
            ..config
        };
        assert_eq!(
            NetworkGate::evaluate(&NetworkStatus::cellular(), &config),
            GateDecision::Denied(DenyReason::MeteredDisabled)
        );

        let config = SyncConfiguration {
            allow_metered: true,
            ..config
        };
        assert!(NetworkGate::evaluate(&NetworkStatus::cellular(), &config).is_allowed());
    }

    #[test]
    fn wifi_is_allowed_by_default() {
        let decision = NetworkGate::evaluate(&NetworkStatus::wifi(), &config());
        assert!(decision.is_allowed());
        assert!(decision.reason().is_none());
    }

    #[test]
    fn metered_wifi_respects_metered_flag() {
        let status = NetworkStatus {
            is_expensive: true,
            ..NetworkStatus::wifi()
        };
        assert_eq!(
            NetworkGate::evaluate(&status, &config()),
            GateDecision::Denied(DenyReason::MeteredDisabled)
        );
    }

    #[test]
    fn classify_labels() {
        assert_eq!(NetworkGate::classify("wifi"), NetworkType::Wifi);
        assert_eq!(NetworkGate::classify("cellular"), NetworkType::Cellular);
        assert_eq!(NetworkGate::classify("ethernet"), NetworkType::Ethernet);
        assert_eq!(NetworkGate::classify("none"), NetworkType::None);
        assert_eq!(NetworkGate::classify("satellite"), NetworkType::Other);
    }
}
