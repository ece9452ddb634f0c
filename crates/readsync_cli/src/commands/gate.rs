//! Gate command implementation.

use crate::error::CliResult;
use readsync_engine::{GateDecision, NetworkGate, NetworkStatus};
use std::path::Path;

/// Runs the gate command.
pub async fn run(prefs: Option<&Path>, network: &str, metered: bool) -> CliResult<()> {
    let config = super::load_configuration(prefs).await;
    let status = NetworkStatus::from_label(network, metered);

    println!("Network: {} (metered: {})", status.network_type, status.is_expensive);
    println!(
        "Preferences: wifi_only={} allow_cellular={} allow_metered={}",
        config.wifi_only, config.allow_cellular, config.allow_metered
    );
    match NetworkGate::evaluate(&status, &config) {
        GateDecision::Allowed => println!("✓ Sync allowed"),
        GateDecision::Denied(reason) => println!("✗ Sync denied: {reason}"),
    }
    Ok(())
}
