//! readsync CLI
//!
//! Command-line tools for exercising the readsync engine.
//!
//! # Commands
//!
//! - `simulate` - Run a full sync against in-memory collaborators
//! - `gate` - Evaluate the network gate for a connection
//! - `prefs` - Show or change the stored sync preferences

mod commands;
mod error;
mod file_prefs;

use clap::{Parser, Subcommand};
use readsync_protocol::ConflictStrategy;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// readsync command-line sync tools.
#[derive(Parser)]
#[command(name = "readsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the preferences file (JSON)
    #[arg(global = true, short, long)]
    prefs: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a full sync against in-memory collaborators
    Simulate {
        /// Dirty local-only records to upload
        #[arg(long, default_value = "10")]
        dirty: usize,

        /// Records that exist only on the remote side
        #[arg(long, default_value = "10")]
        remote: usize,

        /// Records edited on both sides
        #[arg(long, default_value = "0")]
        conflicts: usize,

        /// Network label (wifi, cellular, ethernet, none, ...)
        #[arg(short, long, default_value = "wifi")]
        network: String,

        /// Treat the connection as metered
        #[arg(short, long)]
        metered: bool,

        /// Override the stored conflict strategy
        #[arg(short, long)]
        strategy: Option<ConflictStrategy>,

        /// Simulated remote latency in milliseconds
        #[arg(short, long, default_value = "0")]
        latency_ms: u64,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Evaluate the network gate for a connection
    Gate {
        /// Network label (wifi, cellular, ethernet, none, ...)
        #[arg(short, long)]
        network: String,

        /// Treat the connection as metered
        #[arg(short, long)]
        metered: bool,
    },

    /// Show or change the stored sync preferences
    Prefs {
        #[command(subcommand)]
        action: PrefsAction,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum PrefsAction {
    /// Print the stored configuration and schedule
    Show {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Change individual settings
    Set(commands::prefs::SetArgs),

    /// Remove the stored configuration
    Reset,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Simulate {
            dirty,
            remote,
            conflicts,
            network,
            metered,
            strategy,
            latency_ms,
            format,
        } => {
            let scenario = commands::simulate::Scenario {
                dirty,
                remote,
                conflicts,
                network,
                metered,
                strategy,
                latency_ms,
            };
            commands::simulate::run(cli.prefs.as_deref(), &scenario, &format).await?;
        }
        Commands::Gate { network, metered } => {
            commands::gate::run(cli.prefs.as_deref(), &network, metered).await?;
        }
        Commands::Prefs { action } => {
            let path = cli.prefs.ok_or("Preferences path required for prefs")?;
            match action {
                PrefsAction::Show { format } => commands::prefs::show(&path, &format).await?,
                PrefsAction::Set(args) => commands::prefs::set(&path, &args).await?,
                PrefsAction::Reset => commands::prefs::reset(&path).await?,
            }
        }
        Commands::Version => {
            println!("readsync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
