//! Command-line host for the usage tracker
//!
//! Opens the configured store and exposes the tracker's operations as
//! subcommands. Delivered events are printed to stdout as JSON lines; logs
//! go to stderr.
//!
//! # Usage
//!
//! ```bash
//! # Show (or create) the tracking id
//! tracker track-id
//!
//! # Counters
//! tracker accumulate play_minutes 12
//! tracker delta bytes_sent 40960
//!
//! # Move all persisted data to another store
//! tracker export > blob.txt
//! tracker --backend cookie import "$(cat blob.txt)"
//!
//! # Fire an event and print what the listener receives
//! RUST_LOG=debug tracker fire app_start --payload '{"version":"1.0"}'
//! ```

mod config;
mod output;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use usage_tracker::events::types::payload_from_value;
use usage_tracker::{BackendKind, DiscoveryState, IncrementalConfig, Tracker};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Storage backend: local, cookie or memory (overrides TRACKER_STORAGE_BACKEND)
    #[arg(long)]
    backend: Option<BackendKind>,

    /// Directory for backend files (overrides TRACKER_STORAGE_PATH)
    #[arg(long)]
    storage_path: Option<PathBuf>,

    /// Listener discovery timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Log every scheduled and delivered event
    #[arg(long, default_value_t = false)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the persistent tracking id
    TrackId,
    /// Add a value to an accumulator and print the new total
    Accumulate { name: String, value: f64 },
    /// Record an absolute value and print the change since the last one
    Delta { name: String, value: f64 },
    /// Remove one accumulator
    ClearAccum { name: String },
    /// Remove one delta baseline
    ClearDelta { name: String },
    /// Remove all counters (the tracking id is kept)
    ClearAll,
    /// Print all persisted data as one blob
    Export,
    /// Load a blob produced by `export`
    Import { blob: String },
    /// Fire an event and print what the listener receives
    Fire {
        name: String,
        /// JSON object payload
        #[arg(long)]
        payload: Option<String>,
        /// Do not register a listener (the event expires with the deadline)
        #[arg(long, default_value_t = false)]
        no_listener: bool,
    },
    /// Fire one event per interval boundary the value has crossed
    Incremental {
        name: String,
        /// Property whose last threshold is persisted
        property: String,
        value: f64,
        #[arg(long, default_value_t = 1.0)]
        interval: f64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let overrides = config::Overrides {
        backend: args.backend,
        storage_path: args.storage_path.clone(),
        timeout_ms: args.timeout_ms,
        debug: args.debug,
    };
    let config = config::resolve(args.config.as_deref(), &overrides)?;
    info!(
        backend = %config.storage.backend,
        path = %config.storage.path.display(),
        "Tracker host starting"
    );

    let tracker = Tracker::open(config)
        .context("Failed to open tracker storage")?
        .shared();

    match args.command {
        Command::TrackId => println!("{}", tracker.tracking_id()),
        Command::Accumulate { name, value } => println!("{}", tracker.accumulate(&name, value)?),
        Command::Delta { name, value } => println!("{}", tracker.delta(&name, value)?),
        Command::ClearAccum { name } => tracker.clear_accum(&name)?,
        Command::ClearDelta { name } => tracker.clear_delta(&name)?,
        Command::ClearAll => tracker.clear_all()?,
        Command::Export => println!("{}", tracker.export_store()?),
        Command::Import { blob } => {
            let written = tracker.import_store(&blob).context("Failed to import blob")?;
            info!(keys = written, "Import complete");
        }
        Command::Fire {
            name,
            payload,
            no_listener,
        } => {
            let payload = match payload {
                Some(raw) => payload_from_value(
                    serde_json::from_str(&raw).context("--payload is not valid JSON")?,
                ),
                None => Default::default(),
            };
            tracker.fire_event(&name, payload, false);
            settle(&tracker, no_listener).await?;
        }
        Command::Incremental {
            name,
            property,
            value,
            interval,
        } => {
            let config = IncrementalConfig::new(property).with_interval(interval);
            let fired =
                tracker.fire_incremental_event(&name, Default::default(), config, Some(value))?;
            info!(fired, "Incremental thresholds crossed");
            settle(&tracker, false).await?;
        }
    }

    Ok(())
}

/// Optionally register the stdout listener, then wait for discovery to settle.
async fn settle(tracker: &usage_tracker::SharedTracker, no_listener: bool) -> Result<()> {
    let probe = tracker.spawn_probe();
    if !no_listener {
        tracker.listeners().register(output::stdout_listener());
    }
    match probe.await.context("Listener probe task failed")? {
        DiscoveryState::Enabled => {}
        state => warn!(%state, "Events were not delivered"),
    }
    Ok(())
}
