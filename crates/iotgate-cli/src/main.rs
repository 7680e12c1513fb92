//! Command-line interface for the iotgate device gateway.

mod seed;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use iotgate_core::config::env_vars;
use iotgate_core::{GatewayConfig, MessageBus};
use iotgate_devices::{ChannelObserver, Downsampler, Gateway};
use iotgate_storage::GatewayStore;

/// iotgate - sensor and actuator gateway over MQTT.
#[derive(Parser, Debug)]
#[command(name = "iotgate")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Configuration file (TOML).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the gateway: ingest telemetry, route acks, recover on reconnect.
    Serve,

    /// Send an action to an actuator and wait for the acknowledgment.
    Trigger {
        action_id: u64,
        actuator_id: u64,

        /// Do not record the command in the action history.
        #[arg(long)]
        ephemeral: bool,
    },

    /// Print the downsampled series for the trailing window.
    Window {
        /// Window length in seconds.
        #[arg(long)]
        window_secs: Option<u64>,

        /// Slot length in seconds.
        #[arg(long)]
        slot_secs: Option<u64>,
    },

    /// Load catalog data from a JSON file, skipping rows that exist.
    Seed {
        #[arg(required = true)]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config_path = args
        .config
        .or_else(|| std::env::var(env_vars::CONFIG).ok().map(PathBuf::from));
    let config = GatewayConfig::load(config_path.as_deref())?;

    match args.command {
        Command::Serve => run_server(config).await,
        Command::Trigger {
            action_id,
            actuator_id,
            ephemeral,
        } => run_trigger(config, action_id, actuator_id, !ephemeral).await,
        Command::Window {
            window_secs,
            slot_secs,
        } => run_window(config, window_secs, slot_secs).await,
        Command::Seed { file } => run_seed(config, file),
    }
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "iotgate=debug" } else { "iotgate=info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

    // Logs go to stderr; stdout carries command output.
    if iotgate_core::config::json_logging() {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .with_writer(std::io::stderr)
            .init();
    }
}

fn open_store(config: &GatewayConfig) -> Result<GatewayStore> {
    GatewayStore::open(&config.storage.path)
        .with_context(|| format!("cannot open storage at {}", config.storage.path))
}

#[cfg(feature = "mqtt")]
fn connect_bus(config: &GatewayConfig) -> Result<Arc<dyn MessageBus>> {
    Ok(Arc::new(iotgate_devices::MqttBus::connect(&config.mqtt)))
}

#[cfg(not(feature = "mqtt"))]
fn connect_bus(_config: &GatewayConfig) -> Result<Arc<dyn MessageBus>> {
    anyhow::bail!("built without MQTT support")
}

async fn run_server(config: GatewayConfig) -> Result<()> {
    let store = open_store(&config)?;
    let bus = connect_bus(&config)?;
    let gateway = Gateway::new(&config, &store, bus);
    let listener = gateway.start().await?;

    // Mirror realtime events into the log.
    let (observer, mut events) = ChannelObserver::new("log", 256);
    gateway.broadcaster.connect(Arc::new(observer));
    let event_log = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            tracing::debug!(event = event.name(), ?event, "realtime event");
        }
    });

    tracing::info!(storage = %config.storage.path, "gateway running, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;

    tracing::info!("shutting down");
    gateway.broadcaster.disconnect("log");
    listener.abort();
    event_log.abort();
    Ok(())
}

async fn run_trigger(
    config: GatewayConfig,
    action_id: u64,
    actuator_id: u64,
    persist: bool,
) -> Result<()> {
    let store = open_store(&config)?;
    let bus = connect_bus(&config)?;
    let gateway = Gateway::new(&config, &store, bus);
    let listener = gateway.start().await?;

    let result = gateway
        .dispatcher
        .trigger(action_id, actuator_id, persist)
        .await?;
    listener.abort();

    println!("{}", serde_json::to_string_pretty(&result)?);
    if !result.status {
        std::process::exit(2);
    }
    Ok(())
}

async fn run_window(
    config: GatewayConfig,
    window_secs: Option<u64>,
    slot_secs: Option<u64>,
) -> Result<()> {
    let store = open_store(&config)?;
    let downsampler = Downsampler::new(store.readings.clone(), config.downsample.clone());
    let window = downsampler
        .recent_window(
            window_secs.unwrap_or(config.downsample.window_secs),
            slot_secs.unwrap_or(config.downsample.slot_secs),
        )
        .await?;
    println!("{}", serde_json::to_string(&window)?);
    Ok(())
}

fn run_seed(config: GatewayConfig, file: PathBuf) -> Result<()> {
    let store = open_store(&config)?;
    let report = seed::seed_file(&store.catalog, &file)?;
    tracing::info!(inserted = report.inserted, skipped = report.skipped, "seed finished");
    println!("{}", serde_json::to_string(&report)?);
    Ok(())
}
