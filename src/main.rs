//! MQTT connectivity harness - Main Entry Point
//!
//! Loads configuration, applies command-line overrides and runs the harness
//! against a real broker until the rounds are done and the user interrupts.

use clap::{Args, Parser, Subcommand};
use mqtt_harness::config::HarnessConfig;
use mqtt_harness::harness::{Harness, StopHandle};
use mqtt_harness::observability::{init_logging, level_for_verbosity, logging::logging_from_env};
use mqtt_harness::reporter::{ConsoleReporter, OutputFormat};
use mqtt_harness::transport::mqtt::{MqttClient, MqttClientOptions};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tracing::{error, info, warn};

/// MQTT broker connectivity harness
#[derive(Parser)]
#[command(name = "mqtt-harness")]
#[command(about = "Exercise an MQTT broker with synthetic sensor traffic")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "MQTT_HARNESS_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect, publish the configured rounds and keep receiving until interrupted
    Run(RunArgs),
    /// Validate configuration
    Config {
        /// Show the effective configuration
        #[arg(long)]
        show: bool,
    },
}

/// Overrides for the loaded configuration
#[derive(Args, Debug, Default)]
struct RunArgs {
    /// MQTT broker host
    #[arg(long, env = "MQTT_HOST")]
    host: Option<String>,

    /// MQTT broker port
    #[arg(long, env = "MQTT_PORT")]
    port: Option<u16>,

    /// Broker URL (mqtt://host:port), takes precedence over host and port
    #[arg(long, env = "MQTT_BROKER_URL")]
    broker_url: Option<String>,

    /// Keep-alive interval in seconds
    #[arg(long, value_name = "SECS")]
    keep_alive: Option<u64>,

    /// Number of publish rounds
    #[arg(long)]
    rounds: Option<u32>,

    /// Seconds between publish rounds
    #[arg(long, value_name = "SECS")]
    interval: Option<u64>,

    /// Stop receiving after this many seconds instead of waiting for an interrupt
    #[arg(long, value_name = "SECS")]
    max_drain: Option<u64>,

    /// MQTT client identifier
    #[arg(long, env = "MQTT_CLIENT_ID")]
    client_id: Option<String>,

    /// Output format (pretty, compact, or json)
    #[arg(short, long, default_value = "pretty")]
    format: OutputFormat,
}

impl RunArgs {
    fn apply(&self, config: &mut HarnessConfig) {
        if let Some(host) = &self.host {
            config.broker.host = host.clone();
        }
        if let Some(port) = self.port {
            config.broker.port = port;
        }
        if let Some(url) = &self.broker_url {
            config.broker.url = Some(url.clone());
        }
        if let Some(keep_alive) = self.keep_alive {
            config.broker.keep_alive_secs = keep_alive;
        }
        if let Some(rounds) = self.rounds {
            config.run.publish_rounds = rounds;
        }
        if let Some(interval) = self.interval {
            config.run.publish_interval_secs = interval;
        }
        if let Some(max_drain) = self.max_drain {
            config.run.max_drain_secs = Some(max_drain);
        }
        if let Some(client_id) = &self.client_id {
            config.broker.client_id = Some(client_id.clone());
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let (level, format, include_spans) = logging_from_env();
    if let Err(e) = init_logging(level_for_verbosity(level, cli.verbose), format, include_spans) {
        eprintln!("Failed to initialize logging: {e}");
    }

    info!("Starting mqtt-harness v{}", env!("CARGO_PKG_VERSION"));

    let mut config = match load_configuration(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            eprintln!("❌ Failed to load configuration: {e}");
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run(args) => {
            args.apply(&mut config);
            run_harness(config, args.format).await
        }
        Commands::Config { show } => handle_config_command(config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn load_configuration(
    config_path: Option<&Path>,
) -> Result<HarnessConfig, Box<dyn std::error::Error>> {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Ok(HarnessConfig::load_from_file(path)?)
        }
        None => {
            for path_str in ["harness.toml", "config/harness.toml"] {
                let path = PathBuf::from(path_str);
                if path.exists() {
                    info!("Loading configuration from: {}", path.display());
                    return Ok(HarnessConfig::load_from_file(&path)?);
                }
            }

            info!("No configuration file found, using defaults");
            Ok(HarnessConfig::default())
        }
    }
}

/// Build the rumqttc transport from configuration
fn build_transport(config: &HarnessConfig) -> MqttClient {
    let mut options =
        MqttClientOptions::new(config.client_id()).with_connect_timeout(config.connect_timeout());
    if let Some(username) = config.mqtt_username() {
        options = options.with_credentials(username, config.mqtt_password());
    }
    MqttClient::new(options)
}

async fn run_harness(
    config: HarnessConfig,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    config.validate()?;

    let transport = build_transport(&config);
    let reporter = Arc::new(ConsoleReporter::stdout(format));
    let mut harness = Harness::new(config, transport, reporter)?;

    let signals = tokio::spawn(stop_on_signal(harness.stop_handle()));
    let result = harness.run().await;
    signals.abort();

    let summary = result?;
    info!(?summary, "Run complete");
    Ok(())
}

/// Wait for SIGINT or SIGTERM and request a graceful stop
async fn stop_on_signal(handle: StopHandle) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match (
            signal(SignalKind::interrupt()),
            signal(SignalKind::terminate()),
        ) {
            (Ok(mut sigint), Ok(mut sigterm)) => {
                tokio::select! {
                    _ = sigint.recv() => info!("Received SIGINT, shutting down gracefully..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully..."),
                }
            }
            _ => {
                warn!("Unix signal handlers unavailable, falling back to Ctrl-C");
                if tokio::signal::ctrl_c().await.is_err() {
                    return;
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        if tokio::signal::ctrl_c().await.is_err() {
            warn!("Ctrl-C handler unavailable");
            return;
        }
        info!("Received Ctrl-C, shutting down gracefully...");
    }

    handle.request_stop();
}

fn handle_config_command(
    config: HarnessConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    config.validate()?;
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(&config)?);
    }

    info!("Configuration validation complete");
    Ok(())
}
