//! IHC to MQTT bridge
//!
//! Main entry point: loads the configuration, installs logging, wires the
//! real collaborators and runs until a shutdown signal arrives.

mod signals;

use anyhow::{Context, Result};
use clap::Parser;
use ihc_bridge::{Bridge, BridgeServices, CommandSystemActions};
use ihc_config::{BridgeConfig, DEFAULT_CONFIG_FILE};
use ihc_controller::{HttpCommandApi, WsEventStream};
use ihc_core::Namespace;
use ihc_mqtt::{MqttBus, INBOUND_CAPACITY};
use signals::ShutdownSignals;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_found = args.config.exists();
    let config = if config_found {
        BridgeConfig::load(&args.config)
            .with_context(|| format!("Failed to load configuration from {:?}", args.config))?
    } else {
        BridgeConfig::default()
    };

    let level = if args.debug || config.logging.debug {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting IHC bridge with config file: {:?}", args.config);
    if !config_found {
        warn!("Configuration file {:?} not found, using defaults", args.config);
    }

    let namespace = Namespace::new(config.mqtt.topic_prefix.as_str());
    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
    let services = BridgeServices {
        bus: Arc::new(MqttBus::new(&config.mqtt, &namespace, inbound_tx)),
        api: Arc::new(HttpCommandApi::new(&config.controller)?),
        events: Arc::new(WsEventStream::new(config.controller.events_url())),
        system: Arc::new(CommandSystemActions::new(&config.system)),
    };
    info!(
        controller = %config.controller.request_url(),
        broker = %format!("{}:{}", config.mqtt.host, config.mqtt.port),
        prefix = namespace.prefix(),
        "Bridge configured"
    );

    let mut signals = ShutdownSignals::install().context("Failed to install signal handlers")?;
    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        let signal = signals.recv().await;
        info!(signal, "Shutdown signal received, closing connections...");
        signal_token.cancel();
    });

    let bridge = Bridge::new(&config, services, inbound_rx);
    bridge.run(shutdown).await?;

    info!("IHC bridge exited");
    Ok(())
}
