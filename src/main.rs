//! uplink - connectivity supervisor entry point

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn, Instrument};
use uplink::actuator::{Actuator, FileActuator, LogActuator};
use uplink::config::SupervisorConfig;
use uplink::lifecycle_span;
use uplink::link::{HostNetworkProvider, NetworkCredentials};
use uplink::observability::{init_default_logging, DiagnosticSink, TracingSink};
use uplink::reporter::Reporter;
use uplink::router::{InboundRouter, LogHandler};
use uplink::session::{MqttSessionProvider, SessionTransport};
use uplink::store::{ConfigStore, FileStore};
use uplink::supervisor::{event_channel, SignalSender, Supervisor, SupervisorHandle};

/// Connectivity supervisor for a network-attached device
#[derive(Parser)]
#[command(name = "uplink")]
#[command(about = "Keeps a device's network link and MQTT session alive")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the supervisor until interrupted or the link fails
    Run,
    /// Validate the configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    info!("Starting uplink v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_supervisor(config).await,
        Commands::Config { show } => handle_config_command(config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<SupervisorConfig, Box<dyn std::error::Error>> {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Ok(SupervisorConfig::load_from_file(path)?)
        }
        None => {
            let default_paths = ["uplink.toml", "config/uplink.toml"];

            for path_str in default_paths {
                let path = PathBuf::from(path_str);
                if path.exists() {
                    info!("Loading configuration from: {}", path.display());
                    return Ok(SupervisorConfig::load_from_file(&path)?);
                }
            }

            Err("No configuration file found. Provide one with -c/--config or create uplink.toml"
                .into())
        }
    }
}

async fn run_supervisor(config: SupervisorConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!("Supervisor starting with device ID: {}", config.device.id);

    // The store must be usable before anything touches the network
    let mut store = FileStore::new(&config.store.path);
    store.initialize()?;

    let (signals, mut events) = event_channel();
    let mut supervisor = build_supervisor(&config, signals.clone())?;

    let handle = SupervisorHandle::new(signals);
    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    tokio::spawn(async move {
        tokio::select! {
            _ = sigint.recv() => info!("Received SIGINT, shutting down gracefully..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully..."),
        }
        handle.stop();
    });

    let period = Duration::from_millis(config.reporter.period_ms);
    let span = lifecycle_span!(device_id = %config.device.id);
    match supervisor.run(&mut events, period).instrument(span).await {
        Ok(()) => {
            info!("Supervisor stopped");
            Ok(())
        }
        Err(e) if e.is_exhausted() => {
            error!("Supervisor gave up, restart required: {}", e);
            Err(e.into())
        }
        Err(e) => {
            error!("Supervisor fault: {}", e);
            Err(e.into())
        }
    }
}

/// Wire the host providers into a supervisor
fn build_supervisor(
    config: &SupervisorConfig,
    signals: SignalSender,
) -> Result<Supervisor<HostNetworkProvider, MqttSessionProvider>, Box<dyn std::error::Error>> {
    let sink: Arc<dyn DiagnosticSink> = Arc::new(TracingSink);

    let credentials = NetworkCredentials {
        network_id: config.network.network_id.clone(),
        secret: config.network_secret(),
    };
    let network = HostNetworkProvider::new(
        credentials,
        config.probe_target()?,
        Duration::from_secs(config.network.probe_interval_secs),
        signals.clone(),
    );

    let provider = MqttSessionProvider::new(&config.device.id, &config.session, signals)?;
    let mut session =
        SessionTransport::new(provider, config.session.reconnect.clone(), sink.clone());

    let mut router = InboundRouter::new();
    for filter in &config.session.subscriptions {
        session.subscribe(filter.clone())?;
        if filter.contains(['+', '#']) {
            warn!(%filter, "Wildcard subscription has no exact-topic handler");
        } else {
            router.register(filter.clone(), LogHandler);
        }
    }

    let actuator: Box<dyn Actuator> = match &config.actuator.value_path {
        Some(path) => Box::new(FileActuator::new(path)),
        None => Box::new(LogActuator::new()),
    };
    let reporter = Reporter::new(
        &config.reporter,
        config.session.state_topic.clone(),
        actuator,
        sink.clone(),
    );

    Ok(Supervisor::new(
        network,
        config.network.retry_policy(),
        session,
        reporter,
        router,
        sink,
    ))
}

fn handle_config_command(
    config: SupervisorConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(&config)?);
    }

    info!("Configuration validation complete");
    Ok(())
}
