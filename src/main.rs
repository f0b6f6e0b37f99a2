//! ClusterSync - cluster member process
//!
//! Usage:
//!   clustersync [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>       Configuration file path
//!   -d, --data-dir <DIR>      Data directory
//!   -n, --instance-name <N>   Member name (overrides instanceName)
//!   --broker                  Run the embedded relay broker
//!   --broker-bind <ADDR>      Embedded broker bind address
//!   --management-bind <ADDR>  Management socket bind address
//!   -l, --log-level           Log level (error, warn, info, debug, trace)
//!   -h, --help                Print help

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use clustersync::broker::{Broker, BrokerService, ManagementServer};
use clustersync::config::Config;
use clustersync::node::ClusterNode;

/// Log level for CLI
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum LogLevel {
    /// Only errors
    Error,
    /// Warnings and errors
    Warn,
    /// Informational messages
    #[default]
    Info,
    /// Debug messages
    Debug,
    /// Trace messages (very verbose)
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

/// ClusterSync - catalog and configuration replication
#[derive(Parser, Debug)]
#[command(name = "clustersync")]
#[command(author = "ClusterSync Contributors")]
#[command(version)]
#[command(about = "Replicates catalog and configuration changes between cluster members")]
struct Args {
    /// Configuration file path (TOML format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Data directory
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Member name
    #[arg(short = 'n', long)]
    instance_name: Option<String>,

    /// Run the embedded relay broker
    #[arg(long)]
    broker: bool,

    /// Embedded broker bind address
    #[arg(long)]
    broker_bind: Option<SocketAddr>,

    /// Management socket bind address
    #[arg(long)]
    management_bind: Option<SocketAddr>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, value_enum)]
    log_level: Option<LogLevel>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let file_config = match &args.config {
        Some(path) => match Config::load(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("Error loading config file: {}", e);
                std::process::exit(1);
            }
        },
        None => match Config::from_env() {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("Error reading configuration: {}", e);
                std::process::exit(1);
            }
        },
    };

    // CLI overrides config, config overrides default (info)
    let log_level = args.log_level.unwrap_or_else(|| {
        match file_config.log.level.to_lowercase().as_str() {
            "error" => LogLevel::Error,
            "warn" => LogLevel::Warn,
            "debug" => LogLevel::Debug,
            "trace" => LogLevel::Trace,
            _ => LogLevel::Info,
        }
    });

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level.to_tracing_level())
        .with_target(false)
        .with_thread_ids(true)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    if let Some(path) = &args.config {
        info!("Loaded configuration from {:?}", path);
    }

    let data_dir = args.data_dir.unwrap_or(file_config.node.data_dir.clone());
    let instance_name = args.instance_name.or(file_config.node.instance_name.clone());

    let mut broker_settings = file_config.broker.clone();
    broker_settings.enabled |= args.broker;
    if let Some(bind) = args.broker_bind {
        broker_settings.bind = bind;
    }
    if let Some(bind) = args.management_bind {
        broker_settings.management_bind = Some(bind);
    }

    info!("Starting ClusterSync");
    info!("  Data directory: {:?}", data_dir);

    // The embedded broker comes up first so a member pointed at it can register
    let mut broker = None;
    let mut management = None;
    if broker_settings.enabled {
        let broker_id = instance_name.clone().unwrap_or_else(|| {
            hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "clustersync".to_string())
        });
        let embedded = Broker::new(broker_settings.broker_config(&broker_id)?);
        embedded.start().await?;
        info!(
            "  Embedded broker: {} ({})",
            broker_settings.bind,
            broker_settings.role
        );
        if let Some(bind) = broker_settings.management_bind {
            let server = ManagementServer::bind(bind, Arc::new(embedded.clone())).await?;
            info!("  Management: {}", server.local_addr());
            management = Some(server);
        }
        broker = Some(embedded);
    } else {
        info!("  Embedded broker: disabled");
    }

    let mut builder = ClusterNode::builder(data_dir)
        .with_connect_timeout(broker_settings.connect_timeout)
        .with_inbound_capacity(file_config.node.inbound_capacity);
    if let Some(name) = instance_name {
        builder = builder.with_instance_name(name);
    }
    let node = builder.start().await?;
    info!(
        "  Member '{}' on '{}' via {}",
        node.instance_name(),
        node.configuration().topic_name(),
        node.configuration().broker_url()
    );

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");

    node.shutdown().await;
    if let Some(server) = management {
        server.shutdown().await;
    }
    if let Some(broker) = broker {
        if let Err(e) = broker.stop().await {
            error!("Error stopping embedded broker: {}", e);
        }
    }

    Ok(())
}
