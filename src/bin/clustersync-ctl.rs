//! ClusterSync management client
//!
//! Usage:
//!   clustersync-ctl <PROPERTIES> <COMMAND>
//!
//! PROPERTIES is a `key=value` file with the management `address`
//! (`host:port`) and an optional `timeout` in milliseconds.
//!
//! COMMAND is one of isStarted, isSlave, asyncStart, asyncStop.
//!
//! Exit status:
//!   0  the command returned true
//!   1  the command returned false
//!   2  the command failed
//!   3  no command given
//!   4  unknown command
//!   9  properties file missing or invalid

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing::{debug, error, info, Level};
use tracing_subscriber::FmtSubscriber;

use clustersync::broker::{ManagementClient, ManagementCommand};
use clustersync::configuration::properties;

const ADDRESS_KEY: &str = "address";
const TIMEOUT_KEY: &str = "timeout";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

const EXIT_FALSE: u8 = 1;
const EXIT_ERROR: u8 = 2;
const EXIT_MISSING_COMMAND: u8 = 3;
const EXIT_UNKNOWN_COMMAND: u8 = 4;
const EXIT_BAD_PROPERTIES: u8 = 9;

/// Commands accepted from the command line
const COMMANDS: [ManagementCommand; 4] = [
    ManagementCommand::IsStarted,
    ManagementCommand::IsSlave,
    ManagementCommand::AsyncStart,
    ManagementCommand::AsyncStop,
];

/// ClusterSync management client
#[derive(Parser, Debug)]
#[command(name = "clustersync-ctl")]
#[command(version)]
#[command(about = "Runs a management command against an embedded broker")]
struct Args {
    /// Connection properties file
    properties: Option<PathBuf>,

    /// isStarted, isSlave, asyncStart or asyncStop
    command: Option<String>,

    /// Log debug output
    #[arg(short, long)]
    verbose: bool,
}

/// Management endpoint read from the properties file
struct Endpoint {
    address: String,
    timeout: Duration,
}

fn load_endpoint(path: &Path) -> Result<Endpoint, String> {
    if !path.is_file() {
        return Err(format!("check the path: {}", path.display()));
    }
    let content = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    let entries = properties::parse(&content).map_err(|e| e.to_string())?;

    let address = entries
        .get(ADDRESS_KEY)
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty())
        .ok_or_else(|| format!("missing '{}'", ADDRESS_KEY))?;
    let timeout = match entries.get(TIMEOUT_KEY) {
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| format!("malformed '{}': {}", TIMEOUT_KEY, raw))?,
        None => DEFAULT_TIMEOUT,
    };
    Ok(Endpoint { address, timeout })
}

fn parse_command(raw: &str) -> Option<ManagementCommand> {
    raw.parse::<ManagementCommand>()
        .ok()
        .filter(|command| COMMANDS.contains(command))
}

async fn run(endpoint: &Endpoint, command: ManagementCommand) -> Result<bool, String> {
    let mut client = ManagementClient::connect(&endpoint.address, endpoint.timeout)
        .await
        .map_err(|e| e.to_string())?;
    debug!("Connected to {}", endpoint.address);
    let result = client.call(command).await.map_err(|e| e.to_string());
    client.close().await;
    result
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
        .with_target(false)
        .without_time()
        .compact()
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("Unable to install the log subscriber");
    }

    let Some(path) = args.properties else {
        error!("Unable to run without a property file: clustersync-ctl <PROPERTIES> <COMMAND>");
        return ExitCode::from(EXIT_BAD_PROPERTIES);
    };
    let endpoint = match load_endpoint(&path) {
        Ok(endpoint) => endpoint,
        Err(e) => {
            error!("Unable to use the property file: {}", e);
            return ExitCode::from(EXIT_BAD_PROPERTIES);
        }
    };

    let raw = match args.command.as_deref().map(str::trim) {
        Some(raw) if !raw.is_empty() => raw.to_string(),
        _ => {
            error!("No command given");
            return ExitCode::from(EXIT_MISSING_COMMAND);
        }
    };
    let Some(command) = parse_command(&raw) else {
        error!("Unknown command '{}'", raw);
        return ExitCode::from(EXIT_UNKNOWN_COMMAND);
    };

    match run(&endpoint, command).await {
        Ok(true) => {
            info!("Result for command {} is true", command);
            ExitCode::SUCCESS
        }
        Ok(false) => {
            info!("Result for command {} is false", command);
            ExitCode::from(EXIT_FALSE)
        }
        Err(e) => {
            error!("Command {} failed: {}", command, e);
            ExitCode::from(EXIT_ERROR)
        }
    }
}
