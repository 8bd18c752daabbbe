// Tao network boot service: DHCP leases and TFTP boot images
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr};
use std::io::stderr;
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, registry, EnvFilter};

mod config;
mod services;

use config::{Config, DEFAULT_CONFIG_PATH};
use services::{log_events, ServiceRunner};

#[derive(Parser, Debug)]
#[command(name = "tao", author, version, about = "Network boot service (DHCP + TFTP)", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short, long, env = "TAO_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Verbose output - shows more detailed logs
    #[arg(short, long, default_value_t = false)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, default_value_t = false)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the enabled services (default)
    Run,
    /// Print the effective configuration and exit
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json_logs);

    let config = Config::load(&cli.config)
        .wrap_err_with(|| format!("loading configuration from {}", cli.config.display()))?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::ShowConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Commands::Run => run(config).await,
    }
}

fn init_logging(verbose: bool, json: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("tao={level},tao_dhcp={level},tao_tftp={level}"))
    });

    let registry = registry().with(filter);
    if json {
        registry.with(fmt::layer().json().with_writer(stderr)).init();
    } else {
        registry.with(fmt::layer().with_writer(stderr)).init();
    }
}

async fn run(config: Config) -> Result<()> {
    let services = config.validate().wrap_err("invalid configuration")?;
    if config.http.is_enable {
        warn!("HTTP section is enabled but this build does not serve HTTP; ignoring it");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles = ServiceRunner::new(services)
        .start(shutdown_rx)
        .await
        .wrap_err("starting services")?;

    let dhcp_events = handles.dhcp.as_ref().map(|h| h.events.resubscribe());
    let tftp_events = handles.tftp.as_ref().map(|h| h.events.resubscribe());
    tokio::spawn(log_events(dhcp_events, tftp_events));

    info!("Tao started successfully");

    tokio::signal::ctrl_c()
        .await
        .wrap_err("installing Ctrl+C handler")?;
    info!("Ctrl+C received, shutting down");
    let _ = shutdown_tx.send(true);

    handles.join().await;
    info!("Tao stopped");
    Ok(())
}
