//! Devicefarm Daemon - Main entry point
//!
//! Runs either a node, which discovers local devices and reports them to a
//! hub, or the hub, which aggregates the inventories of its nodes.

mod api;
mod config;
mod server;
mod state;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::config::Role;

#[derive(Parser, Debug)]
#[command(name = "devicefarm")]
#[command(about = "Mobile device farm node and hub daemon")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "devicefarm.toml")]
    config: PathBuf,

    /// Bind address for web server
    #[arg(short, long)]
    bind: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Hub URL to report devices to
    #[arg(long)]
    hub: Option<String>,

    /// Run a single discovery pass and exit
    #[arg(long)]
    scan_once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Devicefarm v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config = config::load_config(&args.config)?;

    if let Some(bind) = args.bind {
        config.daemon.bind = bind;
    }
    if let Some(hub) = args.hub {
        config.hub.url = Some(hub);
    }

    info!(
        role = ?config.daemon.role,
        bind = %config.daemon.bind,
        "Configuration loaded"
    );

    let bind = config.daemon.bind.clone();
    match config.daemon.role {
        Role::Hub => {
            let state = state::HubState::new(config);
            server::run_hub(state, &bind).await?;
        }
        Role::Node => {
            let state = state::NodeState::new(config).await?;

            if args.scan_once {
                info!("Running single discovery pass");
                let report = state.sync.sync_once().await;
                println!("Discovered {} devices:", state.registry.len().await);
                for device in state.registry.list().await {
                    println!(
                        "  - {} ({}) {} {} [{:?}] at {}",
                        device.display_name,
                        device.identifier,
                        device.platform_family,
                        device.os_version,
                        device.device_class,
                        device.host_address
                    );
                    if device.control_port != 0 {
                        println!(
                            "    Ports: control {}, stream {}",
                            device.control_port, device.stream_port
                        );
                    }
                }
                if !report.failed_sources.is_empty() {
                    println!("Unavailable sources: {}", report.failed_sources.join(", "));
                }
            } else {
                server::run_node(state, &bind).await?;
            }
        }
    }

    Ok(())
}
