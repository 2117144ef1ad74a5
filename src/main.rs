//! IP allow-listing reverse proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client ──▶ net::listener ──▶ http::server ──▶ allow list 1 ──▶ ... ──▶ proxy ──▶ Upstream
//!                (TCP allow list)   (trace, id,      (strategy →             handler
//!                                    timeout)         checker → 403)
//!
//!     config::watcher ──▶ validated ProxyConfig ──▶ atomic swap of allow lists
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use allowlist_proxy::config::{load_config, ConfigWatcher};
use allowlist_proxy::http::HttpServer;
use allowlist_proxy::lifecycle::{signals, Shutdown};
use allowlist_proxy::net::{AllowListener, TcpAllowListHandle};
use allowlist_proxy::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "allowlist-proxy")]
#[command(about = "Reverse proxy that admits clients by IP allow list", long_about = None)]
struct Cli {
    /// Path to the TOML (or .json) configuration file.
    #[arg(short, long, default_value = "allowlist-proxy.toml")]
    config: PathBuf,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,

    /// Do not watch the configuration file for changes.
    #[arg(long)]
    no_watch: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}: {}", cli.config.display(), e);
            return ExitCode::FAILURE;
        }
    };

    if cli.check {
        println!("{}: configuration OK", cli.config.display());
        return ExitCode::SUCCESS;
    }

    // Nothing is logged before this succeeds.
    if let Err(e) = logging::init_logging(&config.observability) {
        eprintln!("failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    match run(cli, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Fatal error");
            ExitCode::FAILURE
        }
    }
}

async fn run(
    cli: Cli,
    config: allowlist_proxy::ProxyConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!("allowlist-proxy v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        upstream = %config.upstream.address,
        allow_lists = config.allow_lists.len(),
        tcp_allow_list = config.listener.ip_allow_list.is_some(),
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        metrics::init_metrics(config.observability.metrics_address.parse()?)?;
    }

    let tcp_allow_list = TcpAllowListHandle::from_config(config.listener.ip_allow_list.as_ref())?;
    let listener = AllowListener::bind(&config.listener, tcp_allow_list).await?;

    // Keep the watcher alive for the lifetime of the server.
    let (watcher, config_updates) = ConfigWatcher::new(&cli.config);
    let _watcher = if cli.no_watch {
        None
    } else {
        Some(watcher.run()?)
    };

    let shutdown = Shutdown::new();
    signals::spawn_signal_listener(shutdown.clone());

    let server = HttpServer::new(config)?;
    server.run(listener, config_updates, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
