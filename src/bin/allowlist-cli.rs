use std::net::SocketAddr;
use std::path::PathBuf;

use axum::http::{HeaderMap, HeaderValue};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};

use allowlist_proxy::config::load_config;
use allowlist_proxy::http::IpAllowList;
use allowlist_proxy::ip::X_FORWARDED_FOR;

#[derive(Parser)]
#[command(name = "allowlist-cli")]
#[command(about = "Offline checks for allowlist-proxy configurations", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a configuration file
    Validate { config: PathBuf },
    /// Evaluate the configured allow lists for a simulated request
    Check {
        config: PathBuf,
        /// Socket peer address of the simulated connection
        #[arg(long)]
        peer: String,
        /// X-Forwarded-For chain sent by the simulated client
        #[arg(long)]
        forwarded_for: Option<String>,
        /// Only evaluate the allow list with this name
        #[arg(long)]
        middleware: Option<String>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { config } => {
            load_config(&config)?;
            println!("{}: configuration OK", config.display());
        }
        Commands::Check {
            config,
            peer,
            forwarded_for,
            middleware,
        } => {
            let config = load_config(&config)?;
            let peer = parse_peer(&peer)?;

            let mut headers = HeaderMap::new();
            if let Some(chain) = forwarded_for {
                headers.insert(X_FORWARDED_FOR, HeaderValue::from_str(&chain)?);
            }

            let mut verdicts = Vec::new();
            for declared in &config.allow_lists {
                if middleware.as_ref().is_some_and(|name| name != &declared.name) {
                    continue;
                }
                let list = IpAllowList::new(&declared.name, &declared.config)?;
                verdicts.push(verdict(&list, peer, &headers));
            }

            let allowed = verdicts.iter().all(|v| v["allowed"] == Value::Bool(true));
            let report = json!({ "allowed": allowed, "allow_lists": verdicts });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

/// Accepts `ip` or `ip:port`.
fn parse_peer(peer: &str) -> Result<SocketAddr, std::net::AddrParseError> {
    peer.parse::<SocketAddr>()
        .or_else(|_| peer.parse().map(|ip| SocketAddr::new(ip, 0)))
}

fn verdict(list: &IpAllowList, peer: SocketAddr, headers: &HeaderMap) -> Value {
    let client_ip = list.strategy().client_ip(Some(peer), headers);
    match list.authorize(Some(peer), headers) {
        Ok(_) => json!({ "name": list.name(), "client_ip": client_ip, "allowed": true }),
        Err(reason) => json!({
            "name": list.name(),
            "client_ip": client_ip,
            "allowed": false,
            "reason": reason.to_string(),
        }),
    }
}
