//! Client IP derivation strategies.
//!
//! # Responsibilities
//! - Select the strategy once from static configuration
//! - Derive the candidate client IP from the peer address and headers
//!
//! # Design Decisions
//! - `RemotePeer` is the default; header values are attacker-controlled unless
//!   the adjacent hop is trusted, so header strategies need an explicit depth
//!   or an exclusion list
//! - The forwarded chain is read right to left (most recent hop first)
//! - A depth beyond the chain length yields no IP, which is rejected upstream

use std::net::SocketAddr;
use std::num::NonZeroUsize;

use axum::http::{HeaderMap, HeaderName};

use crate::config::schema::IpStrategyConfig;
use crate::ip::checker::{Checker, RangeError};

/// Default forwarded-address header.
pub const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Error selecting a [`Strategy`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StrategyError {
    #[error("depth and excludedIPs are mutually exclusive")]
    Conflicting,
    #[error("invalid excludedIPs: {0}")]
    ExcludedIps(#[source] RangeError),
    #[error("invalid header name {0:?}")]
    InvalidHeader(String),
}

/// How the client IP is derived for a request.
#[derive(Debug, Clone, Default)]
pub enum Strategy {
    /// Transport peer address; forwarded headers are ignored.
    #[default]
    RemotePeer,
    /// Entry `depth` from the right of the forwarded chain (1 = rightmost).
    Depth { header: HeaderName, depth: NonZeroUsize },
    /// First entry from the right that is not a trusted proxy.
    ExcludedIps { header: HeaderName, excluded: Checker },
}

impl Strategy {
    /// Select a strategy. `None` means the safe default.
    pub fn from_config(config: Option<&IpStrategyConfig>) -> Result<Self, StrategyError> {
        let Some(config) = config else {
            return Ok(Strategy::RemotePeer);
        };

        let depth = NonZeroUsize::new(config.depth as usize);
        if depth.is_some() && !config.excluded_ips.is_empty() {
            return Err(StrategyError::Conflicting);
        }
        if depth.is_none() && config.excluded_ips.is_empty() {
            return Ok(Strategy::RemotePeer);
        }

        let header_name = config.header.as_deref().unwrap_or(X_FORWARDED_FOR);
        let header = HeaderName::try_from(header_name)
            .map_err(|_| StrategyError::InvalidHeader(header_name.to_string()))?;

        match depth {
            Some(depth) => Ok(Strategy::Depth { header, depth }),
            None => {
                let excluded =
                    Checker::new(&config.excluded_ips).map_err(StrategyError::ExcludedIps)?;
                Ok(Strategy::ExcludedIps { header, excluded })
            }
        }
    }

    /// Derive the candidate client IP.
    ///
    /// Returns `None` when no definite address can be produced.
    pub fn client_ip(&self, peer: Option<SocketAddr>, headers: &HeaderMap) -> Option<String> {
        let peer_ip = || peer.map(|addr| addr.ip().to_string());

        match self {
            Strategy::RemotePeer => peer_ip(),
            Strategy::Depth { header, depth } => {
                let chain = forwarded_chain(headers, header)?;
                let index = chain.len().checked_sub(depth.get())?;
                Some(chain[index].to_string())
            }
            Strategy::ExcludedIps { header, excluded } => {
                let chain = forwarded_chain(headers, header)?;
                chain
                    .iter()
                    .rev()
                    .filter(|entry| !entry.is_empty())
                    .find(|entry| excluded.is_authorized(entry).is_err())
                    .map(|entry| entry.to_string())
                    .or_else(peer_ip)
            }
        }
    }
}

/// All values of `header` joined into one left-to-right chain.
///
/// `None` if any value is not visible ASCII.
fn forwarded_chain<'a>(headers: &'a HeaderMap, header: &HeaderName) -> Option<Vec<&'a str>> {
    let mut chain = Vec::new();
    for value in headers.get_all(header) {
        let value = value.to_str().ok()?;
        if value.trim().is_empty() {
            continue;
        }
        chain.extend(value.split(',').map(str::trim));
    }
    Some(chain)
}
