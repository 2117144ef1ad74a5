//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate addresses and value ranges (timeouts > 0)
//! - Build every allow list once so bad ranges or strategies surface here
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use crate::config::schema::ProxyConfig;
use crate::http::middleware::ip_allowlist::{BuildError, IpAllowList};
use crate::ip::{Checker, RangeError};

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{field}: {value:?} is not a socket address")]
    InvalidAddress { field: &'static str, value: String },
    #[error("timeouts.{0} must be greater than zero")]
    ZeroTimeout(&'static str),
    #[error("allow_lists[{0}] has an empty name")]
    EmptyName(usize),
    #[error("allow list name {0:?} is declared more than once")]
    DuplicateName(String),
    #[error(transparent)]
    AllowList(#[from] BuildError),
    #[error("listener.ip_allow_list: {0}")]
    TcpAllowList(#[source] RangeError),
}

/// Check everything serde cannot.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_address(&mut errors, "listener.bind_address", &config.listener.bind_address);
    check_address(&mut errors, "upstream.address", &config.upstream.address);

    if config.timeouts.connect_secs == 0 {
        errors.push(ValidationError::ZeroTimeout("connect_secs"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::ZeroTimeout("request_secs"));
    }

    let mut seen = HashSet::new();
    for (index, list) in config.allow_lists.iter().enumerate() {
        if list.name.trim().is_empty() {
            errors.push(ValidationError::EmptyName(index));
        } else if !seen.insert(list.name.as_str()) {
            errors.push(ValidationError::DuplicateName(list.name.clone()));
        }
        if let Err(e) = IpAllowList::new(&list.name, &list.config) {
            errors.push(e.into());
        }
    }

    if let Some(tcp) = &config.listener.ip_allow_list {
        if let Err(e) = Checker::new(&tcp.source_range) {
            errors.push(ValidationError::TcpAllowList(e));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_address(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field,
            value: value.to_string(),
        });
    }
}
