//! IP allow-listing reverse proxy library.
//!
//! Requests pass through named allow lists that derive the client IP (socket
//! peer or a trusted forwarded chain) and check it against CIDR ranges before
//! being forwarded to a single upstream.

pub mod config;
pub mod http;
pub mod ip;
pub mod lifecycle;
pub mod net;
pub mod observability;

pub use config::schema::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
