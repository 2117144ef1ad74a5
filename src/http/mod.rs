//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! Accepted connection (peer as connect info)
//!     → server.rs (Axum setup, layers)
//!     → request.rs (request ID)
//!     → middleware/ip_allowlist.rs (derive client IP, check, forward or 403)
//!     → server.rs proxy handler (forward to upstream)
//!     → Send to client
//! ```

pub mod middleware;
pub mod request;
pub mod server;

pub use middleware::{AllowListHandle, IpAllowList, IpAllowListLayer};
pub use request::X_REQUEST_ID;
pub use server::{HttpServer, ServerError};
