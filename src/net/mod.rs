//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, TCP allow list)
//!     → Hand off to HTTP layer with the peer as connect info
//! ```
//!
//! # Design Decisions
//! - Rejected peers are dropped before any bytes are read
//! - Accept errors are logged and retried, never fatal

pub mod listener;

pub use listener::{AllowListener, ListenerError, PeerAddr, TcpAllowListHandle};
