//! Client IP subsystem.
//!
//! # Data Flow
//! ```text
//! Request (peer address, headers)
//!     → strategy.rs (derive the candidate client IP)
//!     → checker.rs (match candidate against CIDR ranges)
//!     → Authorized | Unauthorized(reason)
//! ```
//!
//! # Design Decisions
//! - Both halves are built once from static config and immutable afterwards
//! - Fail closed: anything that cannot produce a definite IP is rejected
//! - Header-based strategies are opt-in; the default trusts only the socket peer

pub mod checker;
pub mod strategy;

pub use checker::{Checker, RangeError, Unauthorized};
pub use strategy::{Strategy, StrategyError, X_FORWARDED_FOR};
