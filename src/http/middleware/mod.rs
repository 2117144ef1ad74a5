//! HTTP middleware.

pub mod ip_allowlist;

pub use ip_allowlist::{
    forbidden, AllowListHandle, BuildError, IpAllowList, IpAllowListLayer, IpAllowListService,
};
