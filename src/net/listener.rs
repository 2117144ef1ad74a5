//! TCP listener with connection-level allow list.
//!
//! # Responsibilities
//! - Bind to the configured address
//! - Accept incoming TCP connections
//! - Drop connections whose peer is outside the TCP allow list
//! - Survive transient accept errors
//!
//! # Design Decisions
//! - Filtering happens before any HTTP is read; only the socket peer is known
//! - No TCP allow list configured means every connection is accepted
//! - The allow list is swappable at runtime like the HTTP ones

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use axum::extract::connect_info::Connected;
use axum::serve::{IncomingStream, Listener};
use tokio::net::{TcpListener, TcpStream};

use crate::config::schema::{ListenerConfig, TcpIpAllowListConfig};
use crate::ip::{Checker, RangeError};
use crate::observability::metrics;

/// Error type for listener operations.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    #[error("Invalid bind address {address:?}: {source}")]
    Address {
        address: String,
        #[source]
        source: std::net::AddrParseError,
    },
    #[error("Failed to bind: {0}")]
    Bind(#[from] io::Error),
}

/// Socket peer of an accepted connection, exposed to handlers as connect info.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerAddr(pub SocketAddr);

impl Connected<IncomingStream<'_, AllowListener>> for PeerAddr {
    fn connect_info(stream: IncomingStream<'_, AllowListener>) -> Self {
        PeerAddr(*stream.remote_addr())
    }
}

impl Connected<IncomingStream<'_, TcpListener>> for PeerAddr {
    fn connect_info(stream: IncomingStream<'_, TcpListener>) -> Self {
        PeerAddr(*stream.remote_addr())
    }
}

/// Replaceable TCP allow list. `None` admits every peer.
#[derive(Debug, Clone)]
pub struct TcpAllowListHandle(Arc<ArcSwapOption<Checker>>);

impl TcpAllowListHandle {
    pub fn new(checker: Option<Checker>) -> Self {
        Self(Arc::new(ArcSwapOption::new(checker.map(Arc::new))))
    }

    pub fn from_config(config: Option<&TcpIpAllowListConfig>) -> Result<Self, RangeError> {
        let checker = config
            .map(|c| Checker::new(&c.source_range))
            .transpose()?;
        Ok(Self::new(checker))
    }

    pub fn replace(&self, checker: Option<Checker>) {
        self.0.store(checker.map(Arc::new));
    }

    /// Returns true if a connection from `ip` may proceed.
    pub fn permits(&self, ip: IpAddr) -> bool {
        self.0.load().as_deref().map_or(true, |checker| checker.contains(ip))
    }
}

impl Default for TcpAllowListHandle {
    fn default() -> Self {
        Self::new(None)
    }
}

/// A TCP listener that filters peers before handing connections to axum.
pub struct AllowListener {
    inner: TcpListener,
    allow: TcpAllowListHandle,
}

impl AllowListener {
    /// Bind to the configured address.
    pub async fn bind(
        config: &ListenerConfig,
        allow: TcpAllowListHandle,
    ) -> Result<Self, ListenerError> {
        let addr: SocketAddr =
            config
                .bind_address
                .parse()
                .map_err(|source| ListenerError::Address {
                    address: config.bind_address.clone(),
                    source,
                })?;

        let listener = TcpListener::bind(addr).await?;

        tracing::info!(
            address = %listener.local_addr()?,
            tcp_allow_list = config.ip_allow_list.is_some(),
            "Listener bound"
        );

        Ok(Self::new(listener, allow))
    }

    /// Wrap an already bound listener.
    pub fn new(inner: TcpListener, allow: TcpAllowListHandle) -> Self {
        Self { inner, allow }
    }

    /// Handle used to swap the TCP allow list on reload.
    pub fn handle(&self) -> TcpAllowListHandle {
        self.allow.clone()
    }
}

impl Listener for AllowListener {
    type Io = TcpStream;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        loop {
            match self.inner.accept().await {
                Ok((stream, addr)) => {
                    if self.allow.permits(addr.ip()) {
                        tracing::trace!(peer_addr = %addr, "Connection accepted");
                        return (stream, addr);
                    }
                    tracing::debug!(peer_addr = %addr, "Rejecting connection outside TCP allow list");
                    metrics::record_tcp_rejected();
                }
                Err(e) if is_connection_error(&e) => {}
                Err(e) => {
                    tracing::error!(error = %e, "Accept error");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        self.inner.local_addr()
    }
}

fn is_connection_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[test]
    fn test_handle_without_checker_permits_all() {
        let handle = TcpAllowListHandle::default();
        assert!(handle.permits("8.8.8.8".parse().unwrap()));
        assert!(handle.permits("::1".parse().unwrap()));
    }

    #[test]
    fn test_handle_replace() {
        let config = TcpIpAllowListConfig {
            source_range: vec!["10.0.0.0/8".into()],
        };
        let handle = TcpAllowListHandle::from_config(Some(&config)).unwrap();
        assert!(handle.permits("10.1.1.1".parse().unwrap()));
        assert!(!handle.permits("11.1.1.1".parse().unwrap()));

        handle.replace(None);
        assert!(handle.permits("11.1.1.1".parse().unwrap()));
    }

    #[test]
    fn test_handle_rejects_empty_source_range() {
        let config = TcpIpAllowListConfig::default();
        assert_eq!(
            TcpAllowListHandle::from_config(Some(&config)).unwrap_err(),
            RangeError::Empty
        );
    }

    #[tokio::test]
    async fn test_rejected_connection_is_closed() {
        let tcp = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = tcp.local_addr().unwrap();
        let deny_loopback = TcpAllowListHandle::new(Some(Checker::new(["10.0.0.0/8"]).unwrap()));
        let mut listener = AllowListener::new(tcp, deny_loopback.clone());

        let accept = tokio::spawn(async move {
            let accepted = listener.accept().await;
            accepted.1
        });

        // First connection is dropped by the listener.
        let mut rejected = TcpStream::connect(addr).await.unwrap();
        let mut buf = [0u8; 1];
        let read = rejected.read(&mut buf).await;
        assert!(matches!(read, Ok(0) | Err(_)));

        // Open the list and connect again; this one is handed over.
        deny_loopback.replace(None);
        let _admitted = TcpStream::connect(addr).await.unwrap();
        let peer = accept.await.unwrap();
        assert!(peer.ip().is_loopback());
    }

    #[tokio::test]
    async fn test_bind_rejects_bad_address() {
        let config = ListenerConfig {
            bind_address: "nope".into(),
            ip_allow_list: None,
        };
        let err = AllowListener::bind(&config, TcpAllowListHandle::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ListenerError::Address { .. }));
    }
}
