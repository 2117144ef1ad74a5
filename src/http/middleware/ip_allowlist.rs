//! IP allow-list middleware.
//!
//! Derives the client IP with the configured [`Strategy`], checks it against
//! the configured ranges, and either forwards the request untouched or answers
//! `403 Forbidden` without calling the inner service.
//!
//! The active [`IpAllowList`] sits behind an [`AllowListHandle`]. Each request
//! takes one snapshot, so a reload never produces a half-updated decision.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use arc_swap::ArcSwap;
use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, Request, Response, StatusCode};
use tower::{Layer, Service};
use tracing::Instrument;

use crate::config::schema::IpAllowListConfig;
use crate::http::request::{peer_addr, request_id};
use crate::ip::{Checker, RangeError, Strategy, StrategyError, Unauthorized};
use crate::observability::metrics;

/// Error building an [`IpAllowList`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    #[error("sourceRange is empty, IP allow list {name:?} not created")]
    EmptySourceRange { name: String },
    #[error("cannot parse CIDR allow list {name:?}: {source}")]
    InvalidRange {
        name: String,
        #[source]
        source: RangeError,
    },
    #[error("invalid IP strategy for {name:?}: {source}")]
    Strategy {
        name: String,
        #[source]
        source: StrategyError,
    },
}

/// One configured allow-list instance: name, ranges and strategy.
#[derive(Debug)]
pub struct IpAllowList {
    name: String,
    checker: Checker,
    strategy: Strategy,
}

impl IpAllowList {
    pub fn new(name: &str, config: &IpAllowListConfig) -> Result<Self, BuildError> {
        tracing::debug!(middleware = name, "Creating IP allow list");

        if config.source_range.is_empty() {
            return Err(BuildError::EmptySourceRange {
                name: name.to_string(),
            });
        }

        let checker =
            Checker::new(&config.source_range).map_err(|source| BuildError::InvalidRange {
                name: name.to_string(),
                source,
            })?;

        let strategy = Strategy::from_config(config.ip_strategy.as_ref()).map_err(|source| {
            BuildError::Strategy {
                name: name.to_string(),
                source,
            }
        })?;

        tracing::debug!(
            middleware = name,
            source_range = ?config.source_range,
            strategy = ?strategy,
            "IP allow list ready"
        );

        Ok(Self {
            name: name.to_string(),
            checker,
            strategy,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn checker(&self) -> &Checker {
        &self.checker
    }

    pub fn strategy(&self) -> &Strategy {
        &self.strategy
    }

    /// Derive and check the client IP. Returns the authorized IP.
    ///
    /// A strategy that yields nothing is checked as an empty candidate and
    /// therefore rejected as an invalid IP.
    pub fn authorize(
        &self,
        peer: Option<SocketAddr>,
        headers: &HeaderMap,
    ) -> Result<String, Unauthorized> {
        let candidate = self.strategy.client_ip(peer, headers).unwrap_or_default();
        self.checker.is_authorized(&candidate)?;
        Ok(candidate)
    }
}

/// Shared, atomically replaceable reference to the active [`IpAllowList`].
#[derive(Debug, Clone)]
pub struct AllowListHandle(Arc<ArcSwap<IpAllowList>>);

impl AllowListHandle {
    pub fn new(list: IpAllowList) -> Self {
        Self(Arc::new(ArcSwap::from_pointee(list)))
    }

    /// Snapshot of the active instance.
    pub fn current(&self) -> Arc<IpAllowList> {
        self.0.load_full()
    }

    /// Install a new instance and return the previous one.
    ///
    /// Requests that already took a snapshot finish against the old one.
    pub fn replace(&self, list: IpAllowList) -> Arc<IpAllowList> {
        self.0.swap(Arc::new(list))
    }
}

/// Tower layer installing an [`IpAllowListService`].
#[derive(Debug, Clone)]
pub struct IpAllowListLayer {
    handle: AllowListHandle,
}

impl IpAllowListLayer {
    pub fn new(list: IpAllowList) -> Self {
        Self::with_handle(AllowListHandle::new(list))
    }

    pub fn from_config(name: &str, config: &IpAllowListConfig) -> Result<Self, BuildError> {
        IpAllowList::new(name, config).map(Self::new)
    }

    pub fn with_handle(handle: AllowListHandle) -> Self {
        Self { handle }
    }

    /// Handle used to swap the instance on reload.
    pub fn handle(&self) -> AllowListHandle {
        self.handle.clone()
    }
}

impl<S> Layer<S> for IpAllowListLayer {
    type Service = IpAllowListService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        IpAllowListService {
            inner,
            handle: self.handle.clone(),
        }
    }
}

/// Allow-list service wrapper.
#[derive(Debug, Clone)]
pub struct IpAllowListService<S> {
    inner: S,
    handle: AllowListHandle,
}

impl<S, B> Service<Request<B>> for IpAllowListService<S>
where
    S: Service<Request<B>, Response = Response<Body>>,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let list = self.handle.current();
        let span = tracing::debug_span!("ip_allow_list", middleware = %list.name());

        let authorized = span.in_scope(|| match list.authorize(peer_addr(&req), req.headers()) {
            Ok(client_ip) => {
                tracing::debug!(
                    request_id = %request_id(req.headers()),
                    client_ip = %client_ip,
                    method = %req.method(),
                    uri = %req.uri(),
                    "Accept"
                );
                metrics::record_allow_list_decision(list.name(), true);
                true
            }
            Err(reason) => {
                tracing::debug!(
                    request_id = %request_id(req.headers()),
                    method = %req.method(),
                    uri = %req.uri(),
                    reason = %reason,
                    "Rejecting request"
                );
                metrics::record_allow_list_decision(list.name(), false);
                false
            }
        });

        if authorized {
            Box::pin(self.inner.call(req).instrument(span))
        } else {
            Box::pin(std::future::ready(Ok(forbidden())))
        }
    }
}

/// Uniform rejection: `403` with the status reason phrase as body.
pub fn forbidden() -> Response<Body> {
    let status = StatusCode::FORBIDDEN;
    let mut response = Response::new(Body::from(status.canonical_reason().unwrap_or_default()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}
