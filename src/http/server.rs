//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the forwarding handler
//! - Wire up middleware (tracing, request ID, timeout, allow lists)
//! - Serve on the allow-listing TCP listener
//! - Forward authorized requests to the upstream backend
//! - Apply configuration reloads to the allow lists

use std::str::FromStr;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{
        uri::{Authority, PathAndQuery, Scheme},
        Request, StatusCode, Uri, Version,
    },
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::sync::{broadcast, mpsc};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::ProxyConfig;
use crate::http::middleware::ip_allowlist::{AllowListHandle, BuildError, IpAllowList, IpAllowListLayer};
use crate::http::request::{
    append_forwarded_for, peer_addr, propagate_request_id_layer, request_id,
    set_request_id_layer,
};
use crate::ip::{Checker, RangeError};
use crate::net::listener::{AllowListener, PeerAddr, TcpAllowListHandle};
use crate::observability::metrics;

/// Error building the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    AllowList(#[from] BuildError),
    #[error("invalid upstream address {0:?}")]
    Upstream(String),
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub client: Client<HttpConnector, Body>,
    pub upstream: Authority,
}

/// HTTP server for the proxy.
pub struct HttpServer {
    router: Router,
    config: ProxyConfig,
    allow_lists: Vec<AllowListHandle>,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    ///
    /// Fails if any allow list cannot be built; the server never starts with
    /// a partial chain.
    pub fn new(config: ProxyConfig) -> Result<Self, ServerError> {
        let upstream = Authority::from_str(&config.upstream.address)
            .map_err(|_| ServerError::Upstream(config.upstream.address.clone()))?;

        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(Duration::from_secs(config.timeouts.connect_secs)));
        let client = Client::builder(TokioExecutor::new()).build(connector);

        let layers = config
            .allow_lists
            .iter()
            .map(|list| IpAllowListLayer::from_config(&list.name, &list.config))
            .collect::<Result<Vec<_>, _>>()?;
        let allow_lists = layers.iter().map(IpAllowListLayer::handle).collect();

        let router = Self::build_router(&config, AppState { client, upstream }, layers);
        Ok(Self {
            router,
            config,
            allow_lists,
        })
    }

    /// Build the Axum router with all middleware layers.
    ///
    /// Allow lists run in declaration order, inside the request-ID and
    /// timeout layers.
    #[allow(deprecated)]
    fn build_router(config: &ProxyConfig, state: AppState, layers: Vec<IpAllowListLayer>) -> Router {
        let mut router = Router::new()
            .route("/{*path}", any(proxy_handler))
            .route("/", any(proxy_handler))
            .with_state(state);

        for layer in layers.into_iter().rev() {
            router = router.layer(layer);
        }

        router
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(propagate_request_id_layer())
            .layer(set_request_id_layer())
            .layer(TraceLayer::new_for_http())
    }

    /// Handles for the allow lists, in declaration order.
    pub fn allow_lists(&self) -> &[AllowListHandle] {
        &self.allow_lists
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Serve until `shutdown` fires, applying config updates as they arrive.
    pub async fn run(
        self,
        listener: AllowListener,
        mut config_updates: mpsc::UnboundedReceiver<ProxyConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = axum::serve::Listener::local_addr(&listener)?;
        tracing::info!(
            address = %addr,
            allow_lists = self.allow_lists.len(),
            "HTTP server starting"
        );

        let mut reloader = Reloader {
            config: self.config,
            allow_lists: self.allow_lists,
            tcp_allow_list: listener.handle(),
        };
        let reload_task = tokio::spawn(async move {
            while let Some(config) = config_updates.recv().await {
                let applied = reloader.apply(config);
                metrics::record_reload(applied.is_ok());
                if let Err(e) = applied {
                    tracing::error!(error = %e, "Config reload rejected, keeping current allow lists");
                }
            }
        });

        let app = self.router.into_make_service_with_connect_info::<PeerAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received");
            })
            .await?;

        reload_task.abort();
        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Error applying a reloaded configuration.
#[derive(Debug, thiserror::Error)]
pub enum ReloadError {
    #[error("allow list chain changed from {current:?} to {next:?}; restart required")]
    ChainChanged {
        current: Vec<String>,
        next: Vec<String>,
    },
    #[error(transparent)]
    AllowList(#[from] BuildError),
    #[error("listener.ip_allow_list: {0}")]
    TcpAllowList(#[from] RangeError),
}

/// Swaps rebuilt allow lists into a running server.
struct Reloader {
    config: ProxyConfig,
    allow_lists: Vec<AllowListHandle>,
    tcp_allow_list: TcpAllowListHandle,
}

impl Reloader {
    /// Rebuild everything first, then swap. Nothing is swapped on error.
    fn apply(&mut self, next: ProxyConfig) -> Result<(), ReloadError> {
        let current_names: Vec<String> = self
            .allow_lists
            .iter()
            .map(|handle| handle.current().name().to_string())
            .collect();
        let next_names: Vec<String> = next.allow_lists.iter().map(|l| l.name.clone()).collect();
        if current_names != next_names {
            return Err(ReloadError::ChainChanged {
                current: current_names,
                next: next_names,
            });
        }

        let rebuilt = next
            .allow_lists
            .iter()
            .map(|list| IpAllowList::new(&list.name, &list.config))
            .collect::<Result<Vec<_>, _>>()?;
        let tcp = next
            .listener
            .ip_allow_list
            .as_ref()
            .map(|c| Checker::new(&c.source_range))
            .transpose()?;

        if next.upstream.address != self.config.upstream.address
            || next.listener.bind_address != self.config.listener.bind_address
        {
            tracing::warn!("Listener or upstream address changed; takes effect after restart");
        }

        for (handle, list) in self.allow_lists.iter().zip(rebuilt) {
            handle.replace(list);
        }
        self.tcp_allow_list.replace(tcp);

        tracing::info!(allow_lists = self.allow_lists.len(), "Allow lists reloaded");
        self.config = next;
        Ok(())
    }
}

/// Forward the request to the upstream backend.
async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let request_id = request_id(request.headers()).to_string();
    let peer = peer_addr(&request);
    let (mut parts, body) = request.into_parts();

    tracing::debug!(
        request_id = %request_id,
        method = %parts.method,
        path = %parts.uri.path(),
        "Proxying request"
    );

    let mut uri_parts = parts.uri.clone().into_parts();
    uri_parts.scheme = Some(Scheme::HTTP);
    uri_parts.authority = Some(state.upstream.clone());
    if uri_parts.path_and_query.is_none() {
        uri_parts.path_and_query = Some(PathAndQuery::from_static("/"));
    }
    parts.uri = match Uri::from_parts(uri_parts) {
        Ok(uri) => uri,
        Err(e) => {
            tracing::warn!(request_id = %request_id, error = %e, "Cannot rewrite request URI");
            return (StatusCode::BAD_REQUEST, "Invalid request URI").into_response();
        }
    };
    parts.version = Version::HTTP_11;
    if let Some(peer) = peer {
        append_forwarded_for(&mut parts.headers, peer.ip());
    }

    match state.client.request(Request::from_parts(parts, body)).await {
        Ok(response) => relay_response(response),
        Err(e) => {
            tracing::error!(request_id = %request_id, error = %e, "Upstream error");
            metrics::record_upstream_error();
            (StatusCode::BAD_GATEWAY, "Upstream request failed").into_response()
        }
    }
}

/// Hand the upstream response back to the client with its body streamed.
fn relay_response(response: hyper::Response<hyper::body::Incoming>) -> Response {
    let (parts, body) = response.into_parts();
    Response::from_parts(parts, Body::new(body))
}
