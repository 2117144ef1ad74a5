//! Shared utilities for integration tests.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use allowlist_proxy::config::{IpAllowListConfig, IpStrategyConfig, NamedIpAllowList, ProxyConfig};
use allowlist_proxy::http::HttpServer;
use allowlist_proxy::lifecycle::Shutdown;
use allowlist_proxy::net::{AllowListener, TcpAllowListHandle};
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// Upstream that counts hits and echoes the forwarded chain and path.
pub struct EchoBackend {
    pub addr: SocketAddr,
    pub hits: Arc<AtomicUsize>,
}

impl EchoBackend {
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

pub async fn start_echo_backend() -> EchoBackend {
    let hits = Arc::new(AtomicUsize::new(0));
    let app = Router::new()
        .fallback(echo)
        .with_state(hits.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    EchoBackend { addr, hits }
}

async fn echo(
    State(hits): State<Arc<AtomicUsize>>,
    uri: axum::http::Uri,
    headers: HeaderMap,
) -> String {
    hits.fetch_add(1, Ordering::SeqCst);
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    format!("{} xff={}", uri, forwarded)
}

/// A running proxy.
pub struct Proxy {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub updates: mpsc::UnboundedSender<ProxyConfig>,
}

impl Proxy {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for Proxy {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

pub async fn start_proxy(config: ProxyConfig) -> Proxy {
    let tcp = TcpAllowListHandle::from_config(config.listener.ip_allow_list.as_ref()).unwrap();
    let listener = AllowListener::new(TcpListener::bind("127.0.0.1:0").await.unwrap(), tcp);
    let addr = axum::serve::Listener::local_addr(&listener).unwrap();

    let shutdown = Shutdown::new();
    let (updates, config_updates) = mpsc::unbounded_channel();
    let server = HttpServer::new(config).unwrap();
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, config_updates, server_shutdown).await;
    });

    Proxy {
        addr,
        shutdown,
        updates,
    }
}

pub fn config_for(backend: &EchoBackend, lists: Vec<NamedIpAllowList>) -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.upstream.address = backend.addr.to_string();
    config.allow_lists = lists;
    config
}

pub fn allow_list(name: &str, ranges: &[&str], strategy: Option<IpStrategyConfig>) -> NamedIpAllowList {
    NamedIpAllowList {
        name: name.to_string(),
        config: IpAllowListConfig {
            source_range: ranges.iter().map(|s| s.to_string()).collect(),
            ip_strategy: strategy,
        },
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}
