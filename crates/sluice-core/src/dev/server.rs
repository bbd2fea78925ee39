//! Dev server: routes each request to the backend proxy or to the live
//! source tree.

use crate::config::{ProxyRule, ResolvedConfig};
use crate::dev::proxy::ProxyClient;
use crate::dev::transform::{ModuleTransformer, TransformErrorKind};
use axum::extract::{Request, State};
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower::ServiceExt;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

/// Ports tried when `strict_port` is off, starting at the configured one.
pub const MAX_PORT_ATTEMPTS: u16 = 100;

/// Dev server error.
#[derive(Debug, Error)]
pub enum DevError {
    #[error("port {port} is already in use")]
    PortUnavailable { port: u16 },

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("no free port between {first} and {last}")]
    NoFreePort { first: u16, last: u16 },

    #[error("source root {} is not readable: {source}", root.display())]
    Root {
        root: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to create the proxy client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("server error: {0}")]
    Serve(#[source] io::Error),
}

impl DevError {
    /// Stable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::PortUnavailable { .. } => "DEV_PORT_UNAVAILABLE",
            Self::Bind { .. } => "DEV_BIND_ERROR",
            Self::NoFreePort { .. } => "DEV_NO_FREE_PORT",
            Self::Root { .. } => "DEV_ROOT_ERROR",
            Self::Client(_) => "DEV_CLIENT_ERROR",
            Self::Serve(_) => "DEV_SERVE_ERROR",
        }
    }
}

/// Where a request goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Forward to the proxy rule at this index.
    Proxy(usize),
    /// Serve from the source tree.
    Local,
}

/// Route a request path: the first rule whose prefix matches wins.
#[must_use]
pub fn route(rules: &[ProxyRule], path: &str) -> Route {
    rules
        .iter()
        .position(|rule| rule.matches(path))
        .map_or(Route::Local, Route::Proxy)
}

struct DevState {
    rules: Vec<ProxyRule>,
    proxy: ProxyClient,
    transformer: Arc<ModuleTransformer>,
}

/// Proxied responses are relayed untouched, so CORS only wraps `local`.
#[derive(Clone)]
struct DevApp {
    state: Arc<DevState>,
    local: Router,
}

/// A bound, not yet running, dev server.
pub struct DevServer {
    listener: TcpListener,
    addr: SocketAddr,
    host: String,
    cors: bool,
    rules: Vec<ProxyRule>,
    proxy: ProxyClient,
    transformer: Arc<ModuleTransformer>,
}

impl DevServer {
    /// Bind the configured host and port.
    ///
    /// With `strict_port`, a taken port is [`DevError::PortUnavailable`];
    /// otherwise the next free port (up to [`MAX_PORT_ATTEMPTS`]) is used.
    pub async fn bind(config: &ResolvedConfig) -> Result<Self, DevError> {
        let transformer = ModuleTransformer::new(config).map_err(|source| DevError::Root {
            root: config.build.root.clone(),
            source,
        })?;
        let proxy = ProxyClient::new()?;

        let server = &config.server;
        let listener = bind_listener(&server.host, server.port, server.strict_port).await?;
        let addr = listener.local_addr().map_err(|source| DevError::Bind {
            addr: format!("{}:{}", server.host, server.port),
            source,
        })?;

        if server.port != 0 && addr.port() != server.port {
            info!(requested = server.port, port = addr.port(), "port in use, using next free port");
        }

        Ok(Self {
            listener,
            addr,
            host: server.host.clone(),
            cors: server.cors,
            rules: server.proxy.clone(),
            proxy,
            transformer: Arc::new(transformer),
        })
    }

    /// Replace the proxy client (e.g. to change timeouts).
    #[must_use]
    pub fn with_proxy_client(mut self, proxy: ProxyClient) -> Self {
        self.proxy = proxy;
        self
    }

    /// The bound address.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Base URL for browsers.
    #[must_use]
    pub fn url(&self) -> String {
        server_url(&self.host, self.addr)
    }

    /// The request router.
    pub fn router(&self) -> Router {
        let state = Arc::new(DevState {
            rules: self.rules.clone(),
            proxy: self.proxy.clone(),
            transformer: Arc::clone(&self.transformer),
        });

        let local = Router::new()
            .fallback(handle_local)
            .with_state(Arc::clone(&state));
        let local = if self.cors {
            local.layer(CorsLayer::permissive())
        } else {
            local
        };

        Router::new()
            .fallback(handle)
            .with_state(DevApp { state, local })
    }

    /// Serve until `shutdown` resolves, then drain in-flight requests.
    pub async fn run<F>(self, shutdown: F) -> Result<(), DevError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let router = self.router();
        info!(
            url = %self.url(),
            root = %self.transformer.root().display(),
            proxy_rules = self.rules.len(),
            "dev server listening"
        );

        axum::serve(self.listener, router)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(DevError::Serve)?;

        info!("dev server stopped");
        Ok(())
    }

    /// Run on a background task.
    #[must_use]
    pub fn spawn(self) -> DevServerHandle {
        let (tx, rx) = oneshot::channel::<()>();
        let addr = self.addr;
        let url = self.url();
        let task = tokio::spawn(self.run(async move {
            let _ = rx.await;
        }));

        DevServerHandle {
            addr,
            url,
            shutdown: Some(tx),
            task,
        }
    }
}

/// A dev server running on a background task.
pub struct DevServerHandle {
    addr: SocketAddr,
    url: String,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<(), DevError>>,
}

impl DevServerHandle {
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Stop accepting connections and wait for the server to drain.
    pub async fn shutdown(mut self) -> Result<(), DevError> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(DevError::Serve(io::Error::other(e))),
        }
    }
}

async fn bind_listener(host: &str, port: u16, strict: bool) -> Result<TcpListener, DevError> {
    let bind_host = if host == "localhost" { "127.0.0.1" } else { host };
    let attempts = if strict || port == 0 { 1 } else { MAX_PORT_ATTEMPTS };

    for offset in 0..attempts {
        let Some(candidate) = port.checked_add(offset) else {
            break;
        };
        match TcpListener::bind((bind_host, candidate)).await {
            Ok(listener) => return Ok(listener),
            Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
                if strict {
                    return Err(DevError::PortUnavailable { port });
                }
                debug!(port = candidate, "port in use");
            }
            Err(source) => {
                return Err(DevError::Bind {
                    addr: format!("{bind_host}:{candidate}"),
                    source,
                })
            }
        }
    }

    Err(DevError::NoFreePort {
        first: port,
        last: port.saturating_add(attempts - 1),
    })
}

fn server_url(host: &str, addr: SocketAddr) -> String {
    let host = match host {
        "0.0.0.0" | "::" | "" => "localhost",
        other => other,
    };
    if host.contains(':') {
        format!("http://[{host}]:{}", addr.port())
    } else {
        format!("http://{host}:{}", addr.port())
    }
}

async fn handle(State(app): State<DevApp>, request: Request) -> Response {
    let path = request.uri().path().to_string();
    let state = &app.state;

    match route(&state.rules, &path) {
        Route::Proxy(index) => {
            let rule = &state.rules[index];
            match state.proxy.forward(rule, request).await {
                Ok(response) => response,
                Err(e) => {
                    warn!(path = %path, target = %rule.target, code = e.code(), error = %e, "proxy request failed");
                    e.into_response()
                }
            }
        }
        Route::Local => match app.local.oneshot(request).await {
            Ok(response) => response,
            Err(never) => match never {},
        },
    }
}

async fn handle_local(State(state): State<Arc<DevState>>, request: Request) -> Response {
    serve_local(&state, request).await
}

async fn serve_local(state: &DevState, request: Request) -> Response {
    let method = request.method();
    if method != Method::GET && method != Method::HEAD {
        return (StatusCode::METHOD_NOT_ALLOWED, [(header::ALLOW, "GET, HEAD")]).into_response();
    }

    let path = request.uri().path().to_string();
    let query = request.uri().query().map(str::to_string);
    let transformer = Arc::clone(&state.transformer);
    let url = path.clone();
    let result =
        tokio::task::spawn_blocking(move || transformer.serve(&url, query.as_deref())).await;

    match result {
        Ok(Ok(served)) => {
            debug!(path = %path, bytes = served.body.len(), "served");
            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, served.content_type),
                    (header::CACHE_CONTROL, "no-cache"),
                ],
                served.body,
            )
                .into_response()
        }
        Ok(Err(e)) => {
            let status = match e.kind {
                TransformErrorKind::NotFound => StatusCode::NOT_FOUND,
                TransformErrorKind::Forbidden => StatusCode::FORBIDDEN,
                TransformErrorKind::Failed => StatusCode::INTERNAL_SERVER_ERROR,
            };
            if status == StatusCode::INTERNAL_SERVER_ERROR {
                warn!(path = %path, error = %e, "transform failed");
            } else {
                debug!(path = %path, status = status.as_u16(), error = %e, "not served");
            }
            (
                status,
                [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                e.to_string(),
            )
                .into_response()
        }
        Err(e) => {
            warn!(path = %path, error = %e, "transform task failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
