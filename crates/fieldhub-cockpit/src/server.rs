//! [`CockpitServer`] – binds the HTTP and WebSocket listeners.
//!
//! With default settings everything is served from one listener
//! (`0.0.0.0:8080`): the device routes under `/devices` and the realtime
//! channel at `/`.  When `ws.port` names a different port the realtime
//! channel gets a listener of its own.

use std::net::SocketAddr;

use axum::Router;
use axum::middleware::map_response;
use axum::routing::get;
use fieldhub_kernel::GatewayHandle;
use fieldhub_middleware::Broadcaster;
use fieldhub_types::{HttpSettings, WsSettings};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::{routes, socket};

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("server failed: {0}")]
    Serve(#[from] std::io::Error),
}

/// Shared by every handler.
#[derive(Clone)]
pub(crate) struct AppState {
    pub gateway: GatewayHandle,
    pub broadcaster: Broadcaster,
}

/// HTTP + WebSocket front end of the gateway.
///
/// # Example
///
/// ```rust,no_run
/// # use fieldhub_cockpit::CockpitServer;
/// # async fn run(gateway: fieldhub_kernel::GatewayHandle, broadcaster: fieldhub_middleware::Broadcaster) {
/// let (_stop, shutdown) = tokio::sync::watch::channel(false);
/// let server = CockpitServer::new(gateway, broadcaster).bind().await.unwrap();
/// server.serve(shutdown).await.unwrap();
/// # }
/// ```
pub struct CockpitServer {
    state: AppState,
    http: HttpSettings,
    ws: WsSettings,
}

impl CockpitServer {
    pub fn new(gateway: GatewayHandle, broadcaster: Broadcaster) -> Self {
        Self {
            state: AppState {
                gateway,
                broadcaster,
            },
            http: HttpSettings::default(),
            ws: WsSettings::default(),
        }
    }

    /// Override the HTTP listener settings (builder-style).
    pub fn with_http(mut self, http: HttpSettings) -> Self {
        self.http = http;
        self
    }

    /// Override the realtime channel settings (builder-style).
    pub fn with_ws(mut self, ws: WsSettings) -> Self {
        self.ws = ws;
        self
    }

    /// Bind every enabled listener.
    ///
    /// # Errors
    ///
    /// [`ServerError::Bind`] when an address is invalid or already in use.
    pub async fn bind(self) -> Result<BoundServer, ServerError> {
        let mut listeners = Vec::new();
        let shared = shares_http_listener(&self.http, &self.ws);

        if self.http.enabled {
            let mut router = routes::device_routes();
            if shared {
                router = router.route("/", get(socket::upgrade));
            }
            let addr = format!("{}:{}", self.http.host, self.http.port);
            listeners.push(Listener::bind("http", &addr, self.finish(router)).await?);
        } else {
            warn!("http not enabled");
        }

        if self.ws.enabled && !shared {
            let host = self.ws.host.as_deref().unwrap_or(&self.http.host);
            let port = self.ws.port.unwrap_or(self.http.port);
            let router = Router::new().route("/", get(socket::upgrade));
            let addr = format!("{host}:{port}");
            listeners.push(Listener::bind("ws", &addr, self.finish(router)).await?);
        } else if !self.ws.enabled {
            warn!("ws not enabled");
        }

        Ok(BoundServer { listeners })
    }

    fn finish(&self, router: Router<AppState>) -> Router {
        router
            .fallback(routes::not_found)
            .layer(map_response(routes::cors))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }
}

/// Whether the realtime channel rides on the HTTP listener.
pub fn shares_http_listener(http: &HttpSettings, ws: &WsSettings) -> bool {
    if !http.enabled || !ws.enabled {
        return false;
    }
    match ws.port {
        None => true,
        Some(port) => {
            port == http.port && ws.host.as_deref().is_none_or(|host| host == http.host)
        }
    }
}

struct Listener {
    name: &'static str,
    listener: TcpListener,
    router: Router,
}

impl Listener {
    async fn bind(name: &'static str, addr: &str, router: Router) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        Ok(Self {
            name,
            listener,
            router,
        })
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr().ok()
    }
}

/// Listeners that are bound but not yet accepting.
pub struct BoundServer {
    listeners: Vec<Listener>,
}

impl BoundServer {
    /// Address of the HTTP listener, if enabled.
    pub fn http_addr(&self) -> Option<SocketAddr> {
        self.addr_of("http")
    }

    /// Address serving the realtime channel, shared or dedicated.
    pub fn ws_addr(&self) -> Option<SocketAddr> {
        self.addr_of("ws").or_else(|| self.http_addr())
    }

    fn addr_of(&self, name: &str) -> Option<SocketAddr> {
        self.listeners
            .iter()
            .find(|l| l.name == name)
            .and_then(Listener::local_addr)
    }

    /// Accept connections until `shutdown` changes or its sender is dropped.
    pub async fn serve(self, shutdown: watch::Receiver<bool>) -> Result<(), ServerError> {
        let mut tasks = Vec::with_capacity(self.listeners.len());
        for Listener {
            name,
            listener,
            router,
        } in self.listeners
        {
            if let Ok(addr) = listener.local_addr() {
                info!(listener = name, %addr, "listening");
            }
            let mut shutdown = shutdown.clone();
            tasks.push(tokio::spawn(async move {
                axum::serve(listener, router)
                    .with_graceful_shutdown(async move {
                        let _ = shutdown.changed().await;
                    })
                    .await
            }));
        }

        for task in tasks {
            match task.await {
                Ok(result) => result?,
                Err(e) => warn!(error = %e, "listener task failed"),
            }
        }
        info!("cockpit stopped");
        Ok(())
    }
}
