//! Mock server accept loop and request dispatch

use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::LimitsConfig;
use crate::message::{MockRequest, MockResponse};
use crate::recording::{Journal, ServeEvent, ServeOutcome};
use crate::stub::{render_response, StubRegistry};
use crate::transform::{apply_all, ResponseTransformer};
use crate::Result;

use super::client::UpstreamClient;
use super::connection_pool::ConnectionPool;
use super::{HttpHandler, SHUTDOWN_TIMEOUT_MS};

/// Everything a connection needs to answer requests
pub struct ServerState {
    /// Stubs in evaluation order
    pub registry: Arc<StubRegistry>,
    /// Transformers run on every response
    pub transformers: Vec<Arc<dyn ResponseTransformer>>,
    /// Log of served requests
    pub journal: Arc<Journal>,
    /// Client for proxy stubs
    pub client: UpstreamClient,
    /// Root for `bodyFileName` lookups
    pub files_root: PathBuf,
    /// Request limits
    pub limits: LimitsConfig,
}

impl ServerState {
    /// Answer one request: match, render or forward, journal, transform
    pub async fn respond(&self, request: MockRequest) -> MockResponse {
        let Some(rule) = self.registry.find(&request) else {
            warn!("No stub matched {}", request.describe());
            let response = MockResponse::text(404, format!("No stub matched {}", request.describe()));
            return self.finish(request, response, ServeOutcome::Unmatched);
        };

        let definition = &rule.mapping().response;
        let (response, outcome) = if let Some(base_url) = &definition.proxy_base_url {
            let target = if base_url.ends_with('/') {
                base_url.clone()
            } else {
                format!("{base_url}/")
            };
            match self.client.forward(base_url, &request).await {
                Ok(response) => (response, ServeOutcome::Proxied { target }),
                Err(e) => {
                    warn!("Proxying {} to {} failed: {}", request.describe(), base_url, e);
                    (
                        HttpHandler::error_response(&e),
                        ServeOutcome::ProxyFailed { target },
                    )
                }
            }
        } else {
            let response = match render_response(definition, &self.files_root).await {
                Ok(response) => response,
                Err(e) => {
                    error!("Stub {} could not be rendered: {}", rule.label(), e);
                    HttpHandler::error_response(&e)
                }
            };
            let outcome = if rule.is_fallback() {
                warn!("Stubbed data not found for {}", request.describe());
                ServeOutcome::StubNotFound
            } else {
                ServeOutcome::Stubbed { stub: rule.label() }
            };
            (response, outcome)
        };

        self.finish(request, response, outcome)
    }

    fn finish(
        &self,
        request: MockRequest,
        response: MockResponse,
        outcome: ServeOutcome,
    ) -> MockResponse {
        debug!(
            "{} -> {} ({:?})",
            request.describe(),
            response.status,
            outcome
        );

        let transformed = apply_all(&self.transformers, &request, response.clone());
        self.journal.record(ServeEvent {
            request,
            response,
            outcome,
        });
        transformed
    }

    async fn handle(
        self: Arc<Self>,
        request: Request<Incoming>,
        local_port: u16,
    ) -> std::result::Result<Response<Full<Bytes>>, Infallible> {
        let response = match HttpHandler::read_request(request, local_port, &self.limits).await {
            Ok(request) => self.respond(request).await,
            Err(e) => {
                warn!("Rejected request: {}", e);
                HttpHandler::error_response(&e)
            }
        };
        Ok(HttpHandler::into_response(response))
    }
}

/// A bound, running mock server
pub struct MockServer {
    local_addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    accept_task: JoinHandle<()>,
    connection_pool: ConnectionPool,
}

impl MockServer {
    /// Bind `addr` and start accepting connections
    ///
    /// # Errors
    ///
    /// Returns error if the address cannot be bound
    pub async fn bind(addr: SocketAddr, state: Arc<ServerState>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (shutdown_tx, _) = broadcast::channel(1);
        let connection_pool = ConnectionPool::new(state.limits.max_connections);

        info!(
            "Listening on {} (max {} connections)",
            local_addr,
            connection_pool.max_connections()
        );

        let accept_task = tokio::spawn(accept_loop(
            listener,
            state,
            connection_pool.clone(),
            shutdown_tx.clone(),
        ));

        Ok(Self {
            local_addr,
            shutdown_tx,
            accept_task,
            connection_pool,
        })
    }

    /// Address the server is bound to
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Ask the accept loop and open connections to stop without waiting
    pub fn signal_shutdown(&self) {
        self.shutdown_tx.send(()).ok();
    }

    /// Stop accepting, let in-flight requests finish, then return
    pub async fn shutdown(self) {
        self.signal_shutdown();

        let shutdown_timeout = Duration::from_millis(SHUTDOWN_TIMEOUT_MS);
        if tokio::time::timeout(shutdown_timeout, self.accept_task)
            .await
            .is_err()
        {
            warn!("Accept loop did not stop within {:?}", shutdown_timeout);
        }

        let deadline = tokio::time::Instant::now() + shutdown_timeout;
        while self.connection_pool.active_connections() > 0
            && tokio::time::Instant::now() < deadline
        {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.connection_pool.close();

        info!("Server on {} stopped", self.local_addr);
    }
}

async fn accept_loop(
    listener: TcpListener,
    state: Arc<ServerState>,
    pool: ConnectionPool,
    shutdown_tx: broadcast::Sender<()>,
) {
    let mut shutdown_rx = shutdown_tx.subscribe();

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, peer_addr)) => {
                        let Some(guard) = pool.try_acquire() else {
                            warn!("Connection limit reached, rejecting {}", peer_addr);
                            drop(stream);
                            continue;
                        };

                        let state = Arc::clone(&state);
                        let shutdown_rx = shutdown_tx.subscribe();

                        tokio::spawn(async move {
                            serve_connection(stream, state, shutdown_rx).await;
                            drop(guard);
                        });
                    }
                    Err(e) => {
                        error!("Accept error: {}", e);
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                debug!("Accept loop shutting down");
                break;
            }
        }
    }
}

async fn serve_connection(
    stream: TcpStream,
    state: Arc<ServerState>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let local_port = match stream.local_addr() {
        Ok(addr) => addr.port(),
        Err(e) => {
            error!("Connection has no local address: {}", e);
            return;
        }
    };

    let service = service_fn(move |request| Arc::clone(&state).handle(request, local_port));
    let connection = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
    tokio::pin!(connection);

    tokio::select! {
        result = connection.as_mut() => {
            if let Err(e) = result {
                debug!("Connection error: {}", e);
            }
        }
        _ = shutdown_rx.recv() => {
            connection.as_mut().graceful_shutdown();
            if let Err(e) = connection.await {
                debug!("Connection error during shutdown: {}", e);
            }
        }
    }
}
