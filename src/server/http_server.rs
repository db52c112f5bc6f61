use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::server::request_handler::RequestHandler;
use crate::server::tls::TlsManager;
use hyper::server::conn::http1;
use hyper_util::rt::{TokioIo, TokioTimer};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

/// A bound listener plus everything needed to answer requests on it.
pub struct HttpServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    handler: Arc<RequestHandler>,
    tls_manager: Option<TlsManager>,
}

impl HttpServer {
    /// Prepares the handler, loads TLS material when enabled, and binds.
    pub async fn bind(config: Arc<ServerConfig>) -> Result<Self, ServerError> {
        let tls_manager = if config.tls.enabled {
            Some(TlsManager::new(&config.tls)?)
        } else {
            None
        };

        let handler = Arc::new(RequestHandler::new(config.clone())?);

        let listener = TcpListener::bind(config.listen.as_str())
            .await
            .map_err(|source| ServerError::Bind {
                addr: config.listen.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        info!(
            "Listening on {} ({})",
            local_addr,
            if tls_manager.is_some() { "https" } else { "http" }
        );

        Ok(Self {
            listener,
            local_addr,
            handler,
            tls_manager,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts connections until `stopping` flips to `true` (or its sender
    /// goes away), then closes the listener and waits for every accepted
    /// connection to finish.
    pub async fn serve(self, mut stopping: watch::Receiver<bool>) {
        let HttpServer {
            listener,
            local_addr,
            handler,
            tls_manager,
        } = self;
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = stop_requested(&mut stopping) => break,
                accepted = listener.accept() => {
                    let (stream, addr) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            error!("Failed to accept connection: {}", e);
                            continue;
                        }
                    };

                    let handler = handler.clone();
                    let tls_manager = tls_manager.clone();
                    let stopping = stopping.clone();

                    connections.spawn(async move {
                        if let Err(e) =
                            Self::handle_connection(stream, addr, handler, tls_manager, stopping).await
                        {
                            debug!("Connection error from {}: {}", addr, e);
                        }
                    });
                }
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        drop(listener);
        info!(
            "Stopped accepting on {}, draining {} connection(s)",
            local_addr,
            connections.len()
        );

        while connections.join_next().await.is_some() {}
        info!("All connections on {} closed", local_addr);
    }

    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        handler: Arc<RequestHandler>,
        tls_manager: Option<TlsManager>,
        mut stopping: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        stream.set_nodelay(true)?;

        match tls_manager {
            Some(tls_manager) => {
                let tls_stream = tokio::select! {
                    accepted = tls_manager.acceptor().accept(stream) => accepted
                        .map_err(|e| anyhow::anyhow!("TLS handshake failed: {}", e))?,
                    _ = stop_requested(&mut stopping) => return Ok(()),
                };
                Self::serve_http1(TokioIo::new(tls_stream), addr, handler, stopping).await
            }
            None => Self::serve_http1(TokioIo::new(stream), addr, handler, stopping).await,
        }
    }

    async fn serve_http1<I>(
        io: I,
        addr: SocketAddr,
        handler: Arc<RequestHandler>,
        mut stopping: watch::Receiver<bool>,
    ) -> anyhow::Result<()>
    where
        I: hyper::rt::Read + hyper::rt::Write + Unpin + 'static,
    {
        let service = hyper::service::service_fn(move |req| {
            let handler = handler.clone();
            async move { handler.handle_request(req, addr).await }
        });

        let conn = http1::Builder::new()
            .timer(TokioTimer::new())
            .keep_alive(true)
            .serve_connection(io, service);
        tokio::pin!(conn);

        // Once stopping, the connection finishes its current request and closes.
        let mut draining = false;
        loop {
            tokio::select! {
                result = conn.as_mut() => {
                    return result.map_err(|e| anyhow::anyhow!("HTTP connection error: {}", e));
                }
                _ = stop_requested(&mut stopping), if !draining => {
                    draining = true;
                    conn.as_mut().graceful_shutdown();
                }
            }
        }
    }
}

/// Resolves once the stop flag is set or its sender is gone.
async fn stop_requested(stopping: &mut watch::Receiver<bool>) {
    loop {
        let stop = *stopping.borrow_and_update();
        if stop || stopping.changed().await.is_err() {
            return;
        }
    }
}
