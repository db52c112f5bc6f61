//! Ownership of the single running server.
//!
//! ```text
//! Stopped --start--> Starting --bound--> Running --shutdown--> Stopping --> Stopped
//!    ^                  |
//!    +---bind failed----+
//! ```
//!
//! A manager serves at most once: after a successful `start`, further calls
//! fail with [`ServerError::AlreadyStarted`], even once it is stopped again.

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::server::HttpServer;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// The live server: its address, stop flag and serve task.
///
/// Dropping the handle drops the stop flag's sender, which also drains the
/// server.
pub struct ServerHandle {
    local_addr: SocketAddr,
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    async fn stop(self, deadline: Duration) -> Result<(), ServerError> {
        let _ = self.stop_tx.send(true);
        let mut task = self.task;

        match tokio::time::timeout(deadline, &mut task).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                error!("Server task ended abnormally: {}", e);
                Ok(())
            }
            Err(_) => {
                warn!(
                    "Connections still open after {:?}, closing them",
                    deadline
                );
                task.abort();
                Err(ServerError::Timeout(deadline))
            }
        }
    }
}

struct Inner {
    state: ServerState,
    served: bool,
    handle: Option<ServerHandle>,
}

pub struct LifecycleManager {
    inner: Mutex<Inner>,
}

static GLOBAL: OnceLock<LifecycleManager> = OnceLock::new();

impl LifecycleManager {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: ServerState::Stopped,
                served: false,
                handle: None,
            }),
        }
    }

    /// The process-wide manager used by the binary.
    pub fn global() -> &'static LifecycleManager {
        GLOBAL.get_or_init(LifecycleManager::new)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> ServerState {
        self.lock().state
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.lock().handle.as_ref().map(ServerHandle::local_addr)
    }

    /// Binds and starts serving `config` in a background task.
    pub async fn start(&self, config: Arc<ServerConfig>) -> Result<SocketAddr, ServerError> {
        {
            let mut inner = self.lock();
            if inner.served || inner.state != ServerState::Stopped {
                return Err(ServerError::AlreadyStarted);
            }
            inner.state = ServerState::Starting;
        }

        let server = match HttpServer::bind(config).await {
            Ok(server) => server,
            Err(e) => {
                self.lock().state = ServerState::Stopped;
                return Err(e);
            }
        };

        let local_addr = server.local_addr();
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(server.serve(stop_rx));

        let mut inner = self.lock();
        inner.handle = Some(ServerHandle {
            local_addr,
            stop_tx,
            task,
        });
        inner.served = true;
        inner.state = ServerState::Running;

        Ok(local_addr)
    }

    /// Stops accepting, then waits up to `deadline` for open connections.
    ///
    /// Returns [`ServerError::Timeout`] when connections had to be cut off.
    /// With no running server this is a no-op.
    pub async fn shutdown(&self, deadline: Duration) -> Result<(), ServerError> {
        let handle = {
            let mut inner = self.lock();
            match inner.handle.take() {
                Some(handle) => {
                    inner.state = ServerState::Stopping;
                    handle
                }
                None => return Ok(()),
            }
        };

        info!("Stopping server on {}", handle.local_addr());
        let result = handle.stop(deadline).await;
        self.lock().state = ServerState::Stopped;
        result
    }
}

impl Default for LifecycleManager {
    fn default() -> Self {
        Self::new()
    }
}
