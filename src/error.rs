use hyper::StatusCode;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by the serving core.
///
/// `Bind` and `Certificate` abort startup. `Gateway`, `NotFound`, `BadRequest`
/// and `Io` stay contained in the response of the request that caused them.
/// `Timeout` is reported by a graceful shutdown that ran past its deadline.
/// `Setup` wraps any other failure while preparing the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to load TLS material from {}: {reason}", path.display())]
    Certificate { path: PathBuf, reason: String },

    #[error("server has already been started")]
    AlreadyStarted,

    #[error("no backend could serve the request: {0}")]
    Gateway(String),

    #[error("graceful shutdown did not finish within {0:?}")]
    Timeout(Duration),

    #[error("not found")]
    NotFound,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Setup(#[from] anyhow::Error),
}

impl ServerError {
    /// Errors that prevent the server from ever accepting connections.
    pub fn is_bind_error(&self) -> bool {
        matches!(self, Self::Bind { .. } | Self::Certificate { .. })
    }

    /// Status code used when the error ends a single request.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Gateway(_) => StatusCode::BAD_GATEWAY,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
