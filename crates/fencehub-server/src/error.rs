use std::{io, net::SocketAddr};

use thiserror::Error;

use crate::{backend::BackendError, config::ConfigError};

/// Failures that abort the server as a whole.
///
/// Per-connection I/O and protocol failures are never surfaced here;
/// they close the affected connection and nothing else.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("failed to bind listening socket {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },
    #[error("readiness polling failed: {0}")]
    Poll(io::Error),
    #[error("wakeup pipe setup failed: {0}")]
    Wakeup(io::Error),
    #[error("signal handler setup failed: {0}")]
    Signals(io::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Backend(#[from] BackendError),
}
