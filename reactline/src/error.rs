use std::io;

use thiserror::Error;

/// Errors returned by the reactline runtime.
#[derive(Debug, Error)]
pub enum Error {
    /// Socket or poller syscall failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Operation on a connection past its terminal state.
    #[error("connection closed")]
    ConnectionClosed,
    /// `start` or `shutdown` called after the server shut down.
    #[error("server closed")]
    ServerClosed,
    /// Interaction with a poller whose wait loop has been closed.
    #[error("poller closed")]
    PollerClosed,
    /// Listen address did not match `[scheme://]host:port`.
    #[error("invalid listen address: {0}")]
    InvalidAddr(String),
}
