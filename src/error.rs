use std::io;

use thiserror::Error;

/// Errors surfaced to the controlling layer. Per-request failures never
/// reach this type; they degrade to a 404 response instead.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("server is already running")]
    AlreadyRunning,

    #[error("no ports could be bound")]
    NoPortsBound,

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}
