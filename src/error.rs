//! Error codes at the socket/port boundary (§6-§7).
//!
//! Internal helpers stay boring: `Option<T>` or explicit `(bytes, bool)` tuples, per §7's
//! "internal helpers use explicit multi-value returns." `MinithreadError` only shows up once a
//! result crosses out to a user thread.

use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum MinithreadError {
    #[error("invalid parameters")]
    InvalidParams,
    #[error("port already in use")]
    PortInUse,
    #[error("no more sockets available")]
    NoMoreSockets,
    #[error("receive error")]
    ReceiveError,
    #[error("send error")]
    SendError,
    #[error("connection closed")]
    ConnectionClosed,
    #[error("operation timed out")]
    Timeout,
}

pub type Result<T> = std::result::Result<T, MinithreadError>;
