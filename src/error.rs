//! Error types for connection operations.
//!
//! # Design Decisions
//! - One variant per failure signal
//! - Write failures carry a short payload preview for diagnostics
//! - `CloseFailed` is informational; the connection is already closed when it is returned

use thiserror::Error;

/// Errors returned by [`Connection`](crate::net::connection::Connection) operations.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The transport handle is not live (never valid, or already closed).
    #[error("could not use socket because its handle is not live: {preview:?}")]
    InvalidHandle { preview: String },

    /// The send primitive reported a failure.
    #[error("could not write socket: {preview:?}")]
    WriteFailed {
        preview: String,
        #[source]
        source: std::io::Error,
    },

    /// The receive primitive reported a failure.
    #[error("{peer}: error while reading {requested} bytes of data")]
    ReadFailed {
        requested: usize,
        peer: String,
        #[source]
        source: std::io::Error,
    },

    /// Shutdown or release of the handle failed. Non-fatal.
    #[error("socket #{id} did not close cleanly: {reason}")]
    CloseFailed { id: u64, reason: String },

    /// The peer address could not be queried at construction time.
    #[error("could not resolve peer address: {0}")]
    PeerAddress(#[source] std::io::Error),
}

impl ConnectionError {
    /// Whether the caller should stop using the connection.
    ///
    /// `CloseFailed` is the only non-fatal variant.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ConnectionError::CloseFailed { .. })
    }
}

/// Build the diagnostic preview of an outgoing payload.
pub(crate) fn preview(data: &[u8], limit: usize) -> String {
    let end = data.len().min(limit);
    String::from_utf8_lossy(&data[..end]).into_owned()
}
