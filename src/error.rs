//! Error types for the RFB server library.

use std::io;
use thiserror::Error;

/// Result type for RFB operations.
pub type Result<T> = std::result::Result<T, RfbError>;

/// Errors that can occur while serving an RFB connection.
///
/// Every variant is fatal to the connection it occurs on and never to the
/// process; the per-connection task is the error boundary.
#[derive(Debug, Error)]
pub enum RfbError {
    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// RFB protocol violation by the peer.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Invalid pixel format.
    #[error("Invalid pixel format")]
    InvalidPixelFormat,

    /// A pixel format or bit depth the encoder cannot produce.
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Connection closed.
    #[error("Connection closed")]
    ConnectionClosed,
}
