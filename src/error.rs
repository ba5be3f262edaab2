//! Error types for the relay
//!
//! Defines relay-level errors and per-recipient delivery errors.
//! Uses thiserror for ergonomic error definitions.

use thiserror::Error;

use crate::connection::ConnectionState;

/// Relay-level errors
///
/// Bind and non-transient accept failures are fatal for the process;
/// everything else is local to a single connection.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Listening address could not be acquired (fatal)
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Accept failure that invalidated the listening socket (fatal)
    #[error("accept failed: {0}")]
    Accept(#[source] std::io::Error),

    /// IO error on a single connection
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Line framing error (oversized line, invalid UTF-8, or IO)
    #[error("line codec error: {0}")]
    Codec(#[from] tokio_util::codec::LinesCodecError),

    /// Configuration rejected by validation
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Registry actor has stopped (internal channel broken)
    #[error("registry closed")]
    RegistryClosed,

    /// Connection state machine refused a transition
    #[error("invalid connection state transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: ConnectionState,
        to: ConnectionState,
    },
}

/// Per-recipient delivery errors
///
/// Occurs when a line cannot be queued for a connection's writer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// The outbound queue is full (peer is not keeping up)
    #[error("outbound queue full")]
    Full,
    /// The writer has stopped and dropped its end of the queue
    #[error("connection closed")]
    Closed,
}
