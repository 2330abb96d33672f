//! Avatar synchronization networking
//!
//! This module owns everything that touches the relay connection: the wire
//! protocol, the connection state machine, the background I/O loop and the
//! mailbox slots that hand payloads between that loop and the tick consumer.

pub mod client;
pub mod mailbox;
pub mod manager;
pub mod pending;
pub mod protocol;
pub mod session;
pub mod state;
pub mod sync_loop;
pub mod telemetry;
pub mod transport;

// Re-export main types for convenience
pub use client::SyncClient;
pub use mailbox::{IncomingPayload, MailboxSlot, SessionMailboxes};
pub use manager::{Connection, ConnectionManager};
pub use pending::PendingRequests;
pub use state::{ConnectionState, ConnectionStateMachine, SharedConnectionState};
pub use telemetry::{TelemetrySnapshot, TelemetryTracker};
pub use transport::{AddressResolver, SystemResolver, TcpTransport};

use std::io;
use thiserror::Error;

/// Coarse classification used to decide how an error propagates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Would-block or timeout; retried on the next loop iteration
    TransientIo,
    /// Bad field count or unknown name; the offending field-group is dropped
    MalformedMessage,
    /// Handshake failure or unterminated frame; the connection is torn down
    ProtocolViolation,
    /// The relay closed or reset an established connection
    PeerRejected,
    /// A mailbox lock was not acquired in time; the cycle is skipped
    LockContention,
    /// The caller asked for something the current state does not allow
    Usage,
    /// Settings failed validation or could not be persisted
    Configuration,
}

#[derive(Debug, Clone, Error)]
pub enum SyncError {
    #[error("Operation would block")]
    WouldBlock,

    #[error("Timed out waiting for {operation}")]
    Timeout { operation: &'static str },

    #[error("Malformed field-group '{group}': {reason}")]
    MalformedGroup { group: String, reason: String },

    #[error("Target name not found: {name}")]
    NameNotFound { name: String },

    #[error("Handshake timeout")]
    HandshakeTimeout,

    #[error("Handshake rejected by server: {reason}")]
    HandshakeRejected { reason: String },

    #[error("Unterminated frame exceeded {limit} bytes")]
    FrameOverflow { limit: usize },

    #[error("Socket did not become writable after connecting")]
    NotWritable,

    #[error("Server closed the session: {reason}")]
    PeerRejected { reason: String },

    #[error("Mailbox lock contended")]
    LockContention,

    #[error("Could not resolve {host}: {reason}")]
    Resolve { host: String, reason: String },

    #[error("Already connected")]
    AlreadyConnected,

    #[error("Not connected")]
    NotConnected,

    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Invalid configuration: {reason}")]
    Config { reason: String },

    #[error("Socket error: {reason}")]
    Io { reason: String },
}

impl SyncError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            SyncError::WouldBlock | SyncError::Timeout { .. } => ErrorCategory::TransientIo,
            SyncError::MalformedGroup { .. } | SyncError::NameNotFound { .. } => {
                ErrorCategory::MalformedMessage
            }
            SyncError::HandshakeTimeout
            | SyncError::HandshakeRejected { .. }
            | SyncError::FrameOverflow { .. }
            | SyncError::NotWritable
            | SyncError::Resolve { .. }
            | SyncError::Io { .. } => ErrorCategory::ProtocolViolation,
            SyncError::PeerRejected { .. } => ErrorCategory::PeerRejected,
            SyncError::LockContention => ErrorCategory::LockContention,
            SyncError::AlreadyConnected
            | SyncError::NotConnected
            | SyncError::InvalidTransition { .. } => ErrorCategory::Usage,
            SyncError::Config { .. } => ErrorCategory::Configuration,
        }
    }

    /// Whether this error ends the connection
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::ProtocolViolation | ErrorCategory::PeerRejected
        )
    }
}

pub type SyncResult<T> = Result<T, SyncError>;

impl From<io::Error> for SyncError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock => SyncError::WouldBlock,
            io::ErrorKind::TimedOut => SyncError::Timeout { operation: "socket" },
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => SyncError::PeerRejected {
                reason: err.to_string(),
            },
            _ => SyncError::Io { reason: err.to_string() },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_are_classified() {
        let would_block: SyncError = io::Error::from(io::ErrorKind::WouldBlock).into();
        assert_eq!(would_block.category(), ErrorCategory::TransientIo);
        assert!(!would_block.is_fatal());

        let reset: SyncError = io::Error::from(io::ErrorKind::ConnectionReset).into();
        assert_eq!(reset.category(), ErrorCategory::PeerRejected);
        assert!(reset.is_fatal());

        let other: SyncError = io::Error::new(io::ErrorKind::Other, "boom").into();
        assert_eq!(other.category(), ErrorCategory::ProtocolViolation);
    }

    #[test]
    fn malformed_input_is_not_fatal() {
        let err = SyncError::NameNotFound { name: "zz".to_string() };
        assert_eq!(err.category(), ErrorCategory::MalformedMessage);
        assert!(!err.is_fatal());
        assert!(!SyncError::LockContention.is_fatal());
    }
}
