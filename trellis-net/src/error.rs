//! The transport error taxonomy shared by UDP and TCP endpoints.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use crate::address::AddressError;

/// Errors surfaced by endpoint operations.
///
/// Timeouts and connection failures are separate variants so callers can pick a different
/// recovery strategy for each. Nothing is retried or swallowed internally; every failure reaches
/// the caller of the operation that caused it.
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    /// A host could not be parsed or resolved.
    #[error("invalid address")]
    Address(#[from] AddressError),

    /// The endpoint already claimed a local address.
    #[error("endpoint is already bound to {local}")]
    AlreadyBound {
        /// The address claimed by the earlier bind.
        local: SocketAddr,
    },

    /// A send was attempted without a connected peer.
    #[error("no peer is connected")]
    NotConnected,

    /// The remote side had no listener to accept the connection.
    #[error("connection refused by {remote}")]
    ConnectionRefused {
        /// The address that refused the connection.
        remote: SocketAddr,
    },

    /// Nothing arrived within the effective timeout.
    #[error("timed out after {waited:?}")]
    Timeout {
        /// The effective wait that elapsed.
        waited: Duration,
    },

    /// The endpoint was closed, before the call or concurrently by another owner handle.
    #[error("endpoint is closed")]
    Closed,

    /// Any other socket failure.
    #[error("socket error")]
    Io(#[from] io::Error),
}

impl TransportError {
    /// True when this is a receive or accept timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout { .. })
    }
}

/// Whether an I/O error reports a read-timeout expiry.
///
/// Unix reports `WouldBlock` for an elapsed socket timeout, Windows `TimedOut`.
pub(crate) fn is_timeout_kind(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}
