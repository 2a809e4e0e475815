//! Blocking UDP and TCP endpoints for driving network peers byte-for-byte.
//!
//! Servers and clients wrap one socket each and share a small operation set: bind, connect, send,
//! receive, accept. Receive-style calls resolve their wait from the endpoint's [`TimeoutPolicy`]
//! and a per-call [`Wait`] override; [`Wait::Blocking`] forces an indefinite wait even when a
//! finite default is configured.

#![forbid(unsafe_code)]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

mod address;
mod error;
mod tcp;
mod timeout;
mod udp;

pub use address::{AddressError, AddressSpec};
pub use error::TransportError;
pub use tcp::{TcpClient, TcpPeer, TcpServer};
pub use timeout::{TimeoutPolicy, Wait};
pub use udp::{UdpClient, UdpEndpoint, UdpServer};
