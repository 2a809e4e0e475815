//! Blocking UDP endpoints.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::address::AddressSpec;
use crate::error::{TransportError, is_timeout_kind};
use crate::timeout::{TimeoutPolicy, Wait, socket_wait};

/// Largest datagram a receive call returns.
const RECEIVE_BUFFER_SIZE: usize = 65536;

/// One bound UDP socket with an optional default peer.
///
/// Handles are cheap clones sharing the same socket, so a second thread may
/// [`close`](Self::close) the endpoint while another blocks in [`receive`](Self::receive); the
/// blocked call then fails with [`TransportError::Closed`] instead of hanging. Closing is
/// terminal.
#[derive(Debug, Clone)]
pub struct UdpEndpoint {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    socket: UdpSocket,
    local: SocketAddr,
    timeouts: TimeoutPolicy,
    peer: Mutex<Option<SocketAddr>>,
    closed: AtomicBool,
}

impl UdpEndpoint {
    /// Binds a UDP socket at the given address.
    pub fn bind(address: &AddressSpec, timeouts: TimeoutPolicy) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(address.socket_addr()?)?;
        let local = socket.local_addr()?;
        tracing::debug!(%local, "bound udp endpoint");
        Ok(Self {
            inner: Arc::new(Inner {
                socket,
                local,
                timeouts,
                peer: Mutex::new(None),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Records the default peer for [`send`](Self::send).
    ///
    /// UDP is connectionless, so no handshake happens; the peer only targets outgoing datagrams.
    /// Inbound datagrams from other senders are still delivered.
    pub fn connect_to(&self, host: &str, port: u16) -> Result<(), TransportError> {
        self.ensure_open()?;
        let peer = AddressSpec::new(host, port)?.socket_addr()?;
        *self.peer_slot() = Some(peer);
        tracing::debug!(local = %self.inner.local, %peer, "udp peer recorded");
        Ok(())
    }

    /// Sends to the connected peer.
    pub fn send(&self, payload: &[u8]) -> Result<usize, TransportError> {
        self.ensure_open()?;
        let peer = self.peer_address().ok_or(TransportError::NotConnected)?;
        Ok(self.inner.socket.send_to(payload, peer)?)
    }

    /// Sends to an explicit destination, regardless of any connected peer.
    pub fn send_to(&self, payload: &[u8], host: &str, port: u16) -> Result<usize, TransportError> {
        self.ensure_open()?;
        let target = AddressSpec::new(host, port)?.socket_addr()?;
        Ok(self.inner.socket.send_to(payload, target)?)
    }

    /// Receives one datagram, waiting per the effective timeout.
    pub fn receive(&self, wait: Wait) -> Result<Vec<u8>, TransportError> {
        self.receive_from(wait).map(|(payload, _)| payload)
    }

    /// Receives one datagram together with its sender address.
    pub fn receive_from(&self, wait: Wait) -> Result<(Vec<u8>, SocketAddr), TransportError> {
        self.ensure_open()?;
        let effective = self.inner.timeouts.effective(wait);
        self.inner.socket.set_read_timeout(socket_wait(effective))?;
        let mut buffer = vec![0; RECEIVE_BUFFER_SIZE];
        match self.inner.socket.recv_from(&mut buffer) {
            Ok((received, sender)) => {
                // A concurrent close wakes this call with an empty datagram to its own port.
                self.ensure_open()?;
                buffer.truncate(received);
                Ok((buffer, sender))
            }
            Err(error) if is_timeout_kind(&error) => Err(TransportError::Timeout {
                waited: effective.unwrap_or_default(),
            }),
            Err(error) => Err(error.into()),
        }
    }

    /// The concrete local address, including whatever the OS assigned for an empty host or
    /// port.
    pub fn local_address(&self) -> SocketAddr {
        self.inner.local
    }

    /// The connected peer, if any.
    pub fn peer_address(&self) -> Option<SocketAddr> {
        *self.peer_slot()
    }

    /// True once [`close`](Self::close) ran on any handle.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Closes the endpoint.
    ///
    /// Terminal: pending and future calls fail with [`TransportError::Closed`].
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!(local = %self.inner.local, "closing udp endpoint");

        // Wake a receiver blocked in `recv_from` so it observes the closed flag.
        let mut wake = self.inner.local;
        if wake.ip().is_unspecified() {
            wake.set_ip(match wake.ip() {
                IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
                IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::LOCALHOST),
            });
        }
        let waker = match wake.ip() {
            IpAddr::V4(_) => UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)),
            IpAddr::V6(_) => UdpSocket::bind((Ipv6Addr::LOCALHOST, 0)),
        };
        if let Err(error) = waker.and_then(|waker| waker.send_to(&[], wake)) {
            tracing::debug!(?error, "failed to wake a blocked receiver");
        }
    }

    fn peer_slot(&self) -> std::sync::MutexGuard<'_, Option<SocketAddr>> {
        // A poisoned lock only means another handle panicked mid-update; the slot is plain data.
        self.inner.peer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.is_closed() {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }
}

/// UDP server: a bound endpoint that can reply to arbitrary peers.
#[derive(Debug, Clone)]
pub struct UdpServer {
    endpoint: UdpEndpoint,
}

impl UdpServer {
    /// Binds the server at the given address.
    pub fn bind(address: &AddressSpec, timeouts: TimeoutPolicy) -> Result<Self, TransportError> {
        Ok(Self {
            endpoint: UdpEndpoint::bind(address, timeouts)?,
        })
    }

    /// Receives one datagram.
    pub fn receive(&self, wait: Wait) -> Result<Vec<u8>, TransportError> {
        self.endpoint.receive(wait)
    }

    /// Receives one datagram together with its sender address.
    pub fn receive_from(&self, wait: Wait) -> Result<(Vec<u8>, SocketAddr), TransportError> {
        self.endpoint.receive_from(wait)
    }

    /// Replies to an explicit peer address, previously seen or not.
    pub fn send_to(&self, payload: &[u8], host: &str, port: u16) -> Result<usize, TransportError> {
        self.endpoint.send_to(payload, host, port)
    }

    /// Records a default peer so [`send`](Self::send) works without explicit addressing.
    pub fn connect_to(&self, host: &str, port: u16) -> Result<(), TransportError> {
        self.endpoint.connect_to(host, port)
    }

    /// Sends to the connected peer.
    pub fn send(&self, payload: &[u8]) -> Result<usize, TransportError> {
        self.endpoint.send(payload)
    }

    /// The concrete bound address.
    pub fn local_address(&self) -> SocketAddr {
        self.endpoint.local_address()
    }

    /// Closes the underlying endpoint.
    pub fn close(&self) {
        self.endpoint.close();
    }

    /// The underlying endpoint, for the full operation set.
    pub fn endpoint(&self) -> &UdpEndpoint {
        &self.endpoint
    }
}

/// UDP client: optionally binds a local address, then targets a remote endpoint.
#[derive(Debug)]
pub struct UdpClient {
    timeouts: TimeoutPolicy,
    endpoint: Option<UdpEndpoint>,
}

impl UdpClient {
    /// Creates a client; no socket is claimed until [`bind`](Self::bind) or
    /// [`connect_to`](Self::connect_to).
    pub fn new(timeouts: TimeoutPolicy) -> Self {
        Self {
            timeouts,
            endpoint: None,
        }
    }

    /// Claims a local address before connecting.
    ///
    /// Fails with [`TransportError::AlreadyBound`] when a local address was already claimed.
    pub fn bind(&mut self, address: &AddressSpec) -> Result<(), TransportError> {
        if let Some(endpoint) = &self.endpoint {
            return Err(TransportError::AlreadyBound {
                local: endpoint.local_address(),
            });
        }
        self.endpoint = Some(UdpEndpoint::bind(address, self.timeouts)?);
        Ok(())
    }

    /// Connects to the remote endpoint, claiming an ephemeral local address when none is bound.
    ///
    /// Returns the endpoint so calls can chain.
    pub fn connect_to(&mut self, host: &str, port: u16) -> Result<&UdpEndpoint, TransportError> {
        let endpoint = match &mut self.endpoint {
            Some(endpoint) => endpoint,
            slot @ None => slot.insert(UdpEndpoint::bind(&AddressSpec::any(), self.timeouts)?),
        };
        endpoint.connect_to(host, port)?;
        Ok(endpoint)
    }

    /// Sends to the connected peer.
    pub fn send(&self, payload: &[u8]) -> Result<usize, TransportError> {
        self.endpoint()?.send(payload)
    }

    /// Receives one datagram.
    pub fn receive(&self, wait: Wait) -> Result<Vec<u8>, TransportError> {
        self.endpoint()?.receive(wait)
    }

    /// The concrete local address once bound or connected.
    pub fn local_address(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.endpoint()?.local_address())
    }

    /// Closes the underlying endpoint, when one was claimed.
    pub fn close(&self) {
        if let Some(endpoint) = &self.endpoint {
            endpoint.close();
        }
    }

    /// The bound endpoint; fails with [`TransportError::NotConnected`] before any bind or
    /// connect.
    pub fn endpoint(&self) -> Result<&UdpEndpoint, TransportError> {
        self.endpoint.as_ref().ok_or(TransportError::NotConnected)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::{UdpClient, UdpEndpoint};
    use crate::address::AddressSpec;
    use crate::error::TransportError;
    use crate::timeout::{TimeoutPolicy, Wait};

    #[test]
    fn bind_assigns_ephemeral_port() {
        let endpoint = UdpEndpoint::bind(&AddressSpec::any(), TimeoutPolicy::blocking()).unwrap();
        assert_ne!(endpoint.local_address().port(), 0);
    }

    #[test]
    fn send_without_peer_fails() {
        let endpoint = UdpEndpoint::bind(&AddressSpec::any(), TimeoutPolicy::blocking()).unwrap();
        assert!(matches!(
            endpoint.send(b"foofaa"),
            Err(TransportError::NotConnected),
        ));
    }

    #[test]
    fn closed_endpoint_rejects_operations() {
        let endpoint = UdpEndpoint::bind(&AddressSpec::any(), TimeoutPolicy::blocking()).unwrap();
        endpoint.close();
        assert!(matches!(
            endpoint.receive(Wait::Default),
            Err(TransportError::Closed),
        ));
        assert!(matches!(
            endpoint.send_to(b"foofaa", "127.0.0.1", 9),
            Err(TransportError::Closed),
        ));
    }

    #[test]
    fn client_rejects_second_bind() {
        let mut client = UdpClient::new(TimeoutPolicy::blocking());
        let local = AddressSpec::new("127.0.0.1", None).unwrap();
        client.bind(&local).unwrap();
        assert!(matches!(
            client.bind(&local),
            Err(TransportError::AlreadyBound { .. }),
        ));
    }

    #[test]
    fn client_operations_require_a_socket() {
        let client = UdpClient::new(TimeoutPolicy::blocking());
        assert!(matches!(
            client.send(b"foofaa"),
            Err(TransportError::NotConnected),
        ));
        assert!(client.local_address().is_err());
    }
}
