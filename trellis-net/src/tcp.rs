//! Blocking TCP endpoints: listening servers, accepted peers, and connecting clients.

use std::collections::HashMap;
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, Socket, Type};

use crate::address::AddressSpec;
use crate::error::{TransportError, is_timeout_kind};
use crate::timeout::{TimeoutPolicy, Wait, socket_wait};

/// Largest chunk a single receive call returns.
const RECEIVE_BUFFER_SIZE: usize = 65536;

/// How often a pending accept re-checks the listener and the closed flag.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Kernel backlog for connections that complete the handshake before any accept.
const LISTEN_BACKLOG: i32 = 128;

/// One established TCP connection, either accepted by a server or opened by a client.
///
/// Handles are cheap clones sharing the stream, so closing from one handle fails a receive
/// blocked on another with [`TransportError::Closed`]. A connection and the listener it came
/// from are independent resources.
#[derive(Debug, Clone)]
pub struct TcpPeer {
    inner: Arc<PeerInner>,
}

#[derive(Debug)]
struct PeerInner {
    stream: TcpStream,
    local: SocketAddr,
    remote: SocketAddr,
    timeouts: TimeoutPolicy,
    closed: AtomicBool,
}

impl TcpPeer {
    fn new(stream: TcpStream, timeouts: TimeoutPolicy) -> Result<Self, TransportError> {
        let local = stream.local_addr()?;
        let remote = stream.peer_addr()?;
        Ok(Self {
            inner: Arc::new(PeerInner {
                stream,
                local,
                remote,
                timeouts,
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Sends the whole payload.
    pub fn send(&self, payload: &[u8]) -> Result<(), TransportError> {
        self.ensure_open()?;
        let mut stream = &self.inner.stream;
        stream.write_all(payload)?;
        stream.flush()?;
        Ok(())
    }

    /// Receives the next chunk of bytes, waiting per the effective timeout.
    pub fn receive(&self, wait: Wait) -> Result<Vec<u8>, TransportError> {
        self.ensure_open()?;
        let effective = self.inner.timeouts.effective(wait);
        self.inner.stream.set_read_timeout(socket_wait(effective))?;
        let mut buffer = vec![0; RECEIVE_BUFFER_SIZE];
        match (&self.inner.stream).read(&mut buffer) {
            Ok(0) => {
                // Zero bytes means the stream shut down, locally or by the remote side.
                self.inner.closed.store(true, Ordering::SeqCst);
                Err(TransportError::Closed)
            }
            Ok(received) => {
                self.ensure_open()?;
                buffer.truncate(received);
                Ok(buffer)
            }
            Err(error) if is_timeout_kind(&error) => Err(TransportError::Timeout {
                waited: effective.unwrap_or_default(),
            }),
            Err(error) => Err(error.into()),
        }
    }

    /// The local address of this connection.
    pub fn local_address(&self) -> SocketAddr {
        self.inner.local
    }

    /// The remote address of this connection.
    pub fn peer_address(&self) -> SocketAddr {
        self.inner.remote
    }

    /// True once [`close`](Self::close) ran on any handle, or the remote side hung up.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Closes the connection.
    ///
    /// Terminal: a receive blocked on another handle fails with [`TransportError::Closed`].
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!(remote = %self.inner.remote, "closing tcp connection");
        if let Err(error) = self.inner.stream.shutdown(Shutdown::Both)
            && error.kind() != ErrorKind::NotConnected
        {
            tracing::debug!(?error, "error shutting down tcp stream");
        }
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.is_closed() {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }
}

/// Per-server connection bookkeeping: the alias table plus the active connection.
#[derive(Debug, Default)]
struct ConnectionTable {
    named: HashMap<String, TcpPeer>,
    active: Option<TcpPeer>,
}

/// TCP server: a listening socket plus the connections accepted from it.
///
/// Connections queue in the kernel backlog until [`accept_connection`](Self::accept_connection)
/// pops them in arrival order; nothing is accepted automatically.
#[derive(Debug)]
pub struct TcpServer {
    listener: TcpListener,
    local: SocketAddr,
    timeouts: TimeoutPolicy,
    connections: Mutex<ConnectionTable>,
    closed: AtomicBool,
}

impl TcpServer {
    /// Binds a listening socket at the given address.
    pub fn bind(address: &AddressSpec, timeouts: TimeoutPolicy) -> Result<Self, TransportError> {
        let requested = address.socket_addr()?;
        let socket = Socket::new(
            Domain::for_address(requested),
            Type::STREAM,
            Some(Protocol::TCP),
        )?;
        socket.set_reuse_address(true)?;
        socket.bind(&requested.into())?;
        socket.listen(LISTEN_BACKLOG)?;
        let listener: TcpListener = socket.into();
        // Accept timeouts are implemented by polling, so the listener itself never blocks.
        listener.set_nonblocking(true)?;
        let local = listener.local_addr()?;
        tracing::debug!(%local, "tcp server listening");
        Ok(Self {
            listener,
            local,
            timeouts,
            connections: Mutex::new(ConnectionTable::default()),
            closed: AtomicBool::new(false),
        })
    }

    /// Accepts the next pending connection in arrival order, waiting per the effective timeout.
    ///
    /// The accepted peer becomes the server's active connection. When an alias is supplied the
    /// peer is additionally stored in the alias table under that exact name; without one, no
    /// entry is made.
    pub fn accept_connection(
        &self,
        alias: Option<&str>,
        wait: Wait,
    ) -> Result<TcpPeer, TransportError> {
        self.ensure_open()?;
        let effective = self.timeouts.effective(wait);
        let deadline = effective.map(|wait| Instant::now() + wait);

        let (stream, _) = loop {
            self.ensure_open()?;
            match self.listener.accept() {
                Ok(accepted) => break accepted,
                Err(error) if error.kind() == ErrorKind::WouldBlock => {
                    let pause = match deadline {
                        Some(deadline) => {
                            let remaining = deadline.saturating_duration_since(Instant::now());
                            if remaining.is_zero() {
                                return Err(TransportError::Timeout {
                                    waited: effective.unwrap_or_default(),
                                });
                            }
                            remaining.min(ACCEPT_POLL_INTERVAL)
                        }
                        None => ACCEPT_POLL_INTERVAL,
                    };
                    std::thread::sleep(pause);
                }
                Err(error) => return Err(error.into()),
            }
        };

        // The stream inherits non-blocking mode from the listener on some platforms.
        stream.set_nonblocking(false)?;
        let peer = TcpPeer::new(stream, self.timeouts)?;
        tracing::debug!(remote = %peer.peer_address(), ?alias, "accepted tcp connection");

        let mut connections = self.connections();
        if let Some(alias) = alias {
            connections.named.insert(alias.to_owned(), peer.clone());
        }
        connections.active = Some(peer.clone());
        Ok(peer)
    }

    /// Looks up a connection accepted under an alias.
    pub fn connection(&self, alias: &str) -> Option<TcpPeer> {
        self.connections().named.get(alias).cloned()
    }

    /// Sends on the active (most recently accepted) connection.
    pub fn send(&self, payload: &[u8]) -> Result<(), TransportError> {
        self.active()?.send(payload)
    }

    /// Receives from the active (most recently accepted) connection.
    pub fn receive(&self, wait: Wait) -> Result<Vec<u8>, TransportError> {
        self.active()?.receive(wait)
    }

    /// The concrete listening address, including an OS-assigned port when the server was bound
    /// with an empty one.
    pub fn local_address(&self) -> SocketAddr {
        self.local
    }

    /// True once [`close`](Self::close) ran.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stops accepting connections.
    ///
    /// Accepted peers are independent resources and stay usable; a blocked
    /// [`accept_connection`](Self::accept_connection) fails with [`TransportError::Closed`].
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!(local = %self.local, "closing tcp server");
    }

    fn active(&self) -> Result<TcpPeer, TransportError> {
        self.connections()
            .active
            .clone()
            .ok_or(TransportError::NotConnected)
    }

    fn connections(&self) -> MutexGuard<'_, ConnectionTable> {
        // A poisoned lock only means another thread panicked mid-update; the table is plain data.
        self.connections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.is_closed() {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }
}

/// TCP client: optionally binds a local address, then opens connections.
#[derive(Debug)]
pub struct TcpClient {
    timeouts: TimeoutPolicy,
    local: Option<AddressSpec>,
}

impl TcpClient {
    /// Creates a client with the timeout policy its connections inherit.
    pub fn new(timeouts: TimeoutPolicy) -> Self {
        Self {
            timeouts,
            local: None,
        }
    }

    /// Claims a local address for the next [`connect_to`](Self::connect_to).
    ///
    /// Fails with [`TransportError::AlreadyBound`] when a local address was already claimed.
    pub fn bind(&mut self, address: &AddressSpec) -> Result<&mut Self, TransportError> {
        if let Some(existing) = &self.local {
            return Err(TransportError::AlreadyBound {
                local: existing.socket_addr()?,
            });
        }
        self.local = Some(address.clone());
        Ok(self)
    }

    /// Opens a connection to the remote endpoint.
    ///
    /// Fails with [`TransportError::ConnectionRefused`] when nothing listens there. The returned
    /// peer is the connected endpoint, so calls chain directly.
    pub fn connect_to(&self, host: &str, port: u16) -> Result<TcpPeer, TransportError> {
        let remote = AddressSpec::new(host, port)?.socket_addr()?;
        let socket = Socket::new(
            Domain::for_address(remote),
            Type::STREAM,
            Some(Protocol::TCP),
        )?;
        if let Some(local) = &self.local {
            socket.set_reuse_address(true)?;
            socket.bind(&local.socket_addr()?.into())?;
        }
        if let Err(error) = socket.connect(&remote.into()) {
            if error.kind() == ErrorKind::ConnectionRefused {
                return Err(TransportError::ConnectionRefused { remote });
            }
            return Err(error.into());
        }
        let peer = TcpPeer::new(socket.into(), self.timeouts)?;
        tracing::debug!(%remote, local = %peer.local_address(), "tcp client connected");
        Ok(peer)
    }
}
