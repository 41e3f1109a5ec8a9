// ============================================
// File: crates/nyxpath-transport/src/udp.rs
// ============================================
//! # UDP Link Implementation
//!
//! ## Creation Reason
//! Production `LinkTransport`: one UDP socket per router, neighbours known
//! by a static router-id to socket-address table.
//!
//! ## Datagram Format
//! ```text
//! ┌──────────────────────┬──────────────────────────┐
//! │ sender RouterId (32) │ link frame (variable)    │
//! └──────────────────────┴──────────────────────────┘
//! ```
//!
//! ## Design Choices
//! - SO_REUSEADDR via socket2 for quick rebinding after restart
//! - A datagram is accepted only if its claimed sender is a configured peer
//!   and it arrived from that peer's address
//!
//! ## ⚠️ Important Note for Next Developer
//! - The address check is the only sender authentication here; the link
//!   session handshake that would replace it is out of scope
//! - Maximum UDP payload is ~65507 bytes, minus the 32-byte sender prefix
//!
//! ## Last Modified
//! v0.1.0 - Initial UDP link

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use dashmap::DashMap;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::Notify;
use tracing::{debug, info, trace};

use nyxpath_common::{RouterId, ROUTER_ID_SIZE};

use crate::error::{Result, TransportError};
use crate::traits::{InboundFrame, LinkTransport};

/// Receive buffer size.
const MAX_DATAGRAM_SIZE: usize = 65_535;

// ============================================
// UdpLink
// ============================================

/// UDP-based link transport.
///
/// # Example
/// ```ignore
/// let link = UdpLink::bind("0.0.0.0:1090", identity.router_id()).await?;
/// link.add_peer(peer_id, "203.0.113.7:1090".parse()?);
/// link.send(&peer_id, frame).await?;
/// ```
pub struct UdpLink {
    socket: Arc<UdpSocket>,
    local_id: RouterId,
    local_addr: SocketAddr,
    peers: DashMap<RouterId, SocketAddr>,
    shutdown: AtomicBool,
    shutdown_notify: Notify,
}

impl UdpLink {
    /// Binds a link to `addr`.
    ///
    /// # Errors
    /// - `InvalidAddress`: if `addr` does not parse
    /// - `BindFailed` / `AddressInUse`: if binding fails
    pub async fn bind(addr: impl AsRef<str>, local_id: RouterId) -> Result<Self> {
        let addr_str = addr.as_ref();
        let socket_addr: SocketAddr = addr_str.parse().map_err(|_| TransportError::InvalidAddress {
            addr: addr_str.to_string(),
        })?;
        Self::bind_addr(socket_addr, local_id).await
    }

    /// Binds a link to a socket address.
    ///
    /// # Errors
    /// Returns error if binding fails.
    #[allow(clippy::unused_async)]
    pub async fn bind_addr(addr: SocketAddr, local_id: RouterId) -> Result<Self> {
        info!("Binding UDP link to {}", addr);

        let domain = if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };

        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|e| TransportError::io("creating UDP socket", e))?;
        socket
            .set_reuse_address(true)
            .map_err(|e| TransportError::io("setting SO_REUSEADDR", e))?;
        socket
            .set_nonblocking(true)
            .map_err(|e| TransportError::io("setting non-blocking", e))?;
        socket.bind(&addr.into()).map_err(|e| {
            if e.kind() == std::io::ErrorKind::AddrInUse {
                TransportError::AddressInUse { addr }
            } else {
                TransportError::bind_failed(addr, e.to_string())
            }
        })?;

        let std_socket: std::net::UdpSocket = socket.into();
        let tokio_socket = UdpSocket::from_std(std_socket)
            .map_err(|e| TransportError::io("converting to Tokio socket", e))?;
        let local_addr = tokio_socket
            .local_addr()
            .map_err(|e| TransportError::io("getting local address", e))?;

        info!(router = %local_id.short(), "UDP link bound to {}", local_addr);

        Ok(Self {
            socket: Arc::new(tokio_socket),
            local_id,
            local_addr,
            peers: DashMap::new(),
            shutdown: AtomicBool::new(false),
            shutdown_notify: Notify::new(),
        })
    }

    /// Registers (or moves) a neighbour.
    pub fn add_peer(&self, id: RouterId, addr: SocketAddr) {
        debug!(peer = %id.short(), %addr, "Peer registered");
        self.peers.insert(id, addr);
    }

    /// Number of configured neighbours.
    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Address the socket is bound to.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Checks if the link has been shut down.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Splits a datagram into an authenticated frame, or `None` to drop it.
    fn accept(&self, datagram: &[u8], addr: SocketAddr) -> Option<InboundFrame> {
        if datagram.len() < ROUTER_ID_SIZE {
            trace!("Dropping {} byte runt datagram from {}", datagram.len(), addr);
            return None;
        }
        let from = RouterId::from_bytes(&datagram[..ROUTER_ID_SIZE])?;
        match self.peers.get(&from) {
            Some(known) if *known.value() == addr => Some(InboundFrame::new(
                from,
                Bytes::copy_from_slice(&datagram[ROUTER_ID_SIZE..]),
            )),
            Some(_) => {
                debug!(peer = %from.short(), %addr, "Dropping datagram from unexpected address");
                None
            }
            None => {
                debug!(peer = %from.short(), %addr, "Dropping datagram from unknown peer");
                None
            }
        }
    }
}

#[async_trait]
impl LinkTransport for UdpLink {
    async fn recv(&self) -> Result<InboundFrame> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        loop {
            if self.is_shutdown() {
                return Err(TransportError::ShuttingDown);
            }

            let (len, addr) = tokio::select! {
                result = self.socket.recv_from(&mut buf) => {
                    result.map_err(|e| TransportError::ReceiveFailed { reason: e.to_string() })?
                }
                () = self.shutdown_notify.notified() => continue,
            };

            trace!("Received {} bytes from {}", len, addr);
            if let Some(frame) = self.accept(&buf[..len], addr) {
                return Ok(frame);
            }
        }
    }

    async fn send(&self, to: &RouterId, payload: Bytes) -> Result<()> {
        if self.is_shutdown() {
            return Err(TransportError::ShuttingDown);
        }
        let dest = *self
            .peers
            .get(to)
            .ok_or_else(|| TransportError::unknown_peer(to.short()))?
            .value();

        let mut datagram = BytesMut::with_capacity(ROUTER_ID_SIZE + payload.len());
        datagram.put_slice(self.local_id.as_bytes());
        datagram.put_slice(&payload);

        self.socket
            .send_to(&datagram, dest)
            .await
            .map_err(|e| TransportError::send_failed(to.short(), e.to_string()))?;
        trace!("Sent {} bytes to {}", datagram.len(), dest);
        Ok(())
    }

    fn local_id(&self) -> RouterId {
        self.local_id
    }

    async fn shutdown(&self) -> Result<()> {
        debug!("Shutting down UDP link");
        self.shutdown.store(true, Ordering::Release);
        self.shutdown_notify.notify_one();
        info!("UDP link shutdown complete");
        Ok(())
    }

    fn is_active(&self) -> bool {
        !self.is_shutdown()
    }
}

impl std::fmt::Debug for UdpLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpLink")
            .field("local_id", &self.local_id)
            .field("local_addr", &self.local_addr)
            .field("peers", &self.peers.len())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

// ============================================
// Tests
// ============================================
