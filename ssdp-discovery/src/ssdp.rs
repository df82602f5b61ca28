//! SSDP transport
//!
//! Owns the two UDP sockets discovery needs: one joined to the SSDP multicast
//! group (NOTIFY announcements) and one unicast socket bound to the local
//! address (search requests go out from it, search responses come back to it).

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use socket2::{Domain, Protocol, Socket, Type};

use crate::config::DiscoveryConfig;
use crate::error::{DiscoveryError, Result};
use crate::packet::{MULTICAST_ADDRESS, SSDP_PORT};

/// TTL for outgoing multicast, as recommended by UPnP device architecture
const MULTICAST_TTL: u32 = 4;

/// One received datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub payload: Vec<u8>,
    pub sender: SocketAddr,
}

/// Datagram transport used by the engine
///
/// `response_receive` and `multicast_receive` block until a datagram arrives.
/// After `close()` they return `DiscoveryError::TransportClosed`, which
/// receivers treat as a normal shutdown.
pub trait Transport: Send + Sync {
    /// Send a formatted search request to the multicast group
    fn send(&self, message: &str) -> Result<()>;
    /// Next datagram from the unicast (search response) socket
    fn response_receive(&self) -> Result<Datagram>;
    /// Next datagram from the multicast (notify) socket
    fn multicast_receive(&self) -> Result<Datagram>;
    /// Release both sockets; idempotent
    fn close(&self);
    fn is_open(&self) -> bool;
}

/// Opens a transport bound to a local address
pub type TransportOpener =
    Arc<dyn Fn(IpAddr, &DiscoveryConfig) -> Result<Arc<dyn Transport>> + Send + Sync>;

/// Opener for real UDP sockets
pub fn udp_opener() -> TransportOpener {
    Arc::new(|source, config| {
        let transport = SsdpTransport::open(source, config)?;
        Ok(Arc::new(transport) as Arc<dyn Transport>)
    })
}

/// UDP implementation of [`Transport`]
///
/// Receivers hold a socket's read lock for one poll at a time; `close()`
/// takes both sockets out under the write lock and drops them.
pub struct SsdpTransport {
    source: Ipv4Addr,
    multicast: RwLock<Option<UdpSocket>>,
    unicast: RwLock<Option<UdpSocket>>,
    buffer_size: usize,
    closed: AtomicBool,
}

impl SsdpTransport {
    /// Bind the multicast and unicast sockets on `source`
    ///
    /// Fails with `NetworkError` when the address isn't usable (not local,
    /// not IPv4, or the interface can't join the group).
    pub fn open(source: IpAddr, config: &DiscoveryConfig) -> Result<Self> {
        let source = match source {
            IpAddr::V4(v4) => v4,
            IpAddr::V6(v6) => {
                return Err(DiscoveryError::NetworkError(format!(
                    "SSDP over IPv6 is not supported ({})",
                    v6
                )))
            }
        };

        let multicast = Self::multicast_socket(source, config.receive_poll_interval)
            .map_err(|e| DiscoveryError::NetworkError(format!("Failed to open multicast socket: {}", e)))?;
        let unicast = Self::unicast_socket(source, config.receive_poll_interval)
            .map_err(|e| DiscoveryError::NetworkError(format!("Failed to open unicast socket on {}: {}", source, e)))?;

        tracing::debug!(%source, "SSDP transport opened");

        Ok(Self {
            source,
            multicast: RwLock::new(Some(multicast)),
            unicast: RwLock::new(Some(unicast)),
            buffer_size: config.max_datagram_size,
            closed: AtomicBool::new(false),
        })
    }

    fn multicast_socket(source: Ipv4Addr, poll: Duration) -> io::Result<UdpSocket> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
        socket.set_reuse_port(true)?;

        let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, SSDP_PORT);
        socket.bind(&bind_addr.into())?;
        socket.join_multicast_v4(&MULTICAST_ADDRESS, &source)?;
        socket.set_read_timeout(Some(poll))?;

        Ok(socket.into())
    }

    fn unicast_socket(source: Ipv4Addr, poll: Duration) -> io::Result<UdpSocket> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;

        let bind_addr = SocketAddrV4::new(source, 0);
        socket.bind(&bind_addr.into())?;
        socket.set_multicast_if_v4(&source)?;
        socket.set_multicast_ttl_v4(MULTICAST_TTL)?;
        socket.set_multicast_loop_v4(true)?;
        socket.set_read_timeout(Some(poll))?;

        Ok(socket.into())
    }

    /// Local address of the unicast socket
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.unicast
            .read()
            .as_ref()
            .ok_or(DiscoveryError::TransportClosed)?
            .local_addr()
            .map_err(|e| DiscoveryError::NetworkError(format!("Failed to read local address: {}", e)))
    }

    fn receive(&self, slot: &RwLock<Option<UdpSocket>>) -> Result<Datagram> {
        let mut buffer = vec![0u8; self.buffer_size];
        loop {
            if self.closed.load(Ordering::Acquire) {
                return Err(DiscoveryError::TransportClosed);
            }

            let guard = slot.read();
            let Some(socket) = guard.as_ref() else {
                return Err(DiscoveryError::TransportClosed);
            };

            match socket.recv_from(&mut buffer) {
                Ok((size, sender)) => {
                    buffer.truncate(size);
                    return Ok(Datagram {
                        payload: buffer,
                        sender,
                    });
                }
                // Read timeout: re-check the closed flag
                Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => {
                    continue
                }
                Err(_) if self.closed.load(Ordering::Acquire) => {
                    return Err(DiscoveryError::TransportClosed)
                }
                Err(e) => {
                    return Err(DiscoveryError::NetworkError(format!("Socket error: {}", e)));
                }
            }
        }
    }
}

impl Transport for SsdpTransport {
    fn send(&self, message: &str) -> Result<()> {
        if !self.is_open() {
            return Err(DiscoveryError::TransportClosed);
        }

        self.unicast
            .read()
            .as_ref()
            .ok_or(DiscoveryError::TransportClosed)?
            .send_to(message.as_bytes(), SocketAddrV4::new(MULTICAST_ADDRESS, SSDP_PORT))
            .map_err(|e| DiscoveryError::NetworkError(format!("Failed to send M-SEARCH: {}", e)))?;
        Ok(())
    }

    fn response_receive(&self) -> Result<Datagram> {
        self.receive(&self.unicast)
    }

    fn multicast_receive(&self) -> Result<Datagram> {
        self.receive(&self.multicast)
    }

    /// Returns once both sockets are dropped, which can take up to one
    /// `receive_poll_interval` while a receiver is mid-poll
    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(multicast) = self.multicast.write().take() {
            if let Err(e) = multicast.leave_multicast_v4(&MULTICAST_ADDRESS, &self.source) {
                tracing::trace!("leave_multicast_v4 failed: {}", e);
            }
        }
        self.unicast.write().take();
        tracing::debug!(source = %self.source, "SSDP transport closed");
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }
}
