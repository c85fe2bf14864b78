//! UDP transport implementation

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

use cuesync_core::{CueSyncError, CueSyncResult};

/// Default show multicast group
pub const DEFAULT_MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 32, 6);
/// Default show port
pub const DEFAULT_MULTICAST_PORT: u16 = 4626;
/// Datagrams never leave the local segment
pub const DEFAULT_MULTICAST_TTL: u32 = 1;

/// Connectionless datagram send/receive, the only I/O the reactor performs
#[async_trait]
pub trait DatagramTransport: Send + Sync {
    /// Receive one datagram into `buf`
    async fn recv_from(&self, buf: &mut [u8]) -> CueSyncResult<(usize, SocketAddr)>;

    /// Send one datagram to `dest`
    async fn send_to(&self, bytes: &[u8], dest: SocketAddr) -> CueSyncResult<()>;

    fn local_addr(&self) -> SocketAddr;
}

/// Multicast membership settings
#[derive(Clone, Debug)]
pub struct MulticastConfig {
    pub group: Ipv4Addr,
    pub port: u16,
    pub ttl: u32,
    /// Interface to join on; unspecified lets the OS choose
    pub interface: Ipv4Addr,
    /// Receive our own multicast sends
    pub loopback: bool,
}

impl Default for MulticastConfig {
    fn default() -> Self {
        MulticastConfig {
            group: DEFAULT_MULTICAST_GROUP,
            port: DEFAULT_MULTICAST_PORT,
            ttl: DEFAULT_MULTICAST_TTL,
            interface: Ipv4Addr::UNSPECIFIED,
            loopback: false,
        }
    }
}

fn transport_err(e: std::io::Error) -> CueSyncError {
    CueSyncError::TransportError(e.to_string())
}

fn reusable_socket(addr: SocketAddrV4) -> CueSyncResult<UdpSocket> {
    let socket =
        Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).map_err(transport_err)?;
    socket.set_reuse_address(true).map_err(transport_err)?;
    socket.set_nonblocking(true).map_err(transport_err)?;
    socket
        .bind(&SocketAddr::V4(addr).into())
        .map_err(transport_err)?;
    UdpSocket::from_std(socket.into()).map_err(transport_err)
}

/// UDP transport for CueSync
pub struct UdpTransport {
    socket: UdpSocket,
    local_addr: SocketAddr,
}

impl UdpTransport {
    /// Bind to a local address (unicast only)
    pub async fn bind(addr: SocketAddr) -> CueSyncResult<Self> {
        let socket = UdpSocket::bind(addr).await.map_err(transport_err)?;
        Self::from_socket(socket)
    }

    /// Bind with `SO_REUSEADDR` so other show tools on the host can share the port
    pub async fn bind_reusable(addr: SocketAddrV4) -> CueSyncResult<Self> {
        let socket = reusable_socket(addr)?;
        Self::from_socket(socket)
    }

    /// Bind the show port and join the multicast group
    pub async fn join_multicast(config: &MulticastConfig) -> CueSyncResult<Self> {
        let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.port);
        let socket = reusable_socket(bind_addr)?;

        socket
            .join_multicast_v4(config.group, config.interface)
            .map_err(transport_err)?;
        socket
            .set_multicast_ttl_v4(config.ttl)
            .map_err(transport_err)?;
        socket
            .set_multicast_loop_v4(config.loopback)
            .map_err(transport_err)?;

        tracing::info!(
            group = %config.group,
            port = config.port,
            ttl = config.ttl,
            "joined multicast group"
        );
        Self::from_socket(socket)
    }

    fn from_socket(socket: UdpSocket) -> CueSyncResult<Self> {
        let local_addr = socket.local_addr().map_err(transport_err)?;
        Ok(UdpTransport {
            socket,
            local_addr,
        })
    }
}

#[async_trait]
impl DatagramTransport for UdpTransport {
    async fn recv_from(&self, buf: &mut [u8]) -> CueSyncResult<(usize, SocketAddr)> {
        self.socket.recv_from(buf).await.map_err(transport_err)
    }

    async fn send_to(&self, bytes: &[u8], dest: SocketAddr) -> CueSyncResult<()> {
        let sent = self
            .socket
            .send_to(bytes, dest)
            .await
            .map_err(transport_err)?;
        if sent != bytes.len() {
            return Err(CueSyncError::TransportError(format!(
                "short send: {} of {} bytes",
                sent,
                bytes.len()
            )));
        }
        Ok(())
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}
