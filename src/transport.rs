use std::future::Future;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use log::debug;
use tokio::net::{lookup_host, UdpSocket};

/// A datagram endpoint bound to a single remote peer.
///
/// The session engine drives all traffic through this seam, which keeps it
/// independent of real sockets; tests exchange datagrams over channels.
pub trait Transport: Send + Sync + 'static {
    /// Sends one datagram to the peer.
    fn send(
        &self,
        datagram: &[u8],
    ) -> impl Future<Output = io::Result<()>> + Send;

    /// Receives one datagram from the peer, returning its length.
    fn recv(
        &self,
        buf: &mut [u8],
    ) -> impl Future<Output = io::Result<usize>> + Send;
}

/// A UDP socket connected to one CoAP server.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    /// Resolves `host` and connects a fresh local socket to it.
    pub async fn connect(host: &str, port: u16) -> io::Result<UdpTransport> {
        let mut addresses = lookup_host((host, port)).await?;
        let remote = addresses.next().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no addresses found for {host}"),
            )
        })?;

        let local: SocketAddr = match remote {
            SocketAddr::V4(_) => {
                (IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0).into()
            }
            SocketAddr::V6(_) => {
                (IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0).into()
            }
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(remote).await?;
        debug!("connected to {remote}");

        Ok(UdpTransport { socket })
    }
}

impl Transport for UdpTransport {
    async fn send(&self, datagram: &[u8]) -> io::Result<()> {
        self.socket.send(datagram).await.map(|_| ())
    }

    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.socket.recv(buf).await
    }
}
