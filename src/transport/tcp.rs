//! TCP transport for wireless and bridge links

use crate::config::LinkConfig;
use crate::error::ConnectionError;
use crate::transport::link::{spawn_link, StreamOpener};
use crate::transport::traits::{
    LinkHandle, TransportConnector, TransportEventSender, TransportKind, TransportStream,
};
use anyhow::Result;
use async_trait::async_trait;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;

/// TCP stream wrapper implementing TransportStream
pub struct TcpTransportStream {
    inner: TcpStream,
}

impl TcpTransportStream {
    pub fn new(stream: TcpStream) -> Self {
        // Frames are small and latency matters more than throughput
        let _ = stream.set_nodelay(true);
        Self { inner: stream }
    }
}

impl AsyncRead for TcpTransportStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for TcpTransportStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[async_trait]
impl TransportStream for TcpTransportStream {
    async fn shutdown(&mut self) -> Result<()> {
        tokio::io::AsyncWriteExt::shutdown(&mut self.inner).await?;
        Ok(())
    }
}

struct TcpOpener {
    address: SocketAddr,
}

#[async_trait]
impl StreamOpener for TcpOpener {
    async fn open(&self) -> Result<Box<dyn TransportStream>> {
        let stream = TcpStream::connect(self.address).await?;
        Ok(Box::new(TcpTransportStream::new(stream)))
    }

    fn describe(&self) -> String {
        format!("tcp://{}", self.address)
    }
}

/// TCP connector for wireless and bridge links
pub struct TcpConnector {
    address: SocketAddr,
    kind: TransportKind,
    name: &'static str,
    link: LinkConfig,
}

impl TcpConnector {
    /// Direct wireless link to a product's access point
    pub fn wireless(address: SocketAddr, link: LinkConfig) -> Self {
        Self {
            address,
            kind: TransportKind::Wireless,
            name: "Wireless",
            link,
        }
    }

    /// Link to a bridge relaying a product over the network
    pub fn bridge(ip: IpAddr, port: u16, link: LinkConfig) -> Self {
        Self {
            address: SocketAddr::new(ip, port),
            kind: TransportKind::Bridge,
            name: "Bridge",
            link,
        }
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }
}

impl TransportConnector for TcpConnector {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn name(&self) -> &'static str {
        self.name
    }

    fn connect(&self) -> bool {
        is_routable(self.address)
    }

    fn activate(&self, events: TransportEventSender) -> Result<LinkHandle, ConnectionError> {
        if !self.connect() {
            return Err(ConnectionError::TransportUnavailable(format!(
                "no route to {}",
                self.address
            )));
        }
        let opener = Arc::new(TcpOpener {
            address: self.address,
        });
        Ok(spawn_link(opener, self.link.clone(), events))
    }
}

/// Whether the host has a route to `address`. Connecting a UDP socket only
/// consults the routing table; nothing is sent.
fn is_routable(address: SocketAddr) -> bool {
    if address.ip().is_unspecified() || address.port() == 0 {
        return false;
    }
    let local: SocketAddr = match address {
        SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
        SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
    };
    UdpSocket::bind(local)
        .and_then(|socket| socket.connect(address))
        .is_ok()
}

/// Accepts `ip` or `ip:port`; a bare IP uses `default_port`
pub fn parse_bridge_address(input: &str, default_port: u16) -> Result<SocketAddr, ConnectionError> {
    let trimmed = input.trim();
    if let Ok(address) = trimmed.parse::<SocketAddr>() {
        return Ok(address);
    }
    trimmed
        .parse::<IpAddr>()
        .map(|ip| SocketAddr::new(ip, default_port))
        .map_err(|_| ConnectionError::InvalidBridgeAddress(input.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tcp_connector_names() {
        let wireless = TcpConnector::wireless("192.168.2.1:4031".parse().unwrap(), LinkConfig::default());
        assert_eq!(wireless.name(), "Wireless");
        assert_eq!(wireless.kind(), TransportKind::Wireless);

        let bridge = TcpConnector::bridge(Ipv4Addr::LOCALHOST.into(), 4030, LinkConfig::default());
        assert_eq!(bridge.name(), "Bridge");
        assert_eq!(bridge.address().port(), 4030);
    }

    #[test]
    fn test_loopback_is_routable() {
        assert!(is_routable("127.0.0.1:4030".parse().unwrap()));
        assert!(!is_routable("0.0.0.0:4030".parse().unwrap()));
    }

    #[test]
    fn test_parse_bridge_address() {
        assert_eq!(
            parse_bridge_address("10.0.0.5", 4030).unwrap(),
            "10.0.0.5:4030".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(
            parse_bridge_address("10.0.0.5:5000", 4030).unwrap().port(),
            5000
        );
        assert_eq!(
            parse_bridge_address("drone.local", 4030),
            Err(ConnectionError::InvalidBridgeAddress("drone.local".into()))
        );
    }
}
