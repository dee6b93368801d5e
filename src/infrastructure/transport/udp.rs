//! UDP transport implementation

use super::Transport;
use crate::domain::shared::{Result, SocketAddress, TurnError};
use crate::infrastructure::metrics;
use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

/// Largest datagram we expect to read
pub const MAX_DATAGRAM_SIZE: usize = 65_535;

/// UDP socket connected to a single server
pub struct UdpTransport {
    socket: UdpSocket,
    server: SocketAddress,
    local: Option<SocketAddress>,
}

impl UdpTransport {
    /// Bind an ephemeral local port and connect it to `server`
    pub async fn connect(server: SocketAddress) -> Result<Self> {
        let bind_addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0));
        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|e| TurnError::SocketFatal(format!("Failed to bind UDP socket: {}", e)))?;

        socket
            .connect(SocketAddr::from(server))
            .await
            .map_err(|e| TurnError::BadHost(format!("Failed to connect to {}: {}", server, e)))?;

        let local = socket
            .local_addr()
            .ok()
            .and_then(|addr| SocketAddress::try_from(addr).ok());

        info!(
            "UDP transport connected to {} from {}",
            server,
            local.map(|a| a.to_string()).unwrap_or_else(|| "?".to_string())
        );

        Ok(Self {
            socket,
            server,
            local,
        })
    }
}

#[async_trait::async_trait]
impl Transport for UdpTransport {
    async fn send(&self, packet: &[u8]) -> Result<bool> {
        let written = self
            .socket
            .send(packet)
            .await
            .map_err(|e| TurnError::SendError(format!("UDP send to {} failed: {}", self.server, e)))?;

        metrics::record_datagram_sent();

        if written != packet.len() {
            warn!(
                "Short write to {}: {} of {} bytes",
                self.server,
                written,
                packet.len()
            );
            return Ok(false);
        }

        debug!("Sent {} bytes to {}", written, self.server);
        Ok(true)
    }

    async fn receive(&self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        match tokio::time::timeout(timeout, self.socket.recv(&mut buf)).await {
            Err(_) => Ok(None),
            Ok(Ok(size)) => {
                metrics::record_datagram_received();
                debug!("Received {} bytes from {}", size, self.server);
                buf.truncate(size);
                Ok(Some(buf))
            }
            // ICMP port unreachable from an earlier send; keep waiting
            Ok(Err(e)) if e.kind() == ErrorKind::ConnectionRefused => {
                debug!("Server {} refused a datagram: {}", self.server, e);
                Ok(None)
            }
            Ok(Err(e)) => Err(TurnError::ReceiveError(format!(
                "UDP receive from {} failed: {}",
                self.server, e
            ))),
        }
    }

    fn server_address(&self) -> SocketAddress {
        self.server
    }

    fn local_address(&self) -> Option<SocketAddress> {
        self.local
    }
}
