//! Local address lookup

use crate::domain::shared::SocketAddress;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use tracing::debug;

/// Guesses the host address a peer on the local network could reach
pub trait LocalAddressResolver: Send + Sync {
    /// Local IPv4 address used to reach `server`; the port is not meaningful
    fn local_address(&self, server: SocketAddress) -> Option<SocketAddress>;
}

/// Asks the OS routing table which source address reaches the server
#[derive(Debug, Default, Clone, Copy)]
pub struct RouteProbeResolver;

impl LocalAddressResolver for RouteProbeResolver {
    fn local_address(&self, server: SocketAddress) -> Option<SocketAddress> {
        // connect() on UDP sends nothing; it only selects a route
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
        socket.connect(SocketAddr::from(server)).ok()?;

        let local = SocketAddress::try_from(socket.local_addr().ok()?).ok()?;
        if local.ip().is_unspecified() {
            debug!("No route to {}", server);
            return None;
        }

        Some(local.with_port(0))
    }
}

/// Always answers with the same address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedLocalAddress(pub SocketAddress);

impl LocalAddressResolver for FixedLocalAddress {
    fn local_address(&self, _server: SocketAddress) -> Option<SocketAddress> {
        Some(self.0)
    }
}
