//! Datagram transport between a channel and its TURN server

pub mod udp;

pub use udp::UdpTransport;

use crate::domain::shared::{Result, SocketAddress};
use std::time::Duration;

/// Transport layer trait
///
/// One transport talks to exactly one server address.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Send a datagram; returns whether the whole packet was written
    async fn send(&self, packet: &[u8]) -> Result<bool>;

    /// Wait up to `timeout` for a datagram; `Ok(None)` on timeout
    async fn receive(&self, timeout: Duration) -> Result<Option<Vec<u8>>>;

    /// Remote server address
    fn server_address(&self) -> SocketAddress;

    /// Locally bound address, if known
    fn local_address(&self) -> Option<SocketAddress>;
}
