//! Shared value objects used across the protocol engine

use super::error::{Result, TurnError};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::str::FromStr;

/// IPv4 transport address, stored in host order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SocketAddress {
    ipv4: u32,
    port: u16,
}

impl SocketAddress {
    pub const fn new(ipv4: u32, port: u16) -> Self {
        Self { ipv4, port }
    }

    pub fn from_octets(octets: [u8; 4], port: u16) -> Self {
        Self::new(u32::from_be_bytes(octets), port)
    }

    pub fn ipv4(&self) -> u32 {
        self.ipv4
    }

    pub fn ip(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.ipv4)
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Same address with a different port
    pub fn with_port(&self, port: u16) -> Self {
        Self::new(self.ipv4, port)
    }

    /// Resolve a `"host:port"` string, taking the first IPv4 result
    pub async fn resolve(hostname: &str) -> Result<Self> {
        let (host, port) = hostname
            .rsplit_once(':')
            .ok_or_else(|| TurnError::BadHost(format!("missing port in '{}'", hostname)))?;

        let port: u16 = port
            .parse()
            .map_err(|_| TurnError::BadHost(format!("invalid port in '{}'", hostname)))?;

        if host.is_empty() {
            return Err(TurnError::BadHost(format!("missing host in '{}'", hostname)));
        }

        let addrs = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| TurnError::BadHost(format!("{}: {}", hostname, e)))?;

        addrs
            .filter_map(|addr| match addr {
                SocketAddr::V4(v4) => Some(Self::from(v4)),
                SocketAddr::V6(_) => None,
            })
            .next()
            .ok_or_else(|| TurnError::BadHost(format!("no IPv4 address for '{}'", hostname)))
    }
}

impl From<SocketAddrV4> for SocketAddress {
    fn from(addr: SocketAddrV4) -> Self {
        Self::new(u32::from(*addr.ip()), addr.port())
    }
}

impl From<SocketAddress> for SocketAddrV4 {
    fn from(addr: SocketAddress) -> Self {
        SocketAddrV4::new(addr.ip(), addr.port)
    }
}

impl From<SocketAddress> for SocketAddr {
    fn from(addr: SocketAddress) -> Self {
        SocketAddr::V4(addr.into())
    }
}

impl TryFrom<SocketAddr> for SocketAddress {
    type Error = TurnError;

    fn try_from(addr: SocketAddr) -> Result<Self> {
        match addr {
            SocketAddr::V4(v4) => Ok(Self::from(v4)),
            SocketAddr::V6(v6) => Err(TurnError::BadHost(format!(
                "IPv6 address {} is not supported",
                v6
            ))),
        }
    }
}

impl FromStr for SocketAddress {
    type Err = TurnError;

    /// Parse a numeric `"a.b.c.d:port"` address without touching DNS
    fn from_str(s: &str) -> Result<Self> {
        SocketAddrV4::from_str(s)
            .map(Self::from)
            .map_err(|_| TurnError::BadHost(format!("invalid address '{}'", s)))
    }
}

impl TryFrom<String> for SocketAddress {
    type Error = TurnError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<SocketAddress> for String {
    fn from(addr: SocketAddress) -> Self {
        addr.to_string()
    }
}

impl fmt::Display for SocketAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip(), self.port)
    }
}

/// 96-bit transaction identifier, generated once per channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId([u8; 12]);

impl TransactionId {
    pub const LEN: usize = 12;

    /// Generate a random transaction ID
    pub fn random() -> Self {
        let mut id = [0u8; Self::LEN];
        rand::thread_rng().fill(&mut id);
        Self(id)
    }

    pub const fn from_bytes(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 12] {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}
