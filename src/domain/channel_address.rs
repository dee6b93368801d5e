//! Address tuple associated with one allocation

use super::shared::SocketAddress;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The local, server-reflexive and relayed addresses of a client.
///
/// All three start empty and are filled in as Bind/Allocate responses
/// arrive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelAddress {
    pub local: Option<SocketAddress>,
    pub reflexive: Option<SocketAddress>,
    pub relay: Option<SocketAddress>,
}

impl ChannelAddress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_local(mut self, addr: SocketAddress) -> Self {
        self.local = Some(addr);
        self
    }

    pub fn with_reflexive(mut self, addr: SocketAddress) -> Self {
        self.reflexive = Some(addr);
        self
    }

    pub fn with_relay(mut self, addr: SocketAddress) -> Self {
        self.relay = Some(addr);
        self
    }

    /// Where Send indications addressed to this peer go: the reflexive
    /// address when known, otherwise the relay.
    pub fn data_destination(&self) -> Option<SocketAddress> {
        self.reflexive.or(self.relay)
    }

    pub fn is_empty(&self) -> bool {
        self.local.is_none() && self.reflexive.is_none() && self.relay.is_none()
    }
}

impl fmt::Display for ChannelAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn show(addr: &Option<SocketAddress>) -> String {
            addr.map(|a| a.to_string()).unwrap_or_default()
        }

        write!(
            f,
            "local: {}, reflexive: {}, relay: {}",
            show(&self.local),
            show(&self.reflexive),
            show(&self.relay)
        )
    }
}
