//! Rendezvous boundary: publish and look up peer addresses
//!
//! Records travel as a JSON body `{relay, reflexive, local}` whose values
//! are `"ip:port"` strings.

use crate::domain::channel_address::ChannelAddress;
use crate::domain::shared::{Result, SocketAddress, TurnError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Wire form of a [`ChannelAddress`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalingRecord {
    #[serde(default)]
    pub relay: String,
    #[serde(default)]
    pub reflexive: String,
    #[serde(default)]
    pub local: String,
}

impl SignalingRecord {
    /// Unparseable or empty entries become `None`
    pub fn to_channel_address(&self) -> ChannelAddress {
        fn parse(value: &str) -> Option<SocketAddress> {
            value.parse().ok()
        }

        ChannelAddress {
            local: parse(&self.local),
            reflexive: parse(&self.reflexive),
            relay: parse(&self.relay),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl From<&ChannelAddress> for SignalingRecord {
    fn from(address: &ChannelAddress) -> Self {
        fn show(addr: Option<SocketAddress>) -> String {
            addr.map(|a| a.to_string()).unwrap_or_default()
        }

        Self {
            relay: show(address.relay),
            reflexive: show(address.reflexive),
            local: show(address.local),
        }
    }
}

/// Signaling service trait
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait SignalingService: Send + Sync {
    /// Publish the addresses for `identifier`
    async fn register(&self, identifier: &str, address: &ChannelAddress) -> Result<()>;

    /// Withdraw a published identifier
    async fn unregister(&self, identifier: &str) -> Result<()>;

    /// Look up the addresses published for `identifier`
    async fn discover(&self, identifier: &str) -> Result<ChannelAddress>;
}

/// In-process signaling store
#[derive(Default)]
pub struct InMemorySignaler {
    records: RwLock<HashMap<String, String>>,
}

impl InMemorySignaler {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl SignalingService for InMemorySignaler {
    async fn register(&self, identifier: &str, address: &ChannelAddress) -> Result<()> {
        let body = SignalingRecord::from(address).to_json()?;
        info!("Registering {} as {}", identifier, body);
        self.records
            .write()
            .await
            .insert(identifier.to_string(), body);
        Ok(())
    }

    async fn unregister(&self, identifier: &str) -> Result<()> {
        let removed = self.records.write().await.remove(identifier);
        debug!("Unregistered {} (present: {})", identifier, removed.is_some());
        Ok(())
    }

    async fn discover(&self, identifier: &str) -> Result<ChannelAddress> {
        let records = self.records.read().await;
        let body = records
            .get(identifier)
            .ok_or_else(|| TurnError::Signaling(format!("unknown identifier '{}'", identifier)))?;

        Ok(SignalingRecord::from_json(body)?.to_channel_address())
    }
}
