//! TURN client façade
//!
//! Owns one [`PeerChannel`], keeps the address tuple current and turns
//! channel events into application callbacks.

use crate::config::Config;
use crate::domain::allocation::Allocation;
use crate::domain::channel_address::ChannelAddress;
use crate::domain::shared::{Result, SocketAddress, TurnError};
use crate::infrastructure::protocols::stun::RequestType;
use crate::infrastructure::protocols::turn::{
    ChannelEventListener, ChannelSettings, ChannelState, ListenerHandle, PeerChannel,
};
use crate::infrastructure::resolver::{LocalAddressResolver, RouteProbeResolver};
use crate::infrastructure::signaling::SignalingService;
use crate::infrastructure::transport::Transport;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Largest application payload accepted by [`TurnClient::send_data`]
pub const MAX_DATA_LEN: usize = 65_000;

/// Application callbacks; every method defaults to a no-op
#[async_trait::async_trait]
pub trait ClientEventHandler: Send + Sync {
    /// Relay allocated; `address` is the full tuple known so far
    async fn on_allocated(&self, _address: &ChannelAddress) {}

    async fn on_error(&self, _error: &TurnError) {}

    async fn on_permission_granted(&self, _peers: &[SocketAddress]) {}

    async fn on_data(&self, _from: Option<SocketAddress>, _data: &[u8]) {}

    async fn on_closed(&self) {}
}

#[derive(Clone)]
struct Signaling {
    service: Arc<dyn SignalingService>,
    identifier: String,
}

/// Channel listener that feeds the façade
struct ClientBridge {
    handler: Arc<dyn ClientEventHandler>,
    addresses: Arc<RwLock<ChannelAddress>>,
    signaling: Option<Signaling>,
}

impl ClientBridge {
    async fn report(&self, error: TurnError) {
        warn!("{}", error);
        self.handler.on_error(&error).await;
    }

    /// Forget the relay and withdraw it from signaling
    async fn withdraw(&self) {
        let released = self.addresses.write().await.relay.take().is_some();
        if !released {
            return;
        }

        if let Some(signaling) = &self.signaling {
            match signaling.service.unregister(&signaling.identifier).await {
                Ok(()) => info!("Unregistered {} from signaling", signaling.identifier),
                Err(e) => warn!("Failed to unregister {}: {}", signaling.identifier, e),
            }
        }
    }

    fn rejected(request: RequestType, code: u16, reason: &str) -> TurnError {
        TurnError::RequestRejected {
            request: request.as_str().to_string(),
            code,
            reason: reason.to_string(),
        }
    }
}

#[async_trait::async_trait]
impl ChannelEventListener for ClientBridge {
    async fn on_bind_success(&self, mapped: Option<SocketAddress>) {
        if let Some(mapped) = mapped {
            self.addresses.write().await.reflexive = Some(mapped);
        }
    }

    async fn on_bind_error(&self, code: u16, reason: &str) {
        self.report(Self::rejected(RequestType::Bind, code, reason))
            .await;
    }

    async fn on_allocated(&self, address: &ChannelAddress, _allocation: &Allocation) {
        let snapshot = {
            let mut addresses = self.addresses.write().await;
            addresses.relay = address.relay;
            if address.reflexive.is_some() {
                addresses.reflexive = address.reflexive;
            }
            *addresses
        };

        if let Some(signaling) = &self.signaling {
            match signaling
                .service
                .register(&signaling.identifier, &snapshot)
                .await
            {
                Ok(()) => info!("Registered {} with signaling", signaling.identifier),
                Err(e) => self.report(e).await,
            }
        }

        self.handler.on_allocated(&snapshot).await;
    }

    async fn on_allocate_error(&self, code: u16, reason: &str) {
        self.withdraw().await;
        self.report(TurnError::AllocateError {
            code,
            reason: reason.to_string(),
        })
        .await;
    }

    async fn on_refreshed(&self, lifetime_secs: u32) {
        if lifetime_secs == 0 {
            self.withdraw().await;
        }
    }

    async fn on_refresh_error(&self, code: u16, reason: &str) {
        self.report(Self::rejected(RequestType::Refresh, code, reason))
            .await;
    }

    async fn on_permission_granted(&self, peers: &[SocketAddress]) {
        self.handler.on_permission_granted(peers).await;
    }

    async fn on_permission_error(&self, code: u16, reason: &str) {
        self.report(Self::rejected(RequestType::CreatePermission, code, reason))
            .await;
    }

    async fn on_data(&self, peer: Option<SocketAddress>, data: &[u8]) {
        self.handler.on_data(peer, data).await;
    }

    async fn on_request_timed_out(&self, request: RequestType) {
        self.report(TurnError::Timeout(format!("{} request", request.as_str())))
            .await;
    }

    async fn on_closed(&self, reason: Option<&str>) {
        self.withdraw().await;
        if let Some(reason) = reason {
            self.report(TurnError::SocketFatal(reason.to_string()))
                .await;
        }
        self.handler.on_closed().await;
    }
}

/// Client façade over a single TURN channel
///
/// A client is opened once; after [`TurnClient::close`] a new client is
/// needed.
pub struct TurnClient {
    channel: PeerChannel,
    handler: Arc<dyn ClientEventHandler>,
    resolver: Arc<dyn LocalAddressResolver>,
    signaling: Option<Signaling>,
    addresses: Arc<RwLock<ChannelAddress>>,
    listener: Option<ListenerHandle>,
}

impl TurnClient {
    /// Create a client for `server`
    pub fn new(
        server: SocketAddress,
        settings: ChannelSettings,
        handler: Arc<dyn ClientEventHandler>,
    ) -> Self {
        Self::with_channel(PeerChannel::new(server, settings), handler)
    }

    /// Wrap an existing, not yet connected channel
    pub fn with_channel(channel: PeerChannel, handler: Arc<dyn ClientEventHandler>) -> Self {
        Self {
            channel,
            handler,
            resolver: Arc::new(RouteProbeResolver),
            signaling: None,
            addresses: Arc::new(RwLock::new(ChannelAddress::new())),
            listener: None,
        }
    }

    /// Resolve the configured server and build a client for it
    pub async fn connect(config: &Config, handler: Arc<dyn ClientEventHandler>) -> Result<Self> {
        let server = SocketAddress::resolve(&config.server.host).await?;
        info!("Using TURN server {} ({})", config.server.host, server);
        Ok(Self::new(
            server,
            ChannelSettings::from(&config.channel),
            handler,
        ))
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn LocalAddressResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Publish addresses under `identifier` once allocated
    pub fn with_signaling(
        mut self,
        service: Arc<dyn SignalingService>,
        identifier: impl Into<String>,
    ) -> Self {
        self.signaling = Some(Signaling {
            service,
            identifier: identifier.into(),
        });
        self
    }

    /// Open a UDP socket and request an allocation
    pub async fn open(&mut self) -> Result<()> {
        self.channel.connect_socket().await?;
        self.start().await
    }

    /// Same as [`TurnClient::open`] over a caller-supplied transport
    pub async fn open_with_transport(&mut self, transport: Arc<dyn Transport>) -> Result<()> {
        self.channel.connect_with(transport).await?;
        self.start().await
    }

    async fn start(&mut self) -> Result<()> {
        let transport_local = self.channel.address().await.local;
        let local = self
            .resolver
            .local_address(self.channel.server_address())
            .map(|ip| ip.with_port(transport_local.map_or(0, |addr| addr.port())))
            .or(transport_local);

        self.addresses.write().await.local = local;

        let bridge = Arc::new(ClientBridge {
            handler: self.handler.clone(),
            addresses: self.addresses.clone(),
            signaling: self.signaling.clone(),
        });
        self.listener = Some(self.channel.subscribe(bridge).await);

        self.channel.listen_on_socket().await
    }

    /// Release the allocation and stop the channel; the relay is withdrawn
    /// from signaling as the channel closes
    pub async fn close(&mut self) -> Result<()> {
        self.channel.stop_listening_on_socket().await?;

        if let Some(handle) = self.listener.take() {
            self.channel.unsubscribe(handle).await;
        }

        Ok(())
    }

    /// Current local/reflexive/relay tuple
    pub async fn addresses(&self) -> ChannelAddress {
        *self.addresses.read().await
    }

    pub async fn state(&self) -> ChannelState {
        self.channel.state().await
    }

    pub async fn is_allocated(&self) -> bool {
        self.state().await == ChannelState::Allocated
    }

    /// Peers the server currently accepts traffic from
    pub async fn permissions(&self) -> Vec<SocketAddress> {
        self.channel.permissions().await
    }

    pub fn channel(&self) -> &PeerChannel {
        &self.channel
    }

    /// Learn the reflexive address with a Binding request
    pub fn request_bind(&self) -> Result<()> {
        self.channel.request_bind()
    }

    /// Authorize the relay addresses of `peers`
    pub fn request_permission(&self, peers: &[ChannelAddress]) -> Result<()> {
        if peers.is_empty() {
            return Err(TurnError::InvalidArgument("no peers given".to_string()));
        }
        if peers.iter().all(|peer| peer.relay.is_none()) {
            return Err(TurnError::InvalidArgument(
                "no peer has a relay address".to_string(),
            ));
        }

        self.channel.request_permission(peers.to_vec())
    }

    /// Forward application data to `to`
    pub fn send_data(&self, data: &[u8], to: &ChannelAddress) -> Result<()> {
        if data.is_empty() {
            return Err(TurnError::InvalidArgument("empty payload".to_string()));
        }
        if data.len() > MAX_DATA_LEN {
            return Err(TurnError::InvalidArgument(format!(
                "payload of {} bytes exceeds {}",
                data.len(),
                MAX_DATA_LEN
            )));
        }

        self.channel.send_data(data.to_vec(), *to)
    }

    /// Look `identifier` up through signaling and authorize it
    pub async fn connect_to_peer(&self, identifier: &str) -> Result<ChannelAddress> {
        let signaling = self
            .signaling
            .as_ref()
            .ok_or_else(|| TurnError::Signaling("no signaling service configured".to_string()))?;

        let peer = signaling.service.discover(identifier).await?;
        info!("Discovered {}: {}", identifier, peer);

        self.request_permission(&[peer])?;
        Ok(peer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::signaling::MockSignalingService;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        allocated: Mutex<Vec<ChannelAddress>>,
        errors: Mutex<Vec<TurnError>>,
        closed: Mutex<u32>,
    }

    #[async_trait::async_trait]
    impl ClientEventHandler for Recorder {
        async fn on_allocated(&self, address: &ChannelAddress) {
            self.allocated.lock().unwrap().push(*address);
        }

        async fn on_error(&self, error: &TurnError) {
            self.errors.lock().unwrap().push(error.clone());
        }

        async fn on_closed(&self) {
            *self.closed.lock().unwrap() += 1;
        }
    }

    fn relay() -> SocketAddress {
        SocketAddress::from_octets([203, 0, 113, 5], 55000)
    }

    fn local() -> SocketAddress {
        SocketAddress::from_octets([192, 168, 1, 20], 40000)
    }

    fn allocation() -> Allocation {
        Allocation {
            relayed_address: relay(),
            reflexive_address: None,
            lifetime_secs: 600,
            software: None,
        }
    }

    fn bridge(
        recorder: Arc<Recorder>,
        signaling: Option<Signaling>,
    ) -> (ClientBridge, Arc<RwLock<ChannelAddress>>) {
        let addresses = Arc::new(RwLock::new(ChannelAddress::new().with_local(local())));
        let bridge = ClientBridge {
            handler: recorder,
            addresses: addresses.clone(),
            signaling,
        };
        (bridge, addresses)
    }

    #[tokio::test]
    async fn test_allocation_registers_with_signaling() {
        let mut service = MockSignalingService::new();
        service
            .expect_register()
            .withf(|identifier, address| {
                identifier.to_string() == "alice"
                    && address.relay == Some(relay())
                    && address.local == Some(local())
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let recorder = Arc::new(Recorder::default());
        let (bridge, addresses) = bridge(
            recorder.clone(),
            Some(Signaling {
                service: Arc::new(service),
                identifier: "alice".to_string(),
            }),
        );

        let channel_address = ChannelAddress::new().with_relay(relay());
        bridge.on_allocated(&channel_address, &allocation()).await;

        let expected = ChannelAddress::new().with_local(local()).with_relay(relay());
        assert_eq!(*addresses.read().await, expected);
        assert_eq!(recorder.allocated.lock().unwrap().as_slice(), &[expected]);
        assert!(recorder.errors.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_signaling_failure_is_reported() {
        let mut service = MockSignalingService::new();
        service
            .expect_register()
            .returning(|_, _| Err(TurnError::Signaling("rendezvous down".to_string())));

        let recorder = Arc::new(Recorder::default());
        let (bridge, _) = bridge(
            recorder.clone(),
            Some(Signaling {
                service: Arc::new(service),
                identifier: "alice".to_string(),
            }),
        );

        bridge
            .on_allocated(&ChannelAddress::new().with_relay(relay()), &allocation())
            .await;

        let errors = recorder.errors.lock().unwrap().clone();
        assert_eq!(
            errors,
            vec![TurnError::Signaling("rendezvous down".to_string())]
        );
        assert_eq!(recorder.allocated.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_protocol_errors_become_client_errors() {
        let recorder = Arc::new(Recorder::default());
        let (bridge, addresses) = bridge(recorder.clone(), None);
        addresses.write().await.relay = Some(relay());

        bridge.on_allocate_error(486, "Allocation Quota Reached").await;
        bridge.on_permission_error(403, "Forbidden").await;
        bridge
            .on_request_timed_out(RequestType::Refresh)
            .await;
        bridge.on_closed(Some("socket gone")).await;

        assert!(addresses.read().await.relay.is_none());

        let errors = recorder.errors.lock().unwrap().clone();
        assert_eq!(
            errors,
            vec![
                TurnError::AllocateError {
                    code: 486,
                    reason: "Allocation Quota Reached".to_string()
                },
                TurnError::RequestRejected {
                    request: "CreatePermission".to_string(),
                    code: 403,
                    reason: "Forbidden".to_string()
                },
                TurnError::Timeout("Refresh request".to_string()),
                TurnError::SocketFatal("socket gone".to_string()),
            ]
        );
        assert_eq!(*recorder.closed.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_release_withdraws_relay_once() {
        let mut service = MockSignalingService::new();
        service.expect_register().returning(|_, _| Ok(()));
        service
            .expect_unregister()
            .withf(|identifier| identifier.to_string() == "alice")
            .times(1)
            .returning(|_| Ok(()));

        let recorder = Arc::new(Recorder::default());
        let (bridge, addresses) = bridge(
            recorder.clone(),
            Some(Signaling {
                service: Arc::new(service),
                identifier: "alice".to_string(),
            }),
        );

        bridge
            .on_allocated(&ChannelAddress::new().with_relay(relay()), &allocation())
            .await;
        bridge.on_refreshed(600).await;
        assert_eq!(addresses.read().await.relay, Some(relay()));

        bridge.on_refreshed(0).await;
        assert_eq!(addresses.read().await.relay, None);
        assert_eq!(addresses.read().await.local, Some(local()));

        bridge.on_closed(None).await;
        assert!(recorder.errors.lock().unwrap().is_empty());
        assert_eq!(*recorder.closed.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_argument_validation() {
        let client = TurnClient::new(
            SocketAddress::from_octets([127, 0, 0, 1], 3478),
            ChannelSettings::default(),
            Arc::new(Recorder::default()),
        );

        assert!(matches!(
            client.request_permission(&[]),
            Err(TurnError::InvalidArgument(_))
        ));
        assert!(matches!(
            client.request_permission(&[ChannelAddress::new().with_local(local())]),
            Err(TurnError::InvalidArgument(_))
        ));
        assert!(matches!(
            client.send_data(&[], &ChannelAddress::new()),
            Err(TurnError::InvalidArgument(_))
        ));
        assert!(matches!(
            client.send_data(&vec![0u8; MAX_DATA_LEN + 1], &ChannelAddress::new()),
            Err(TurnError::InvalidArgument(_))
        ));
        // valid arguments, but nothing is listening yet
        assert!(matches!(
            client.send_data(b"hello", &ChannelAddress::new().with_relay(relay())),
            Err(TurnError::NotListening)
        ));
        assert!(matches!(
            client.connect_to_peer("bob").await,
            Err(TurnError::Signaling(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_to_peer_requires_known_identifier() {
        let mut service = MockSignalingService::new();
        service
            .expect_discover()
            .returning(|_| Err(TurnError::Signaling("unknown identifier 'bob'".to_string())));

        let client = TurnClient::new(
            SocketAddress::from_octets([127, 0, 0, 1], 3478),
            ChannelSettings::default(),
            Arc::new(Recorder::default()),
        )
        .with_signaling(Arc::new(service), "alice");

        assert!(matches!(
            client.connect_to_peer("bob").await,
            Err(TurnError::Signaling(_))
        ));
    }
}
