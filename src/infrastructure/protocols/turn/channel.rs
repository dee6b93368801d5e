//! Peer channel: one transaction id, one transport, one worker task

use super::listener::{dispatch, ChannelEventListener, ListenerHandle, ListenerRegistry};
use super::machine::{ChannelCore, ChannelEvent, ChannelState};
use super::retransmit::{RetransmitAction, RetransmitPolicy, RetransmitQueue};
use crate::config::ChannelConfig;
use crate::domain::allocation::Allocation;
use crate::domain::channel_address::ChannelAddress;
use crate::domain::shared::{Result, SocketAddress, TransactionId, TurnError};
use crate::infrastructure::metrics;
use crate::infrastructure::protocols::stun::{
    RequestType, MAX_INDICATION_DATA_LEN, MAX_PERMISSION_PEERS,
};
use crate::infrastructure::transport::{Transport, UdpTransport};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Per-channel settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSettings {
    pub desired_lifetime_secs: u32,
    /// Upper bound on one receive wait
    pub receive_timeout: Duration,
    pub software: Option<String>,
    pub retransmit: RetransmitPolicy,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            desired_lifetime_secs: 600,
            receive_timeout: Duration::from_secs(1),
            software: None,
            retransmit: RetransmitPolicy::default(),
        }
    }
}

impl From<&ChannelConfig> for ChannelSettings {
    fn from(config: &ChannelConfig) -> Self {
        Self {
            desired_lifetime_secs: config.desired_lifetime_secs,
            receive_timeout: config.receive_timeout(),
            software: config.software.clone(),
            retransmit: RetransmitPolicy {
                enabled: config.retransmit.enabled,
                initial_rto: Duration::from_millis(config.retransmit.initial_rto_ms),
                max_attempts: config.retransmit.max_attempts,
            },
        }
    }
}

/// Intent delivered to the worker
#[derive(Debug)]
enum Command {
    Bind,
    Allocate { lifetime_secs: u32 },
    Refresh { lifetime_secs: u32 },
    Permission { peers: Vec<ChannelAddress> },
    SendData { data: Vec<u8>, to: ChannelAddress },
    SetDesiredLifetime(u32),
    Stop,
}

/// Handle to a TURN channel
///
/// Requests are queued to a background task that owns all socket I/O;
/// state getters read a snapshot the task keeps current.
pub struct PeerChannel {
    server: SocketAddress,
    transaction_id: TransactionId,
    settings: ChannelSettings,
    core: Arc<RwLock<ChannelCore>>,
    listeners: Arc<RwLock<ListenerRegistry>>,
    transport: Option<Arc<dyn Transport>>,
    commands: Option<mpsc::UnboundedSender<Command>>,
    worker: Option<JoinHandle<()>>,
}

impl PeerChannel {
    /// Create a new channel with a fresh transaction id
    pub fn new(server: SocketAddress, settings: ChannelSettings) -> Self {
        Self::with_transaction_id(server, TransactionId::random(), settings)
    }

    pub fn with_transaction_id(
        server: SocketAddress,
        transaction_id: TransactionId,
        settings: ChannelSettings,
    ) -> Self {
        let core = ChannelCore::new(
            transaction_id,
            settings.desired_lifetime_secs,
            settings.software.clone(),
        );

        Self {
            server,
            transaction_id,
            settings,
            core: Arc::new(RwLock::new(core)),
            listeners: Arc::new(RwLock::new(ListenerRegistry::new())),
            transport: None,
            commands: None,
            worker: None,
        }
    }

    pub fn server_address(&self) -> SocketAddress {
        self.server
    }

    pub fn transaction_id(&self) -> &TransactionId {
        &self.transaction_id
    }

    /// Open a UDP socket to the server
    pub async fn connect_socket(&mut self) -> Result<()> {
        let state = self.state().await;
        if state != ChannelState::Idle {
            return Err(TurnError::InvalidState(format!(
                "cannot connect a channel that is {}",
                state.as_str()
            )));
        }

        let transport = UdpTransport::connect(self.server).await?;
        self.connect_with(Arc::new(transport)).await
    }

    /// Attach an already connected transport
    pub async fn connect_with(&mut self, transport: Arc<dyn Transport>) -> Result<()> {
        {
            let mut core = self.core.write().await;
            core.mark_connecting()?;
            if let Some(local) = transport.local_address() {
                core.set_local_address(local);
            }
        }

        debug!("Channel {} connected to {}", self.transaction_id, self.server);
        self.transport = Some(transport);
        Ok(())
    }

    /// Start the worker and request an allocation
    pub async fn listen_on_socket(&mut self) -> Result<()> {
        let transport = self
            .transport
            .clone()
            .ok_or_else(|| TurnError::InvalidState("socket is not connected".to_string()))?;

        self.core.write().await.mark_listening()?;

        let (tx, rx) = mpsc::unbounded_channel();
        let worker = Worker {
            core: self.core.clone(),
            listeners: self.listeners.clone(),
            transport,
            commands: rx,
            retransmit: RetransmitQueue::new(self.settings.retransmit),
            receive_timeout: self.settings.receive_timeout,
        };

        let lifetime_secs = self.core.read().await.desired_lifetime();
        tx.send(Command::Allocate { lifetime_secs })
            .map_err(|_| TurnError::NotListening)?;

        info!("Channel {} listening on {}", self.transaction_id, self.server);
        self.commands = Some(tx);
        self.worker = Some(tokio::spawn(worker.run()));
        Ok(())
    }

    /// Stop the worker, releasing the allocation if one is held.
    ///
    /// Returns once the worker has exited.
    pub async fn stop_listening_on_socket(&mut self) -> Result<()> {
        if let Some(commands) = self.commands.take() {
            let _ = commands.send(Command::Stop);
        }

        match self.worker.take() {
            Some(worker) => worker
                .await
                .map_err(|e| TurnError::InvalidState(format!("channel worker failed: {}", e))),
            None => {
                self.core.write().await.mark_closed();
                Ok(())
            }
        }
    }

    pub fn is_listening(&self) -> bool {
        self.commands.is_some()
    }

    /// Send a Binding request
    pub fn request_bind(&self) -> Result<()> {
        self.command(Command::Bind)
    }

    /// Send an Allocate request
    pub fn request_allocate(&self, lifetime_secs: u32) -> Result<()> {
        self.command(Command::Allocate { lifetime_secs })
    }

    /// Send a Refresh request; a zero lifetime releases the allocation
    pub fn request_refresh(&self, lifetime_secs: u32) -> Result<()> {
        self.command(Command::Refresh { lifetime_secs })
    }

    /// Ask the server to accept traffic from the peers' relay addresses
    pub fn request_permission(&self, peers: Vec<ChannelAddress>) -> Result<()> {
        if peers.len() > MAX_PERMISSION_PEERS {
            return Err(TurnError::InvalidArgument(format!(
                "{} peers exceed the limit of {} per request",
                peers.len(),
                MAX_PERMISSION_PEERS
            )));
        }
        self.command(Command::Permission { peers })
    }

    /// Queue application data for `to`; dropped with a warning when `to`
    /// has no usable address
    pub fn send_data(&self, data: Vec<u8>, to: ChannelAddress) -> Result<()> {
        if data.len() > MAX_INDICATION_DATA_LEN {
            return Err(TurnError::InvalidArgument(format!(
                "payload of {} bytes exceeds {} bytes",
                data.len(),
                MAX_INDICATION_DATA_LEN
            )));
        }
        self.command(Command::SendData { data, to })
    }

    /// Lifetime used for subsequent Refresh requests
    pub fn set_desired_lifetime(&self, lifetime_secs: u32) -> Result<()> {
        self.command(Command::SetDesiredLifetime(lifetime_secs))
    }

    pub async fn subscribe(&self, listener: Arc<dyn ChannelEventListener>) -> ListenerHandle {
        self.listeners.write().await.subscribe(listener)
    }

    pub async fn unsubscribe(&self, handle: ListenerHandle) -> bool {
        self.listeners.write().await.unsubscribe(handle)
    }

    pub async fn state(&self) -> ChannelState {
        self.core.read().await.state()
    }

    pub async fn address(&self) -> ChannelAddress {
        self.core.read().await.address()
    }

    pub async fn allocation(&self) -> Option<Allocation> {
        self.core.read().await.allocation().cloned()
    }

    pub async fn permissions(&self) -> Vec<SocketAddress> {
        self.core.read().await.permissions().as_slice().to_vec()
    }

    fn command(&self, command: Command) -> Result<()> {
        self.commands
            .as_ref()
            .ok_or(TurnError::NotListening)?
            .send(command)
            .map_err(|_| TurnError::NotListening)
    }
}

impl Drop for PeerChannel {
    fn drop(&mut self) {
        if let Some(commands) = self.commands.take() {
            let _ = commands.send(Command::Stop);
        }
    }
}

enum Step {
    Command(Option<Command>),
    Datagram(Result<Option<Vec<u8>>>),
}

/// Background task owning the socket
struct Worker {
    core: Arc<RwLock<ChannelCore>>,
    listeners: Arc<RwLock<ListenerRegistry>>,
    transport: Arc<dyn Transport>,
    commands: mpsc::UnboundedReceiver<Command>,
    retransmit: RetransmitQueue,
    receive_timeout: Duration,
}

impl Worker {
    async fn run(mut self) {
        loop {
            let now = Instant::now();
            self.refresh_if_due(now).await;
            self.retransmit_expired(now).await;

            let wait = self.next_wait(now).await;

            let step = tokio::select! {
                command = self.commands.recv() => Step::Command(command),
                received = self.transport.receive(wait) => Step::Datagram(received),
            };

            match step {
                Step::Command(Some(Command::Stop)) | Step::Command(None) => {
                    self.shutdown().await;
                    return;
                }
                Step::Command(Some(command)) => self.handle_command(command).await,
                Step::Datagram(Ok(Some(data))) => self.handle_datagram(&data).await,
                Step::Datagram(Ok(None)) => {}
                Step::Datagram(Err(e)) => {
                    error!("Channel socket failed: {}", e);
                    self.core.write().await.mark_closed();
                    self.retransmit.clear();
                    self.dispatch(&ChannelEvent::Closed {
                        reason: Some(e.to_string()),
                    })
                    .await;
                    return;
                }
            }
        }
    }

    async fn next_wait(&self, now: Instant) -> Duration {
        let next_refresh = self.core.read().await.next_refresh();

        [next_refresh, self.retransmit.next_deadline()]
            .into_iter()
            .flatten()
            .map(|deadline| deadline.saturating_duration_since(now))
            .fold(self.receive_timeout, Duration::min)
    }

    async fn refresh_if_due(&mut self, now: Instant) {
        let packet = {
            let mut core = self.core.write().await;
            if !core.refresh_due(now) {
                return;
            }
            core.mark_refreshed(now);
            core.refresh_request(core.desired_lifetime())
        };

        debug!("Refreshing allocation");
        self.send_request(RequestType::Refresh, packet, now).await;
    }

    async fn retransmit_expired(&mut self, now: Instant) {
        for action in self.retransmit.poll(now) {
            match action {
                RetransmitAction::Resend(request, packet) => {
                    debug!("Retransmitting {} request", request.as_str());
                    metrics::record_retransmission(request.as_str());
                    self.transmit(&packet).await;
                }
                RetransmitAction::GiveUp(request) => {
                    warn!("{} request timed out", request.as_str());
                    self.dispatch(&ChannelEvent::RequestTimedOut { request })
                        .await;
                }
            }
        }
    }

    async fn handle_command(&mut self, command: Command) {
        let now = Instant::now();

        match command {
            Command::Bind => {
                let packet = self.core.read().await.bind_request();
                self.send_request(RequestType::Bind, packet, now).await;
            }
            Command::Allocate { lifetime_secs } => {
                let packet = self.core.read().await.allocate_request(lifetime_secs);
                self.send_request(RequestType::Allocate, packet, now).await;
            }
            Command::Refresh { lifetime_secs } => {
                let packet = {
                    let mut core = self.core.write().await;
                    core.mark_refreshed(now);
                    core.refresh_request(lifetime_secs)
                };
                self.send_request(RequestType::Refresh, packet, now).await;
            }
            Command::Permission { peers } => {
                let packet = self.core.write().await.permission_request(&peers);
                if let Some(packet) = packet {
                    self.send_request(RequestType::CreatePermission, packet, now)
                        .await;
                }
            }
            Command::SendData { data, to } => {
                let packet = self.core.read().await.send_indication(&data, &to);
                if let Some(packet) = packet {
                    self.transmit(&packet).await;
                }
            }
            Command::SetDesiredLifetime(lifetime_secs) => {
                self.core.write().await.set_desired_lifetime(lifetime_secs);
            }
            Command::Stop => {}
        }
    }

    /// With retransmission on, only the first response to a request is applied
    async fn handle_datagram(&mut self, data: &[u8]) {
        let retransmit = &mut self.retransmit;
        let tracking = retransmit.is_enabled();
        let event = self
            .core
            .write()
            .await
            .handle_datagram_if(data, Instant::now(), |request| {
                !tracking || retransmit.complete(request)
            });

        if let Some(event) = event {
            self.dispatch(&event).await;
        }
    }

    async fn shutdown(&mut self) {
        let release = self.core.read().await.release_request();
        if let Some(packet) = release {
            info!("Releasing allocation");
            self.transmit(&packet).await;
        }

        self.core.write().await.mark_closed();
        self.retransmit.clear();
        self.dispatch(&ChannelEvent::Closed { reason: None }).await;
        info!("Channel closed");
    }

    async fn send_request(&mut self, request: RequestType, packet: Bytes, now: Instant) {
        self.transmit(&packet).await;
        self.retransmit.track(request, packet, now);
    }

    /// Failures are logged, never raised
    async fn transmit(&self, packet: &[u8]) -> bool {
        match self.transport.send(packet).await {
            Ok(sent) => sent,
            Err(e) => {
                warn!("{}", e);
                false
            }
        }
    }

    async fn dispatch(&self, event: &ChannelEvent) {
        let listeners = self.listeners.read().await.snapshot();
        for listener in listeners {
            dispatch(listener.as_ref(), event).await;
        }
    }
}
