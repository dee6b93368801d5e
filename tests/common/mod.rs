//! Shared fixtures: scripted TURN servers (loopback UDP and in-memory) and
//! an event recorder
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex};
use turnlink::domain::{Allocation, ChannelAddress, SocketAddress, TransactionId};
use turnlink::infrastructure::transport::Transport;
use turnlink::{Result, TurnError};
use turnlink::infrastructure::protocols::stun::{
    build_message, parse_message, Attribute, Message, RequestType,
};
use turnlink::infrastructure::protocols::turn::{
    ChannelEvent, ChannelEventListener, ChannelSettings, RetransmitPolicy,
};

pub const WAIT: Duration = Duration::from_secs(2);

/// UDP peer that records requests and answers on demand
pub struct FakeTurnServer {
    socket: UdpSocket,
    address: SocketAddress,
}

impl FakeTurnServer {
    pub async fn bind() -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let address = SocketAddress::try_from(socket.local_addr().unwrap()).unwrap();
        Self { socket, address }
    }

    pub fn address(&self) -> SocketAddress {
        self.address
    }

    /// Next datagram, failing the test if none arrives in time
    pub async fn recv(&self) -> (Message, SocketAddr) {
        self.try_recv(WAIT)
            .await
            .expect("no datagram reached the fake server")
    }

    pub async fn try_recv(&self, wait: Duration) -> Option<(Message, SocketAddr)> {
        let mut buf = vec![0u8; 65_535];
        match tokio::time::timeout(wait, self.socket.recv_from(&mut buf)).await {
            Ok(Ok((size, from))) => Some((parse_message(&buf[..size]).unwrap(), from)),
            Ok(Err(e)) => panic!("fake server receive failed: {}", e),
            Err(_) => None,
        }
    }

    pub async fn reply(
        &self,
        to: SocketAddr,
        message_type: u16,
        transaction_id: &TransactionId,
        attributes: &[Attribute],
    ) {
        let packet = build_message(message_type, transaction_id, attributes);
        self.socket.send_to(&packet, to).await.unwrap();
    }

    /// Wait for the Allocate request and grant `relay` for 600 seconds
    pub async fn grant_allocation(&self, relay: SocketAddress) -> SocketAddr {
        let (request, from) = self.recv().await;
        assert_eq!(request.request_type(), Some(RequestType::Allocate));

        self.reply(
            from,
            0x0103,
            request.transaction_id(),
            &[
                Attribute::XorRelayedAddress(relay),
                Attribute::XorMappedAddress(reflexive()),
                Attribute::Lifetime(600),
            ],
        )
        .await;
        from
    }
}

/// Transport whose far end is a [`PipeServer`]; follows the tokio clock,
/// so it works under a paused runtime
pub struct PipeTransport {
    server: SocketAddress,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    inbound: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

#[async_trait::async_trait]
impl Transport for PipeTransport {
    async fn send(&self, packet: &[u8]) -> Result<bool> {
        self.outbound
            .send(packet.to_vec())
            .map_err(|_| TurnError::SendError("pipe closed".to_string()))?;
        Ok(true)
    }

    async fn receive(&self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        let mut inbound = self.inbound.lock().await;
        match tokio::time::timeout(timeout, inbound.recv()).await {
            Ok(Some(packet)) => Ok(Some(packet)),
            Ok(None) => Err(TurnError::ReceiveError("pipe closed".to_string())),
            Err(_) => Ok(None),
        }
    }

    fn server_address(&self) -> SocketAddress {
        self.server
    }

    fn local_address(&self) -> Option<SocketAddress> {
        Some(SocketAddress::from_octets([10, 0, 0, 2], 50000))
    }
}

/// Server end of an in-memory pipe
pub struct PipeServer {
    requests: mpsc::UnboundedReceiver<Vec<u8>>,
    replies: mpsc::UnboundedSender<Vec<u8>>,
}

pub fn pipe(server: SocketAddress) -> (Arc<PipeTransport>, PipeServer) {
    let (outbound, requests) = mpsc::unbounded_channel();
    let (replies, inbound) = mpsc::unbounded_channel();
    let transport = PipeTransport {
        server,
        outbound,
        inbound: Mutex::new(inbound),
    };
    (Arc::new(transport), PipeServer { requests, replies })
}

impl PipeServer {
    pub async fn recv(&mut self) -> Message {
        self.try_recv(WAIT)
            .await
            .expect("no datagram reached the pipe server")
    }

    pub async fn try_recv(&mut self, wait: Duration) -> Option<Message> {
        match tokio::time::timeout(wait, self.requests.recv()).await {
            Ok(Some(packet)) => Some(parse_message(&packet).unwrap()),
            Ok(None) => panic!("channel dropped its end of the pipe"),
            Err(_) => None,
        }
    }

    pub fn reply(&self, message_type: u16, transaction_id: &TransactionId, attributes: &[Attribute]) {
        let packet = build_message(message_type, transaction_id, attributes);
        self.replies.send(packet.to_vec()).unwrap();
    }
}

pub fn relay() -> SocketAddress {
    SocketAddress::from_octets([203, 0, 113, 5], 55000)
}

pub fn reflexive() -> SocketAddress {
    SocketAddress::from_octets([198, 51, 100, 2], 61000)
}

/// Short receive timeout, no retransmission
pub fn fast_settings() -> ChannelSettings {
    ChannelSettings {
        receive_timeout: Duration::from_millis(50),
        retransmit: RetransmitPolicy::disabled(),
        ..ChannelSettings::default()
    }
}

/// Turns listener callbacks back into events on a queue
pub struct RecordingListener {
    events: mpsc::UnboundedSender<ChannelEvent>,
}

impl RecordingListener {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ChannelEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { events }), rx)
    }

    fn push(&self, event: ChannelEvent) {
        let _ = self.events.send(event);
    }
}

#[async_trait::async_trait]
impl ChannelEventListener for RecordingListener {
    async fn on_bind_success(&self, mapped: Option<SocketAddress>) {
        self.push(ChannelEvent::BindSuccess { mapped });
    }

    async fn on_bind_error(&self, code: u16, reason: &str) {
        self.push(ChannelEvent::BindError {
            code,
            reason: reason.to_string(),
        });
    }

    async fn on_allocated(&self, address: &ChannelAddress, allocation: &Allocation) {
        self.push(ChannelEvent::Allocated {
            address: *address,
            allocation: allocation.clone(),
        });
    }

    async fn on_allocate_error(&self, code: u16, reason: &str) {
        self.push(ChannelEvent::AllocateError {
            code,
            reason: reason.to_string(),
        });
    }

    async fn on_refreshed(&self, lifetime_secs: u32) {
        self.push(ChannelEvent::Refreshed { lifetime_secs });
    }

    async fn on_refresh_error(&self, code: u16, reason: &str) {
        self.push(ChannelEvent::RefreshError {
            code,
            reason: reason.to_string(),
        });
    }

    async fn on_permission_granted(&self, peers: &[SocketAddress]) {
        self.push(ChannelEvent::PermissionGranted {
            peers: peers.to_vec(),
        });
    }

    async fn on_permission_error(&self, code: u16, reason: &str) {
        self.push(ChannelEvent::PermissionError {
            code,
            reason: reason.to_string(),
        });
    }

    async fn on_data(&self, peer: Option<SocketAddress>, data: &[u8]) {
        self.push(ChannelEvent::DataReceived {
            peer,
            data: data.to_vec(),
        });
    }

    async fn on_request_timed_out(&self, request: RequestType) {
        self.push(ChannelEvent::RequestTimedOut { request });
    }

    async fn on_closed(&self, reason: Option<&str>) {
        self.push(ChannelEvent::Closed {
            reason: reason.map(str::to_string),
        });
    }
}

pub async fn next_event(rx: &mut mpsc::UnboundedReceiver<ChannelEvent>) -> ChannelEvent {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for a channel event")
        .expect("event queue closed")
}

pub async fn no_event(rx: &mut mpsc::UnboundedReceiver<ChannelEvent>, wait: Duration) -> bool {
    tokio::time::timeout(wait, rx.recv()).await.is_err()
}
