//! Channel protocol core
//!
//! Pure state machine: builds outbound requests and turns inbound
//! datagrams into events. Socket I/O and timing live in the worker task.

use crate::domain::allocation::{Allocation, PermissionSet, RefreshSchedule};
use crate::domain::channel_address::ChannelAddress;
use crate::domain::shared::{Result, SocketAddress, TransactionId, TurnError};
use crate::infrastructure::metrics;
use crate::infrastructure::protocols::stun::message::{
    allocate_request, bind_request, create_permission_request, refresh_request, send_indication,
};
use crate::infrastructure::protocols::stun::{
    parse_message, Message, RequestType, ResponseType, MAX_INDICATION_DATA_LEN,
    MAX_PERMISSION_PEERS,
};
use bytes::Bytes;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Channel lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelState {
    Idle,
    Connecting,
    Listening,
    Allocated,
    Closed,
}

impl ChannelState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelState::Idle => "idle",
            ChannelState::Connecting => "connecting",
            ChannelState::Listening => "listening",
            ChannelState::Allocated => "allocated",
            ChannelState::Closed => "closed",
        }
    }
}

/// Everything a channel reports to its subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    BindSuccess {
        mapped: Option<SocketAddress>,
    },
    BindError {
        code: u16,
        reason: String,
    },
    Allocated {
        address: ChannelAddress,
        allocation: Allocation,
    },
    AllocateError {
        code: u16,
        reason: String,
    },
    Refreshed {
        lifetime_secs: u32,
    },
    RefreshError {
        code: u16,
        reason: String,
    },
    PermissionGranted {
        peers: Vec<SocketAddress>,
    },
    PermissionError {
        code: u16,
        reason: String,
    },
    DataReceived {
        peer: Option<SocketAddress>,
        data: Vec<u8>,
    },
    RequestTimedOut {
        request: RequestType,
    },
    Closed {
        reason: Option<String>,
    },
}

/// Protocol state of one channel
#[derive(Debug, Clone)]
pub struct ChannelCore {
    transaction_id: TransactionId,
    state: ChannelState,
    address: ChannelAddress,
    allocation: Option<Allocation>,
    schedule: Option<RefreshSchedule>,
    permissions: PermissionSet,
    pending_permissions: Vec<SocketAddress>,
    desired_lifetime_secs: u32,
    software: Option<String>,
}

impl ChannelCore {
    pub fn new(transaction_id: TransactionId, desired_lifetime_secs: u32, software: Option<String>) -> Self {
        Self {
            transaction_id,
            state: ChannelState::Idle,
            address: ChannelAddress::new(),
            allocation: None,
            schedule: None,
            permissions: PermissionSet::new(),
            pending_permissions: Vec::new(),
            desired_lifetime_secs,
            software,
        }
    }

    pub fn transaction_id(&self) -> &TransactionId {
        &self.transaction_id
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn address(&self) -> ChannelAddress {
        self.address
    }

    pub fn allocation(&self) -> Option<&Allocation> {
        self.allocation.as_ref()
    }

    pub fn permissions(&self) -> &PermissionSet {
        &self.permissions
    }

    pub fn desired_lifetime(&self) -> u32 {
        self.desired_lifetime_secs
    }

    pub fn set_desired_lifetime(&mut self, lifetime_secs: u32) {
        self.desired_lifetime_secs = lifetime_secs;
    }

    pub fn set_local_address(&mut self, local: SocketAddress) {
        self.address.local = Some(local);
    }

    /// Listening or Allocated
    pub fn is_active(&self) -> bool {
        matches!(self.state, ChannelState::Listening | ChannelState::Allocated)
    }

    pub fn mark_connecting(&mut self) -> Result<()> {
        if self.state != ChannelState::Idle {
            return Err(TurnError::InvalidState(format!(
                "cannot connect a channel that is {}",
                self.state.as_str()
            )));
        }
        self.state = ChannelState::Connecting;
        Ok(())
    }

    pub fn mark_listening(&mut self) -> Result<()> {
        if self.state != ChannelState::Connecting {
            return Err(TurnError::InvalidState(format!(
                "cannot listen on a channel that is {}",
                self.state.as_str()
            )));
        }
        self.state = ChannelState::Listening;
        Ok(())
    }

    pub fn mark_closed(&mut self) {
        self.state = ChannelState::Closed;
        self.schedule = None;
        self.pending_permissions.clear();
    }

    pub fn bind_request(&self) -> Bytes {
        bind_request(&self.transaction_id)
    }

    pub fn allocate_request(&self, lifetime_secs: u32) -> Bytes {
        allocate_request(&self.transaction_id, lifetime_secs, self.software.as_deref())
    }

    pub fn refresh_request(&self, lifetime_secs: u32) -> Bytes {
        refresh_request(&self.transaction_id, lifetime_secs)
    }

    /// CreatePermission for the relay addresses of `peers`.
    ///
    /// Peers without a relay address are skipped; returns `None` when none
    /// is left.
    pub fn permission_request(&mut self, peers: &[ChannelAddress]) -> Option<Bytes> {
        let relays: Vec<SocketAddress> = peers.iter().filter_map(|peer| peer.relay).collect();
        if relays.is_empty() {
            warn!("Permission request dropped: no peer has a relay address");
            return None;
        }
        if relays.len() > MAX_PERMISSION_PEERS {
            warn!(
                "Permission request dropped: {} peers exceed the limit of {}",
                relays.len(),
                MAX_PERMISSION_PEERS
            );
            return None;
        }

        let packet = create_permission_request(&self.transaction_id, &relays);
        self.pending_permissions = relays;
        Some(packet)
    }

    /// Send indication for `data`, or `None` when `to` has no usable address
    /// or `data` does not fit in one message
    pub fn send_indication(&self, data: &[u8], to: &ChannelAddress) -> Option<Bytes> {
        if data.len() > MAX_INDICATION_DATA_LEN {
            warn!(
                "Dropping {} bytes of data: larger than {} bytes",
                data.len(),
                MAX_INDICATION_DATA_LEN
            );
            return None;
        }

        match to.data_destination() {
            Some(peer) => Some(send_indication(&self.transaction_id, peer, data)),
            None => {
                warn!(
                    "Dropping {} bytes of data: destination has neither reflexive nor relay address",
                    data.len()
                );
                None
            }
        }
    }

    /// Zero-lifetime Refresh releasing the allocation, if one is held
    pub fn release_request(&self) -> Option<Bytes> {
        (self.state == ChannelState::Allocated).then(|| self.refresh_request(0))
    }

    pub fn refresh_due(&self, now: Instant) -> bool {
        self.state == ChannelState::Allocated
            && self.schedule.map_or(false, |schedule| schedule.is_due(now))
    }

    pub fn next_refresh(&self) -> Option<Instant> {
        match self.state {
            ChannelState::Allocated => self.schedule.map(|schedule| schedule.next_due()),
            _ => None,
        }
    }

    pub fn mark_refreshed(&mut self, now: Instant) {
        if let Some(schedule) = self.schedule.as_mut() {
            schedule.mark_refreshed(now);
        }
    }

    /// Validate and decode an inbound datagram.
    ///
    /// Returns `None` when the datagram is discarded: unparseable, wrong
    /// magic cookie, foreign transaction id, unknown type, or the channel
    /// is not listening.
    pub fn handle_datagram(&mut self, data: &[u8], now: Instant) -> Option<ChannelEvent> {
        self.handle_datagram_if(data, now, |_| true)
    }

    /// [`ChannelCore::handle_datagram`] that also discards, unapplied, any
    /// response whose request `outstanding` does not claim
    pub fn handle_datagram_if(
        &mut self,
        data: &[u8],
        now: Instant,
        outstanding: impl FnOnce(RequestType) -> bool,
    ) -> Option<ChannelEvent> {
        let message = match parse_message(data) {
            Ok(message) => message,
            Err(e) => {
                debug!("Discarding datagram: {}", e);
                metrics::record_datagram_discarded("malformed");
                return None;
            }
        };

        if !message.has_valid_cookie() {
            debug!(
                "Discarding datagram with magic cookie {:#010x}",
                message.header.magic_cookie
            );
            metrics::record_datagram_discarded("bad_cookie");
            return None;
        }

        if message.transaction_id() != &self.transaction_id {
            debug!(
                "Discarding datagram for foreign transaction {}",
                message.transaction_id()
            );
            metrics::record_datagram_discarded("foreign_transaction");
            return None;
        }

        let Some(kind) = message.response_type() else {
            debug!("Discarding message type {:#06x}", message.message_type());
            metrics::record_datagram_discarded("unknown_type");
            return None;
        };

        if !self.is_active() {
            debug!("Discarding {:?} while {}", kind, self.state.as_str());
            metrics::record_datagram_discarded("inactive");
            return None;
        }

        if let Some(request) = kind.request() {
            if !outstanding(request) {
                debug!("Discarding {:?} for a request no longer outstanding", kind);
                metrics::record_datagram_discarded("duplicate");
                return None;
            }
        }

        Some(self.apply(kind, &message, now))
    }

    fn apply(&mut self, kind: ResponseType, message: &Message, now: Instant) -> ChannelEvent {
        match kind {
            ResponseType::BindSuccess => {
                let mapped = message
                    .xor_mapped_address()
                    .or_else(|| message.mapped_address());
                if let Some(mapped) = mapped {
                    self.address.reflexive = Some(mapped);
                }
                ChannelEvent::BindSuccess { mapped }
            }
            ResponseType::BindError => {
                let (code, reason) = error_parts(message);
                ChannelEvent::BindError { code, reason }
            }
            ResponseType::AllocateSuccess => self.apply_allocation(message, now),
            ResponseType::AllocateError => {
                let (code, reason) = error_parts(message);
                self.allocation_failed(code, reason)
            }
            ResponseType::RefreshSuccess => self.apply_refresh(message, now),
            ResponseType::RefreshError => {
                let (code, reason) = error_parts(message);
                warn!("Refresh rejected ({}): {}", code, reason);
                ChannelEvent::RefreshError { code, reason }
            }
            ResponseType::PermissionSuccess => {
                let mut peers = message.peer_addresses();
                let pending = std::mem::take(&mut self.pending_permissions);
                if peers.is_empty() {
                    peers = pending;
                }
                self.permissions.extend(peers.iter().copied());
                debug!("Permission granted for {} peer(s)", peers.len());
                ChannelEvent::PermissionGranted { peers }
            }
            ResponseType::PermissionError => {
                self.pending_permissions.clear();
                let (code, reason) = error_parts(message);
                ChannelEvent::PermissionError { code, reason }
            }
            ResponseType::DataIndication | ResponseType::LegacyDataIndication => {
                ChannelEvent::DataReceived {
                    peer: message.peer_addresses().first().copied(),
                    data: message.data().unwrap_or_default().to_vec(),
                }
            }
        }
    }

    fn apply_allocation(&mut self, message: &Message, now: Instant) -> ChannelEvent {
        let Some(relayed_address) = message.relayed_address() else {
            return self.allocation_failed(0, "missing XOR-RELAYED-ADDRESS".to_string());
        };

        let lifetime_secs = message.lifetime().unwrap_or(self.desired_lifetime_secs);
        let reflexive_address = message.xor_mapped_address();

        self.address.relay = Some(relayed_address);
        if reflexive_address.is_some() {
            self.address.reflexive = reflexive_address;
        }

        let allocation = Allocation {
            relayed_address,
            reflexive_address,
            lifetime_secs,
            software: message.software().map(str::to_string),
        };

        self.allocation = Some(allocation.clone());
        self.schedule = Some(RefreshSchedule::new(lifetime_secs, now));
        self.state = ChannelState::Allocated;

        info!(
            "Allocated relay {} for {}s (reflexive {:?})",
            relayed_address, lifetime_secs, reflexive_address
        );

        ChannelEvent::Allocated {
            address: self.address,
            allocation,
        }
    }

    fn allocation_failed(&mut self, code: u16, reason: String) -> ChannelEvent {
        warn!("Allocation failed ({}): {}", code, reason);
        self.state = ChannelState::Listening;
        self.allocation = None;
        self.schedule = None;
        self.address.relay = None;
        ChannelEvent::AllocateError { code, reason }
    }

    fn apply_refresh(&mut self, message: &Message, now: Instant) -> ChannelEvent {
        let current = self
            .allocation
            .as_ref()
            .map_or(self.desired_lifetime_secs, |a| a.lifetime_secs);
        let lifetime_secs = message.lifetime().unwrap_or(current);

        if lifetime_secs == 0 {
            info!("Allocation released by server");
            self.state = ChannelState::Listening;
            self.allocation = None;
            self.schedule = None;
            self.address.relay = None;
            self.permissions.clear();
        } else {
            if let Some(allocation) = self.allocation.as_mut() {
                allocation.lifetime_secs = lifetime_secs;
            }
            match self.schedule.as_mut() {
                Some(schedule) => schedule.reschedule(lifetime_secs, now),
                None => self.schedule = Some(RefreshSchedule::new(lifetime_secs, now)),
            }
            debug!("Allocation refreshed for {}s", lifetime_secs);
        }

        ChannelEvent::Refreshed { lifetime_secs }
    }
}

fn error_parts(message: &Message) -> (u16, String) {
    message
        .error_code()
        .map(|(code, reason)| (code, reason.to_string()))
        .unwrap_or((0, "no ERROR-CODE attribute".to_string()))
}
