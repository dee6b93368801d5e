//! Channel event subscribers

use super::machine::ChannelEvent;
use crate::domain::allocation::Allocation;
use crate::domain::channel_address::ChannelAddress;
use crate::domain::shared::SocketAddress;
use crate::infrastructure::protocols::stun::RequestType;
use std::sync::Arc;
use uuid::Uuid;

/// Receives channel events; every method defaults to a no-op
#[async_trait::async_trait]
pub trait ChannelEventListener: Send + Sync {
    async fn on_bind_success(&self, _mapped: Option<SocketAddress>) {}

    async fn on_bind_error(&self, _code: u16, _reason: &str) {}

    async fn on_allocated(&self, _address: &ChannelAddress, _allocation: &Allocation) {}

    async fn on_allocate_error(&self, _code: u16, _reason: &str) {}

    async fn on_refreshed(&self, _lifetime_secs: u32) {}

    async fn on_refresh_error(&self, _code: u16, _reason: &str) {}

    async fn on_permission_granted(&self, _peers: &[SocketAddress]) {}

    async fn on_permission_error(&self, _code: u16, _reason: &str) {}

    async fn on_data(&self, _peer: Option<SocketAddress>, _data: &[u8]) {}

    async fn on_request_timed_out(&self, _request: RequestType) {}

    /// The worker exited; `reason` is set when a socket failure ended it
    async fn on_closed(&self, _reason: Option<&str>) {}
}

/// Stable handle returned by [`ListenerRegistry::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle(Uuid);

impl ListenerHandle {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

/// Ordered subscriber list, de-duplicated by identity
#[derive(Default, Clone)]
pub struct ListenerRegistry {
    entries: Vec<(ListenerHandle, Arc<dyn ChannelEventListener>)>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a listener. Subscribing the same listener twice returns the
    /// handle it already has.
    pub fn subscribe(&mut self, listener: Arc<dyn ChannelEventListener>) -> ListenerHandle {
        if let Some((handle, _)) = self
            .entries
            .iter()
            .find(|(_, existing)| same_listener(existing, &listener))
        {
            return *handle;
        }

        let handle = ListenerHandle::new();
        self.entries.push((handle, listener));
        handle
    }

    /// Remove a listener; unknown handles are ignored
    pub fn unsubscribe(&mut self, handle: ListenerHandle) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(h, _)| *h != handle);
        self.entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Listeners in subscription order
    pub fn snapshot(&self) -> Vec<Arc<dyn ChannelEventListener>> {
        self.entries.iter().map(|(_, l)| l.clone()).collect()
    }
}

fn same_listener(a: &Arc<dyn ChannelEventListener>, b: &Arc<dyn ChannelEventListener>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

/// Deliver one event as exactly one listener call
pub async fn dispatch(listener: &dyn ChannelEventListener, event: &ChannelEvent) {
    match event {
        ChannelEvent::BindSuccess { mapped } => listener.on_bind_success(*mapped).await,
        ChannelEvent::BindError { code, reason } => listener.on_bind_error(*code, reason).await,
        ChannelEvent::Allocated {
            address,
            allocation,
        } => listener.on_allocated(address, allocation).await,
        ChannelEvent::AllocateError { code, reason } => {
            listener.on_allocate_error(*code, reason).await
        }
        ChannelEvent::Refreshed { lifetime_secs } => listener.on_refreshed(*lifetime_secs).await,
        ChannelEvent::RefreshError { code, reason } => {
            listener.on_refresh_error(*code, reason).await
        }
        ChannelEvent::PermissionGranted { peers } => listener.on_permission_granted(peers).await,
        ChannelEvent::PermissionError { code, reason } => {
            listener.on_permission_error(*code, reason).await
        }
        ChannelEvent::DataReceived { peer, data } => listener.on_data(*peer, data).await,
        ChannelEvent::RequestTimedOut { request } => listener.on_request_timed_out(*request).await,
        ChannelEvent::Closed { reason } => listener.on_closed(reason.as_deref()).await,
    }
}
