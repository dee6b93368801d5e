//! Allocation bookkeeping: granted lifetime, refresh schedule, permissions

use super::shared::SocketAddress;
use std::time::Duration;
use tokio::time::Instant;

/// Refresh is sent this many seconds before the server-side expiry
pub const REFRESH_MARGIN_SECS: u32 = 60;

/// Lower bound on the refresh interval
pub const MIN_REFRESH_INTERVAL_SECS: u32 = 60;

/// Effective refresh interval for a granted lifetime:
/// `max(lifetime - 60, 60)` seconds.
pub fn refresh_interval(lifetime_secs: u32) -> Duration {
    let secs = lifetime_secs
        .saturating_sub(REFRESH_MARGIN_SECS)
        .max(MIN_REFRESH_INTERVAL_SECS);
    Duration::from_secs(secs as u64)
}

/// State produced by a successful Allocate response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub relayed_address: SocketAddress,
    pub reflexive_address: Option<SocketAddress>,
    pub lifetime_secs: u32,
    pub software: Option<String>,
}

/// Tracks when the next Refresh is due
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshSchedule {
    interval: Duration,
    last_refresh: Instant,
}

impl RefreshSchedule {
    pub fn new(lifetime_secs: u32, now: Instant) -> Self {
        Self {
            interval: refresh_interval(lifetime_secs),
            last_refresh: now,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn last_refresh(&self) -> Instant {
        self.last_refresh
    }

    pub fn next_due(&self) -> Instant {
        self.last_refresh + self.interval
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_refresh) >= self.interval
    }

    pub fn mark_refreshed(&mut self, now: Instant) {
        self.last_refresh = now;
    }

    /// Apply a new granted lifetime and restart the countdown
    pub fn reschedule(&mut self, lifetime_secs: u32, now: Instant) {
        self.interval = refresh_interval(lifetime_secs);
        self.last_refresh = now;
    }
}

/// Peer addresses for which CreatePermission has succeeded, in insertion order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionSet {
    peers: Vec<SocketAddress>,
}

impl PermissionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a peer; returns false if it was already present
    pub fn insert(&mut self, peer: SocketAddress) -> bool {
        if self.peers.contains(&peer) {
            return false;
        }
        self.peers.push(peer);
        true
    }

    pub fn contains(&self, peer: &SocketAddress) -> bool {
        self.peers.contains(peer)
    }

    pub fn remove(&mut self, peer: &SocketAddress) {
        self.peers.retain(|p| p != peer);
    }

    pub fn clear(&mut self) {
        self.peers.clear();
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SocketAddress> {
        self.peers.iter()
    }

    pub fn as_slice(&self) -> &[SocketAddress] {
        &self.peers
    }
}

impl Extend<SocketAddress> for PermissionSet {
    fn extend<T: IntoIterator<Item = SocketAddress>>(&mut self, iter: T) {
        for peer in iter {
            self.insert(peer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_interval() {
        assert_eq!(refresh_interval(600), Duration::from_secs(540));
        assert_eq!(refresh_interval(300), Duration::from_secs(240));
        // floor for short-lived servers
        assert_eq!(refresh_interval(90), Duration::from_secs(60));
        assert_eq!(refresh_interval(0), Duration::from_secs(60));
    }

    #[test]
    fn test_refresh_not_due_before_interval() {
        let start = Instant::now();
        let schedule = RefreshSchedule::new(300, start);

        assert!(!schedule.is_due(start));
        assert!(!schedule.is_due(start + Duration::from_secs(239)));
        assert!(!schedule.is_due(start + Duration::from_millis(239_999)));
        assert!(schedule.is_due(start + Duration::from_secs(240)));
        assert!(schedule.is_due(start + Duration::from_secs(500)));
        assert_eq!(schedule.next_due(), start + Duration::from_secs(240));
    }

    #[test]
    fn test_reschedule_resets_countdown() {
        let start = Instant::now();
        let mut schedule = RefreshSchedule::new(300, start);

        let later = start + Duration::from_secs(240);
        schedule.reschedule(600, later);

        assert_eq!(schedule.interval(), Duration::from_secs(540));
        assert!(!schedule.is_due(later + Duration::from_secs(539)));
        assert!(schedule.is_due(later + Duration::from_secs(540)));
    }

    #[test]
    fn test_permission_set_keeps_insertion_order() {
        let a = SocketAddress::from_octets([10, 0, 0, 1], 1000);
        let b = SocketAddress::from_octets([10, 0, 0, 2], 2000);
        let c = SocketAddress::from_octets([10, 0, 0, 3], 3000);

        let mut set = PermissionSet::new();
        assert!(set.insert(b));
        assert!(set.insert(a));
        assert!(!set.insert(b));
        set.extend([c, a]);

        assert_eq!(set.as_slice(), &[b, a, c]);
        assert!(set.contains(&c));

        set.remove(&a);
        assert_eq!(set.len(), 2);
        assert!(!set.contains(&a));
    }
}
