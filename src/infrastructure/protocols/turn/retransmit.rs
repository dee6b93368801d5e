//! Request retransmission with exponential backoff

use crate::infrastructure::protocols::stun::RequestType;
use bytes::Bytes;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Retransmission settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetransmitPolicy {
    pub enabled: bool,
    /// Wait before the first resend; doubled after every resend
    pub initial_rto: Duration,
    /// Total transmissions, the original send included
    pub max_attempts: u32,
}

impl Default for RetransmitPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_rto: Duration::from_millis(500),
            max_attempts: 7,
        }
    }
}

impl RetransmitPolicy {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

/// What the worker must do for an expired request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetransmitAction {
    Resend(RequestType, Bytes),
    GiveUp(RequestType),
}

#[derive(Debug, Clone)]
struct PendingRequest {
    packet: Bytes,
    attempts: u32,
    rto: Duration,
    deadline: Instant,
}

/// Outstanding requests, at most one per request type
#[derive(Debug)]
pub struct RetransmitQueue {
    policy: RetransmitPolicy,
    pending: HashMap<RequestType, PendingRequest>,
}

impl RetransmitQueue {
    pub fn new(policy: RetransmitPolicy) -> Self {
        Self {
            policy,
            pending: HashMap::new(),
        }
    }

    /// Start tracking a request that was just sent; replaces any older
    /// outstanding request of the same type
    pub fn track(&mut self, request: RequestType, packet: Bytes, now: Instant) {
        if !self.policy.enabled {
            return;
        }

        self.pending.insert(
            request,
            PendingRequest {
                packet,
                attempts: 1,
                rto: self.policy.initial_rto,
                deadline: now + self.policy.initial_rto,
            },
        );
    }

    pub fn is_enabled(&self) -> bool {
        self.policy.enabled
    }

    /// A response arrived; returns whether the request was outstanding
    pub fn complete(&mut self, request: RequestType) -> bool {
        self.pending.remove(&request).is_some()
    }

    pub fn is_pending(&self, request: RequestType) -> bool {
        self.pending.contains_key(&request)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Earliest deadline among outstanding requests
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|p| p.deadline).min()
    }

    /// Collect resends and give-ups for every request whose deadline passed
    pub fn poll(&mut self, now: Instant) -> Vec<RetransmitAction> {
        let mut expired: Vec<(RequestType, Instant)> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(request, p)| (*request, p.deadline))
            .collect();
        expired.sort_by_key(|(_, deadline)| *deadline);

        let max_attempts = self.policy.max_attempts.max(1);
        let mut actions = Vec::with_capacity(expired.len());

        for (request, _) in expired {
            let give_up = match self.pending.get_mut(&request) {
                Some(pending) if pending.attempts >= max_attempts => true,
                Some(pending) => {
                    pending.attempts += 1;
                    pending.rto *= 2;
                    pending.deadline = now + pending.rto;
                    actions.push(RetransmitAction::Resend(request, pending.packet.clone()));
                    false
                }
                None => false,
            };

            if give_up {
                self.pending.remove(&request);
                actions.push(RetransmitAction::GiveUp(request));
            }
        }

        actions
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
