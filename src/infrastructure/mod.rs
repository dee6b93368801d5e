//! Infrastructure layer - Technical implementations
//!
//! This layer contains:
//! - Protocol implementations (STUN, TURN)
//! - Datagram transport
//! - External service integrations (signaling, local address lookup)

pub mod metrics;
pub mod protocols;
pub mod resolver;
pub mod signaling;
pub mod transport;
