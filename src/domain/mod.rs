//! Domain layer - Core types and rules
//!
//! This layer contains:
//! - Value Objects: addresses and transaction ids
//! - Allocation bookkeeping: lifetime, refresh schedule, permissions

pub mod allocation;
pub mod channel_address;
pub mod shared;

// Re-export commonly used types
pub use allocation::{Allocation, PermissionSet, RefreshSchedule};
pub use channel_address::ChannelAddress;
pub use shared::{Result, SocketAddress, TransactionId, TurnError};
