//! Domain result type

use super::error::TurnError;

/// Standard result type for client operations
pub type Result<T> = std::result::Result<T, TurnError>;
