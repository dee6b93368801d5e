//! Shared kernel - Common types used across the protocol engine

pub mod error;
pub mod result;
pub mod value_objects;

pub use error::TurnError;
pub use result::Result;
pub use value_objects::*;
