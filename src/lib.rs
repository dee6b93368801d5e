//! turnlink - A STUN/TURN client built with Rust
//!
//! Allocates a relayed transport address on a TURN server, keeps it
//! refreshed, authorizes peers and exchanges data indications through it.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

// Re-export commonly used types
pub use application::{ClientEventHandler, TurnClient};
pub use domain::shared::error::TurnError;
pub use domain::shared::result::Result;
