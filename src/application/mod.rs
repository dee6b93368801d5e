//! Application layer - Use cases and application services
//!
//! Wraps one TURN channel behind the client façade applications use.

pub mod client;

pub use client::{ClientEventHandler, TurnClient};
