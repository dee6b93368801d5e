//! Wire protocols

pub mod stun;
pub mod turn;
