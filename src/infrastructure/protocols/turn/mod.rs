/// TURN (Traversal Using Relays around NAT) client channel
/// RFC 5766
pub mod channel;
pub mod listener;
pub mod machine;
pub mod retransmit;

pub use channel::{ChannelSettings, PeerChannel};
pub use listener::{ChannelEventListener, ListenerHandle, ListenerRegistry};
pub use machine::{ChannelCore, ChannelEvent, ChannelState};
pub use retransmit::{RetransmitAction, RetransmitPolicy, RetransmitQueue};
