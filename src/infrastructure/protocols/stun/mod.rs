/// STUN message and attribute codec (RFC 5389), with the TURN
/// extensions of RFC 5766
pub mod attribute;
pub mod message;

pub use attribute::{padding_len, xor_address, Attribute, AttributeType, ErrorCode};
pub use message::{
    build_message, build_request, parse_message, Message, MessageHeader, RequestType,
    ResponseType, MAX_BODY_LEN, MAX_INDICATION_DATA_LEN, MAX_PERMISSION_PEERS,
};

/// Magic cookie carried in every message header
pub const MAGIC_COOKIE: u32 = 0x2112A442;

/// Upper 16 bits of the magic cookie, used to XOR ports
pub const MAGIC_COOKIE_HIGH: u16 = (MAGIC_COOKIE >> 16) as u16;

/// Fixed message header size
pub const HEADER_SIZE: usize = 20;
