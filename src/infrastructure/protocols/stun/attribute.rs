/// STUN/TURN attribute codec (RFC 5389 / RFC 5766)
use super::{MAGIC_COOKIE, MAGIC_COOKIE_HIGH};
use crate::domain::shared::{Result, SocketAddress, TurnError};
use bytes::{Buf, BufMut, BytesMut};
use std::fmt;

/// Attribute header: type (2 bytes) + length (2 bytes)
pub const ATTRIBUTE_HEADER_SIZE: usize = 4;

/// Address family code for IPv4
const FAMILY_IPV4: u8 = 0x01;

/// Placeholder for string attributes that are not valid UTF-8
pub const INVALID_UTF8_PLACEHOLDER: &str = "<invalid utf-8>";

/// Transport protocol number for UDP (REQUESTED-TRANSPORT)
pub const TRANSPORT_UDP: u8 = 17;

/// STUN/TURN attribute type codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeType {
    MappedAddress = 0x0001,
    ErrorCode = 0x0009,
    Lifetime = 0x000D,
    XorPeerAddress = 0x0012,
    Data = 0x0013,
    Realm = 0x0014,
    Nonce = 0x0015,
    XorRelayedAddress = 0x0016,
    RequestedTransport = 0x0019,
    DontFragment = 0x001A,
    XorMappedAddress = 0x0020,
    Software = 0x8022,
    ResponseOrigin = 0x802B,
}

impl AttributeType {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0001 => Some(AttributeType::MappedAddress),
            0x0009 => Some(AttributeType::ErrorCode),
            0x000D => Some(AttributeType::Lifetime),
            0x0012 => Some(AttributeType::XorPeerAddress),
            0x0013 => Some(AttributeType::Data),
            0x0014 => Some(AttributeType::Realm),
            0x0015 => Some(AttributeType::Nonce),
            0x0016 => Some(AttributeType::XorRelayedAddress),
            0x0019 => Some(AttributeType::RequestedTransport),
            0x001A => Some(AttributeType::DontFragment),
            0x0020 => Some(AttributeType::XorMappedAddress),
            0x8022 => Some(AttributeType::Software),
            0x802B => Some(AttributeType::ResponseOrigin),
            _ => None,
        }
    }

    pub fn to_u16(self) -> u16 {
        self as u16
    }
}

/// ERROR-CODE value in the RFC 5389 range: class 3..=6, number 0..=99
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ErrorCode(u16);

impl ErrorCode {
    pub const MIN: u16 = 300;
    pub const MAX: u16 = 699;

    pub fn new(code: u16) -> Result<Self> {
        if (Self::MIN..=Self::MAX).contains(&code) {
            Ok(Self(code))
        } else {
            Err(TurnError::InvalidArgument(format!(
                "error code {} outside {}..={}",
                code,
                Self::MIN,
                Self::MAX
            )))
        }
    }

    fn from_parts(class: u8, number: u8) -> Option<Self> {
        if number > 99 {
            return None;
        }
        Self::new(class as u16 * 100 + number as u16).ok()
    }

    pub fn code(self) -> u16 {
        self.0
    }

    pub fn class(self) -> u8 {
        (self.0 / 100) as u8
    }

    pub fn number(self) -> u8 {
        (self.0 % 100) as u8
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A decoded attribute. Unrecognised or malformed bodies become `Unknown`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attribute {
    /// MAPPED-ADDRESS
    MappedAddress(SocketAddress),
    /// XOR-MAPPED-ADDRESS - server-reflexive address
    XorMappedAddress(SocketAddress),
    /// XOR-RELAYED-ADDRESS - the relayed transport address
    XorRelayedAddress(SocketAddress),
    /// XOR-PEER-ADDRESS - a peer's address
    XorPeerAddress(SocketAddress),
    /// RESPONSE-ORIGIN
    ResponseOrigin(SocketAddress),
    /// ERROR-CODE - numeric code and reason phrase
    ErrorCode { code: ErrorCode, reason: String },
    /// LIFETIME - allocation lifetime in seconds
    Lifetime(u32),
    /// DATA - application payload
    Data(Vec<u8>),
    /// REQUESTED-TRANSPORT - IP protocol number
    RequestedTransport(u8),
    /// DONT-FRAGMENT
    DontFragment,
    /// SOFTWARE
    Software(String),
    /// REALM
    Realm(String),
    /// NONCE
    Nonce(String),
    /// Anything else, kept as an opaque blob
    Unknown { attr_type: u16, value: Vec<u8> },
}

impl Attribute {
    /// Wire type code
    pub fn attr_type(&self) -> u16 {
        match self {
            Attribute::MappedAddress(_) => AttributeType::MappedAddress.to_u16(),
            Attribute::XorMappedAddress(_) => AttributeType::XorMappedAddress.to_u16(),
            Attribute::XorRelayedAddress(_) => AttributeType::XorRelayedAddress.to_u16(),
            Attribute::XorPeerAddress(_) => AttributeType::XorPeerAddress.to_u16(),
            Attribute::ResponseOrigin(_) => AttributeType::ResponseOrigin.to_u16(),
            Attribute::ErrorCode { .. } => AttributeType::ErrorCode.to_u16(),
            Attribute::Lifetime(_) => AttributeType::Lifetime.to_u16(),
            Attribute::Data(_) => AttributeType::Data.to_u16(),
            Attribute::RequestedTransport(_) => AttributeType::RequestedTransport.to_u16(),
            Attribute::DontFragment => AttributeType::DontFragment.to_u16(),
            Attribute::Software(_) => AttributeType::Software.to_u16(),
            Attribute::Realm(_) => AttributeType::Realm.to_u16(),
            Attribute::Nonce(_) => AttributeType::Nonce.to_u16(),
            Attribute::Unknown { attr_type, .. } => *attr_type,
        }
    }

    /// ERROR-CODE attribute; fails for codes outside 300..=699
    pub fn error_code(code: u16, reason: impl Into<String>) -> Result<Self> {
        Ok(Attribute::ErrorCode {
            code: ErrorCode::new(code)?,
            reason: reason.into(),
        })
    }

    /// Serialize the attribute (header, value, zero padding) onto `buf`.
    ///
    /// The length field carries the unpadded value length.
    pub fn encode(&self, buf: &mut BytesMut) {
        let mut value = BytesMut::new();
        self.encode_value(&mut value);

        buf.put_u16(self.attr_type());
        buf.put_u16(value.len() as u16);
        buf.put_slice(&value);
        buf.put_bytes(0, padding_len(value.len()));
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.to_vec()
    }

    fn encode_value(&self, buf: &mut BytesMut) {
        match self {
            Attribute::MappedAddress(addr) | Attribute::ResponseOrigin(addr) => {
                encode_address(buf, *addr);
            }
            Attribute::XorMappedAddress(addr)
            | Attribute::XorRelayedAddress(addr)
            | Attribute::XorPeerAddress(addr) => {
                encode_address(buf, xor_address(*addr));
            }
            Attribute::ErrorCode { code, reason } => {
                // reserved, class, number
                buf.put_u16(0);
                buf.put_u8(code.class());
                buf.put_u8(code.number());
                buf.put_slice(reason.as_bytes());
            }
            Attribute::Lifetime(seconds) => buf.put_u32(*seconds),
            Attribute::Data(data) => buf.put_slice(data),
            Attribute::RequestedTransport(protocol) => {
                buf.put_u8(*protocol);
                // RFFU
                buf.put_bytes(0, 3);
            }
            Attribute::DontFragment => {}
            Attribute::Software(value) | Attribute::Realm(value) | Attribute::Nonce(value) => {
                buf.put_slice(value.as_bytes());
            }
            Attribute::Unknown { value, .. } => buf.put_slice(value),
        }
    }

    /// Decode an attribute body. Never fails: bodies that do not fit the
    /// expected layout are kept as `Unknown`.
    pub fn decode(attr_type: u16, value: &[u8]) -> Self {
        let unknown = || Attribute::Unknown {
            attr_type,
            value: value.to_vec(),
        };

        let Some(kind) = AttributeType::from_u16(attr_type) else {
            return unknown();
        };

        match kind {
            AttributeType::MappedAddress => decode_address(value)
                .map(Attribute::MappedAddress)
                .unwrap_or_else(unknown),
            AttributeType::ResponseOrigin => decode_address(value)
                .map(Attribute::ResponseOrigin)
                .unwrap_or_else(unknown),
            AttributeType::XorMappedAddress => decode_address(value)
                .map(|a| Attribute::XorMappedAddress(xor_address(a)))
                .unwrap_or_else(unknown),
            AttributeType::XorRelayedAddress => decode_address(value)
                .map(|a| Attribute::XorRelayedAddress(xor_address(a)))
                .unwrap_or_else(unknown),
            AttributeType::XorPeerAddress => decode_address(value)
                .map(|a| Attribute::XorPeerAddress(xor_address(a)))
                .unwrap_or_else(unknown),
            AttributeType::ErrorCode => {
                if value.len() < 4 {
                    return unknown();
                }
                match ErrorCode::from_parts(value[2] & 0x07, value[3]) {
                    Some(code) => Attribute::ErrorCode {
                        code,
                        reason: decode_string(&value[4..]),
                    },
                    None => unknown(),
                }
            }
            AttributeType::Lifetime => {
                if value.len() < 4 {
                    return unknown();
                }
                Attribute::Lifetime((&value[..4]).get_u32())
            }
            AttributeType::Data => Attribute::Data(value.to_vec()),
            AttributeType::RequestedTransport => match value.first() {
                Some(protocol) => Attribute::RequestedTransport(*protocol),
                None => unknown(),
            },
            AttributeType::DontFragment => Attribute::DontFragment,
            AttributeType::Software => Attribute::Software(decode_string(value)),
            AttributeType::Realm => Attribute::Realm(decode_string(value)),
            AttributeType::Nonce => Attribute::Nonce(decode_string(value)),
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Attribute::MappedAddress(a) => write!(f, "MAPPED-ADDRESS {}", a),
            Attribute::XorMappedAddress(a) => write!(f, "XOR-MAPPED-ADDRESS {}", a),
            Attribute::XorRelayedAddress(a) => write!(f, "XOR-RELAYED-ADDRESS {}", a),
            Attribute::XorPeerAddress(a) => write!(f, "XOR-PEER-ADDRESS {}", a),
            Attribute::ResponseOrigin(a) => write!(f, "RESPONSE-ORIGIN {}", a),
            Attribute::ErrorCode { code, reason } => write!(f, "ERROR-CODE {} {}", code, reason),
            Attribute::Lifetime(s) => write!(f, "LIFETIME {}s", s),
            Attribute::Data(d) => write!(f, "DATA ({} bytes)", d.len()),
            Attribute::RequestedTransport(p) => write!(f, "REQUESTED-TRANSPORT {}", p),
            Attribute::DontFragment => write!(f, "DONT-FRAGMENT"),
            Attribute::Software(s) => write!(f, "SOFTWARE {}", s),
            Attribute::Realm(s) => write!(f, "REALM {}", s),
            Attribute::Nonce(s) => write!(f, "NONCE {}", s),
            Attribute::Unknown { attr_type, value } => {
                write!(f, "0x{:04X} ({} bytes)", attr_type, value.len())
            }
        }
    }
}

/// Zero bytes needed after a value of `len` bytes to reach a 4-byte boundary
pub fn padding_len(len: usize) -> usize {
    (4 - (len % 4)) % 4
}

/// XOR an address with the magic cookie. Self-inverse.
pub fn xor_address(addr: SocketAddress) -> SocketAddress {
    SocketAddress::new(addr.ipv4() ^ MAGIC_COOKIE, addr.port() ^ MAGIC_COOKIE_HIGH)
}

/// reserved (1) | family (1) | port (2) | address (4)
fn encode_address(buf: &mut BytesMut, addr: SocketAddress) {
    buf.put_u8(0);
    buf.put_u8(FAMILY_IPV4);
    buf.put_u16(addr.port());
    buf.put_u32(addr.ipv4());
}

fn decode_address(mut value: &[u8]) -> Option<SocketAddress> {
    if value.len() < 8 {
        return None;
    }
    let _reserved = value.get_u8();
    if value.get_u8() != FAMILY_IPV4 {
        return None;
    }
    let port = value.get_u16();
    let ipv4 = value.get_u32();
    Some(SocketAddress::new(ipv4, port))
}

fn decode_string(value: &[u8]) -> String {
    match std::str::from_utf8(value) {
        Ok(s) => s.to_string(),
        Err(_) => INVALID_UTF8_PLACEHOLDER.to_string(),
    }
}
