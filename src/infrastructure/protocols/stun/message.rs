/// STUN message format (RFC 5389)
use super::attribute::{padding_len, Attribute, ATTRIBUTE_HEADER_SIZE, TRANSPORT_UDP};
use super::{HEADER_SIZE, MAGIC_COOKIE};
use crate::domain::shared::{Result, SocketAddress, TransactionId, TurnError};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Outbound message types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestType {
    Bind = 0x0001,
    Allocate = 0x0003,
    Refresh = 0x0004,
    CreatePermission = 0x0008,
    SendIndication = 0x0016,
}

impl RequestType {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0001 => Some(RequestType::Bind),
            0x0003 => Some(RequestType::Allocate),
            0x0004 => Some(RequestType::Refresh),
            0x0008 => Some(RequestType::CreatePermission),
            0x0016 => Some(RequestType::SendIndication),
            _ => None,
        }
    }

    pub fn to_u16(self) -> u16 {
        self as u16
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestType::Bind => "Bind",
            RequestType::Allocate => "Allocate",
            RequestType::Refresh => "Refresh",
            RequestType::CreatePermission => "CreatePermission",
            RequestType::SendIndication => "Send",
        }
    }
}

/// Inbound message types the client understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseType {
    BindSuccess = 0x0101,
    BindError = 0x0111,
    AllocateSuccess = 0x0103,
    AllocateError = 0x0113,
    RefreshSuccess = 0x0104,
    RefreshError = 0x0114,
    PermissionSuccess = 0x0108,
    PermissionError = 0x0118,
    DataIndication = 0x0017,
    /// Data indication code used by some older relays
    LegacyDataIndication = 0x0115,
}

impl ResponseType {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0101 => Some(ResponseType::BindSuccess),
            0x0111 => Some(ResponseType::BindError),
            0x0103 => Some(ResponseType::AllocateSuccess),
            0x0113 => Some(ResponseType::AllocateError),
            0x0104 => Some(ResponseType::RefreshSuccess),
            0x0114 => Some(ResponseType::RefreshError),
            0x0108 => Some(ResponseType::PermissionSuccess),
            0x0118 => Some(ResponseType::PermissionError),
            0x0017 => Some(ResponseType::DataIndication),
            0x0115 => Some(ResponseType::LegacyDataIndication),
            _ => None,
        }
    }

    pub fn to_u16(self) -> u16 {
        self as u16
    }

    /// The request this message answers, if any
    pub fn request(&self) -> Option<RequestType> {
        match self {
            ResponseType::BindSuccess | ResponseType::BindError => Some(RequestType::Bind),
            ResponseType::AllocateSuccess | ResponseType::AllocateError => {
                Some(RequestType::Allocate)
            }
            ResponseType::RefreshSuccess | ResponseType::RefreshError => {
                Some(RequestType::Refresh)
            }
            ResponseType::PermissionSuccess | ResponseType::PermissionError => {
                Some(RequestType::CreatePermission)
            }
            ResponseType::DataIndication | ResponseType::LegacyDataIndication => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(
            self,
            ResponseType::BindError
                | ResponseType::AllocateError
                | ResponseType::RefreshError
                | ResponseType::PermissionError
        )
    }
}

/// Fixed 20-byte header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub message_type: u16,
    pub length: u16,
    pub magic_cookie: u32,
    pub transaction_id: TransactionId,
}

/// A parsed message: header plus attributes in wire order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub header: MessageHeader,
    pub attributes: Vec<Attribute>,
}

impl Message {
    pub fn message_type(&self) -> u16 {
        self.header.message_type
    }

    pub fn transaction_id(&self) -> &TransactionId {
        &self.header.transaction_id
    }

    pub fn has_valid_cookie(&self) -> bool {
        self.header.magic_cookie == MAGIC_COOKIE
    }

    pub fn request_type(&self) -> Option<RequestType> {
        RequestType::from_u16(self.header.message_type)
    }

    pub fn response_type(&self) -> Option<ResponseType> {
        ResponseType::from_u16(self.header.message_type)
    }

    /// Get lifetime
    pub fn lifetime(&self) -> Option<u32> {
        self.attributes.iter().find_map(|attr| match attr {
            Attribute::Lifetime(seconds) => Some(*seconds),
            _ => None,
        })
    }

    /// Get relayed address
    pub fn relayed_address(&self) -> Option<SocketAddress> {
        self.attributes.iter().find_map(|attr| match attr {
            Attribute::XorRelayedAddress(addr) => Some(*addr),
            _ => None,
        })
    }

    /// Get XOR-mapped address
    pub fn xor_mapped_address(&self) -> Option<SocketAddress> {
        self.attributes.iter().find_map(|attr| match attr {
            Attribute::XorMappedAddress(addr) => Some(*addr),
            _ => None,
        })
    }

    /// Get plain mapped address
    pub fn mapped_address(&self) -> Option<SocketAddress> {
        self.attributes.iter().find_map(|attr| match attr {
            Attribute::MappedAddress(addr) => Some(*addr),
            _ => None,
        })
    }

    /// All XOR-PEER-ADDRESS entries, in wire order
    pub fn peer_addresses(&self) -> Vec<SocketAddress> {
        self.attributes
            .iter()
            .filter_map(|attr| match attr {
                Attribute::XorPeerAddress(addr) => Some(*addr),
                _ => None,
            })
            .collect()
    }

    /// Get error code and reason
    pub fn error_code(&self) -> Option<(u16, &str)> {
        self.attributes.iter().find_map(|attr| match attr {
            Attribute::ErrorCode { code, reason } => Some((code.code(), reason.as_str())),
            _ => None,
        })
    }

    /// Get software tag
    pub fn software(&self) -> Option<&str> {
        self.attributes.iter().find_map(|attr| match attr {
            Attribute::Software(value) => Some(value.as_str()),
            _ => None,
        })
    }

    /// Get data
    pub fn data(&self) -> Option<&[u8]> {
        self.attributes.iter().find_map(|attr| match attr {
            Attribute::Data(data) => Some(data.as_slice()),
            _ => None,
        })
    }
}

/// Largest attribute section the 16-bit length field can describe
pub const MAX_BODY_LEN: usize = 0xFFFC;

/// Encoded size of an XOR address attribute
const ADDRESS_ATTRIBUTE_LEN: usize = ATTRIBUTE_HEADER_SIZE + 8;

/// Largest DATA payload that fits in a send indication
pub const MAX_INDICATION_DATA_LEN: usize =
    MAX_BODY_LEN - ADDRESS_ATTRIBUTE_LEN - ATTRIBUTE_HEADER_SIZE;

/// Most peers a single CreatePermission request can carry
pub const MAX_PERMISSION_PEERS: usize = MAX_BODY_LEN / ADDRESS_ATTRIBUTE_LEN;

/// Serialize a message with an arbitrary type code.
///
/// The length field counts the encoded attribute section.
pub fn build_message(message_type: u16, transaction_id: &TransactionId, attributes: &[Attribute]) -> Bytes {
    let mut body = BytesMut::new();
    for attr in attributes {
        attr.encode(&mut body);
    }

    let mut packet = BytesMut::with_capacity(HEADER_SIZE + body.len());
    packet.put_u16(message_type);
    packet.put_u16(body.len() as u16);
    packet.put_u32(MAGIC_COOKIE);
    packet.put_slice(transaction_id.as_bytes());
    packet.put_slice(&body);

    packet.freeze()
}

/// Serialize a request or indication
pub fn build_request(transaction_id: &TransactionId, method: RequestType, attributes: &[Attribute]) -> Bytes {
    build_message(method.to_u16(), transaction_id, attributes)
}

/// Parse a message from bytes.
///
/// Fails only when the buffer is shorter than a header. Attribute parsing
/// stops quietly at the declared length or at the first attribute that
/// does not fit in the buffer, so trailing garbage is tolerated.
pub fn parse_message(data: &[u8]) -> Result<Message> {
    if data.len() < HEADER_SIZE {
        return Err(TurnError::MalformedPacket(format!(
            "message too short: {} bytes",
            data.len()
        )));
    }

    let mut header = &data[..HEADER_SIZE];
    let message_type = header.get_u16();
    let length = header.get_u16();
    let magic_cookie = header.get_u32();
    let mut transaction_id = [0u8; 12];
    header.copy_to_slice(&mut transaction_id);

    let end = (HEADER_SIZE + length as usize).min(data.len());
    let mut body = &data[HEADER_SIZE..end];
    let mut attributes = Vec::new();

    while body.len() >= ATTRIBUTE_HEADER_SIZE {
        let attr_type = body.get_u16();
        let attr_length = body.get_u16() as usize;

        if attr_length > body.len() {
            break;
        }

        attributes.push(Attribute::decode(attr_type, &body[..attr_length]));
        body.advance(attr_length);

        // Attributes are padded to 4-byte boundary
        let padding = padding_len(attr_length).min(body.len());
        body.advance(padding);
    }

    Ok(Message {
        header: MessageHeader {
            message_type,
            length,
            magic_cookie,
            transaction_id: TransactionId::from_bytes(transaction_id),
        },
        attributes,
    })
}

/// Binding request
pub fn bind_request(transaction_id: &TransactionId) -> Bytes {
    build_request(transaction_id, RequestType::Bind, &[])
}

/// Allocate request: REQUESTED-TRANSPORT (UDP), optional SOFTWARE, LIFETIME
pub fn allocate_request(transaction_id: &TransactionId, lifetime_secs: u32, software: Option<&str>) -> Bytes {
    let mut attributes = vec![Attribute::RequestedTransport(TRANSPORT_UDP)];
    if let Some(software) = software {
        attributes.push(Attribute::Software(software.to_string()));
    }
    attributes.push(Attribute::Lifetime(lifetime_secs));

    build_request(transaction_id, RequestType::Allocate, &attributes)
}

/// Refresh request; a lifetime of zero releases the allocation
pub fn refresh_request(transaction_id: &TransactionId, lifetime_secs: u32) -> Bytes {
    build_request(
        transaction_id,
        RequestType::Refresh,
        &[Attribute::Lifetime(lifetime_secs)],
    )
}

/// CreatePermission request with one XOR-PEER-ADDRESS per peer
pub fn create_permission_request(transaction_id: &TransactionId, peers: &[SocketAddress]) -> Bytes {
    let attributes: Vec<Attribute> = peers.iter().copied().map(Attribute::XorPeerAddress).collect();
    build_request(transaction_id, RequestType::CreatePermission, &attributes)
}

/// Send indication carrying `data` to `peer`
pub fn send_indication(transaction_id: &TransactionId, peer: SocketAddress, data: &[u8]) -> Bytes {
    build_request(
        transaction_id,
        RequestType::SendIndication,
        &[Attribute::XorPeerAddress(peer), Attribute::Data(data.to_vec())],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tid() -> TransactionId {
        TransactionId::from_bytes([0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11])
    }

    #[test]
    fn test_message_type_codes() {
        assert_eq!(RequestType::Allocate.to_u16(), 0x0003);
        assert_eq!(RequestType::SendIndication.to_u16(), 0x0016);
        assert_eq!(ResponseType::from_u16(0x0103), Some(ResponseType::AllocateSuccess));
        assert_eq!(ResponseType::from_u16(0x0115), Some(ResponseType::LegacyDataIndication));
        assert_eq!(ResponseType::from_u16(0x0003), None);
        assert_eq!(
            ResponseType::RefreshError.request(),
            Some(RequestType::Refresh)
        );
        assert!(ResponseType::AllocateError.is_error());
        assert!(!ResponseType::DataIndication.is_error());
    }

    #[test]
    fn test_bind_request_is_bare_header() {
        let bytes = bind_request(&tid());
        assert_eq!(bytes.len(), HEADER_SIZE);
        assert_eq!(&bytes[0..4], &[0x00, 0x01, 0x00, 0x00]);
        assert_eq!(&bytes[4..8], &MAGIC_COOKIE.to_be_bytes());
        assert_eq!(&bytes[8..20], tid().as_bytes());
    }

    #[test]
    fn test_allocate_request_with_software() {
        let bytes = allocate_request(&tid(), 600, Some("turnlink"));
        let message = parse_message(&bytes).unwrap();

        assert_eq!(message.request_type(), Some(RequestType::Allocate));
        assert_eq!(message.software(), Some("turnlink"));
        assert_eq!(message.lifetime(), Some(600));
        assert_eq!(message.header.length as usize, bytes.len() - HEADER_SIZE);
    }

    #[test]
    fn test_parse_too_short() {
        let err = parse_message(&[0u8; 19]).unwrap_err();
        assert!(matches!(err, TurnError::MalformedPacket(_)));
    }

    #[test]
    fn test_parse_stops_at_truncated_attribute() {
        let mut bytes = refresh_request(&tid(), 300).to_vec();
        // declare a second attribute longer than what follows
        bytes.extend_from_slice(&[0x00, 0x13, 0x00, 0x40, 0xAA]);
        let new_len = (bytes.len() - HEADER_SIZE) as u16;
        bytes[2..4].copy_from_slice(&new_len.to_be_bytes());

        let message = parse_message(&bytes).unwrap();
        assert_eq!(message.attributes, vec![Attribute::Lifetime(300)]);
    }

    #[test]
    fn test_parse_ignores_bytes_past_declared_length() {
        let mut bytes = refresh_request(&tid(), 300).to_vec();
        bytes.extend_from_slice(&[0x00, 0x0D, 0x00, 0x04, 0, 0, 0, 1]);

        let message = parse_message(&bytes).unwrap();
        assert_eq!(message.attributes, vec![Attribute::Lifetime(300)]);
    }

    #[test]
    fn test_parse_skips_unknown_attributes() {
        let attrs = vec![
            Attribute::Unknown {
                attr_type: 0x8055,
                value: vec![9, 9, 9, 9, 9],
            },
            Attribute::Lifetime(120),
        ];
        let bytes = build_message(0x0104, &tid(), &attrs);
        let message = parse_message(&bytes).unwrap();

        assert_eq!(message.response_type(), Some(ResponseType::RefreshSuccess));
        assert_eq!(message.lifetime(), Some(120));
        assert_eq!(message.attributes, attrs);
    }

    #[test]
    fn test_send_indication_layout() {
        let peer = SocketAddress::from_octets([198, 51, 100, 20], 41000);
        let bytes = send_indication(&tid(), peer, b"hello");
        let message = parse_message(&bytes).unwrap();

        assert_eq!(message.request_type(), Some(RequestType::SendIndication));
        assert_eq!(message.peer_addresses(), vec![peer]);
        assert_eq!(message.data(), Some(&b"hello"[..]));
        // 12 (peer) + 4 + 5 + 3 padding
        assert_eq!(message.header.length, 24);
    }

    #[test]
    fn test_largest_send_indication_fits_length_field() {
        let data = vec![0xAB; MAX_INDICATION_DATA_LEN];
        let peer = SocketAddress::from_octets([10, 0, 0, 1], 4000);
        let bytes = send_indication(&tid(), peer, &data);

        let message = parse_message(&bytes).unwrap();
        assert_eq!(message.header.length as usize, MAX_BODY_LEN);
        assert_eq!(bytes.len(), HEADER_SIZE + MAX_BODY_LEN);
        assert_eq!(message.data().map(<[u8]>::len), Some(MAX_INDICATION_DATA_LEN));
    }

    #[test]
    fn test_error_accessor() {
        let bytes = build_message(
            0x0113,
            &tid(),
            &[Attribute::error_code(486, "Allocation Quota Reached").unwrap()],
        );
        let message = parse_message(&bytes).unwrap();
        assert_eq!(message.error_code(), Some((486, "Allocation Quota Reached")));
    }
}
