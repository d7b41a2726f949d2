use super::Code;
use crate::attributes::Attribute;
use crate::auth::{calculate_response_authenticator, generate_request_authenticator};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PacketError {
    #[error("Invalid packet length: {0}")]
    InvalidLength(usize),
    #[error("Invalid packet code: {0}")]
    InvalidCode(u8),
    #[error("Attribute error: {0}")]
    AttributeError(String),
    #[error("Packet too large: {0} bytes")]
    PacketTooLarge(usize),
}

/// RADIUS Packet structure as defined in RFC 2865 Section 3
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |     Code      |  Identifier   |            Length             |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                                                               |
/// |                         Authenticator                         |
/// |                                                               |
/// |                                                               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |  Attributes ...
/// +-+-+-+-+-+-+-+-+-+-+-+-+-
/// ```
///
/// A packet carries the shared secret it was created or parsed with;
/// the relay compares this declared secret against its secret table
/// and uses it to sign synthesized responses.
#[derive(Debug, Clone)]
pub struct Packet {
    /// Packet type (1 byte)
    pub code: Code,
    /// Packet identifier for matching requests/responses (1 byte)
    pub identifier: u8,
    /// Request Authenticator (16 bytes)
    pub authenticator: [u8; 16],
    /// List of attributes
    pub attributes: Vec<Attribute>,
    /// Shared secret this packet was created or parsed with
    pub secret: Vec<u8>,
}

impl Packet {
    /// Minimum RADIUS packet size (20 bytes: 1 code + 1 id + 2 length + 16 authenticator)
    pub const MIN_PACKET_SIZE: usize = 20;
    /// Maximum RADIUS packet size (4096 bytes as per RFC 2865)
    pub const MAX_PACKET_SIZE: usize = 4096;

    /// Create a new request packet with a random authenticator
    pub fn new(code: Code, secret: impl Into<Vec<u8>>) -> Self {
        Packet {
            code,
            identifier: rand::random(),
            authenticator: generate_request_authenticator(),
            attributes: Vec::new(),
            secret: secret.into(),
        }
    }

    pub fn add_attribute(&mut self, attribute: Attribute) {
        self.attributes.push(attribute);
    }

    /// Build a response to this packet: same identifier, given code,
    /// Response Authenticator computed from this packet's authenticator
    /// and declared secret.
    pub fn response(&self, code: Code) -> Packet {
        let mut response = Packet {
            code,
            identifier: self.identifier,
            authenticator: [0u8; 16],
            attributes: Vec::new(),
            secret: self.secret.clone(),
        };
        response.authenticator =
            calculate_response_authenticator(&response, &self.authenticator, &self.secret);
        response
    }

    /// Encode the packet to wire bytes
    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        let length = self.length();
        if length > Self::MAX_PACKET_SIZE {
            return Err(PacketError::PacketTooLarge(length));
        }
        let mut buffer = Vec::with_capacity(length);
        buffer.push(self.code.as_u8());
        buffer.push(self.identifier);
        buffer.extend_from_slice(&(length as u16).to_be_bytes());
        buffer.extend_from_slice(&self.authenticator);
        for attr in &self.attributes {
            buffer.extend_from_slice(&attr.encode()?);
        }
        Ok(buffer)
    }

    /// Decode a packet from wire bytes, attaching the secret it is
    /// expected to have been signed with. Bytes past the declared
    /// length are ignored per RFC 2865 Section 3.
    pub fn parse(data: &[u8], secret: &[u8]) -> Result<Self, PacketError> {
        if data.len() < Self::MIN_PACKET_SIZE {
            return Err(PacketError::InvalidLength(data.len()));
        }
        let code = Code::from_u8(data[0]).ok_or(PacketError::InvalidCode(data[0]))?;
        let identifier = data[1];
        let length = u16::from_be_bytes([data[2], data[3]]) as usize;
        if length < Self::MIN_PACKET_SIZE || length > Self::MAX_PACKET_SIZE {
            return Err(PacketError::InvalidLength(length));
        }
        if data.len() < length {
            return Err(PacketError::InvalidLength(data.len()));
        }
        let mut authenticator = [0u8; 16];
        authenticator.copy_from_slice(&data[4..20]);

        let mut attributes = Vec::new();
        let mut rest = &data[Self::MIN_PACKET_SIZE..length];
        while !rest.is_empty() {
            let attr = Attribute::decode(rest)?;
            rest = &rest[attr.encoded_length()..];
            attributes.push(attr);
        }

        Ok(Packet {
            code,
            identifier,
            authenticator,
            attributes,
            secret: secret.to_vec(),
        })
    }

    /// Get the length of the encoded packet
    pub fn length(&self) -> usize {
        let mut len = Self::MIN_PACKET_SIZE;
        for attr in &self.attributes {
            len += attr.encoded_length();
        }
        len
    }

    /// Find first attribute by type
    pub fn find_attribute(&self, attr_type: u8) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.attr_type == attr_type)
    }
}
