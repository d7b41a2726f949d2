use crate::packet::PacketError;

/// One type-length-value attribute (RFC 2865 Section 5).
///
/// The relay treats attribute payloads as opaque bytes on the wire;
/// the typed accessors exist for the handful of attributes the
/// authorization modules inspect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub attr_type: u8,
    pub value: Vec<u8>,
}

impl Attribute {
    /// Header size: one type byte plus one length byte
    pub const HEADER_LENGTH: usize = 2;
    /// The length octet covers the header, capping the whole TLV at 255
    pub const MAX_LENGTH: usize = 255;
    /// Largest payload that fits under [`Self::MAX_LENGTH`]
    pub const MAX_VALUE_LENGTH: usize = Self::MAX_LENGTH - Self::HEADER_LENGTH;

    pub fn new(attr_type: u8, value: Vec<u8>) -> Result<Self, PacketError> {
        if value.len() > Self::MAX_VALUE_LENGTH {
            return Err(PacketError::AttributeError(format!(
                "value of attribute {} is {} bytes, max is {}",
                attr_type,
                value.len(),
                Self::MAX_VALUE_LENGTH
            )));
        }
        Ok(Attribute { attr_type, value })
    }

    pub fn string(attr_type: u8, value: impl Into<String>) -> Result<Self, PacketError> {
        Self::new(attr_type, value.into().into_bytes())
    }

    /// 32-bit big-endian integer attribute
    pub fn integer(attr_type: u8, value: u32) -> Result<Self, PacketError> {
        Self::new(attr_type, value.to_be_bytes().to_vec())
    }

    pub fn ipv4(attr_type: u8, value: [u8; 4]) -> Result<Self, PacketError> {
        Self::new(attr_type, value.to_vec())
    }

    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        let length = self.encoded_length();
        if length > Self::MAX_LENGTH {
            return Err(PacketError::AttributeError(format!(
                "attribute {} encodes to {} bytes",
                self.attr_type, length
            )));
        }
        let mut buffer = Vec::with_capacity(length);
        buffer.push(self.attr_type);
        buffer.push(length as u8);
        buffer.extend_from_slice(&self.value);
        Ok(buffer)
    }

    /// Decode the attribute at the front of `data`; trailing bytes
    /// belong to the next attribute and are ignored here.
    pub fn decode(data: &[u8]) -> Result<Self, PacketError> {
        if data.len() < Self::HEADER_LENGTH {
            return Err(PacketError::AttributeError(format!(
                "truncated attribute: {} bytes",
                data.len()
            )));
        }
        let attr_type = data[0];
        let length = data[1] as usize;
        if length < Self::HEADER_LENGTH {
            return Err(PacketError::AttributeError(format!(
                "attribute {} declares impossible length {}",
                attr_type, length
            )));
        }
        if data.len() < length {
            return Err(PacketError::AttributeError(format!(
                "attribute {} declares {} bytes, only {} present",
                attr_type,
                length,
                data.len()
            )));
        }
        Ok(Attribute {
            attr_type,
            value: data[Self::HEADER_LENGTH..length].to_vec(),
        })
    }

    pub fn encoded_length(&self) -> usize {
        Self::HEADER_LENGTH + self.value.len()
    }

    pub fn as_string(&self) -> Result<String, std::string::FromUtf8Error> {
        String::from_utf8(self.value.clone())
    }

    pub fn as_integer(&self) -> Result<u32, PacketError> {
        let bytes: [u8; 4] = self.value.as_slice().try_into().map_err(|_| {
            PacketError::AttributeError(format!(
                "attribute {} is not a 4-byte integer",
                self.attr_type
            ))
        })?;
        Ok(u32::from_be_bytes(bytes))
    }

    pub fn as_ipv4(&self) -> Result<[u8; 4], PacketError> {
        self.value.as_slice().try_into().map_err(|_| {
            PacketError::AttributeError(format!(
                "attribute {} is not a 4-byte address",
                self.attr_type
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::AttributeType;

    #[test]
    fn test_typed_constructors_roundtrip() {
        let name = Attribute::string(AttributeType::UserName as u8, "alice").unwrap();
        assert_eq!(name.as_string().unwrap(), "alice");

        let port = Attribute::integer(AttributeType::NasPort as u8, 47).unwrap();
        assert_eq!(port.as_integer().unwrap(), 47);

        let addr = Attribute::ipv4(AttributeType::NasIpAddress as u8, [10, 0, 0, 1]).unwrap();
        assert_eq!(addr.as_ipv4().unwrap(), [10, 0, 0, 1]);
    }

    #[test]
    fn test_encode_decode() {
        let attr = Attribute::string(AttributeType::CallingStationId as u8, "aa:bb").unwrap();
        let mut wire = attr.encode().unwrap();
        assert_eq!(wire[1] as usize, wire.len());

        // decode only consumes the declared length
        wire.extend_from_slice(&[99, 99]);
        assert_eq!(Attribute::decode(&wire).unwrap(), attr);
    }

    #[test]
    fn test_oversized_value_rejected() {
        assert!(Attribute::new(1, vec![0u8; Attribute::MAX_VALUE_LENGTH]).is_ok());
        assert!(Attribute::new(1, vec![0u8; Attribute::MAX_VALUE_LENGTH + 1]).is_err());
    }

    #[test]
    fn test_decode_rejects_bad_lengths() {
        assert!(Attribute::decode(&[1]).is_err());
        // declared length below the header size
        assert!(Attribute::decode(&[1, 1, 0]).is_err());
        // declared length past the end of the buffer
        assert!(Attribute::decode(&[1, 10, 0]).is_err());
    }

    #[test]
    fn test_wrong_width_accessors_fail() {
        let attr = Attribute::string(1, "abc").unwrap();
        assert!(attr.as_integer().is_err());
        assert!(attr.as_ipv4().is_err());
    }
}
