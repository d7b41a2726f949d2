use crate::packet::Packet;
use rand::Rng;

/// Generate a random Request Authenticator (16 bytes) per RFC 2865 Section 3
pub fn generate_request_authenticator() -> [u8; 16] {
    let mut rng = rand::thread_rng();
    let mut authenticator = [0u8; 16];
    rng.fill(&mut authenticator);
    authenticator
}

/// Calculate Response Authenticator per RFC 2865 Section 3
///
/// Response Authenticator = MD5(Code + ID + Length + Request Authenticator + Attributes + Secret)
///
/// Used when synthesizing Access-Reject responses without consulting
/// the backend.
pub fn calculate_response_authenticator(
    packet: &Packet,
    request_authenticator: &[u8; 16],
    secret: &[u8],
) -> [u8; 16] {
    let mut data = Vec::new();

    // Code (1 byte)
    data.push(packet.code.as_u8());

    // Identifier (1 byte)
    data.push(packet.identifier);

    // Length (2 bytes)
    let length = packet.length();
    data.push((length >> 8) as u8);
    data.push((length & 0xff) as u8);

    // Request Authenticator (16 bytes)
    data.extend_from_slice(request_authenticator);

    // Attributes
    for attr in &packet.attributes {
        if let Ok(encoded) = attr.encode() {
            data.extend_from_slice(&encoded);
        }
    }

    // Secret
    data.extend_from_slice(secret);

    // Calculate MD5
    let digest = md5::compute(&data);
    let mut authenticator = [0u8; 16];
    authenticator.copy_from_slice(&digest.0);
    authenticator
}

/// Verify that a Response Authenticator matches the expected value
/// calculated from the request authenticator and secret
pub fn verify_response_authenticator(
    response: &Packet,
    request_authenticator: &[u8; 16],
    secret: &[u8],
) -> bool {
    let calculated = calculate_response_authenticator(response, request_authenticator, secret);
    response.authenticator == calculated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Code;

    #[test]
    fn test_request_authenticator_randomness() {
        let a = generate_request_authenticator();
        let b = generate_request_authenticator();
        assert_ne!(a, b);
    }

    #[test]
    fn test_response_authenticator_depends_on_secret() {
        let request = Packet::new(Code::AccessRequest, b"secret".to_vec());
        let response = Packet {
            code: Code::AccessReject,
            identifier: request.identifier,
            authenticator: [0u8; 16],
            attributes: Vec::new(),
            secret: b"secret".to_vec(),
        };

        let with_secret =
            calculate_response_authenticator(&response, &request.authenticator, b"secret");
        let with_other =
            calculate_response_authenticator(&response, &request.authenticator, b"other");
        assert_ne!(with_secret, with_other);
    }
}
