//! RADIUS wire format support for the radrelay proxy.
//!
//! This crate covers the subset of RFC 2865 a relaying proxy needs:
//! packet encoding and decoding, attribute access, and the
//! Response Authenticator math used to synthesize signed rejects.
//! It does not terminate EAP conversations or decide access itself.
//!
//! # Example
//!
//! ```rust
//! use radrelay_proto::{Code, Packet};
//!
//! // A client builds a request signed with its shared secret
//! let request = Packet::new(Code::AccessRequest, b"secret");
//! let bytes = request.encode().unwrap();
//!
//! // The proxy parses it with the secret it expects
//! let parsed = Packet::parse(&bytes, b"secret").unwrap();
//! assert_eq!(parsed.identifier, request.identifier);
//!
//! // A reject echoes the identifier and is signed with the same secret
//! let reject = parsed.response(Code::AccessReject);
//! assert_eq!(reject.identifier, request.identifier);
//! ```

pub mod attributes;
pub mod auth;
pub mod packet;

pub use attributes::{Attribute, AttributeType};
pub use auth::{
    calculate_response_authenticator, generate_request_authenticator,
    verify_response_authenticator,
};
pub use packet::{Code, Packet, PacketError};
