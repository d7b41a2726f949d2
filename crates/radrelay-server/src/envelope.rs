//! Datagram envelope with memoized parsing

use radrelay_proto::{Packet, PacketError};
use std::net::SocketAddr;

/// A raw datagram from a client together with its lazily-parsed packet.
///
/// Parsing is attempted at most once per envelope; mid-negotiation EAP
/// reads frequently fail to parse and that failure is expected, so it
/// is stored rather than raised. Once either the packet or the error is
/// set, further `ensure_parsed` calls are no-ops regardless of secret.
#[derive(Debug)]
pub struct PacketEnvelope {
    sender: Option<SocketAddr>,
    raw: Vec<u8>,
    parsed: Option<Packet>,
    parse_error: Option<PacketError>,
}

impl PacketEnvelope {
    pub fn new(raw: impl Into<Vec<u8>>, sender: Option<SocketAddr>) -> Self {
        PacketEnvelope {
            sender,
            raw: raw.into(),
            parsed: None,
            parse_error: None,
        }
    }

    /// Parse the raw bytes with the given secret, unless a parse was
    /// already attempted.
    pub fn ensure_parsed(&mut self, secret: &[u8]) {
        if self.parsed.is_some() || self.parse_error.is_some() {
            return;
        }
        match Packet::parse(&self.raw, secret) {
            Ok(packet) => self.parsed = Some(packet),
            Err(e) => self.parse_error = Some(e),
        }
    }

    pub fn sender(&self) -> Option<SocketAddr> {
        self.sender
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    pub fn packet(&self) -> Option<&Packet> {
        self.parsed.as_ref()
    }

    /// True once a parse attempt failed; callers treat this as
    /// "nothing to check yet", not as a rejection.
    pub fn failed_parse(&self) -> bool {
        self.parse_error.is_some()
    }
}
