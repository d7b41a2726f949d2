//! Shared-secret resolution for client addresses
//!
//! Secrets come from two line-oriented files in the lib directory: a
//! `secrets` file whose `127.0.0.1` entry is the global secret, and an
//! optional `clients` file mapping address prefixes to per-client
//! secrets. A `0.0.0.0` key in the mapping matches every address.

use radrelay_proto::Packet;
use std::collections::HashMap;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;

/// Key in the secrets file holding the global secret
pub const LOCAL_KEY: &str = "127.0.0.1";
/// Mapping key that matches all client addresses
pub const WILDCARD_KEY: &str = "0.0.0.0";

#[derive(Error, Debug)]
pub enum SecretError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no secrets file: {0}")]
    MissingFile(String),
    #[error("no secrets found")]
    Empty,
    #[error("no packet secret")]
    NoDeclaredSecret,
    #[error("no client address")]
    NoClientAddress,
    #[error("matches no secrets")]
    NoMatch,
    #[error("does not match shared secret")]
    GlobalMismatch,
}

/// Resolves which shared secrets a sender may legitimately use.
///
/// The mapping table is read-only after load and safe for concurrent
/// lookups. Prefix matching is deliberately unordered and permissive:
/// every key that is a prefix of the sender's host (plus the wildcard)
/// is a candidate, and any candidate match accepts.
#[derive(Debug, Clone)]
pub struct SecretResolver {
    global: Vec<u8>,
    table: HashMap<String, Vec<u8>>,
}

impl SecretResolver {
    /// Resolver with only a global secret
    pub fn new(global: impl Into<Vec<u8>>) -> Self {
        SecretResolver {
            global: global.into(),
            table: HashMap::new(),
        }
    }

    /// Resolver with a per-address mapping table
    pub fn with_table(global: impl Into<Vec<u8>>, table: HashMap<String, Vec<u8>>) -> Self {
        SecretResolver {
            global: global.into(),
            table,
        }
    }

    /// Load the `secrets` file (and `clients` mapping, if present)
    /// from the lib directory
    pub fn from_lib_dir(dir: impl AsRef<Path>) -> Result<Self, SecretError> {
        let dir = dir.as_ref();
        let global = parse_secret_file(&dir.join("secrets"))?;
        let clients = dir.join("clients");
        let table = if clients.exists() {
            parse_secret_mappings(&clients)?
        } else {
            HashMap::new()
        };
        Ok(SecretResolver {
            global: global.into_bytes(),
            table,
        })
    }

    /// The secret packets are parsed with
    pub fn global_secret(&self) -> &[u8] {
        &self.global
    }

    pub fn has_table(&self) -> bool {
        !self.table.is_empty()
    }

    /// Candidate secrets for a sender: every table entry whose key is
    /// a prefix of the sender's host, plus the wildcard entry
    pub fn resolve(&self, sender: Option<SocketAddr>) -> Vec<&[u8]> {
        if self.table.is_empty() {
            return vec![&self.global];
        }
        let host = match sender {
            Some(addr) => addr.ip().to_string(),
            None => return Vec::new(),
        };
        self.table
            .iter()
            .filter(|(key, _)| host.starts_with(key.as_str()) || key.as_str() == WILDCARD_KEY)
            .map(|(_, secret)| secret.as_slice())
            .collect()
    }

    /// Check the packet's declared secret against the candidates for
    /// its sender. No side effects; safe for concurrent calls.
    pub fn verify(&self, packet: &Packet, sender: Option<SocketAddr>) -> Result<(), SecretError> {
        if packet.secret.is_empty() {
            return Err(SecretError::NoDeclaredSecret);
        }
        if self.table.is_empty() {
            if packet.secret != self.global {
                return Err(SecretError::GlobalMismatch);
            }
            return Ok(());
        }
        if sender.is_none() {
            return Err(SecretError::NoClientAddress);
        }
        let candidates = self.resolve(sender);
        if candidates.iter().any(|c| *c == packet.secret.as_slice()) {
            Ok(())
        } else {
            Err(SecretError::NoMatch)
        }
    }
}

fn parse_secret_file(path: &Path) -> Result<String, SecretError> {
    let lines = parse_secret_lines(path, false)?;
    lines.get(LOCAL_KEY).cloned().ok_or(SecretError::Empty)
}

fn parse_secret_mappings(path: &Path) -> Result<HashMap<String, Vec<u8>>, SecretError> {
    let lines = parse_secret_lines(path, true)?;
    Ok(lines
        .into_iter()
        .map(|(k, v)| (k, v.into_bytes()))
        .collect())
}

fn parse_secret_lines(path: &Path, mapping: bool) -> Result<HashMap<String, String>, SecretError> {
    if !path.exists() {
        return Err(SecretError::MissingFile(path.display().to_string()));
    }
    let contents = fs::read_to_string(path)?;
    let mut lines = HashMap::new();
    for line in contents.lines() {
        if line.starts_with('#') {
            continue;
        }
        if !mapping && !line.starts_with(LOCAL_KEY) {
            continue;
        }
        let mut parts = line.split(' ');
        let key = match parts.next() {
            Some(k) if !k.is_empty() => k.to_string(),
            _ => continue,
        };
        let secret = parts.collect::<Vec<_>>().join(" ").trim().to_string();
        if secret.is_empty() {
            continue;
        }
        if mapping {
            lines.insert(key, secret);
        } else {
            lines.insert(LOCAL_KEY.to_string(), secret);
            break;
        }
    }
    if lines.is_empty() && !mapping {
        return Err(SecretError::Empty);
    }
    Ok(lines)
}
