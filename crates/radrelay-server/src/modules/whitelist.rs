//! User+MAC whitelist gate
//!
//! A `manifest` file in the lib directory lists one `<login>.<mac>`
//! entry per line. A request passes only when its User-Name and
//! Calling-Station-Id, cleaned to lowercase alphanumerics and dots,
//! join to an entry in the manifest. Every decision is marked in the
//! module log with the NAS metadata from the request.

use crate::envelope::PacketEnvelope;
use crate::logbuf::{KeyValueStore, LogBuffer};
use crate::module::{Capabilities, Module, ModuleContext, ModuleError};
use radrelay_proto::{AttributeType, Packet};
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::warn;

pub struct WhitelistModule {
    manifest_path: PathBuf,
    manifest: Mutex<HashSet<String>>,
    logbuf: Option<Arc<LogBuffer>>,
}

/// Strip an identity component down to lowercase alphanumerics and dots
fn clean(input: &str) -> String {
    input
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '.')
        .collect()
}

fn string_attribute(packet: &Packet, attr_type: AttributeType) -> Option<String> {
    packet
        .find_attribute(attr_type as u8)
        .and_then(|a| a.as_string().ok())
}

impl WhitelistModule {
    pub fn new() -> Self {
        WhitelistModule {
            manifest_path: PathBuf::new(),
            manifest: Mutex::new(HashSet::new()),
            logbuf: None,
        }
    }

    fn load_manifest(&self) -> Result<(), ModuleError> {
        if !self.manifest_path.exists() {
            return Err(ModuleError::Setup(format!(
                "{} is missing",
                self.manifest_path.display()
            )));
        }
        let contents = fs::read_to_string(&self.manifest_path)?;
        let entries: HashSet<String> = contents
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        let mut kv = KeyValueStore::new();
        kv.add("Manifest", "reload");
        for (idx, entry) in entries.iter().enumerate() {
            kv.add(format!("Manifest-{}", idx), entry.clone());
        }
        self.log(kv);
        *self.manifest.lock().expect("manifest lock poisoned") = entries;
        Ok(())
    }

    fn log(&self, kv: KeyValueStore) {
        if let Some(logbuf) = &self.logbuf {
            logbuf.append(self.name(), &kv.lines());
        }
    }

    fn mark(&self, success: bool, user: &str, calling: &str, envelope: &PacketEnvelope) {
        // pre() only runs on parsed packets
        let Some(packet) = envelope.packet() else {
            return;
        };
        let mut nas = string_attribute(packet, AttributeType::NasIdentifier)
            .map(|s| clean(&s))
            .unwrap_or_default();
        if nas.is_empty() {
            nas = "unknown".to_string();
        }
        let nas_ip = match packet
            .find_attribute(AttributeType::NasIpAddress as u8)
            .and_then(|a| a.as_ipv4().ok())
        {
            Some(octets) => format!("{}.{}.{}.{}", octets[0], octets[1], octets[2], octets[3]),
            None => envelope
                .sender()
                .map(|a| a.ip().to_string())
                .unwrap_or_else(|| "noip".to_string()),
        };
        let nas_port = packet
            .find_attribute(AttributeType::NasPort as u8)
            .and_then(|a| a.as_integer().ok())
            .unwrap_or(0);
        let mut kv = KeyValueStore::new();
        kv.add("Result", if success { "PASSED" } else { "FAILED" });
        kv.add("User-Name", user);
        kv.add("Calling-Station-Id", calling);
        kv.add("NAS-Id", nas);
        kv.add("NAS-IPAddress", nas_ip);
        kv.add("NAS-Port", nas_port.to_string());
        kv.add("Id", packet.identifier.to_string());
        self.log(kv);
    }
}

impl Default for WhitelistModule {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for WhitelistModule {
    fn name(&self) -> &'static str {
        "whitelist"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            pre: true,
            ..Default::default()
        }
    }

    fn setup(&mut self, ctx: &ModuleContext) -> Result<(), ModuleError> {
        self.manifest_path = ctx.lib_dir.join("manifest");
        self.logbuf = Some(Arc::clone(&ctx.logbuf));
        self.load_manifest()
    }

    fn pre(&self, envelope: &PacketEnvelope) -> bool {
        let Some(packet) = envelope.packet() else {
            return true;
        };
        let user = string_attribute(packet, AttributeType::UserName);
        let calling = string_attribute(packet, AttributeType::CallingStationId);
        let (user, calling) = match (user, calling) {
            (Some(u), Some(c)) => (clean(&u), clean(&c)),
            // identity attributes are required to be whitelisted
            _ => return false,
        };
        let fqdn = format!("{}.{}", user, calling);
        let success = self
            .manifest
            .lock()
            .expect("manifest lock poisoned")
            .contains(&fqdn);
        self.mark(success, &user, &calling, envelope);
        success
    }

    fn reload(&self) {
        if let Err(e) = self.load_manifest() {
            warn!(error = %e, "manifest reload failed, keeping previous manifest");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use radrelay_proto::{Attribute, Code};
    use std::io::Write;

    fn setup_module(entries: &[&str]) -> (WhitelistModule, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut manifest = fs::File::create(dir.path().join("manifest")).unwrap();
        for entry in entries {
            writeln!(manifest, "{}", entry).unwrap();
        }
        let ctx = ModuleContext {
            lib_dir: dir.path().to_path_buf(),
            log_dir: dir.path().to_path_buf(),
            instance: "test".to_string(),
            logbuf: Arc::new(LogBuffer::new()),
            backing: Vec::new(),
        };
        let mut module = WhitelistModule::new();
        module.setup(&ctx).unwrap();
        (module, dir)
    }

    fn envelope(user: &str, calling: &str) -> PacketEnvelope {
        let mut packet = Packet::new(Code::AccessRequest, b"secret");
        packet.add_attribute(Attribute::string(AttributeType::UserName as u8, user).unwrap());
        packet.add_attribute(
            Attribute::string(AttributeType::CallingStationId as u8, calling).unwrap(),
        );
        let mut env = PacketEnvelope::new(packet.encode().unwrap(), None);
        env.ensure_parsed(b"secret");
        env
    }

    #[test]
    fn test_clean() {
        assert_eq!(clean("AA:BB:cc:11"), "aabbcc11");
        assert_eq!(clean("User.Name"), "user.name");
        assert_eq!(clean("  spaces  "), "spaces");
    }

    #[test]
    fn test_manifest_membership() {
        let (module, _dir) = setup_module(&["alice.aabbccddeeff"]);
        assert!(module.pre(&envelope("Alice", "AA:BB:CC:DD:EE:FF")));
        assert!(!module.pre(&envelope("bob", "AA:BB:CC:DD:EE:FF")));
        assert!(!module.pre(&envelope("alice", "00:00:00:00:00:00")));
    }

    #[test]
    fn test_missing_identity_attributes_fail() {
        let (module, _dir) = setup_module(&["alice.aabbccddeeff"]);
        let mut packet = Packet::new(Code::AccessRequest, b"secret");
        packet.add_attribute(Attribute::string(AttributeType::UserName as u8, "alice").unwrap());
        let mut env = PacketEnvelope::new(packet.encode().unwrap(), None);
        env.ensure_parsed(b"secret");
        assert!(!module.pre(&env));
    }

    #[test]
    fn test_missing_manifest_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ModuleContext {
            lib_dir: dir.path().to_path_buf(),
            log_dir: dir.path().to_path_buf(),
            instance: "test".to_string(),
            logbuf: Arc::new(LogBuffer::new()),
            backing: Vec::new(),
        };
        let mut module = WhitelistModule::new();
        assert!(module.setup(&ctx).is_err());
    }

    #[test]
    fn test_reload_picks_up_new_entries() {
        let (module, dir) = setup_module(&["alice.aabbccddeeff"]);
        assert!(!module.pre(&envelope("bob", "11:22:33:44:55:66")));

        let mut manifest = fs::File::create(dir.path().join("manifest")).unwrap();
        writeln!(manifest, "bob.112233445566").unwrap();
        module.reload();
        assert!(module.pre(&envelope("bob", "11:22:33:44:55:66")));
        assert!(!module.pre(&envelope("alice", "AA:BB:CC:DD:EE:FF")));
    }
}
