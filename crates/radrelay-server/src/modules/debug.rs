//! Packet dumper for troubleshooting

use crate::envelope::PacketEnvelope;
use crate::logbuf::{KeyValueStore, LogBuffer};
use crate::module::{Capabilities, Module, ModuleContext, ModuleError, TraceKind};
use std::sync::Arc;

pub struct DebugModule {
    logbuf: Option<Arc<LogBuffer>>,
}

impl DebugModule {
    pub fn new() -> Self {
        DebugModule { logbuf: None }
    }

    fn dump(&self, mode: &str, kind: TraceKind, envelope: &PacketEnvelope) {
        let Some(logbuf) = &self.logbuf else {
            return;
        };
        logbuf.append(self.name(), &dump_lines(mode, kind, envelope).lines());
    }
}

fn dump_lines(mode: &str, kind: TraceKind, envelope: &PacketEnvelope) -> KeyValueStore {
    let mut kv = KeyValueStore::new();
    kv.add("Mode", mode);
    kv.add("TraceType", (kind as u8).to_string());
    if let Some(sender) = envelope.sender() {
        kv.add("UDPAddr", sender.to_string());
    }
    match envelope.packet() {
        Some(packet) => {
            kv.add("Code", format!("{:?}", packet.code));
            kv.add("Id", packet.identifier.to_string());
            for attribute in &packet.attributes {
                let value = match attribute.as_string() {
                    Ok(s) if s.chars().all(|c| !c.is_control()) => s,
                    _ => attribute
                        .value
                        .iter()
                        .map(|b| format!("{:02x}", b))
                        .collect::<String>(),
                };
                kv.add(format!("Attribute-{}", attribute.attr_type), value);
            }
        }
        None => kv.add("Bytes", envelope.raw().len().to_string()),
    }
    kv
}

impl Default for DebugModule {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for DebugModule {
    fn name(&self) -> &'static str {
        "debug"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            pre: true,
            post: true,
            trace: true,
            account: true,
        }
    }

    fn setup(&mut self, ctx: &ModuleContext) -> Result<(), ModuleError> {
        self.logbuf = Some(Arc::clone(&ctx.logbuf));
        Ok(())
    }

    fn pre(&self, packet: &PacketEnvelope) -> bool {
        self.dump("preauth", TraceKind::NoTrace, packet);
        true
    }

    fn post(&self, packet: &PacketEnvelope) -> bool {
        self.dump("postauth", TraceKind::NoTrace, packet);
        true
    }

    fn trace(&self, kind: TraceKind, packet: &PacketEnvelope) {
        self.dump("trace", kind, packet);
    }

    fn account(&self, packet: &PacketEnvelope) {
        self.dump("accounting", TraceKind::NoTrace, packet);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use radrelay_proto::{Attribute, AttributeType, Code, Packet};

    fn envelope() -> PacketEnvelope {
        let mut packet = Packet::new(Code::AccessRequest, b"secret");
        packet.add_attribute(Attribute::string(AttributeType::UserName as u8, "alice").unwrap());
        let mut env = PacketEnvelope::new(
            packet.encode().unwrap(),
            Some("10.0.0.1:4000".parse().unwrap()),
        );
        env.ensure_parsed(b"secret");
        env
    }

    #[test]
    fn test_dump_parsed_packet() {
        let env = envelope();
        let lines = dump_lines("preauth", TraceKind::NoTrace, &env).lines();
        assert!(lines.contains(&"Mode = preauth".to_string()));
        assert!(lines.contains(&"Code = AccessRequest".to_string()));
        assert!(lines.contains(&"UDPAddr = 10.0.0.1:4000".to_string()));
        assert!(lines.contains(&"Attribute-1 = alice".to_string()));
    }

    #[test]
    fn test_dump_unparsed_packet() {
        let env = PacketEnvelope::new(vec![1, 2, 3], None);
        let lines = dump_lines("accounting", TraceKind::NoTrace, &env).lines();
        assert!(lines.contains(&"Bytes = 3".to_string()));
    }

    #[test]
    fn test_hooks_pass_through() {
        let dir = tempfile::tempdir().unwrap();
        let logbuf = Arc::new(LogBuffer::new());
        let ctx = ModuleContext {
            lib_dir: dir.path().to_path_buf(),
            log_dir: dir.path().to_path_buf(),
            instance: "test".to_string(),
            logbuf: Arc::clone(&logbuf),
            backing: Vec::new(),
        };
        let mut module = DebugModule::new();
        module.setup(&ctx).unwrap();
        let env = envelope();
        assert!(module.pre(&env));
        assert!(module.post(&env));
        assert!(!logbuf.is_empty());
    }
}
