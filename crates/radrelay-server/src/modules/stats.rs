//! Packet-rate statistics
//!
//! Counts packets per hook class with first/last timestamps. Counters
//! are flushed to the module log every `flush` observations (every
//! observation when unset) and again at unload.

use crate::envelope::PacketEnvelope;
use crate::logbuf::{KeyValueStore, LogBuffer};
use crate::module::{Capabilities, Module, ModuleContext, ModuleError, TraceKind};
use chrono::{DateTime, Local};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Deserialize, Default)]
struct StatsConfig {
    #[serde(default)]
    stats: StatsSection,
}

#[derive(Deserialize, Default)]
struct StatsSection {
    #[serde(default)]
    flush: u64,
}

struct ModeData {
    first: DateTime<Local>,
    last: DateTime<Local>,
    count: u64,
}

#[derive(Default)]
struct StatsState {
    info: HashMap<String, ModeData>,
    flush_idx: u64,
}

pub struct StatsModule {
    state: Mutex<StatsState>,
    flush_every: u64,
    logbuf: Option<Arc<LogBuffer>>,
}

impl StatsModule {
    pub fn new() -> Self {
        StatsModule {
            state: Mutex::new(StatsState::default()),
            flush_every: 0,
            logbuf: None,
        }
    }

    fn write(&self, mode: &str, kind: TraceKind) {
        let key = format!("{}.{}", mode, kind as u8);
        let now = Local::now();
        let mut state = self.state.lock().expect("stats lock poisoned");
        let data = state.info.entry(key.clone()).or_insert(ModeData {
            first: now,
            last: now,
            count: 0,
        });
        data.last = now;
        data.count += 1;
        let kv = mode_lines(&key, data, now);
        if self.flush_every == 0 || state.flush_idx > self.flush_every {
            state.flush_idx = 0;
            self.log(kv);
        } else {
            state.flush_idx += 1;
        }
    }

    fn log(&self, kv: KeyValueStore) {
        if let Some(logbuf) = &self.logbuf {
            logbuf.append(self.name(), &kv.lines());
        }
    }
}

fn mode_lines(name: &str, data: &ModeData, now: DateTime<Local>) -> KeyValueStore {
    let mut kv = KeyValueStore::new();
    kv.add("Time", now.format(TIME_FORMAT).to_string());
    kv.add("First", data.first.format(TIME_FORMAT).to_string());
    kv.add("Last", data.last.format(TIME_FORMAT).to_string());
    kv.add("Count", data.count.to_string());
    kv.add("Name", name);
    kv
}

impl Default for StatsModule {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for StatsModule {
    fn name(&self) -> &'static str {
        "stats"
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
        if !ctx.backing.is_empty() {
            let config: StatsConfig = serde_json::from_slice(&ctx.backing)
                .map_err(|e| ModuleError::Setup(e.to_string()))?;
            self.flush_every = config.stats.flush;
        }
        self.logbuf = Some(Arc::clone(&ctx.logbuf));
        Ok(())
    }

    fn pre(&self, _packet: &PacketEnvelope) -> bool {
        self.write("preauth", TraceKind::NoTrace);
        true
    }

    fn post(&self, _packet: &PacketEnvelope) -> bool {
        self.write("postauth", TraceKind::NoTrace);
        true
    }

    fn trace(&self, kind: TraceKind, _packet: &PacketEnvelope) {
        self.write("trace", kind);
    }

    fn account(&self, _packet: &PacketEnvelope) {
        self.write("accounting", TraceKind::NoTrace);
    }

    fn unload(&self) {
        let now = Local::now();
        let state = self.state.lock().expect("stats lock poisoned");
        for (name, data) in &state.info {
            self.log(mode_lines(name, data, now));
        }
    }
}
