//! Buffered module log
//!
//! Modules emit key/value records into a shared in-memory buffer; a
//! periodic task (and the shutdown path) flushes the buffer to a dated
//! file in the log directory. This keeps per-packet module logging off
//! the hot path and bounds retained history to one flush interval.

use chrono::Local;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use tracing::error;

/// Ordered key/value pairs a module wants logged for one event
#[derive(Debug, Default)]
pub struct KeyValueStore {
    pairs: Vec<(String, String)>,
}

impl KeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.pairs.push((key.into(), value.into()));
    }

    pub fn lines(&self) -> Vec<String> {
        self.pairs
            .iter()
            .map(|(k, v)| format!("{} = {}", k, v))
            .collect()
    }
}

struct BufferState {
    lines: Vec<String>,
    sequence: u64,
}

/// Shared, mutex-guarded buffer of formatted module log lines
pub struct LogBuffer {
    state: Mutex<BufferState>,
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl LogBuffer {
    pub fn new() -> Self {
        LogBuffer {
            state: Mutex::new(BufferState {
                lines: Vec::new(),
                sequence: 0,
            }),
        }
    }

    /// Append a batch of messages attributed to a module; each batch
    /// shares one sequence number so multi-line records stay grouped.
    pub fn append(&self, module: &str, messages: &[String]) {
        let mut state = self.state.lock().expect("log buffer lock poisoned");
        let stamp = Local::now().format("%Y-%m-%dT%H:%M:%S%.3f");
        let name = module.to_uppercase();
        let sequence = state.sequence;
        for message in messages {
            state
                .lines
                .push(format!("{} [{}] ({}) {}", stamp, name, sequence, message));
        }
        state.sequence += 1;
    }

    /// Number of buffered lines (used by tests and monitors)
    pub fn len(&self) -> usize {
        self.state.lock().expect("log buffer lock poisoned").lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write all buffered lines to `<instance>.<date>` under `dir`,
    /// clearing the buffer. Returns the number of lines written.
    /// Flush failures are logged and the lines retained for the next
    /// attempt.
    pub fn flush(&self, dir: impl AsRef<Path>, instance: &str) -> usize {
        let mut state = self.state.lock().expect("log buffer lock poisoned");
        if state.lines.is_empty() {
            return 0;
        }
        let inst = if instance.is_empty() {
            "default"
        } else {
            instance
        };
        let name = format!("{}.{}", inst, Local::now().format("%Y-%m-%d"));
        let path = dir.as_ref().join(name);
        let file = OpenOptions::new().create(true).append(true).open(&path);
        let mut file = match file {
            Ok(f) => f,
            Err(e) => {
                error!(path = %path.display(), error = %e, "unable to open module log");
                return 0;
            }
        };
        let mut written = 0;
        for line in &state.lines {
            if let Err(e) = writeln!(file, "{}", line) {
                error!(path = %path.display(), error = %e, "unable to write module log");
                state.lines.drain(..written);
                return written;
            }
            written += 1;
        }
        state.lines.clear();
        state.sequence = 0;
        written
    }
}
