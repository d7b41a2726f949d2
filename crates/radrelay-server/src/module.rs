//! Authorization module contract and registry
//!
//! Modules are resolved at startup from a compile-time registry of
//! configuration names; there is no dynamic loading. A module declares
//! which hooks it actually implements via [`Capabilities`] so the
//! pipeline can skip inactive classes entirely.

use crate::envelope::PacketEnvelope;
use crate::logbuf::LogBuffer;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModuleError {
    #[error("unknown module: {0}")]
    Unknown(String),
    #[error("module setup failed: {0}")]
    Setup(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// How a packet reached a trace hook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceKind {
    /// Not an authorization trace (accounting-side observation)
    NoTrace,
    /// Tracing a client request
    Request,
}

/// Hooks a module actually implements
#[derive(Debug, Clone, Copy, Default)]
pub struct Capabilities {
    pub pre: bool,
    pub post: bool,
    pub trace: bool,
    pub account: bool,
}

/// Context handed to every module at setup time
pub struct ModuleContext {
    /// Lib directory holding secrets, clients and manifest files
    pub lib_dir: PathBuf,
    /// Directory the module log buffer flushes into
    pub log_dir: PathBuf,
    /// Instance name for log attribution
    pub instance: String,
    /// Shared module log buffer
    pub logbuf: Arc<LogBuffer>,
    /// Raw configuration bytes for module-specific settings
    pub backing: Vec<u8>,
}

/// Contract every authorization module fulfills.
///
/// `setup` runs once at registration and its failure is fatal. The
/// per-packet hooks default to pass-through; a module only overrides
/// the hooks its [`Capabilities`] advertise. Hooks must not panic and
/// must not block on external services.
pub trait Module: Send + Sync {
    fn name(&self) -> &'static str;

    fn capabilities(&self) -> Capabilities;

    fn setup(&mut self, ctx: &ModuleContext) -> Result<(), ModuleError>;

    /// Pre-delivery check; false rejects the request
    fn pre(&self, _packet: &PacketEnvelope) -> bool {
        true
    }

    /// Post-delivery check on a backend response; false is recorded
    /// but the response is still relayed
    fn post(&self, _packet: &PacketEnvelope) -> bool {
        true
    }

    /// Unconditional observability hook
    fn trace(&self, _kind: TraceKind, _packet: &PacketEnvelope) {}

    /// One-way accounting ingestion; never produces a verdict
    fn account(&self, _packet: &PacketEnvelope) {}

    /// Re-read external state (manifest files etc.)
    fn reload(&self) {}

    /// Flush state before shutdown
    fn unload(&self) {}
}

/// Construct a module by its configuration name.
///
/// New modules are added here; the name doubles as the log attribution
/// tag.
pub fn create_module(name: &str) -> Result<Box<dyn Module>, ModuleError> {
    match name {
        "whitelist" => Ok(Box::new(crate::modules::WhitelistModule::new())),
        "stats" => Ok(Box::new(crate::modules::StatsModule::new())),
        "debug" => Ok(Box::new(crate::modules::DebugModule::new())),
        other => Err(ModuleError::Unknown(other.to_string())),
    }
}
