//! Protocol-aware RADIUS relay
//!
//! A UDP proxy that sits between network access servers and a real
//! RADIUS backend. Every client request is checked against a
//! shared-secret table and a pipeline of authorization modules before
//! it is forwarded; backend responses are relayed back over a
//! per-client connection. An accounting instance ingests datagrams
//! without relaying them.
//!
//! The worker process (`radrelayd`) is designed to run under the
//! `radrelay` supervisor, which restarts it on termination with a
//! cooldown.

pub mod config;
pub mod connection;
pub mod envelope;
pub mod lifecycle;
pub mod logbuf;
pub mod module;
pub mod modules;
pub mod pipeline;
pub mod relay;
pub mod secrets;

pub use config::{Config, ConfigError};
pub use connection::{Connection, ConnectionTable};
pub use envelope::PacketEnvelope;
pub use lifecycle::{Counters, Termination};
pub use logbuf::{KeyValueStore, LogBuffer};
pub use module::{create_module, Capabilities, Module, ModuleContext, ModuleError, TraceKind};
pub use pipeline::{AuthMode, AuthorizationPipeline, ReasonCode};
pub use relay::RelayService;
pub use secrets::{SecretResolver, SecretError};
