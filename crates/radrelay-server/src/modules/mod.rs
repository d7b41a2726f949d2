//! Built-in authorization modules

mod debug;
mod stats;
mod whitelist;

pub use debug::DebugModule;
pub use stats::StatsModule;
pub use whitelist::WhitelistModule;
