//! Rulia Plugin Bridge
//!
//! Host-side implementation of the capability surface Rulia exposes to
//! manga source plugins: invocation lifecycle, HTTP bridge, storage,
//! cookies and the records plugins return.

pub mod bridge;
pub mod core;

// Re-export commonly used types
pub use bridge::{EntryPoint, HttpBridge, HttpRequest, Outcome, PluginBridge, PluginPayload, RuliaHost};
pub use crate::core::{BridgeError, Config, Logger, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
