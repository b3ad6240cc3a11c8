//! Plugin bridge
//!
//! This module provides the capability surface exposed to source plugins:
//! - Execution context lifecycle (exactly one terminal signal per invocation)
//! - HTTP bridge with raw and headers response envelopes
//! - Local and session key-value storage
//! - Web-view cookies, user config, app version
//! - Log and toast side effects
//! - Result records returned by plugin entry points

pub mod context;
pub mod cookies;
pub mod host;
pub mod http;
pub mod logger;
pub mod models;
pub mod notify;
pub mod storage;

pub use context::{ContextState, ExecutionContext, InvocationId, InvocationOutcome, Outcome, PendingOutcome};
pub use cookies::{CookieJar, CookieRecord, CookieSource};
pub use host::{PluginBridge, RuliaHost, RuliaHostBuilder, StorageAccessor};
pub use http::{HeadersEnvelope, HttpBridge, HttpRequest, HttpTransport, PreparedRequest, ReqwestTransport, TransportResponse};
pub use logger::{PluginLogLevel, PluginLogger, TracingPluginLogger};
pub use models::{
    ChapterImage, ChapterLink, EntryPoint, FilterChoice, FilterName, FilterOption, FilterOptions,
    MangaDataResult, MangaListItem, MangaListResult, PluginPayload,
};
pub use notify::{AppNotifier, ChannelNotifier, Toast, TracingNotifier};
pub use storage::{FileStore, KeyValueStore, MemoryStore, StorageManager};
