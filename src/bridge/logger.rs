use tracing::{debug, error, info, warn};

/// Level names accepted by `log(level, message)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginLogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl PluginLogLevel {
    /// Case-insensitive; `None` for names plugins are not expected to use
    pub fn parse(level: &str) -> Option<Self> {
        match level.trim().to_ascii_lowercase().as_str() {
            "debug" | "trace" | "verbose" => Some(PluginLogLevel::Debug),
            "info" | "log" => Some(PluginLogLevel::Info),
            "warn" | "warning" => Some(PluginLogLevel::Warn),
            "error" => Some(PluginLogLevel::Error),
            _ => None,
        }
    }
}

pub trait PluginLogger: Send + Sync {
    fn debug(&self, message: &str);
    fn info(&self, message: &str);
    fn warn(&self, message: &str);
    fn error(&self, message: &str);

    /// Dispatch a plugin-supplied level name; unknown names log at info
    fn log(&self, level: &str, message: &str) {
        match PluginLogLevel::parse(level) {
            Some(PluginLogLevel::Debug) => self.debug(message),
            Some(PluginLogLevel::Info) => self.info(message),
            Some(PluginLogLevel::Warn) => self.warn(message),
            Some(PluginLogLevel::Error) => self.error(message),
            None => self.info(&format!("[{}] {}", level, message)),
        }
    }
}

/// Logger writing plugin messages as tracing events
pub struct TracingPluginLogger {
    plugin_name: String,
    invocation_id: String,
}

impl TracingPluginLogger {
    pub fn new(plugin_name: impl Into<String>, invocation_id: impl Into<String>) -> Self {
        Self {
            plugin_name: plugin_name.into(),
            invocation_id: invocation_id.into(),
        }
    }
}

impl PluginLogger for TracingPluginLogger {
    fn debug(&self, message: &str) {
        debug!(target: "rulia_bridge::plugin", plugin = %self.plugin_name, invocation_id = %self.invocation_id, "{}", message);
    }
    fn info(&self, message: &str) {
        info!(target: "rulia_bridge::plugin", plugin = %self.plugin_name, invocation_id = %self.invocation_id, "{}", message);
    }
    fn warn(&self, message: &str) {
        warn!(target: "rulia_bridge::plugin", plugin = %self.plugin_name, invocation_id = %self.invocation_id, "{}", message);
    }
    fn error(&self, message: &str) {
        error!(target: "rulia_bridge::plugin", plugin = %self.plugin_name, invocation_id = %self.invocation_id, "{}", message);
    }
}
