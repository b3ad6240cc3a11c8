//! Toast side channel
//!
//! `appToast` is fire-and-forget: the plugin never learns whether the
//! message was shown. Rendering belongs to the UI layer that consumes the
//! notifier.

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// A toast request raised by a plugin
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Toast {
    pub plugin: String,
    pub invocation_id: String,
    pub message: String,
}

pub trait AppNotifier: Send + Sync {
    fn toast(&self, toast: Toast);
}

/// Notifier that only records toasts in the log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl AppNotifier for TracingNotifier {
    fn toast(&self, toast: Toast) {
        info!(
            plugin = %toast.plugin,
            invocation_id = %toast.invocation_id,
            "Plugin toast: {}",
            toast.message
        );
    }
}

/// Notifier forwarding toasts to a UI task
#[derive(Clone)]
pub struct ChannelNotifier {
    sender: mpsc::UnboundedSender<Toast>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Toast>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl AppNotifier for ChannelNotifier {
    fn toast(&self, toast: Toast) {
        if let Err(e) = self.sender.send(toast) {
            // UI side is gone
            debug!(plugin = %e.0.plugin, "Dropped plugin toast: {}", e.0.message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toast(message: &str) -> Toast {
        Toast {
            plugin: "test-plugin".to_string(),
            invocation_id: "inv-1".to_string(),
            message: message.to_string(),
        }
    }

    #[tokio::test]
    async fn test_channel_notifier_delivers_in_order() {
        let (notifier, mut receiver) = ChannelNotifier::new();
        notifier.toast(toast("Logged in"));
        notifier.toast(toast("Cookie expired"));

        assert_eq!(receiver.recv().await.unwrap().message, "Logged in");
        assert_eq!(receiver.recv().await.unwrap().message, "Cookie expired");
    }

    #[test]
    fn test_closed_channel_is_ignored() {
        let (notifier, receiver) = ChannelNotifier::new();
        drop(receiver);
        notifier.toast(toast("nobody listens"));
        TracingNotifier.toast(toast("logged only"));
    }
}
