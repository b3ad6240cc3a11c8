//! Execution context of one plugin invocation
//!
//! A context starts `Running` and moves to exactly one terminal state:
//!
//! ```text
//! Running ─ end()                 ─▶ Ended
//!         ─ end_with_result(p)    ─▶ EndedWithResult
//!         ─ end_with_exception(m) ─▶ EndedWithException
//! ```
//!
//! The first terminal call wins. Any later terminal call, and any bridge
//! operation issued after termination, is rejected with
//! [`BridgeError::ProtocolViolation`] and recorded as a [`Diagnostic`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::models::{EntryPoint, PluginPayload};
use crate::core::error::{BridgeError, Diagnostic, Result};

/// Unique identifier of one invocation
pub type InvocationId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Running,
    Ended,
    EndedWithResult,
    EndedWithException,
}

impl ContextState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ContextState::Running)
    }
}

impl std::fmt::Display for ContextState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContextState::Running => write!(f, "running"),
            ContextState::Ended => write!(f, "ended"),
            ContextState::EndedWithResult => write!(f, "ended with a result"),
            ContextState::EndedWithException => write!(f, "ended with an exception"),
        }
    }
}

/// Terminal signal delivered to the host
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// `end()`: the invocation intentionally produced nothing
    Empty,
    /// `end_with_result(payload)`
    Result(PluginPayload),
    /// `end_with_exception(message)`
    Exception(String),
}

impl Outcome {
    fn state(&self) -> ContextState {
        match self {
            Outcome::Empty => ContextState::Ended,
            Outcome::Result(_) => ContextState::EndedWithResult,
            Outcome::Exception(_) => ContextState::EndedWithException,
        }
    }

    pub fn payload(&self) -> Option<&PluginPayload> {
        match self {
            Outcome::Result(payload) => Some(payload),
            _ => None,
        }
    }

    pub fn exception(&self) -> Option<&str> {
        match self {
            Outcome::Exception(message) => Some(message),
            _ => None,
        }
    }

    /// Turn the outcome into what the host shows the user
    ///
    /// `Empty` is not an error; a plugin exception becomes
    /// [`BridgeError::PluginException`].
    pub fn into_result(self) -> Result<Option<PluginPayload>> {
        match self {
            Outcome::Empty => Ok(None),
            Outcome::Result(payload) => Ok(Some(payload)),
            Outcome::Exception(message) => Err(BridgeError::PluginException(message)),
        }
    }
}

/// Outcome of a finished invocation, as observed by the host
#[derive(Debug, Clone)]
pub struct InvocationOutcome {
    pub invocation_id: InvocationId,
    pub plugin: String,
    pub entry_point: EntryPoint,
    pub outcome: Outcome,
    pub elapsed: Duration,
}

struct Inner {
    state: ContextState,
    sender: Option<oneshot::Sender<Outcome>>,
    diagnostics: Vec<Diagnostic>,
}

/// State machine for one plugin invocation
///
/// Shared through `Arc` by every clone of the plugin's bridge handle, so
/// concurrent requests issued by the plugin all observe the same state.
pub struct ExecutionContext {
    invocation_id: InvocationId,
    plugin: String,
    entry_point: EntryPoint,
    started_at: DateTime<Utc>,
    inner: Mutex<Inner>,
}

impl ExecutionContext {
    /// Start a new invocation
    ///
    /// The returned [`PendingOutcome`] resolves once the plugin delivers its
    /// terminal signal.
    pub fn start(plugin: impl Into<String>, entry_point: EntryPoint) -> (Arc<Self>, PendingOutcome) {
        let (sender, receiver) = oneshot::channel();
        let context = Arc::new(Self {
            invocation_id: Uuid::new_v4().to_string(),
            plugin: plugin.into(),
            entry_point,
            started_at: Utc::now(),
            inner: Mutex::new(Inner {
                state: ContextState::Running,
                sender: Some(sender),
                diagnostics: Vec::new(),
            }),
        });

        debug!(
            plugin = %context.plugin,
            invocation_id = %context.invocation_id,
            entry_point = %context.entry_point,
            "Invocation started"
        );

        let pending = PendingOutcome {
            invocation_id: context.invocation_id.clone(),
            plugin: context.plugin.clone(),
            entry_point: context.entry_point.clone(),
            started: Instant::now(),
            receiver,
        };

        (context, pending)
    }

    pub fn invocation_id(&self) -> &str {
        &self.invocation_id
    }

    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    pub fn entry_point(&self) -> &EntryPoint {
        &self.entry_point
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn state(&self) -> ContextState {
        self.lock().state
    }

    /// Rejected calls recorded so far
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.lock().diagnostics.clone()
    }

    /// Fail with a protocol violation unless the context is still running
    pub fn ensure_running(&self, operation: &str) -> Result<()> {
        let mut inner = self.lock();
        if inner.state.is_terminal() {
            return Err(self.reject(&mut inner, operation));
        }
        Ok(())
    }

    pub fn end(&self) -> Result<()> {
        self.terminate("end", Outcome::Empty)
    }

    pub fn end_with_result(&self, payload: PluginPayload) -> Result<()> {
        self.terminate("endWithResult", Outcome::Result(payload))
    }

    pub fn end_with_exception(&self, message: impl Into<String>) -> Result<()> {
        self.terminate("endWithException", Outcome::Exception(message.into()))
    }

    fn terminate(&self, operation: &str, outcome: Outcome) -> Result<()> {
        let mut inner = self.lock();
        if inner.state.is_terminal() {
            return Err(self.reject(&mut inner, operation));
        }

        inner.state = outcome.state();
        info!(
            plugin = %self.plugin,
            invocation_id = %self.invocation_id,
            entry_point = %self.entry_point,
            state = %inner.state,
            "Invocation terminated"
        );

        if let Some(sender) = inner.sender.take() {
            if sender.send(outcome).is_err() {
                debug!(
                    invocation_id = %self.invocation_id,
                    "Host stopped waiting before the terminal signal arrived"
                );
            }
        }
        Ok(())
    }

    fn reject(&self, inner: &mut Inner, operation: &str) -> BridgeError {
        let error = BridgeError::ProtocolViolation(format!(
            "{}() called after invocation {} already {}",
            operation, self.invocation_id, inner.state
        ));
        warn!(
            plugin = %self.plugin,
            invocation_id = %self.invocation_id,
            operation,
            "Rejected bridge call: {}",
            error
        );
        inner
            .diagnostics
            .push(Diagnostic::from_error(&error, self.invocation_id.clone()));
        error
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Host-side half of an invocation
pub struct PendingOutcome {
    invocation_id: InvocationId,
    plugin: String,
    entry_point: EntryPoint,
    started: Instant,
    receiver: oneshot::Receiver<Outcome>,
}

impl PendingOutcome {
    pub fn invocation_id(&self) -> &str {
        &self.invocation_id
    }

    /// Wait for the terminal signal
    ///
    /// Fails if every handle to the context is dropped before a terminal
    /// method was called.
    pub async fn wait(self) -> Result<InvocationOutcome> {
        self.wait_timeout(None).await
    }

    /// Wait for the terminal signal, giving up after `limit`
    pub async fn wait_timeout(self, limit: Option<Duration>) -> Result<InvocationOutcome> {
        let received = match limit {
            Some(limit) => tokio::time::timeout(limit, self.receiver)
                .await
                .map_err(|_| {
                    BridgeError::Timeout(format!(
                        "invocation {} of {} did not finish within {} ms",
                        self.invocation_id,
                        self.entry_point,
                        limit.as_millis()
                    ))
                })?,
            None => self.receiver.await,
        };

        let outcome = received.map_err(|_| {
            BridgeError::ProtocolViolation(format!(
                "invocation {} of {} terminated without a terminal signal",
                self.invocation_id, self.entry_point
            ))
        })?;

        Ok(InvocationOutcome {
            invocation_id: self.invocation_id,
            plugin: self.plugin,
            entry_point: self.entry_point,
            outcome,
            elapsed: self.started.elapsed(),
        })
    }
}
