#![forbid(unsafe_code)]

//! Templating backend seam.
//!
//! The backend is a push service: a card asks it to render one template, the
//! backend acknowledges the subscription and then re-delivers results whenever
//! the template's dependencies change, until it is told to stop.
//!
//! # Shape
//!
//! ```text
//!  SubscriptionManager                       TemplateBackend
//!  ───────────────────                       ───────────────
//!  subscribe(request, sink) ───────────────▶ (starts rendering)
//!       │                                         │
//!       ◀──── PendingSubscription ────────────────┘
//!       │      resolves once: Unsubscribe | BackendError
//!       │
//!  pump() ◀──── FieldUpdate over mpsc ◀──── sink.push(result)  (repeatedly)
//! ```
//!
//! Pushes never touch card state directly. The sink only sends a message; the
//! manager applies it when it drains its channel.
//!
//! # Failure Modes
//!
//! | Code               | Meaning                                  | On close    |
//! |--------------------|------------------------------------------|-------------|
//! | `not_found`        | Subscription already gone on the backend | swallowed   |
//! | `template_error`   | Backend rejected the template            | swallowed   |
//! | `connection_closed`| Acknowledgement never arrived            | propagated  |
//! | anything else      | Unexpected                               | propagated  |

use std::fmt;
use std::sync::mpsc;

use serde::Serialize;
use serde_json::{Map, Value};
use tcard_core::{FieldKey, TemplateResult};

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Error class reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotFound,
    TemplateError,
    /// The backend went away before acknowledging.
    ConnectionClosed,
    Other(String),
}

impl ErrorCode {
    /// Parse a wire error code.
    #[must_use]
    pub fn from_code(code: &str) -> Self {
        match code {
            "not_found" => ErrorCode::NotFound,
            "template_error" => ErrorCode::TemplateError,
            "connection_closed" => ErrorCode::ConnectionClosed,
            other => ErrorCode::Other(other.to_owned()),
        }
    }

    /// Wire form of this code.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            ErrorCode::NotFound => "not_found",
            ErrorCode::TemplateError => "template_error",
            ErrorCode::ConnectionClosed => "connection_closed",
            ErrorCode::Other(code) => code,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error reported by the templating backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendError {
    pub code: ErrorCode,
    pub message: String,
}

impl BackendError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn template_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::TemplateError, message)
    }

    pub fn connection_closed() -> Self {
        Self::new(
            ErrorCode::ConnectionClosed,
            "backend dropped the subscription before acknowledging it",
        )
    }

    /// Whether closing a subscription may ignore this error.
    ///
    /// Both classes mean the backend holds no subscription to close.
    #[must_use]
    pub fn is_benign_on_close(&self) -> bool {
        matches!(self.code, ErrorCode::NotFound | ErrorCode::TemplateError)
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "template backend error [{}]: {}", self.code, self.message)
    }
}

impl std::error::Error for BackendError {}

// ─────────────────────────────────────────────────────────────────────────────
// Requests
// ─────────────────────────────────────────────────────────────────────────────

/// A request to render one template and keep it updated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderRequest {
    pub template: String,
    pub entity_ids: Vec<String>,
    pub variables: Map<String, Value>,
    /// Fail on undefined references instead of rendering them empty.
    pub strict: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Push channel
// ─────────────────────────────────────────────────────────────────────────────

/// A pushed result, tagged with the subscription attempt that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldUpdate {
    pub key: FieldKey,
    pub generation: u64,
    pub result: TemplateResult,
}

/// Send side handed to the backend for one subscription.
#[derive(Debug, Clone)]
pub struct UpdateSink {
    key: FieldKey,
    generation: u64,
    sender: mpsc::Sender<FieldUpdate>,
}

impl UpdateSink {
    pub(crate) fn new(key: FieldKey, generation: u64, sender: mpsc::Sender<FieldUpdate>) -> Self {
        Self {
            key,
            generation,
            sender,
        }
    }

    /// Field this sink delivers to.
    #[must_use]
    pub fn key(&self) -> FieldKey {
        self.key
    }

    /// Deliver a rendered result.
    ///
    /// Returns `false` once the receiving card is gone; the backend should
    /// stop rendering for this sink.
    pub fn push(&self, result: TemplateResult) -> bool {
        self.sender
            .send(FieldUpdate {
                key: self.key,
                generation: self.generation,
                result,
            })
            .is_ok()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Subscription handles
// ─────────────────────────────────────────────────────────────────────────────

/// Action that stops an established subscription.
pub trait Unsubscribe: Send {
    /// Stop delivery. May be retried after an error.
    fn unsubscribe(&mut self) -> Result<(), BackendError>;
}

impl<F> Unsubscribe for F
where
    F: FnMut() -> Result<(), BackendError> + Send,
{
    fn unsubscribe(&mut self) -> Result<(), BackendError> {
        self()
    }
}

/// What a subscribe request eventually settles to.
pub type SubscribeOutcome = Result<Box<dyn Unsubscribe>, BackendError>;

/// Backend side of a [`PendingSubscription`].
#[derive(Debug)]
pub struct SubscriptionResolver {
    sender: mpsc::SyncSender<SubscribeOutcome>,
}

impl SubscriptionResolver {
    /// Acknowledge the subscription with its unsubscribe action.
    pub fn resolve(self, unsubscribe: impl Unsubscribe + 'static) {
        self.settle(Ok(Box::new(unsubscribe)));
    }

    /// Reject the subscription.
    pub fn reject(self, error: BackendError) {
        self.settle(Err(error));
    }

    pub fn settle(self, outcome: SubscribeOutcome) {
        // The card may already have dropped its handle.
        let _ = self.sender.send(outcome);
    }
}

/// Handle to a subscription whose acknowledgement may still be in flight.
pub struct PendingSubscription {
    receiver: mpsc::Receiver<SubscribeOutcome>,
}

impl PendingSubscription {
    /// A handle settled later through the returned resolver.
    #[must_use]
    pub fn channel() -> (SubscriptionResolver, Self) {
        let (sender, receiver) = mpsc::sync_channel(1);
        (SubscriptionResolver { sender }, Self { receiver })
    }

    /// A handle that is already settled.
    #[must_use]
    pub fn ready(outcome: SubscribeOutcome) -> Self {
        let (resolver, pending) = Self::channel();
        resolver.settle(outcome);
        pending
    }

    /// An acknowledged handle.
    #[must_use]
    pub fn resolved(unsubscribe: impl Unsubscribe + 'static) -> Self {
        Self::ready(Ok(Box::new(unsubscribe)))
    }

    /// A rejected handle.
    #[must_use]
    pub fn rejected(error: BackendError) -> Self {
        Self::ready(Err(error))
    }

    /// Settle without blocking; `None` while the acknowledgement is in flight.
    pub fn try_settle(&mut self) -> Option<SubscribeOutcome> {
        match self.receiver.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(mpsc::TryRecvError::Empty) => None,
            Err(mpsc::TryRecvError::Disconnected) => Some(Err(BackendError::connection_closed())),
        }
    }

    /// Block until the backend acknowledges or rejects.
    pub fn wait(self) -> SubscribeOutcome {
        self.receiver
            .recv()
            .unwrap_or_else(|_| Err(BackendError::connection_closed()))
    }
}

impl fmt::Debug for PendingSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingSubscription").finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Backend trait
// ─────────────────────────────────────────────────────────────────────────────

/// A push-based template rendering service.
///
/// `subscribe` must return promptly; acknowledgement and result delivery may
/// happen later and from any thread through the resolver and `sink`.
pub trait TemplateBackend: Send + Sync {
    /// Human-readable name for logging.
    fn name(&self) -> &str;

    /// Start rendering `request`, delivering results through `sink`.
    fn subscribe(&self, request: RenderRequest, sink: UpdateSink) -> PendingSubscription;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn error_codes_round_trip_wire_names() {
        for code in ["not_found", "template_error", "connection_closed", "unknown_command"] {
            assert_eq!(ErrorCode::from_code(code).as_str(), code);
        }
        assert_eq!(
            ErrorCode::from_code("unauthorized"),
            ErrorCode::Other("unauthorized".into())
        );
    }

    #[test]
    fn benign_close_errors() {
        assert!(BackendError::not_found("gone").is_benign_on_close());
        assert!(BackendError::template_error("bad").is_benign_on_close());
        assert!(!BackendError::connection_closed().is_benign_on_close());
        assert!(!BackendError::new(ErrorCode::Other("boom".into()), "").is_benign_on_close());
    }

    #[test]
    fn display_includes_code() {
        let err = BackendError::template_error("UndefinedError: 'bad_expr' is undefined");
        assert_eq!(
            err.to_string(),
            "template backend error [template_error]: UndefinedError: 'bad_expr' is undefined"
        );
    }

    #[test]
    fn pending_stays_unsettled_until_resolved() {
        let (resolver, mut pending) = PendingSubscription::channel();
        assert!(pending.try_settle().is_none());

        resolver.resolve(|| Ok::<(), BackendError>(()));
        let mut unsub = pending.try_settle().unwrap().unwrap();
        assert!(unsub.unsubscribe().is_ok());
    }

    #[test]
    fn dropped_resolver_reads_as_connection_closed() {
        let (resolver, mut pending) = PendingSubscription::channel();
        drop(resolver);
        let err = pending.try_settle().unwrap().err().unwrap();
        assert_eq!(err.code, ErrorCode::ConnectionClosed);
    }

    #[test]
    fn wait_blocks_until_another_thread_resolves() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (resolver, pending) = PendingSubscription::channel();

        let counter = Arc::clone(&calls);
        let handle = thread::spawn(move || {
            thread::sleep(std::time::Duration::from_millis(10));
            resolver.resolve(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<(), BackendError>(())
            });
        });

        let mut unsub = pending.wait().unwrap();
        unsub.unsubscribe().unwrap();
        handle.join().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn rejected_handle_settles_with_error() {
        let pending = PendingSubscription::rejected(BackendError::template_error("bad"));
        assert_eq!(
            pending.wait().err().map(|e| e.code),
            Some(ErrorCode::TemplateError)
        );
    }

    #[test]
    fn sink_push_tags_key_and_generation() {
        let (tx, rx) = mpsc::channel();
        let sink = UpdateSink::new(FieldKey::Primary, 7, tx);
        assert!(sink.push(TemplateResult::inert("hi")));

        let update = rx.try_recv().unwrap();
        assert_eq!(update.key, FieldKey::Primary);
        assert_eq!(update.generation, 7);
        assert_eq!(update.result.result, "hi");

        drop(rx);
        assert!(!sink.push(TemplateResult::inert("late")));
    }

    #[test]
    fn render_request_serializes_for_the_wire() {
        let mut variables = Map::new();
        variables.insert("user".into(), Value::String("Ada".into()));
        let request = RenderRequest {
            template: "Hello, {{user}}".into(),
            entity_ids: vec!["sun.sun".into()],
            variables,
            strict: true,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "template": "Hello, {{user}}",
                "entity_ids": ["sun.sun"],
                "variables": {"user": "Ada"},
                "strict": true
            })
        );
    }
}
