#![forbid(unsafe_code)]

//! Scriptable in-process backend for tests and demos.
//!
//! [`MockBackend`] records every subscribe request, acknowledges or rejects
//! each one according to a per-template [`MockBehavior`], and lets the caller
//! push results to live subscriptions by template text.
//!
//! ```
//! use std::sync::Arc;
//! use tcard_core::{CardConfig, FieldKey};
//! use tcard_runtime::{HostContext, MockBackend, TemplateCard};
//!
//! let backend = Arc::new(MockBackend::new());
//! let mut card = TemplateCard::default();
//! card.set_config(CardConfig::stub()).unwrap();
//! card.set_host(Some(HostContext::new(backend.clone(), "Ada")));
//! card.mount();
//!
//! backend.push("Hello, {{user}}", "Hello, Ada");
//! card.pump();
//! assert_eq!(card.value(FieldKey::Primary), Some("Hello, Ada"));
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tcard_core::{Listeners, TemplateResult};

use crate::backend::{
    BackendError, PendingSubscription, RenderRequest, SubscriptionResolver, TemplateBackend,
    Unsubscribe, UpdateSink,
};

/// Something the mock backend observed, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockEvent {
    Subscribed(String),
    Unsubscribed(String),
}

type EventLog = Arc<Mutex<Vec<MockEvent>>>;

/// How the mock answers a subscribe request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockBehavior {
    /// Acknowledge immediately.
    Accept,
    /// Reject immediately with the given error.
    Reject(BackendError),
    /// Leave the acknowledgement pending until [`MockBackend::resolve`] or
    /// [`MockBackend::reject`] is called.
    Defer,
}

struct MockSubscription {
    template: String,
    sink: UpdateSink,
    unsubscribed: Arc<AtomicBool>,
    unsubscribe_error: Arc<Mutex<Option<BackendError>>>,
    resolver: Option<SubscriptionResolver>,
    rejected: bool,
}

impl MockSubscription {
    fn is_unsubscribed(&self) -> bool {
        self.unsubscribed.load(Ordering::SeqCst)
    }

    fn is_live(&self) -> bool {
        !self.rejected && !self.is_unsubscribed()
    }

    fn unsubscribe_action(&self, log: &EventLog) -> MockUnsubscribe {
        MockUnsubscribe {
            template: self.template.clone(),
            unsubscribed: Arc::clone(&self.unsubscribed),
            error: Arc::clone(&self.unsubscribe_error),
            log: Arc::clone(log),
        }
    }
}

struct MockUnsubscribe {
    template: String,
    unsubscribed: Arc<AtomicBool>,
    error: Arc<Mutex<Option<BackendError>>>,
    log: EventLog,
}

impl Unsubscribe for MockUnsubscribe {
    fn unsubscribe(&mut self) -> Result<(), BackendError> {
        let injected = self
            .error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match injected {
            Some(err) => Err(err),
            None => {
                self.unsubscribed.store(true, Ordering::SeqCst);
                self.log
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(MockEvent::Unsubscribed(self.template.clone()));
                Ok(())
            }
        }
    }
}

#[derive(Default)]
struct MockState {
    behaviors: HashMap<String, MockBehavior>,
    requests: Vec<RenderRequest>,
    subscriptions: Vec<MockSubscription>,
}

/// In-process [`TemplateBackend`] driven by the test.
#[derive(Default)]
pub struct MockBackend {
    state: Mutex<MockState>,
    log: EventLog,
}

impl MockBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer subscribe requests for `template` with `behavior`.
    ///
    /// Templates without a behavior are accepted.
    pub fn set_behavior(&self, template: impl Into<String>, behavior: MockBehavior) {
        self.lock().behaviors.insert(template.into(), behavior);
    }

    #[must_use]
    pub fn with_behavior(self, template: impl Into<String>, behavior: MockBehavior) -> Self {
        self.set_behavior(template, behavior);
        self
    }

    /// Every subscribe request received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<RenderRequest> {
        self.lock().requests.clone()
    }

    /// Subscribe and unsubscribe events in the order they happened.
    #[must_use]
    pub fn events(&self) -> Vec<MockEvent> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of subscribe requests received for `template`.
    #[must_use]
    pub fn subscribe_count(&self, template: &str) -> usize {
        self.lock()
            .requests
            .iter()
            .filter(|r| r.template == template)
            .count()
    }

    /// Subscriptions that have not been unsubscribed.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.lock().subscriptions.iter().filter(|s| s.is_live()).count()
    }

    /// Live subscriptions for `template`.
    #[must_use]
    pub fn live_count_for(&self, template: &str) -> usize {
        self.lock()
            .subscriptions
            .iter()
            .filter(|s| s.template == template && s.is_live())
            .count()
    }

    /// Number of completed unsubscribe calls.
    #[must_use]
    pub fn unsubscribe_count(&self) -> usize {
        self.lock()
            .subscriptions
            .iter()
            .filter(|s| s.is_unsubscribed())
            .count()
    }

    /// Push `result` to every live subscription of `template`.
    ///
    /// Returns how many subscriptions received it.
    pub fn push(&self, template: &str, result: impl Into<String>) -> usize {
        self.push_result(template, TemplateResult::new(result, Listeners::none()))
    }

    pub fn push_result(&self, template: &str, result: TemplateResult) -> usize {
        let state = self.lock();
        state
            .subscriptions
            .iter()
            .filter(|s| s.template == template && s.is_live())
            .filter(|s| s.sink.push(result.clone()))
            .count()
    }

    /// Acknowledge every deferred subscription of `template`.
    pub fn resolve(&self, template: &str) -> usize {
        let mut state = self.lock();
        let mut settled = 0;
        for sub in state
            .subscriptions
            .iter_mut()
            .filter(|s| s.template == template)
        {
            if let Some(resolver) = sub.resolver.take() {
                resolver.resolve(sub.unsubscribe_action(&self.log));
                settled += 1;
            }
        }
        settled
    }

    /// Reject every deferred subscription of `template`.
    pub fn reject(&self, template: &str, error: BackendError) -> usize {
        let mut state = self.lock();
        let mut settled = 0;
        for sub in state
            .subscriptions
            .iter_mut()
            .filter(|s| s.template == template)
        {
            if let Some(resolver) = sub.resolver.take() {
                resolver.reject(error.clone());
                sub.rejected = true;
                settled += 1;
            }
        }
        settled
    }

    /// Make the next unsubscribe of each live `template` subscription fail.
    pub fn fail_next_unsubscribe(&self, template: &str, error: BackendError) {
        let state = self.lock();
        for sub in state
            .subscriptions
            .iter()
            .filter(|s| s.template == template && s.is_live())
        {
            *sub
                .unsubscribe_error
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(error.clone());
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TemplateBackend for MockBackend {
    fn name(&self) -> &str {
        "MockBackend"
    }

    fn subscribe(&self, request: RenderRequest, sink: UpdateSink) -> PendingSubscription {
        let mut state = self.lock();
        let behavior = state
            .behaviors
            .get(&request.template)
            .cloned()
            .unwrap_or(MockBehavior::Accept);
        let template = request.template.clone();
        state.requests.push(request);
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(MockEvent::Subscribed(template.clone()));

        let mut sub = MockSubscription {
            template,
            sink,
            unsubscribed: Arc::new(AtomicBool::new(false)),
            unsubscribe_error: Arc::new(Mutex::new(None)),
            resolver: None,
            rejected: false,
        };

        let pending = match behavior {
            MockBehavior::Accept => {
                PendingSubscription::resolved(sub.unsubscribe_action(&self.log))
            }
            MockBehavior::Reject(err) => {
                sub.rejected = true;
                PendingSubscription::rejected(err)
            }
            MockBehavior::Defer => {
                let (resolver, pending) = PendingSubscription::channel();
                sub.resolver = Some(resolver);
                pending
            }
        };
        state.subscriptions.push(sub);
        pending
    }
}

impl fmt::Debug for MockBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("MockBackend")
            .field("requests", &state.requests.len())
            .field("subscriptions", &state.subscriptions.len())
            .finish()
    }
}
