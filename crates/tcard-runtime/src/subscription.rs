#![forbid(unsafe_code)]

//! Per-card template subscriptions.
//!
//! A [`SubscriptionManager`] owns at most one backend subscription per
//! [`FieldKey`] and the Live Result Set those subscriptions write into.
//!
//! # How it works
//!
//! 1. `on_mount` opens a subscription for every field whose raw value is a
//!    template
//! 2. `on_reconfigure` closes and reopens only the fields whose inputs changed
//! 3. Backends push results through an [`UpdateSink`]; `pump` applies them
//! 4. `on_unmount` closes everything
//!
//! # Design Invariants
//!
//! | Invariant                       | Enforced by                              |
//! |---------------------------------|------------------------------------------|
//! | At most one slot per field      | `open_key` skips occupied slots          |
//! | Slot stored before settling     | `open_key` inserts, then settles         |
//! | Close precedes reopen           | `on_reconfigure` closes all, then opens  |
//! | Stale pushes never land         | generation check in `pump`               |
//! | Failed fields stay readable     | inert fallback with the raw template     |
//!
//! # Failure Modes
//!
//! | Failure                         | Effect                                   |
//! |---------------------------------|------------------------------------------|
//! | Subscribe rejected              | Raw template shown, slot removed         |
//! | Unsubscribe `not_found`         | Swallowed, slot removed                  |
//! | Unsubscribe `template_error`    | Swallowed, slot removed                  |
//! | Any other close failure         | Returned to caller, slot kept for retry  |
//! | Acknowledgement never arrives   | `close_key` blocks                       |

use std::fmt;
use std::mem;
use std::sync::{Arc, mpsc};

use serde_json::{Map, Value};
use tcard_core::{CardConfig, FieldKey, FieldMap, ResultSet, TemplateResult, is_template};

use crate::backend::{
    BackendError, FieldUpdate, PendingSubscription, RenderRequest, TemplateBackend, Unsubscribe,
    UpdateSink,
};
use crate::config::RuntimeConfig;

/// Backend connection plus the identity templates render for.
#[derive(Clone)]
pub struct HostContext {
    backend: Arc<dyn TemplateBackend>,
    user_name: String,
}

impl HostContext {
    #[must_use]
    pub fn new(backend: Arc<dyn TemplateBackend>, user_name: impl Into<String>) -> Self {
        Self {
            backend,
            user_name: user_name.into(),
        }
    }

    #[must_use]
    pub fn backend(&self) -> &Arc<dyn TemplateBackend> {
        &self.backend
    }

    /// Display name exposed to templates as `user`.
    #[must_use]
    pub fn user_name(&self) -> &str {
        &self.user_name
    }
}

impl fmt::Debug for HostContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostContext")
            .field("backend", &self.backend.name())
            .field("user_name", &self.user_name)
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Subscription table
// ─────────────────────────────────────────────────────────────────────────────

enum SlotState {
    /// Acknowledgement still in flight.
    Pending(PendingSubscription),
    Open(Box<dyn Unsubscribe>),
}

struct Slot {
    generation: u64,
    template: String,
    state: SlotState,
}

/// Subscription slots keyed by field.
#[derive(Default)]
pub struct SubscriptionTable {
    slots: FieldMap<Option<Slot>>,
}

impl SubscriptionTable {
    #[must_use]
    pub fn contains(&self, key: FieldKey) -> bool {
        self.slots[key].is_some()
    }

    /// Whether `key` holds a subscription whose acknowledgement is in flight.
    #[must_use]
    pub fn is_pending(&self, key: FieldKey) -> bool {
        matches!(
            self.slots[key],
            Some(Slot {
                state: SlotState::Pending(_),
                ..
            })
        )
    }

    /// Generation of the subscription attempt held for `key`.
    #[must_use]
    pub fn generation(&self, key: FieldKey) -> Option<u64> {
        self.slots[key].as_ref().map(|slot| slot.generation)
    }

    /// Template text the subscription for `key` renders.
    #[must_use]
    pub fn template(&self, key: FieldKey) -> Option<&str> {
        self.slots[key].as_ref().map(|slot| slot.template.as_str())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.occupied()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn keys(&self) -> Vec<FieldKey> {
        self.slots.occupied_keys().collect()
    }

    fn pending_keys(&self) -> Vec<FieldKey> {
        self.keys()
            .into_iter()
            .filter(|&key| self.is_pending(key))
            .collect()
    }

    fn insert(&mut self, key: FieldKey, slot: Slot) {
        self.slots[key] = Some(slot);
    }

    fn take(&mut self, key: FieldKey) -> Option<Slot> {
        self.slots.take(key)
    }
}

impl fmt::Debug for SubscriptionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.slots.iter().filter_map(|(key, slot)| {
                slot.as_ref().map(|slot| (key, (slot.generation, self.is_pending(key))))
            }))
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Manager
// ─────────────────────────────────────────────────────────────────────────────

/// What one [`SubscriptionManager::pump`] call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpReport {
    /// Pending subscriptions that were acknowledged.
    pub established: usize,
    /// Pending subscriptions that were rejected and fell back.
    pub failed: usize,
    /// Pushed results written to the Live Result Set.
    pub applied: usize,
    /// Pushed results from closed subscriptions.
    pub dropped: usize,
}

impl PumpReport {
    #[must_use]
    pub fn is_idle(&self) -> bool {
        *self == Self::default()
    }
}

enum Settled {
    Pending,
    Established,
    Failed,
}

/// Owns one card's template subscriptions and their results.
pub struct SubscriptionManager {
    config: Option<Arc<CardConfig>>,
    host: Option<HostContext>,
    strict: bool,
    active: bool,
    table: SubscriptionTable,
    results: ResultSet,
    next_generation: u64,
    sender: mpsc::Sender<FieldUpdate>,
    receiver: mpsc::Receiver<FieldUpdate>,
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

impl SubscriptionManager {
    #[must_use]
    pub fn new(runtime: RuntimeConfig) -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            config: None,
            host: None,
            strict: runtime.strict,
            active: false,
            table: SubscriptionTable::default(),
            results: ResultSet::new(),
            next_generation: 0,
            sender,
            receiver,
        }
    }

    #[must_use]
    pub fn config(&self) -> Option<&Arc<CardConfig>> {
        self.config.as_ref()
    }

    #[must_use]
    pub fn host(&self) -> Option<&HostContext> {
        self.host.as_ref()
    }

    /// Whether the card is mounted.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    #[must_use]
    pub fn table(&self) -> &SubscriptionTable {
        &self.table
    }

    /// The Live Result Set.
    #[must_use]
    pub fn results(&self) -> &ResultSet {
        &self.results
    }

    /// Replace the Live Result Set, e.g. with a cached snapshot.
    pub fn restore(&mut self, snapshot: ResultSet) {
        self.results = snapshot;
    }

    /// Move the Live Result Set out, leaving it empty.
    pub fn take_results(&mut self) -> ResultSet {
        mem::take(&mut self.results)
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    /// Activate and open every dynamic field.
    pub fn on_mount(&mut self) {
        self.active = true;
        self.open_all();
    }

    /// Swap in `config`, resubscribing only the fields whose inputs changed.
    ///
    /// Every changed field is closed before any is reopened. A field whose
    /// close fails keeps its old subscription; the first such error is
    /// returned after the remaining fields were handled.
    pub fn on_reconfigure(&mut self, config: Arc<CardConfig>) -> Result<(), BackendError> {
        let (changed, outcome) = self.close_changed(&config);
        self.config = Some(config);
        for key in changed {
            self.open_key(key);
        }
        outcome
    }

    /// Swap in `config` without opening anything.
    ///
    /// Subscriptions for changed fields are closed so a later mount opens them
    /// against the new configuration.
    pub fn replace_config(&mut self, config: Arc<CardConfig>) -> Result<(), BackendError> {
        let (_, outcome) = self.close_changed(&config);
        self.config = Some(config);
        outcome
    }

    /// Deliver outstanding pushes, close everything and deactivate.
    pub fn on_unmount(&mut self) -> Result<(), BackendError> {
        self.pump();
        let mut outcome = Ok(());
        for key in self.table.keys() {
            if let Err(err) = self.close_key(key) {
                outcome = outcome.and(Err(err));
            }
        }
        self.active = false;
        tracing::debug!(remaining = self.table.len(), "subscriptions closed on unmount");
        outcome
    }

    /// Attach the backend connection. Opens subscriptions when mounted.
    pub fn attach_host(&mut self, host: HostContext) {
        tracing::debug!(backend = host.backend.name(), "host attached");
        self.host = Some(host);
        self.open_all();
    }

    /// Forget the backend connection; existing subscriptions are kept.
    pub fn detach_host(&mut self) -> Option<HostContext> {
        self.host.take()
    }

    // ── Per-field ────────────────────────────────────────────────────────

    /// Open a subscription for `key` if it is dynamic and not yet subscribed.
    ///
    /// Returns `true` when a subscribe request was sent.
    pub fn open_key(&mut self, key: FieldKey) -> bool {
        if !self.active || self.table.contains(key) {
            return false;
        }
        let Some(host) = self.host.as_ref() else {
            return false;
        };
        let Some(config) = self.config.as_deref() else {
            return false;
        };
        let Some(template) = config.raw(key).filter(|raw| is_template(Some(*raw))) else {
            return false;
        };

        let backend = Arc::clone(&host.backend);
        let request = RenderRequest {
            template: template.to_owned(),
            entity_ids: config.entity_ids(),
            variables: template_variables(config, &host.user_name),
            strict: self.strict,
        };

        let generation = self.next_generation;
        self.next_generation += 1;
        tracing::debug!(
            field = %key,
            generation,
            backend = backend.name(),
            "opening template subscription"
        );

        let template = request.template.clone();
        let sink = UpdateSink::new(key, generation, self.sender.clone());
        let pending = backend.subscribe(request, sink);
        self.table.insert(
            key,
            Slot {
                generation,
                template,
                state: SlotState::Pending(pending),
            },
        );
        self.settle(key);
        true
    }

    /// Close the subscription for `key`, waiting for its acknowledgement.
    pub fn close_key(&mut self, key: FieldKey) -> Result<(), BackendError> {
        let Some(Slot {
            generation,
            template,
            state,
        }) = self.table.take(key)
        else {
            return Ok(());
        };

        let mut unsubscribe = match state {
            SlotState::Open(unsubscribe) => unsubscribe,
            SlotState::Pending(pending) => match pending.wait() {
                Ok(unsubscribe) => unsubscribe,
                Err(err) => {
                    self.fall_back(key, template, &err);
                    return if err.is_benign_on_close() {
                        Ok(())
                    } else {
                        Err(err)
                    };
                }
            },
        };

        match unsubscribe.unsubscribe() {
            Ok(()) => {
                tracing::debug!(field = %key, generation, "closed template subscription");
                Ok(())
            }
            Err(err) if err.is_benign_on_close() => {
                tracing::debug!(
                    field = %key,
                    generation,
                    code = %err.code,
                    "template subscription already gone"
                );
                Ok(())
            }
            Err(err) => {
                tracing::warn!(
                    field = %key,
                    generation,
                    error = %err,
                    "failed to close template subscription"
                );
                self.table.insert(
                    key,
                    Slot {
                        generation,
                        template,
                        state: SlotState::Open(unsubscribe),
                    },
                );
                Err(err)
            }
        }
    }

    /// Settle acknowledgements and apply pushed results without blocking.
    pub fn pump(&mut self) -> PumpReport {
        let mut report = PumpReport::default();

        for key in self.table.pending_keys() {
            match self.settle(key) {
                Settled::Established => report.established += 1,
                Settled::Failed => report.failed += 1,
                Settled::Pending => {}
            }
        }

        while let Ok(update) = self.receiver.try_recv() {
            if self.table.generation(update.key) == Some(update.generation) {
                tracing::trace!(
                    field = %update.key,
                    generation = update.generation,
                    "applying push"
                );
                self.results.set(update.key, update.result);
                report.applied += 1;
            } else {
                report.dropped += 1;
            }
        }

        if !report.is_idle() {
            tracing::trace!(
                established = report.established,
                failed = report.failed,
                applied = report.applied,
                dropped = report.dropped,
                "pump complete"
            );
        }
        report
    }

    // ── Internals ────────────────────────────────────────────────────────

    fn open_all(&mut self) {
        for key in FieldKey::ALL {
            self.open_key(key);
        }
    }

    fn close_changed(
        &mut self,
        config: &CardConfig,
    ) -> (Vec<FieldKey>, Result<(), BackendError>) {
        let changed: Vec<FieldKey> =
            CardConfig::changed_fields(self.config.as_deref(), config).collect();
        let mut outcome = Ok(());
        for &key in &changed {
            if let Err(err) = self.close_key(key) {
                outcome = outcome.and(Err(err));
            }
        }
        (changed, outcome)
    }

    fn settle(&mut self, key: FieldKey) -> Settled {
        let Some(slot) = self.table.slots[key].as_mut() else {
            return Settled::Pending;
        };
        let SlotState::Pending(pending) = &mut slot.state else {
            return Settled::Pending;
        };
        match pending.try_settle() {
            None => Settled::Pending,
            Some(Ok(unsubscribe)) => {
                tracing::debug!(
                    field = %key,
                    generation = slot.generation,
                    "template subscription established"
                );
                slot.state = SlotState::Open(unsubscribe);
                Settled::Established
            }
            Some(Err(err)) => {
                if let Some(slot) = self.table.take(key) {
                    self.fall_back(key, slot.template, &err);
                }
                Settled::Failed
            }
        }
    }

    fn fall_back(&mut self, key: FieldKey, template: String, err: &BackendError) {
        tracing::warn!(
            field = %key,
            error = %err,
            "template subscription failed, showing raw template"
        );
        self.results.set(key, TemplateResult::inert(template));
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        for key in self.table.keys() {
            if let Some(Slot {
                state: SlotState::Open(mut unsubscribe),
                ..
            }) = self.table.take(key)
            {
                // Best effort; nobody is left to report to.
                let _ = unsubscribe.unsubscribe();
            }
        }
    }
}

impl fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionManager")
            .field("active", &self.active)
            .field("host", &self.host)
            .field("table", &self.table)
            .field("results", &self.results.len())
            .finish_non_exhaustive()
    }
}

/// Variables a template sees: the user's own plus the reserved names.
fn template_variables(config: &CardConfig, user_name: &str) -> Map<String, Value> {
    let mut variables = config.variables.clone();
    variables.insert("config".to_owned(), config.to_value());
    variables.insert("user".to_owned(), Value::String(user_name.to_owned()));
    variables.insert("entity".to_owned(), optional_string(config.entity.as_deref()));
    variables.insert("area".to_owned(), optional_string(config.area.as_deref()));
    variables
}

fn optional_string(value: Option<&str>) -> Value {
    value.map_or(Value::Null, |s| Value::String(s.to_owned()))
}
