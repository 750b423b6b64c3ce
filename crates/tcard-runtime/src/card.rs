#![forbid(unsafe_code)]

//! The template card controller.
//!
//! [`TemplateCard`] drives a [`SubscriptionManager`] from the host's lifecycle
//! events and keeps rendered results alive across unmount/remount through a
//! [`SharedResultCache`] keyed by the configuration [`Fingerprint`].
//!
//! ```text
//!   set_config ──▶ fingerprint ──▶ reconfigure (mounted) / replace (unmounted)
//!   mount      ──▶ restore snapshot from cache ──▶ open dynamic fields
//!   pump       ──▶ apply pushes
//!   unmount    ──▶ close all ──▶ snapshot into cache ──▶ discard live results
//! ```

use std::sync::Arc;

use tcard_core::{CardConfig, FieldKey, Fingerprint, ResultSet, is_template};

use crate::backend::BackendError;
use crate::config::RuntimeConfig;
use crate::result_cache::SharedResultCache;
use crate::subscription::{HostContext, PumpReport, SubscriptionManager, SubscriptionTable};

/// A card whose fields may be live templates.
#[derive(Debug)]
pub struct TemplateCard {
    manager: SubscriptionManager,
    cache: SharedResultCache,
    fingerprint: Option<Fingerprint>,
}

impl Default for TemplateCard {
    /// A card sharing the process-wide result cache.
    fn default() -> Self {
        Self::new(SharedResultCache::global(), RuntimeConfig::from_env())
    }
}

impl TemplateCard {
    #[must_use]
    pub fn new(cache: SharedResultCache, runtime: RuntimeConfig) -> Self {
        Self {
            manager: SubscriptionManager::new(runtime),
            cache,
            fingerprint: None,
        }
    }

    /// Apply a new configuration.
    ///
    /// Default actions are filled in first. While mounted, only fields whose
    /// inputs changed are resubscribed.
    pub fn set_config(&mut self, config: CardConfig) -> Result<(), BackendError> {
        let config = Arc::new(config.with_defaults());
        let fingerprint = Fingerprint::of(&config);
        self.fingerprint = Some(fingerprint);

        if !self.manager.is_active() {
            return self.manager.replace_config(config);
        }
        if self.manager.results().is_empty() {
            self.restore_cached(fingerprint);
        }
        self.manager.on_reconfigure(config)
    }

    /// Attach or detach the backend connection.
    pub fn set_host(&mut self, host: Option<HostContext>) {
        match host {
            Some(host) => self.manager.attach_host(host),
            None => {
                self.manager.detach_host();
            }
        }
    }

    /// The card entered the dashboard.
    pub fn mount(&mut self) {
        if self.manager.is_active() {
            return;
        }
        if let Some(fingerprint) = self.fingerprint {
            if self.manager.results().is_empty() {
                self.restore_cached(fingerprint);
            }
        }
        self.manager.on_mount();
    }

    /// The card left the dashboard.
    ///
    /// Results rendered so far are stored in the cache even when closing a
    /// subscription fails.
    pub fn unmount(&mut self) -> Result<(), BackendError> {
        if !self.manager.is_active() {
            return Ok(());
        }
        let outcome = self.manager.on_unmount();
        let snapshot = self.manager.take_results();
        if let Some(fingerprint) = self.fingerprint {
            tracing::debug!(%fingerprint, fields = snapshot.len(), "caching rendered results");
            self.cache.set(fingerprint, snapshot);
        }
        outcome
    }

    /// Apply pending acknowledgements and pushed results.
    pub fn pump(&mut self) -> PumpReport {
        self.manager.pump()
    }

    /// What the card displays for `key`.
    ///
    /// Static fields show their raw value. Template fields show their latest
    /// result, or nothing until one arrives.
    #[must_use]
    pub fn value(&self, key: FieldKey) -> Option<&str> {
        let raw = self.manager.config()?.raw(key)?;
        if is_template(Some(raw)) {
            self.manager.results().value(key)
        } else {
            Some(raw)
        }
    }

    #[must_use]
    pub fn is_template(&self, key: FieldKey) -> bool {
        is_template(self.config().and_then(|config| config.raw(key)))
    }

    /// The Live Result Set.
    #[must_use]
    pub fn results(&self) -> &ResultSet {
        self.manager.results()
    }

    #[must_use]
    pub fn fingerprint(&self) -> Option<Fingerprint> {
        self.fingerprint
    }

    #[must_use]
    pub fn config(&self) -> Option<&CardConfig> {
        self.manager.config().map(Arc::as_ref)
    }

    #[must_use]
    pub fn is_mounted(&self) -> bool {
        self.manager.is_active()
    }

    #[must_use]
    pub fn subscriptions(&self) -> &SubscriptionTable {
        self.manager.table()
    }

    #[must_use]
    pub fn cache(&self) -> &SharedResultCache {
        &self.cache
    }

    fn restore_cached(&mut self, fingerprint: Fingerprint) {
        if let Some(snapshot) = self.cache.get(fingerprint) {
            tracing::debug!(%fingerprint, fields = snapshot.len(), "restoring cached results");
            self.manager.restore(ResultSet::clone(&snapshot));
        }
    }
}
