#![forbid(unsafe_code)]

//! tcard Runtime
//!
//! This crate keeps a dashboard card's template fields live: it subscribes to
//! a push-based templating backend for every field that holds a template,
//! collects the pushed results, and carries them across unmount/remount.
//!
//! # Key Components
//!
//! - [`TemplateCard`] - Card controller driven by mount/unmount/reconfigure
//! - [`SubscriptionManager`] - One backend subscription per dynamic field
//! - [`TemplateBackend`] - Seam to the templating service
//! - [`ResultCache`] / [`SharedResultCache`] - LRU of rendered results by fingerprint
//! - [`MockBackend`] - Scriptable in-process backend
//! - [`register_template_card`] - Card picker registration
//!
//! # Role in tcard
//! `tcard-runtime` owns every side effect. The pure model (field keys,
//! configuration, fingerprints) lives in `tcard-core`.

pub mod backend;
pub mod card;
pub mod config;
pub mod mock;
pub mod registration;
pub mod result_cache;
pub mod subscription;

pub use backend::{
    BackendError, ErrorCode, FieldUpdate, PendingSubscription, RenderRequest, SubscribeOutcome,
    SubscriptionResolver, TemplateBackend, Unsubscribe, UpdateSink,
};
pub use card::TemplateCard;
pub use config::RuntimeConfig;
pub use mock::{MockBackend, MockBehavior, MockEvent};
pub use registration::{
    CardDescriptor, CardRegistration, TEMPLATE_CARD_TYPE, register_card, register_template_card,
    registered_cards, registry_version,
};
pub use result_cache::{CacheStats, DEFAULT_CACHE_CAPACITY, ResultCache, SharedResultCache};
pub use subscription::{HostContext, PumpReport, SubscriptionManager, SubscriptionTable};
