#![forbid(unsafe_code)]

//! tcard core data model.
//!
//! Pure, side-effect-free building blocks shared by the runtime:
//!
//! - [`FieldKey`] / [`FieldMap`] - the closed set of template slots
//! - [`CardConfig`] - immutable configuration snapshots
//! - [`is_template`] - static vs dynamic classification
//! - [`TemplateResult`] / [`ResultSet`] - rendered values per field
//! - [`Fingerprint`] - configuration identity used as a cache key
//!
//! Nothing here performs I/O or holds subscriptions; see `tcard-runtime`.

pub mod config;
pub mod field;
pub mod fingerprint;
pub mod template;

pub use config::{CardConfig, ConfigError, EntityScope, default_icon_action};
pub use field::{FieldKey, FieldMap, UnknownFieldKey};
pub use fingerprint::Fingerprint;
pub use template::{Listeners, ResultSet, TEMPLATE_DELIMITER, TemplateResult, is_template};
