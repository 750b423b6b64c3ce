#![forbid(unsafe_code)]

//! Template classification and evaluation results.
//!
//! # Classification
//!
//! [`is_template`] is the single policy deciding whether a raw field value has
//! to be evaluated by the templating backend. It is a substring scan for the
//! expression delimiter, not a parse: anything containing `{` is dynamic,
//! everything else (including a missing value) is rendered verbatim. It is
//! total and cheap enough to call on every render.
//!
//! # Results
//!
//! A [`TemplateResult`] is what the backend pushes for one field. Only
//! [`TemplateResult::result`] is read by the card; [`Listeners`] describes the
//! upstream facts the backend re-evaluates on and is carried through opaquely.

use serde::{Deserialize, Serialize};

use crate::field::{FieldKey, FieldMap};

/// Substring that marks a raw field value as an expression template.
pub const TEMPLATE_DELIMITER: char = '{';

/// Whether a raw field value must be rendered by the templating backend.
#[inline]
#[must_use]
pub fn is_template(raw: Option<&str>) -> bool {
    raw.is_some_and(|value| value.contains(TEMPLATE_DELIMITER))
}

/// Upstream facts a rendered template depends on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listeners {
    /// Re-render on any state change.
    #[serde(default)]
    pub all: bool,
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(default)]
    pub entities: Vec<String>,
    /// Re-render on time ticks.
    #[serde(default)]
    pub time: bool,
}

impl Listeners {
    /// A listener set that never triggers.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// True when nothing upstream can cause a re-render.
    #[must_use]
    pub fn is_inert(&self) -> bool {
        !self.all && !self.time && self.domains.is_empty() && self.entities.is_empty()
    }
}

/// Outcome of evaluating one field template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateResult {
    pub result: String,
    #[serde(default)]
    pub listeners: Listeners,
}

impl TemplateResult {
    pub fn new(result: impl Into<String>, listeners: Listeners) -> Self {
        Self {
            result: result.into(),
            listeners,
        }
    }

    /// Result synthesized when a template cannot be subscribed.
    ///
    /// Shows the unrendered template text and never updates.
    pub fn inert(raw: impl Into<String>) -> Self {
        Self::new(raw, Listeners::none())
    }
}

/// Per-field rendered results of one card instance.
///
/// `None` means the field is static or has not resolved yet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultSet {
    results: FieldMap<Option<TemplateResult>>,
}

impl ResultSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, key: FieldKey) -> Option<&TemplateResult> {
        self.results[key].as_ref()
    }

    /// Rendered string for `key`, if one has been delivered.
    #[must_use]
    pub fn value(&self, key: FieldKey) -> Option<&str> {
        self.get(key).map(|r| r.result.as_str())
    }

    /// Replace the entry for `key`, leaving other fields untouched.
    pub fn set(&mut self, key: FieldKey, result: TemplateResult) -> Option<TemplateResult> {
        self.results.replace(key, Some(result))
    }

    pub fn remove(&mut self, key: FieldKey) -> Option<TemplateResult> {
        self.results.take(key)
    }

    /// Number of fields holding a result.
    #[must_use]
    pub fn len(&self) -> usize {
        self.results.occupied()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (FieldKey, &TemplateResult)> {
        self.results
            .iter()
            .filter_map(|(key, result)| result.as_ref().map(|r| (key, r)))
    }
}
