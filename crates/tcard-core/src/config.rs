#![forbid(unsafe_code)]

//! Card configuration snapshots.
//!
//! A [`CardConfig`] is immutable once built: reconfiguration replaces the
//! whole snapshot (callers share it as `Arc<CardConfig>`). Field values are
//! reached through [`CardConfig::raw`], a total mapping from [`FieldKey`] to
//! the raw string, so nothing looks up fields by name at runtime.
//!
//! Keys the subscription core does not interpret (layout, appearance, ...)
//! are kept verbatim in [`CardConfig::extra`] so they still take part in
//! equality and fingerprinting.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::field::FieldKey;

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Errors produced while reading a card configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// The document is not valid JSON or does not match the card schema.
    Json(serde_json::Error),
    /// The document is valid JSON but not an object.
    NotAnObject,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Json(e) => write!(f, "invalid card configuration: {e}"),
            ConfigError::NotAnObject => f.write_str("card configuration must be an object"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Json(e) => Some(e),
            ConfigError::NotAnObject => None,
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Json(e)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Entity scope
// ─────────────────────────────────────────────────────────────────────────────

/// Entities a template is scoped to: one id or a list of ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityScope {
    One(String),
    Many(Vec<String>),
}

impl EntityScope {
    /// Flatten into a list of entity ids.
    #[must_use]
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            EntityScope::One(id) => vec![id.clone()],
            EntityScope::Many(ids) => ids.clone(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Card configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Domains whose entities toggle when their icon is tapped.
const ICON_TOGGLE_DOMAINS: &[&str] = &[
    "automation",
    "button",
    "fan",
    "group",
    "humidifier",
    "input_boolean",
    "input_button",
    "light",
    "scene",
    "switch",
    "valve",
];

/// Immutable snapshot of a card's configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CardConfig {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub card_type: Option<String>,

    /// Entity the card is about; exposed to templates as `entity`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<String>,
    /// Entities the backend should scope template evaluation to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<EntityScope>,
    /// Area the card is about; exposed to templates as `area`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub badge_icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub badge_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill_color: Option<String>,

    /// User-supplied template variables.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub variables: Map<String, Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tap_action: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hold_action: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub double_tap_action: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_tap_action: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_hold_action: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_double_tap_action: Option<Value>,

    /// Presentation keys passed through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CardConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from a JSON document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let value: Value = serde_json::from_str(json)?;
        Self::from_value(value)
    }

    /// Build a configuration from an already-parsed JSON value.
    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        if !value.is_object() {
            return Err(ConfigError::NotAnObject);
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Configuration as a JSON value (what templates see as `config`).
    #[must_use]
    pub fn to_value(&self) -> Value {
        // Every field is a string, a JSON value, or a string-keyed map.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Example configuration shown when a card is first added.
    #[must_use]
    pub fn stub() -> Self {
        Self::new()
            .with_field(FieldKey::Primary, "Hello, {{user}}")
            .with_field(FieldKey::Secondary, "How are you?")
            .with_field(FieldKey::Icon, "mdi:home")
    }

    /// Raw value of `key`.
    #[must_use]
    pub fn raw(&self, key: FieldKey) -> Option<&str> {
        self.field_slot(key).as_deref()
    }

    /// Set the raw value of `key`.
    #[must_use]
    pub fn with_field(mut self, key: FieldKey, value: impl Into<String>) -> Self {
        *self.field_slot_mut(key) = Some(value.into());
        self
    }

    #[must_use]
    pub fn without_field(mut self, key: FieldKey) -> Self {
        *self.field_slot_mut(key) = None;
        self
    }

    #[must_use]
    pub fn with_entity(mut self, entity: impl Into<String>) -> Self {
        self.entity = Some(entity.into());
        self
    }

    #[must_use]
    pub fn with_entity_scope(mut self, scope: EntityScope) -> Self {
        self.entity_id = Some(scope);
        self
    }

    #[must_use]
    pub fn with_area(mut self, area: impl Into<String>) -> Self {
        self.area = Some(area.into());
        self
    }

    #[must_use]
    pub fn with_variable(mut self, name: impl Into<String>, value: Value) -> Self {
        self.variables.insert(name.into(), value);
        self
    }

    /// Fill in the default actions a card gets when none are configured.
    ///
    /// Tapping the card toggles and holding opens details. With an entity and
    /// no explicit icon action, tapping the icon toggles entities that support
    /// it and does nothing otherwise.
    #[must_use]
    pub fn with_defaults(mut self) -> Self {
        if self.tap_action.is_none() {
            self.tap_action = Some(action("toggle"));
        }
        if self.hold_action.is_none() {
            self.hold_action = Some(action("more-info"));
        }
        if self.icon_tap_action.is_none() {
            if let Some(entity) = &self.entity {
                self.icon_tap_action = Some(action(default_icon_action(entity)));
            }
        }
        self
    }

    /// Entity ids the backend should scope evaluation to.
    #[must_use]
    pub fn entity_ids(&self) -> Vec<String> {
        self.entity_id
            .as_ref()
            .map(EntityScope::to_vec)
            .unwrap_or_default()
    }

    /// Whether the inputs a subscription for `key` depends on differ.
    ///
    /// Only the raw value and the associated entity matter.
    #[must_use]
    pub fn field_inputs_changed(&self, other: &CardConfig, key: FieldKey) -> bool {
        self.raw(key) != other.raw(key) || self.entity != other.entity
    }

    /// Keys whose subscription inputs differ between `old` and `new`.
    ///
    /// With no previous configuration every key counts as changed.
    pub fn changed_fields<'a>(
        old: Option<&'a CardConfig>,
        new: &'a CardConfig,
    ) -> impl Iterator<Item = FieldKey> + 'a {
        FieldKey::ALL
            .into_iter()
            .filter(move |&key| old.is_none_or(|old| old.field_inputs_changed(new, key)))
    }

    fn field_slot(&self, key: FieldKey) -> &Option<String> {
        match key {
            FieldKey::Icon => &self.icon,
            FieldKey::IconColor => &self.icon_color,
            FieldKey::BadgeIcon => &self.badge_icon,
            FieldKey::BadgeColor => &self.badge_color,
            FieldKey::Primary => &self.primary,
            FieldKey::Secondary => &self.secondary,
            FieldKey::Picture => &self.picture,
            FieldKey::FillColor => &self.fill_color,
        }
    }

    fn field_slot_mut(&mut self, key: FieldKey) -> &mut Option<String> {
        match key {
            FieldKey::Icon => &mut self.icon,
            FieldKey::IconColor => &mut self.icon_color,
            FieldKey::BadgeIcon => &mut self.badge_icon,
            FieldKey::BadgeColor => &mut self.badge_color,
            FieldKey::Primary => &mut self.primary,
            FieldKey::Secondary => &mut self.secondary,
            FieldKey::Picture => &mut self.picture,
            FieldKey::FillColor => &mut self.fill_color,
        }
    }
}

fn action(name: &str) -> Value {
    let mut map = Map::new();
    map.insert("action".to_owned(), Value::String(name.to_owned()));
    Value::Object(map)
}

/// Icon tap action for an entity without an explicit one.
#[must_use]
pub fn default_icon_action(entity_id: &str) -> &'static str {
    let domain = entity_id.split_once('.').map_or(entity_id, |(d, _)| d);
    if ICON_TOGGLE_DOMAINS.contains(&domain) {
        "toggle"
    } else {
        "none"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_fields_and_context() {
        let config = CardConfig::from_json(
            r#"{
                "type": "custom:tcard-template-card",
                "entity": "light.kitchen",
                "entity_id": ["light.kitchen", "sensor.lux"],
                "area": "kitchen",
                "primary": "{{ states(entity) }}",
                "secondary": "Kitchen",
                "variables": {"threshold": 3},
                "layout": "vertical"
            }"#,
        )
        .unwrap();

        assert_eq!(config.raw(FieldKey::Primary), Some("{{ states(entity) }}"));
        assert_eq!(config.raw(FieldKey::Secondary), Some("Kitchen"));
        assert_eq!(config.raw(FieldKey::Icon), None);
        assert_eq!(config.entity.as_deref(), Some("light.kitchen"));
        assert_eq!(
            config.entity_ids(),
            vec!["light.kitchen".to_owned(), "sensor.lux".to_owned()]
        );
        assert_eq!(config.area.as_deref(), Some("kitchen"));
        assert_eq!(config.variables.get("threshold"), Some(&json!(3)));
        assert_eq!(config.extra.get("layout"), Some(&json!("vertical")));
    }

    #[test]
    fn single_entity_scope_flattens() {
        let config = CardConfig::from_json(r#"{"entity_id": "sun.sun"}"#).unwrap();
        assert_eq!(config.entity_ids(), vec!["sun.sun".to_owned()]);
        assert!(CardConfig::new().entity_ids().is_empty());
    }

    #[test]
    fn rejects_non_objects() {
        assert!(matches!(
            CardConfig::from_json("[1, 2]"),
            Err(ConfigError::NotAnObject)
        ));
        assert!(matches!(
            CardConfig::from_json("{"),
            Err(ConfigError::Json(_))
        ));
        assert!(matches!(
            CardConfig::from_json(r#"{"primary": 5}"#),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn builder_sets_every_field() {
        let mut config = CardConfig::new();
        for key in FieldKey::ALL {
            config = config.with_field(key, key.as_str());
        }
        for key in FieldKey::ALL {
            assert_eq!(config.raw(key), Some(key.as_str()));
        }
        let config = config.without_field(FieldKey::Picture);
        assert_eq!(config.raw(FieldKey::Picture), None);
    }

    #[test]
    fn serialization_keeps_extra_keys() {
        let config = CardConfig::from_json(r#"{"primary": "x", "multiline_secondary": true}"#)
            .unwrap();
        let value = config.to_value();
        assert_eq!(value, json!({"primary": "x", "multiline_secondary": true}));
    }

    #[test]
    fn stub_greets_the_user() {
        let stub = CardConfig::stub();
        assert_eq!(stub.raw(FieldKey::Primary), Some("Hello, {{user}}"));
        assert_eq!(stub.raw(FieldKey::Secondary), Some("How are you?"));
        assert_eq!(stub.raw(FieldKey::Icon), Some("mdi:home"));
    }

    #[test]
    fn defaults_fill_missing_actions() {
        let config = CardConfig::new().with_entity("light.porch").with_defaults();
        assert_eq!(config.tap_action, Some(json!({"action": "toggle"})));
        assert_eq!(config.hold_action, Some(json!({"action": "more-info"})));
        assert_eq!(config.icon_tap_action, Some(json!({"action": "toggle"})));

        let config = CardConfig::new().with_entity("sensor.temp").with_defaults();
        assert_eq!(config.icon_tap_action, Some(json!({"action": "none"})));

        let config = CardConfig::new().with_defaults();
        assert_eq!(config.icon_tap_action, None);
    }

    #[test]
    fn defaults_keep_explicit_actions() {
        let mut config = CardConfig::new().with_entity("light.porch");
        config.tap_action = Some(json!({"action": "navigate"}));
        config.icon_tap_action = Some(json!({"action": "more-info"}));
        let config = config.with_defaults();
        assert_eq!(config.tap_action, Some(json!({"action": "navigate"})));
        assert_eq!(config.icon_tap_action, Some(json!({"action": "more-info"})));
    }

    #[test]
    fn default_icon_action_by_domain() {
        assert_eq!(default_icon_action("switch.heater"), "toggle");
        assert_eq!(default_icon_action("scene.movie"), "toggle");
        assert_eq!(default_icon_action("weather.home"), "none");
        assert_eq!(default_icon_action("light"), "toggle");
    }

    #[test]
    fn changed_fields_tracks_value_and_entity() {
        let old = CardConfig::new()
            .with_field(FieldKey::Primary, "{{ a }}")
            .with_field(FieldKey::Secondary, "{{ b }}");
        let new = old.clone().with_field(FieldKey::Secondary, "{{ c }}");

        let changed: Vec<_> = CardConfig::changed_fields(Some(&old), &new).collect();
        assert_eq!(changed, vec![FieldKey::Secondary]);

        let moved = old.clone().with_entity("light.other");
        let changed: Vec<_> = CardConfig::changed_fields(Some(&old), &moved).collect();
        assert_eq!(changed, FieldKey::ALL.to_vec());

        let with_area = old.clone().with_area("garage");
        assert_eq!(CardConfig::changed_fields(Some(&old), &with_area).count(), 0);

        assert_eq!(CardConfig::changed_fields(None, &old).count(), FieldKey::COUNT);
    }
}
