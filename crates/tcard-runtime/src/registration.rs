#![forbid(unsafe_code)]

//! Process-wide registry of card types offered to the dashboard picker.

use std::sync::{LazyLock, OnceLock, RwLock};

use serde::Serialize;

/// Type name of the built-in template card.
pub const TEMPLATE_CARD_TYPE: &str = "tcard-template-card";

const VERSION: &str = env!("CARGO_PKG_VERSION");
const REPOSITORY: &str = env!("CARGO_PKG_REPOSITORY");

static REGISTRY: LazyLock<RwLock<Vec<CardDescriptor>>> = LazyLock::new(|| RwLock::new(Vec::new()));
static REGISTRY_VERSION: OnceLock<&'static str> = OnceLock::new();

/// What a card type says about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardRegistration {
    pub card_type: String,
    pub name: String,
    pub description: String,
}

impl CardRegistration {
    #[must_use]
    pub fn new(
        card_type: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            card_type: card_type.into(),
            name: name.into(),
            description: description.into(),
        }
    }
}

/// A registered card as the dashboard picker sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CardDescriptor {
    #[serde(rename = "type")]
    pub card_type: String,
    pub name: String,
    pub description: String,
    pub preview: bool,
    pub version: String,
    #[serde(rename = "documentationURL")]
    pub documentation_url: String,
}

impl CardDescriptor {
    fn from_registration(registration: CardRegistration) -> Self {
        let documentation_url = format!(
            "{REPOSITORY}/blob/main/docs/cards/{}.md",
            documentation_page(&registration.card_type)
        );
        Self {
            card_type: registration.card_type,
            name: registration.name,
            description: registration.description,
            preview: true,
            version: VERSION.to_owned(),
            documentation_url,
        }
    }
}

/// `tcard-template-card` documents as `template`.
fn documentation_page(card_type: &str) -> String {
    card_type.replacen("-card", "", 1).replacen("tcard-", "", 1)
}

/// Add a card type to the registry.
///
/// Returns `false` when the type is already registered.
pub fn register_card(registration: CardRegistration) -> bool {
    REGISTRY_VERSION.get_or_init(|| VERSION);

    let Ok(mut cards) = REGISTRY.write() else {
        return false;
    };
    if cards.iter().any(|c| c.card_type == registration.card_type) {
        return false;
    }
    let descriptor = CardDescriptor::from_registration(registration);
    tracing::info!(
        card_type = %descriptor.card_type,
        version = %descriptor.version,
        "registered card"
    );
    cards.push(descriptor);
    true
}

/// Every registered card, in registration order.
#[must_use]
pub fn registered_cards() -> Vec<CardDescriptor> {
    REGISTRY
        .read()
        .map(|cards| cards.clone())
        .unwrap_or_default()
}

/// Crate version recorded by the first registration.
#[must_use]
pub fn registry_version() -> Option<&'static str> {
    REGISTRY_VERSION.get().copied()
}

/// Register the built-in template card.
pub fn register_template_card() -> bool {
    register_card(CardRegistration::new(
        TEMPLATE_CARD_TYPE,
        "Template card",
        "A card whose icon, colors, badge, text and picture are live templates.",
    ))
}
