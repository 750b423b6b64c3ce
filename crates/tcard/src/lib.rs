#![forbid(unsafe_code)]

//! tcard public facade crate.
//!
//! Re-exports the card model and runtime under one name and adds a prelude
//! plus a combined error type.

use std::fmt;

// --- Core re-exports -------------------------------------------------------

pub use tcard_core::{
    CardConfig, ConfigError, EntityScope, FieldKey, FieldMap, Fingerprint, Listeners, ResultSet,
    TemplateResult, is_template,
};

// --- Runtime re-exports ----------------------------------------------------

pub use tcard_runtime::{
    BackendError, ErrorCode, HostContext, MockBackend, PendingSubscription, RenderRequest,
    RuntimeConfig, SharedResultCache, TemplateBackend, TemplateCard, Unsubscribe, UpdateSink,
    register_template_card,
};

// --- Errors ---------------------------------------------------------------

/// Top-level error type for tcard hosts.
#[derive(Debug)]
pub enum Error {
    /// The card configuration could not be parsed.
    Config(ConfigError),
    /// The templating backend refused to close a subscription.
    Backend(BackendError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(err) => write!(f, "{err}"),
            Self::Backend(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            Self::Backend(err) => Some(err),
        }
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Self::Config(err)
    }
}

impl From<BackendError> for Error {
    fn from(err: BackendError) -> Self {
        Self::Backend(err)
    }
}

/// Standard result type for tcard APIs.
pub type Result<T> = std::result::Result<T, Error>;

/// Parse a JSON card configuration and apply it to `card`.
pub fn configure(card: &mut TemplateCard, json: &str) -> Result<()> {
    let config = CardConfig::from_json(json)?;
    card.set_config(config)?;
    Ok(())
}

// --- Prelude --------------------------------------------------------------

pub mod prelude {
    pub use crate::{
        CardConfig, Error, FieldKey, HostContext, Result, TemplateBackend, TemplateCard,
        configure,
    };

    pub use crate::{core, runtime};
}

pub use tcard_core as core;
pub use tcard_runtime as runtime;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;
    use std::sync::Arc;

    fn card() -> TemplateCard {
        TemplateCard::new(SharedResultCache::new(8), RuntimeConfig::default())
    }

    #[test]
    fn configure_parses_and_applies() {
        let backend = Arc::new(MockBackend::new());
        let mut card = card();
        card.set_host(Some(HostContext::new(backend.clone(), "Ada")));
        configure(
            &mut card,
            r#"{"type": "custom:tcard-template-card", "primary": "Hi {{ user }}", "secondary": "there"}"#,
        )
        .unwrap();
        card.mount();

        backend.push("Hi {{ user }}", "Hi Ada");
        card.pump();
        assert_eq!(card.value(FieldKey::Primary), Some("Hi Ada"));
        assert_eq!(card.value(FieldKey::Secondary), Some("there"));
    }

    #[test]
    fn configure_rejects_non_objects() {
        let mut card = card();
        let err = configure(&mut card, "[1, 2]").unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::NotAnObject)));
        assert!(card.config().is_none());

        let err = configure(&mut card, "{ nope").unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::Json(_))));
        assert!(err.source().is_some());
    }

    #[test]
    fn backend_errors_convert() {
        let err: Error = BackendError::connection_closed().into();
        assert!(matches!(err, Error::Backend(_)));
        assert!(err.to_string().contains("connection_closed"));
    }
}
