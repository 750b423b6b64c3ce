#![forbid(unsafe_code)]

//! Runtime tuning.
//!
//! | Variable                 | Default | Meaning                               |
//! |--------------------------|---------|---------------------------------------|
//! | `TCARD_CACHE_CAPACITY`   | `1000`  | Entries kept by the global result cache |
//! | `TCARD_STRICT_TEMPLATES` | `true`  | Ask the backend for strict rendering  |
//!
//! Unparseable values are ignored with a warning.

use crate::result_cache::DEFAULT_CACHE_CAPACITY;

/// Environment variable overriding [`RuntimeConfig::cache_capacity`].
pub const ENV_CACHE_CAPACITY: &str = "TCARD_CACHE_CAPACITY";
/// Environment variable overriding [`RuntimeConfig::strict`].
pub const ENV_STRICT_TEMPLATES: &str = "TCARD_STRICT_TEMPLATES";

/// Settings shared by the subscription manager and the result cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Capacity of the result cache.
    pub cache_capacity: usize,
    /// Request strict template evaluation (undefined references fail).
    pub strict: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            strict: true,
        }
    }
}

impl RuntimeConfig {
    #[must_use]
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Defaults overridden from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overridden through an arbitrary variable lookup.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_CACHE_CAPACITY) {
            match raw.trim().parse::<usize>() {
                Ok(capacity) if capacity > 0 => config.cache_capacity = capacity,
                _ => tracing::warn!(
                    var = ENV_CACHE_CAPACITY,
                    value = %raw,
                    "ignoring invalid cache capacity"
                ),
            }
        }

        if let Some(raw) = lookup(ENV_STRICT_TEMPLATES) {
            match parse_flag(&raw) {
                Some(strict) => config.strict = strict,
                None => tracing::warn!(
                    var = ENV_STRICT_TEMPLATES,
                    value = %raw,
                    "ignoring invalid strict flag"
                ),
            }
        }

        config
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    let raw = raw.trim();
    if raw == "1" || raw.eq_ignore_ascii_case("true") {
        Some(true)
    } else if raw == "0" || raw.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.cache_capacity, 1000);
        assert!(config.strict);
        assert_eq!(RuntimeConfig::from_lookup(lookup(&[])), config);
    }

    #[test]
    fn overrides_from_lookup() {
        let config = RuntimeConfig::from_lookup(lookup(&[
            (ENV_CACHE_CAPACITY, " 64 "),
            (ENV_STRICT_TEMPLATES, "FALSE"),
        ]));
        assert_eq!(config.cache_capacity, 64);
        assert!(!config.strict);
    }

    #[test]
    fn invalid_values_keep_defaults() {
        let config = RuntimeConfig::from_lookup(lookup(&[
            (ENV_CACHE_CAPACITY, "0"),
            (ENV_STRICT_TEMPLATES, "sometimes"),
        ]));
        assert_eq!(config, RuntimeConfig::default());

        let config = RuntimeConfig::from_lookup(lookup(&[(ENV_CACHE_CAPACITY, "lots")]));
        assert_eq!(config.cache_capacity, DEFAULT_CACHE_CAPACITY);
    }

    #[test]
    fn builders_override_fields() {
        let config = RuntimeConfig::default()
            .with_cache_capacity(5)
            .with_strict(false);
        assert_eq!(config.cache_capacity, 5);
        assert!(!config.strict);
    }
}
