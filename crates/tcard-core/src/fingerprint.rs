#![forbid(unsafe_code)]

//! Content fingerprints of card configurations.
//!
//! A [`Fingerprint`] identifies a configuration by value: two configurations
//! that are deeply equal hash to the same fingerprint no matter in which order
//! their properties were declared, and any differing value changes it.
//!
//! # Canonical walk
//!
//! The configuration is serialized to a JSON tree. Every node contributes a
//! type tag before its content, object keys are visited in sorted order, and
//! strings and containers are length-prefixed, so `"1"` and `1`, or `["ab"]`
//! and `["a", "b"]`, never feed the same bytes.
//!
//! # Collision guard
//!
//! The walk drives two independent 64-bit hashes: FxHash for the primary half
//! and FNV-1a for the guard half. A false match needs both to collide.

use std::fmt;
use std::hash::Hasher;

use rustc_hash::FxHasher;
use serde_json::Value;

use crate::config::CardConfig;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0100_0000_01b3;

// Node tags.
const TAG_NULL: u8 = 0;
const TAG_FALSE: u8 = 1;
const TAG_TRUE: u8 = 2;
const TAG_NUMBER: u8 = 3;
const TAG_STRING: u8 = 4;
const TAG_ARRAY: u8 = 5;
const TAG_OBJECT: u8 = 6;

/// Deterministic 128-bit content hash of a configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint {
    primary: u64,
    guard: u64,
}

impl Fingerprint {
    /// Fingerprint of a card configuration.
    #[must_use]
    pub fn of(config: &CardConfig) -> Self {
        Self::of_value(&config.to_value())
    }

    /// Fingerprint of an arbitrary JSON value.
    #[must_use]
    pub fn of_value(value: &Value) -> Self {
        let mut sink = DualHasher::new();
        walk(value, &mut sink);
        sink.finish()
    }

    /// The fingerprint as one 128-bit integer.
    #[must_use]
    pub fn as_u128(self) -> u128 {
        (u128::from(self.primary) << 64) | u128::from(self.guard)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}{:016x}", self.primary, self.guard)
    }
}

struct DualHasher {
    fx: FxHasher,
    fnv: u64,
}

impl DualHasher {
    fn new() -> Self {
        Self {
            fx: FxHasher::default(),
            fnv: FNV_OFFSET_BASIS,
        }
    }

    fn write(&mut self, bytes: &[u8]) {
        self.fx.write(bytes);
        for &b in bytes {
            self.fnv ^= u64::from(b);
            self.fnv = self.fnv.wrapping_mul(FNV_PRIME);
        }
    }

    fn write_tag(&mut self, tag: u8) {
        self.write(&[tag]);
    }

    fn write_len(&mut self, len: usize) {
        self.write(&(len as u64).to_le_bytes());
    }

    fn write_str(&mut self, s: &str) {
        self.write_len(s.len());
        self.write(s.as_bytes());
    }

    fn finish(self) -> Fingerprint {
        Fingerprint {
            primary: self.fx.finish(),
            guard: self.fnv,
        }
    }
}

fn walk(value: &Value, sink: &mut DualHasher) {
    match value {
        Value::Null => sink.write_tag(TAG_NULL),
        Value::Bool(false) => sink.write_tag(TAG_FALSE),
        Value::Bool(true) => sink.write_tag(TAG_TRUE),
        Value::Number(n) => {
            sink.write_tag(TAG_NUMBER);
            sink.write_str(&n.to_string());
        }
        Value::String(s) => {
            sink.write_tag(TAG_STRING);
            sink.write_str(s);
        }
        Value::Array(items) => {
            sink.write_tag(TAG_ARRAY);
            sink.write_len(items.len());
            for item in items {
                walk(item, sink);
            }
        }
        Value::Object(map) => {
            sink.write_tag(TAG_OBJECT);
            sink.write_len(map.len());
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_unstable_by(|a, b| a.0.cmp(b.0));
            for (key, item) in entries {
                sink.write_str(key);
                walk(item, sink);
            }
        }
    }
}
