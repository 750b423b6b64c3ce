#![forbid(unsafe_code)]

//! Field keys and key-indexed storage.
//!
//! A card exposes a closed set of string slots. Each slot may hold a static
//! literal or an expression template, and each one is subscribed, cached, and
//! rendered independently.
//!
//! [`FieldMap`] is a fixed array indexed by [`FieldKey`]. Lookups are total and
//! never hash, so per-field state (results, subscription slots) lives in one
//! place with no missing-key handling.

use std::fmt;
use std::ops::{Index, IndexMut};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A named template slot of a card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKey {
    Icon,
    IconColor,
    BadgeIcon,
    BadgeColor,
    Primary,
    Secondary,
    Picture,
    FillColor,
}

impl FieldKey {
    /// Number of field keys.
    pub const COUNT: usize = 8;

    /// Every field key, in slot order.
    pub const ALL: [FieldKey; Self::COUNT] = [
        FieldKey::Icon,
        FieldKey::IconColor,
        FieldKey::BadgeIcon,
        FieldKey::BadgeColor,
        FieldKey::Primary,
        FieldKey::Secondary,
        FieldKey::Picture,
        FieldKey::FillColor,
    ];

    /// Configuration key of this field.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            FieldKey::Icon => "icon",
            FieldKey::IconColor => "icon_color",
            FieldKey::BadgeIcon => "badge_icon",
            FieldKey::BadgeColor => "badge_color",
            FieldKey::Primary => "primary",
            FieldKey::Secondary => "secondary",
            FieldKey::Picture => "picture",
            FieldKey::FillColor => "fill_color",
        }
    }

    #[inline]
    const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown field name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownFieldKey(pub String);

impl fmt::Display for UnknownFieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown field key: {:?}", self.0)
    }
}

impl std::error::Error for UnknownFieldKey {}

impl FromStr for FieldKey {
    type Err = UnknownFieldKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FieldKey::ALL
            .into_iter()
            .find(|key| key.as_str() == s)
            .ok_or_else(|| UnknownFieldKey(s.to_owned()))
    }
}

/// Fixed-size map with one value per [`FieldKey`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldMap<T> {
    slots: [T; FieldKey::COUNT],
}

impl<T> FieldMap<T> {
    /// Build a map by evaluating `f` for every key.
    pub fn from_fn(f: impl FnMut(FieldKey) -> T) -> Self {
        Self {
            slots: FieldKey::ALL.map(f),
        }
    }

    #[inline]
    pub fn get(&self, key: FieldKey) -> &T {
        &self.slots[key.index()]
    }

    #[inline]
    pub fn get_mut(&mut self, key: FieldKey) -> &mut T {
        &mut self.slots[key.index()]
    }

    /// Replace the value for `key`, returning the previous one.
    pub fn replace(&mut self, key: FieldKey, value: T) -> T {
        std::mem::replace(&mut self.slots[key.index()], value)
    }

    /// Iterate `(key, value)` pairs in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (FieldKey, &T)> {
        FieldKey::ALL.into_iter().zip(self.slots.iter())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (FieldKey, &mut T)> {
        FieldKey::ALL.into_iter().zip(self.slots.iter_mut())
    }
}

impl<T> FieldMap<Option<T>> {
    /// Remove and return the value for `key`.
    pub fn take(&mut self, key: FieldKey) -> Option<T> {
        self.slots[key.index()].take()
    }

    /// Number of occupied slots.
    #[must_use]
    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Keys with an occupied slot, in slot order.
    pub fn occupied_keys(&self) -> impl Iterator<Item = FieldKey> + '_ {
        self.iter().filter_map(|(key, slot)| slot.as_ref().map(|_| key))
    }
}

impl<T: Default> Default for FieldMap<T> {
    fn default() -> Self {
        Self::from_fn(|_| T::default())
    }
}

impl<T> Index<FieldKey> for FieldMap<T> {
    type Output = T;

    fn index(&self, key: FieldKey) -> &T {
        self.get(key)
    }
}

impl<T> IndexMut<FieldKey> for FieldMap<T> {
    fn index_mut(&mut self, key: FieldKey) -> &mut T {
        self.get_mut(key)
    }
}
