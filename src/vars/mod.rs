// SPDX-License-Identifier: GPL-2.0-or-later

//! Typed variable maps used throughout request building. Values are a
//! small sum type; coercion to a string happens at substitution time so
//! callers never deal with an untyped map.

mod expressions;
mod replacer;

pub use expressions::{
    contains_unresolved_variables, contains_variables_with_ignore_list, evaluate, evaluate_bytes,
    ExpressionError,
};
pub use replacer::{replace, replace_bytes};

use std::collections::HashMap;
use std::fmt::{self, Display};

use serde::Deserialize;

/// A single variable value. Bytes stem from raw capture reads and are
/// rendered lossily when substituted into text.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum VarValue {
    Bool(bool),
    Number(i64),
    String(String),
    Bytes(Vec<u8>),
}

impl Display for VarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VarValue::Bool(b) => write!(f, "{b}"),
            VarValue::Number(n) => write!(f, "{n}"),
            VarValue::String(s) => write!(f, "{s}"),
            VarValue::Bytes(b) => write!(f, "{}", String::from_utf8_lossy(b)),
        }
    }
}

impl From<&str> for VarValue {
    fn from(value: &str) -> Self {
        VarValue::String(value.to_string())
    }
}

impl From<String> for VarValue {
    fn from(value: String) -> Self {
        VarValue::String(value)
    }
}

impl From<i64> for VarValue {
    fn from(value: i64) -> Self {
        VarValue::Number(value)
    }
}

impl From<u16> for VarValue {
    fn from(value: u16) -> Self {
        VarValue::Number(value as i64)
    }
}

impl From<bool> for VarValue {
    fn from(value: bool) -> Self {
        VarValue::Bool(value)
    }
}

impl From<Vec<u8>> for VarValue {
    fn from(value: Vec<u8>) -> Self {
        VarValue::Bytes(value)
    }
}

/// An ordered-insensitive mapping of variable names to values.
///
/// Merging is strictly last-write-wins across layers; within one layer the
/// result does not depend on insertion order.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct Variables {
    inner: HashMap<String, VarValue>,
}

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<VarValue>) {
        self.inner.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&VarValue> {
        self.inner.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &VarValue)> {
        self.inner.iter()
    }

    /// Overlays `other` onto `self`; colliding names take the value from
    /// `other`.
    pub fn extend_from(&mut self, other: &Variables) {
        for (k, v) in other.iter() {
            self.inner.insert(k.clone(), v.clone());
        }
    }

    /// Merges the given layers left to right, later layers overriding
    /// earlier ones. Empty layers are permitted and contribute nothing.
    pub fn merged(layers: &[&Variables]) -> Variables {
        let mut out = Variables::new();
        for layer in layers {
            out.extend_from(layer);
        }
        out
    }
}

impl<K: Into<String>, V: Into<VarValue>> FromIterator<(K, V)> for Variables {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut vars = Variables::new();
        for (k, v) in iter {
            vars.insert(k, v);
        }
        vars
    }
}

impl IntoIterator for Variables {
    type Item = (String, VarValue);
    type IntoIter = std::collections::hash_map::IntoIter<String, VarValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.inner.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_is_last_write_wins_between_layers() {
        let defaults: Variables = [("Host", "a"), ("Scheme", "http")].into_iter().collect();
        let options: Variables = [("Host", "b")].into_iter().collect();
        let payload: Variables = [("Host", "c"), ("extra", "x")].into_iter().collect();

        let merged = Variables::merged(&[&defaults, &options, &payload]);
        assert_eq!(merged.get("Host"), Some(&VarValue::from("c")));
        assert_eq!(merged.get("Scheme"), Some(&VarValue::from("http")));
        assert_eq!(merged.get("extra"), Some(&VarValue::from("x")));
    }

    #[test]
    fn merge_with_empty_layers() {
        let empty = Variables::new();
        let only: Variables = [("a", 1i64)].into_iter().collect();
        let merged = Variables::merged(&[&empty, &only, &empty]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged.get("a"), Some(&VarValue::Number(1)));
    }

    #[test]
    fn value_coercion_to_string() {
        assert_eq!(VarValue::Number(8080).to_string(), "8080");
        assert_eq!(VarValue::Bool(true).to_string(), "true");
        assert_eq!(VarValue::Bytes(b"abc".to_vec()).to_string(), "abc");
    }
}
