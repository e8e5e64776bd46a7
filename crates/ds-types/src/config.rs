//! Hyperparameter configurations handed to the training program.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Reserved key under which every run's identifier is injected.
pub const RUN_ID_KEY: &str = "model_id";

/// A scalar hyperparameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Str(String),
}

impl ParamValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Str(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Parse a command-line literal: integers first, then finite floats,
    /// else a string. `nan` and `inf` stay text.
    pub fn parse_literal(raw: &str) -> Self {
        if let Ok(v) = raw.parse::<i64>() {
            Self::Int(v)
        } else if let Some(v) = raw.parse::<f64>().ok().filter(|v| v.is_finite()) {
            Self::Float(v)
        } else {
            Self::Str(raw.to_string())
        }
    }
}

impl std::fmt::Display for ParamValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Str(v) => write!(f, "{v}"),
        }
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

/// Named hyperparameter values for one invocation of the training program.
///
/// Keys are kept sorted so the encoded document is stable across runs.
/// Keys the training program does not know about are carried through
/// untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Configuration(BTreeMap<String, ParamValue>);

impl Configuration {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.get(name)
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Layer `overrides` on top of `self`. The override wins on collisions.
    pub fn merge(&self, overrides: &Configuration) -> Configuration {
        let mut merged = self.0.clone();
        for (name, value) in &overrides.0 {
            merged.insert(name.clone(), value.clone());
        }
        Configuration(merged)
    }

    /// Inject the run identifier under [`RUN_ID_KEY`].
    pub fn with_run_id(self, run_id: impl Into<String>) -> Self {
        self.with(RUN_ID_KEY, run_id.into())
    }

    pub fn run_id(&self) -> Option<&str> {
        self.get(RUN_ID_KEY).and_then(ParamValue::as_str)
    }

    /// Encode as a single-line JSON document.
    ///
    /// JSON has no NaN or infinity, so a non-finite float is an error
    /// rather than the `null` serde_json would otherwise write.
    pub fn to_json_line(&self) -> serde_json::Result<String> {
        for (name, value) in &self.0 {
            if let ParamValue::Float(v) = value {
                if !v.is_finite() {
                    return Err(<serde_json::Error as serde::ser::Error>::custom(format!(
                        "{name}: non-finite value {v}"
                    )));
                }
            }
        }
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

impl<K: Into<String>, V: Into<ParamValue>> FromIterator<(K, V)> for Configuration {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}
