//! Metrics reported by one successful training run.

use serde::de::Error as _;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metric name to numeric value, e.g. `{"ppt": 0.42, "perplexity": 3.1}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunResult(BTreeMap<String, f64>);

impl RunResult {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn with(mut self, metric: impl Into<String>, value: f64) -> Self {
        self.0.insert(metric.into(), value);
        self
    }

    pub fn get(&self, metric: &str) -> Option<f64> {
        self.0.get(metric).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn into_inner(self) -> BTreeMap<String, f64> {
        self.0
    }

    /// Decode one result line.
    ///
    /// Accepts a JSON object of numbers, or a JSON string whose content is
    /// such an object (trainers that debug-print an already serialized
    /// document produce the latter). The string form is unwrapped once only.
    pub fn from_json_line(line: &str) -> serde_json::Result<Self> {
        match serde_json::from_str::<serde_json::Value>(line)? {
            value @ serde_json::Value::Object(_) => serde_json::from_value(value),
            serde_json::Value::String(inner) => serde_json::from_str(&inner),
            other => Err(serde_json::Error::custom(format!(
                "expected a metrics object, found {other}"
            ))),
        }
    }
}

impl<K: Into<String>> FromIterator<(K, f64)> for RunResult {
    fn from_iter<I: IntoIterator<Item = (K, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}
