//! Core types shared by the oracle, the validator and the session store.
//!
//! Parameter sets stay as JSON values at the engine level: each problem
//! declares its own shape through a [`crate::patch::Schema`] and deserializes
//! into a typed struct only inside its simulator.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A problem-specific nested configuration being optimized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterSet(Value);

impl ParameterSet {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    /// Look up a nested field by dotted path, e.g. `crops.wheat.sell_price`.
    pub fn get(&self, path: &str) -> Option<&Value> {
        path.split('.').try_fold(&self.0, |node, key| node.get(key))
    }

    pub fn get_f64(&self, path: &str) -> Option<f64> {
        self.get(path).and_then(Value::as_f64)
    }

    pub fn to_pretty_json(&self) -> String {
        serde_json::to_string_pretty(&self.0).unwrap_or_else(|_| self.0.to_string())
    }
}

impl From<Value> for ParameterSet {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// One violated evaluation criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Name of the criterion (e.g. `water_fraction`)
    pub metric: String,
    /// Observed value
    pub value: f64,
    /// Human-readable explanation
    pub description: String,
}

impl FailureRecord {
    pub fn new(metric: impl Into<String>, value: f64, description: impl Into<String>) -> Self {
        Self {
            metric: metric.into(),
            value,
            description: description.into(),
        }
    }
}

/// Outcome of one simulator run under one evaluation condition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Trial {
    pub score: f64,
    #[serde(default)]
    pub failures: Vec<FailureRecord>,
}

/// Aggregated evaluation over all of a problem's conditions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalResult {
    /// Mean of the per-condition scores
    pub score: f64,
    /// Score exceeds the problem's viability threshold
    pub is_viable: bool,
    /// Every failure from every condition, in condition order
    pub failures: Vec<FailureRecord>,
}

impl EvalResult {
    /// The externally visible prefix of the failure list.
    pub fn top_failures(&self, limit: usize) -> Vec<FailureRecord> {
        self.failures.iter().take(limit).cloned().collect()
    }
}

/// One evaluation in a session's history.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub iteration: u32,
    pub score: f64,
}
