//! Sweep specifications and the strategies that walk them.

use ds_types::{Configuration, ParamValue};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How the sweep picks the next configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SweepMethod {
    Grid,
    Random,
    Bayes,
}

impl std::fmt::Display for SweepMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Grid => write!(f, "grid"),
            Self::Random => write!(f, "random"),
            Self::Bayes => write!(f, "bayes"),
        }
    }
}

/// Whether we are maximizing or minimizing the target metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Goal {
    Minimize,
    Maximize,
}

impl Default for Goal {
    fn default() -> Self {
        Self::Minimize
    }
}

impl Goal {
    /// True when `candidate` beats `incumbent` under this goal.
    pub fn improves(self, candidate: f64, incumbent: f64) -> bool {
        match self {
            Self::Minimize => candidate < incumbent,
            Self::Maximize => candidate > incumbent,
        }
    }

    /// Map a raw metric onto a scale where larger is always better.
    pub fn normalize(self, value: f64) -> f64 {
        match self {
            Self::Minimize => -value,
            Self::Maximize => value,
        }
    }
}

/// The metric a sweep optimizes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricTarget {
    pub name: String,
    #[serde(default)]
    pub goal: Goal,
}

/// Marker for log-uniform ranges, spelled the way sweep tables spell it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogUniformTag {
    #[serde(rename = "log_uniform_values")]
    LogUniformValues,
}

/// Describes how one parameter is chosen.
///
/// Serialized in the sweep-table shape: `{"value": 8}`, `{"values": [1, 5]}`,
/// `{"min": 1, "max": 4}` or
/// `{"distribution": "log_uniform_values", "min": 1e-5, "max": 0.1}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterSpec {
    /// Fixed for every trial.
    Value { value: ParamValue },
    /// Explicit candidate list.
    Values { values: Vec<ParamValue> },
    /// Log-uniform range (sampled in log-space then exponentiated).
    LogUniform {
        distribution: LogUniformTag,
        min: f64,
        max: f64,
    },
    /// Integer range [min, max] inclusive.
    IntRange { min: i64, max: i64 },
    /// Continuous uniform range [min, max].
    FloatRange { min: f64, max: f64 },
}

/// Declarative description of a sweep: method, target and per-parameter
/// choices. Nothing here is checked against what the training program
/// expects; a missing key surfaces when a trial runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepSpecification {
    pub method: SweepMethod,
    pub name: String,
    pub metric: MetricTarget,
    pub parameters: BTreeMap<String, ParameterSpec>,
}

impl SweepSpecification {
    pub fn new(name: impl Into<String>, method: SweepMethod, metric: &str, goal: Goal) -> Self {
        Self {
            method,
            name: name.into(),
            metric: MetricTarget {
                name: metric.to_string(),
                goal,
            },
            parameters: BTreeMap::new(),
        }
    }

    pub fn fixed(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.parameters.insert(
            name.into(),
            ParameterSpec::Value {
                value: value.into(),
            },
        );
        self
    }

    pub fn values<V: Into<ParamValue>>(
        mut self,
        name: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.parameters.insert(
            name.into(),
            ParameterSpec::Values {
                values: values.into_iter().map(Into::into).collect(),
            },
        );
        self
    }

    pub fn int_range(mut self, name: impl Into<String>, min: i64, max: i64) -> Self {
        self.parameters
            .insert(name.into(), ParameterSpec::IntRange { min, max });
        self
    }

    pub fn float_range(mut self, name: impl Into<String>, min: f64, max: f64) -> Self {
        self.parameters
            .insert(name.into(), ParameterSpec::FloatRange { min, max });
        self
    }

    pub fn log_uniform(mut self, name: impl Into<String>, min: f64, max: f64) -> Self {
        self.parameters.insert(
            name.into(),
            ParameterSpec::LogUniform {
                distribution: LogUniformTag::LogUniformValues,
                min,
                max,
            },
        );
        self
    }

    /// Total number of grid points (returns `None` if any parameter is
    /// continuous without a natural grid).
    pub fn grid_size(&self) -> Option<usize> {
        let mut total: usize = 1;
        for spec in self.parameters.values() {
            let dim_size = match spec {
                ParameterSpec::Value { .. } => 1,
                ParameterSpec::Values { values } => values.len(),
                ParameterSpec::IntRange { min, max } => (max - min + 1).max(0) as usize,
                // Continuous dimensions have no step count of their own.
                _ => return None,
            };
            total = total.checked_mul(dim_size)?;
        }
        Some(total)
    }

    /// Check that every parameter can be sampled: non-empty lists, ordered
    /// finite bounds, strictly positive log bounds.
    pub fn validate(&self) -> Result<(), String> {
        if self.parameters.is_empty() {
            return Err(format!("sweep {} has no parameters", self.name));
        }
        for (name, spec) in &self.parameters {
            match spec {
                ParameterSpec::Value { .. } => {}
                ParameterSpec::Values { values } if values.is_empty() => {
                    return Err(format!("{name}: empty value list"));
                }
                ParameterSpec::Values { .. } => {}
                ParameterSpec::IntRange { min, max } if min > max => {
                    return Err(format!("{name}: min {min} is above max {max}"));
                }
                ParameterSpec::IntRange { .. } => {}
                ParameterSpec::FloatRange { min, max } => {
                    if !min.is_finite() || !max.is_finite() || min > max {
                        return Err(format!("{name}: invalid range [{min}, {max}]"));
                    }
                }
                ParameterSpec::LogUniform { min, max, .. } => {
                    if !min.is_finite() || !max.is_finite() || *min <= 0.0 || min > max {
                        return Err(format!("{name}: invalid log range [{min}, {max}]"));
                    }
                }
            }
        }
        Ok(())
    }

    /// Build the strategy matching `method`.
    pub fn strategy(&self, float_steps: usize, exploration_weight: f64) -> Box<dyn SearchStrategy> {
        match self.method {
            SweepMethod::Grid => Box::new(GridSearch::new(self.clone(), float_steps)),
            SweepMethod::Random => Box::new(RandomSearch::new(self.clone())),
            SweepMethod::Bayes => Box::new(BayesianSearch::new(self.clone(), exploration_weight)),
        }
    }
}

// ---------------------------------------------------------------------------
// Search strategies
// ---------------------------------------------------------------------------

/// Common trait for all search strategies.
pub trait SearchStrategy: Send + Sync {
    /// Generate the next batch of override sets to evaluate. A grid returns
    /// fewer than `count` once it runs out.
    fn suggest(&mut self, count: usize) -> Vec<Configuration>;

    /// Report completed trial results so adaptive strategies can learn.
    /// `objective` is already normalized so that larger is better.
    fn report(&mut self, _params: &Configuration, _objective: f64) {}

    /// Human-readable strategy name.
    fn name(&self) -> &str;
}

// ---- Grid search ----

/// Exhaustive grid search over discrete parameter combinations.
#[derive(Debug, Clone)]
pub struct GridSearch {
    cursor: usize,
    combos: Vec<Configuration>,
}

impl GridSearch {
    pub fn new(spec: SweepSpecification, float_steps: usize) -> Self {
        let combos = Self::build_grid(&spec, float_steps);
        Self { cursor: 0, combos }
    }

    pub fn remaining(&self) -> usize {
        self.combos.len() - self.cursor
    }

    fn axis(spec: &ParameterSpec, float_steps: usize) -> Vec<ParamValue> {
        match spec {
            ParameterSpec::Value { value } => vec![value.clone()],
            ParameterSpec::Values { values } => values.clone(),
            ParameterSpec::IntRange { min, max } => (*min..=*max).map(ParamValue::Int).collect(),
            ParameterSpec::FloatRange { min, max } => {
                let steps = float_steps.max(2);
                (0..steps)
                    .map(|i| {
                        let t = i as f64 / (steps - 1) as f64;
                        ParamValue::Float(min + t * (max - min))
                    })
                    .collect()
            }
            ParameterSpec::LogUniform { min, max, .. } => {
                let steps = float_steps.max(2);
                let log_min = min.ln();
                let log_max = max.ln();
                (0..steps)
                    .map(|i| {
                        let t = i as f64 / (steps - 1) as f64;
                        ParamValue::Float((log_min + t * (log_max - log_min)).exp())
                    })
                    .collect()
            }
        }
    }

    fn build_grid(spec: &SweepSpecification, float_steps: usize) -> Vec<Configuration> {
        // Cartesian product
        let mut result: Vec<Configuration> = vec![Configuration::new()];
        for (name, param) in &spec.parameters {
            let axis = Self::axis(param, float_steps);
            let mut next = Vec::with_capacity(result.len() * axis.len());
            for existing in &result {
                for value in &axis {
                    next.push(existing.clone().with(name.as_str(), value.clone()));
                }
            }
            result = next;
        }

        result
    }
}

impl SearchStrategy for GridSearch {
    fn suggest(&mut self, count: usize) -> Vec<Configuration> {
        let end = (self.cursor + count).min(self.combos.len());
        let batch = self.combos[self.cursor..end].to_vec();
        self.cursor = end;
        batch
    }

    fn name(&self) -> &str {
        "grid"
    }
}

// ---- Random search ----

/// Independent random sampling across the sweep's parameters.
#[derive(Debug, Clone)]
pub struct RandomSearch {
    spec: SweepSpecification,
}

impl RandomSearch {
    pub fn new(spec: SweepSpecification) -> Self {
        Self { spec }
    }

    fn sample_param(param: &ParameterSpec, rng: &mut impl Rng) -> Option<ParamValue> {
        let value = match param {
            ParameterSpec::Value { value } => value.clone(),
            ParameterSpec::Values { values } => {
                if values.is_empty() {
                    return None;
                }
                values[rng.gen_range(0..values.len())].clone()
            }
            ParameterSpec::IntRange { min, max } => ParamValue::Int(rng.gen_range(*min..=*max)),
            ParameterSpec::FloatRange { min, max } => {
                ParamValue::Float(rng.gen_range(*min..=*max))
            }
            ParameterSpec::LogUniform { min, max, .. } => {
                let log_val: f64 = rng.gen_range(min.ln()..=max.ln());
                ParamValue::Float(log_val.exp())
            }
        };
        Some(value)
    }

    fn sample_one(&self) -> Configuration {
        let mut rng = rand::thread_rng();
        let mut params = Configuration::new();

        for (name, param) in &self.spec.parameters {
            if let Some(value) = Self::sample_param(param, &mut rng) {
                params = params.with(name.as_str(), value);
            }
        }

        params
    }
}

impl SearchStrategy for RandomSearch {
    fn suggest(&mut self, count: usize) -> Vec<Configuration> {
        (0..count).map(|_| self.sample_one()).collect()
    }

    fn name(&self) -> &str {
        "random"
    }
}

// ---- Bayesian search (surrogate-model stub) ----

/// Bayesian optimization using a simple surrogate model.
///
/// Tracks observed (params, objective) pairs and biases future sampling
/// toward the best one seen so far; otherwise falls back to random sampling
/// with probability `exploration_weight`.
#[derive(Debug, Clone)]
pub struct BayesianSearch {
    spec: SweepSpecification,
    observations: Vec<(Configuration, f64)>,
    exploration_weight: f64,
}

impl BayesianSearch {
    pub fn new(spec: SweepSpecification, exploration_weight: f64) -> Self {
        Self {
            spec,
            observations: Vec::new(),
            exploration_weight,
        }
    }

    /// Pure exploration sample (same as random).
    fn explore(&self) -> Configuration {
        RandomSearch::new(self.spec.clone()).sample_one()
    }

    /// Exploitation: perturb the best-known point.
    fn exploit(&self) -> Configuration {
        let best = self
            .observations
            .iter()
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        let base = match best {
            Some((params, _)) => params,
            None => return self.explore(),
        };

        let mut rng = rand::thread_rng();
        let mut perturbed = Configuration::new();

        for (name, param) in &self.spec.parameters {
            let value = match (param, base.get(name)) {
                (ParameterSpec::FloatRange { min, max }, Some(ParamValue::Float(v))) => {
                    let noise = rng.gen_range(-0.1..0.1) * (max - min);
                    Some(ParamValue::Float((v + noise).clamp(*min, *max)))
                }
                (ParameterSpec::IntRange { min, max }, Some(ParamValue::Int(v))) => {
                    let delta: i64 = rng.gen_range(-2..=2);
                    Some(ParamValue::Int((v + delta).clamp(*min, *max)))
                }
                (ParameterSpec::LogUniform { min, max, .. }, Some(ParamValue::Float(v))) => {
                    let log_range = max.ln() - min.ln();
                    let noise = rng.gen_range(-0.1..0.1) * log_range;
                    Some(ParamValue::Float((v.ln() + noise).exp().clamp(*min, *max)))
                }
                // Fall back to random for lists or a missing base
                _ => RandomSearch::sample_param(param, &mut rng),
            };
            if let Some(value) = value {
                perturbed = perturbed.with(name.as_str(), value);
            }
        }

        perturbed
    }
}

impl SearchStrategy for BayesianSearch {
    fn suggest(&mut self, count: usize) -> Vec<Configuration> {
        let mut rng = rand::thread_rng();
        (0..count)
            .map(|_| {
                if self.observations.is_empty() || rng.gen::<f64>() < self.exploration_weight {
                    self.explore()
                } else {
                    self.exploit()
                }
            })
            .collect()
    }

    fn report(&mut self, params: &Configuration, objective: f64) {
        self.observations.push((params.clone(), objective));
    }

    fn name(&self) -> &str {
        "bayes"
    }
}
