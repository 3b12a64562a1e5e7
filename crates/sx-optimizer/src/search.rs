//! Candidate suggestion strategies used by [`crate::LocalOptimizer`].
//!
//! The driver never depends on these; they sit behind the optimizer boundary
//! and can be replaced by any external optimizer.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use sx_types::{Metrics, ParameterValue, Parameterization};

use crate::objective::ObjectiveSet;
use crate::space::{ParameterKind, ParameterSpace};

/// Common trait for all search strategies.
pub trait SearchStrategy: Send + Sync {
    /// Propose the next candidate, or `None` once the strategy is exhausted.
    fn suggest(&mut self) -> Option<Parameterization>;

    /// Report a completed trial so adaptive strategies can learn.
    fn report(&mut self, _params: &Parameterization, _metrics: &Metrics) {}

    /// Human-readable strategy name.
    fn name(&self) -> &str;
}

fn seeded(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    }
}

fn sample_value<R: Rng>(kind: &ParameterKind, rng: &mut R) -> ParameterValue {
    match kind {
        ParameterKind::FloatRange { low, high } => ParameterValue::Float(rng.random_range(*low..=*high)),
        ParameterKind::IntRange { low, high } => ParameterValue::Int(rng.random_range(*low..=*high)),
        ParameterKind::LogUniform { low, high } => {
            let log_val: f64 = rng.random_range(low.ln()..=high.ln());
            ParameterValue::Float(log_val.exp().clamp(*low, *high))
        }
        ParameterKind::Choice { values } => {
            let idx = rng.random_range(0..values.len());
            ParameterValue::Json(values[idx].clone())
        }
    }
}

fn sample_space<R: Rng>(space: &ParameterSpace, rng: &mut R) -> Parameterization {
    space
        .parameters
        .iter()
        .map(|param| (param.name.clone(), sample_value(&param.kind, rng)))
        .collect()
}

// ---- Grid search ----

/// Exhaustive grid search; continuous dimensions get `float_steps` evenly
/// spaced points including both bounds. Integer ranges wider than
/// `float_steps` are thinned the same way, rounded to whole values.
#[derive(Debug, Clone)]
pub struct GridSearch {
    cursor: usize,
    combos: Vec<Parameterization>,
}

impl GridSearch {
    pub fn new(space: &ParameterSpace, float_steps: usize) -> Self {
        Self {
            cursor: 0,
            combos: Self::build_grid(space, float_steps),
        }
    }

    pub fn len(&self) -> usize {
        self.combos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.combos.is_empty()
    }

    fn build_grid(space: &ParameterSpace, float_steps: usize) -> Vec<Parameterization> {
        let steps = float_steps.max(2);
        let spaced = |low: f64, high: f64, map: &dyn Fn(f64) -> f64| -> Vec<ParameterValue> {
            (0..steps)
                .map(|i| {
                    let t = i as f64 / (steps - 1) as f64;
                    ParameterValue::Float(map(low + t * (high - low)))
                })
                .collect()
        };

        let mut result: Vec<Parameterization> = vec![Parameterization::new()];
        for param in &space.parameters {
            let values: Vec<ParameterValue> = match &param.kind {
                ParameterKind::FloatRange { low, high } => {
                    let (lo, hi) = (*low, *high);
                    spaced(lo, hi, &|v| v.clamp(lo, hi))
                }
                ParameterKind::IntRange { low, high } => int_grid(*low, *high, steps),
                ParameterKind::LogUniform { low, high } => {
                    let (lo, hi) = (*low, *high);
                    spaced(lo.ln(), hi.ln(), &|v| v.exp().clamp(lo, hi))
                }
                ParameterKind::Choice { values } => values
                    .iter()
                    .map(|v| ParameterValue::Json(v.clone()))
                    .collect(),
            };

            // Cartesian product
            let mut next = Vec::with_capacity(result.len() * values.len());
            for existing in &result {
                for value in &values {
                    let mut combo = existing.clone();
                    combo.insert(param.name.clone(), value.clone());
                    next.push(combo);
                }
            }
            result = next;
        }
        result
    }
}

fn int_grid(low: i64, high: i64, steps: usize) -> Vec<ParameterValue> {
    let count = high.checked_sub(low).and_then(|d| d.checked_add(1));
    match count.and_then(|c| usize::try_from(c).ok()) {
        Some(count) if count <= steps => (low..=high).map(ParameterValue::Int).collect(),
        _ => {
            let width = high as f64 - low as f64;
            let mut values: Vec<i64> = (0..steps)
                .map(|i| {
                    let t = i as f64 / (steps - 1) as f64;
                    ((low as f64 + t * width).round() as i64).clamp(low, high)
                })
                .collect();
            values.dedup();
            values.into_iter().map(ParameterValue::Int).collect()
        }
    }
}

impl SearchStrategy for GridSearch {
    fn suggest(&mut self) -> Option<Parameterization> {
        let combo = self.combos.get(self.cursor).cloned()?;
        self.cursor += 1;
        Some(combo)
    }

    fn name(&self) -> &str {
        "grid"
    }
}

// ---- Random search ----

/// Independent random sampling across the search space.
#[derive(Debug, Clone)]
pub struct RandomSearch {
    space: ParameterSpace,
    rng: StdRng,
}

impl RandomSearch {
    pub fn new(space: ParameterSpace, seed: Option<u64>) -> Self {
        Self {
            space,
            rng: seeded(seed),
        }
    }
}

impl SearchStrategy for RandomSearch {
    fn suggest(&mut self) -> Option<Parameterization> {
        Some(sample_space(&self.space, &mut self.rng))
    }

    fn name(&self) -> &str {
        "random"
    }
}

// ---- Bayesian search (surrogate-model stub) ----

/// Adaptive search that balances exploration against exploitation of the
/// observed Pareto front.
///
/// Exploration draws a uniform sample. Exploitation picks a random
/// non-dominated observation and perturbs it by up to 10% of each range, so
/// conflicting objectives keep pulling the search in several directions.
#[derive(Debug, Clone)]
pub struct BayesianSearch {
    space: ParameterSpace,
    objectives: ObjectiveSet,
    observations: Vec<(Parameterization, Metrics)>,
    exploration_weight: f64,
    rng: StdRng,
}

impl BayesianSearch {
    pub fn new(
        space: ParameterSpace,
        objectives: ObjectiveSet,
        exploration_weight: f64,
        seed: Option<u64>,
    ) -> Self {
        Self {
            space,
            objectives,
            observations: Vec::new(),
            exploration_weight,
            rng: seeded(seed),
        }
    }

    pub fn observations(&self) -> usize {
        self.observations.len()
    }

    fn exploit(&mut self) -> Parameterization {
        let points: Vec<&Metrics> = self.observations.iter().map(|(_, m)| m).collect();
        let front = self.objectives.pareto_front(&points);
        if front.is_empty() {
            return sample_space(&self.space, &mut self.rng);
        }
        let pick = front[self.rng.random_range(0..front.len())];
        let base = self.observations[pick].0.clone();

        let mut perturbed = Parameterization::new();
        for param in &self.space.parameters {
            let value = match (&param.kind, base.get(&param.name).and_then(ParameterValue::as_f64)) {
                (ParameterKind::FloatRange { low, high }, Some(v)) => {
                    let noise = self.rng.random_range(-0.1..0.1) * (high - low);
                    ParameterValue::Float((v + noise).clamp(*low, *high))
                }
                (ParameterKind::IntRange { low, high }, Some(v)) => {
                    let span = ((*high as f64 - *low as f64) * 0.1).round().max(1.0) as i64;
                    let delta: i64 = self.rng.random_range(-span..=span);
                    ParameterValue::Int((v as i64).saturating_add(delta).clamp(*low, *high))
                }
                (ParameterKind::LogUniform { low, high }, Some(v)) if v > 0.0 => {
                    let noise = self.rng.random_range(-0.1..0.1) * (high.ln() - low.ln());
                    ParameterValue::Float((v.ln() + noise).exp().clamp(*low, *high))
                }
                // Fall back to random for choices or missing base
                (kind, _) => sample_value(kind, &mut self.rng),
            };
            perturbed.insert(param.name.clone(), value);
        }
        perturbed
    }
}

impl SearchStrategy for BayesianSearch {
    fn suggest(&mut self) -> Option<Parameterization> {
        let explore =
            self.observations.is_empty() || self.rng.random::<f64>() < self.exploration_weight;
        Some(if explore {
            sample_space(&self.space, &mut self.rng)
        } else {
            self.exploit()
        })
    }

    fn report(&mut self, params: &Parameterization, metrics: &Metrics) {
        self.observations.push((params.clone(), metrics.clone()));
    }

    fn name(&self) -> &str {
        "bayesian"
    }
}
