//! Objectives, thresholds and Pareto dominance.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use sx_types::{Metrics, SpecError, TrialError};

/// Whether we are maximizing or minimizing an objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectiveDirection {
    Maximize,
    Minimize,
}

impl Default for ObjectiveDirection {
    fn default() -> Self {
        Self::Maximize
    }
}

/// An output metric of the experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Objective {
    pub name: String,
    pub direction: ObjectiveDirection,
    /// Satisfaction level used when reporting and selecting. Candidate
    /// generation ignores it.
    pub threshold: Option<f64>,
}

impl Objective {
    /// Orient a value so that larger is always better.
    pub fn oriented(&self, value: f64) -> f64 {
        match self.direction {
            ObjectiveDirection::Maximize => value,
            ObjectiveDirection::Minimize => -value,
        }
    }

    /// Whether `a` is strictly better than `b`.
    pub fn is_better(&self, a: f64, b: f64) -> bool {
        self.oriented(a) > self.oriented(b)
    }

    /// `true` when no threshold is set.
    pub fn is_satisfied(&self, value: f64) -> bool {
        match (self.threshold, self.direction) {
            (None, _) => true,
            (Some(t), ObjectiveDirection::Maximize) => value >= t,
            (Some(t), ObjectiveDirection::Minimize) => value <= t,
        }
    }
}

/// The declared objectives, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveSet {
    pub objectives: Vec<Objective>,
}

impl ObjectiveSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(
        mut self,
        name: impl Into<String>,
        direction: ObjectiveDirection,
        threshold: Option<f64>,
    ) -> Self {
        self.objectives.push(Objective {
            name: name.into(),
            direction,
            threshold,
        });
        self
    }

    pub fn maximize(self, name: impl Into<String>, threshold: Option<f64>) -> Self {
        self.with(name, ObjectiveDirection::Maximize, threshold)
    }

    pub fn minimize(self, name: impl Into<String>, threshold: Option<f64>) -> Self {
        self.with(name, ObjectiveDirection::Minimize, threshold)
    }

    pub fn get(&self, name: &str) -> Option<&Objective> {
        self.objectives.iter().find(|o| o.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.objectives.iter().map(|o| o.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.objectives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objectives.is_empty()
    }

    pub fn validate(&self) -> Result<(), SpecError> {
        if self.objectives.is_empty() {
            return Err(SpecError::EmptyObjectives);
        }
        let mut seen = HashSet::new();
        for objective in &self.objectives {
            if !seen.insert(objective.name.as_str()) {
                return Err(SpecError::DuplicateName {
                    name: objective.name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Enforce the evaluation contract and keep only the declared objectives.
    pub fn check_result(&self, raw: &Metrics) -> Result<Metrics, TrialError> {
        let mut checked = Metrics::new();
        for objective in &self.objectives {
            let value = raw
                .get(&objective.name)
                .copied()
                .ok_or_else(|| TrialError::IncompleteResult {
                    objective: objective.name.clone(),
                    reason: "missing".to_string(),
                })?;
            if !value.is_finite() {
                return Err(TrialError::IncompleteResult {
                    objective: objective.name.clone(),
                    reason: format!("non-finite ({value})"),
                });
            }
            checked.insert(objective.name.clone(), value);
        }
        Ok(checked)
    }

    pub fn meets_thresholds(&self, metrics: &Metrics) -> bool {
        self.objectives.iter().all(|o| {
            metrics
                .get(&o.name)
                .is_some_and(|v| o.is_satisfied(*v))
        })
    }

    /// Pareto dominance: `a` is no worse on every objective and strictly
    /// better on at least one.
    pub fn dominates(&self, a: &Metrics, b: &Metrics) -> bool {
        let mut strictly_better = false;
        for objective in &self.objectives {
            let (Some(&va), Some(&vb)) = (a.get(&objective.name), b.get(&objective.name)) else {
                return false;
            };
            if objective.is_better(vb, va) {
                return false;
            }
            if objective.is_better(va, vb) {
                strictly_better = true;
            }
        }
        strictly_better
    }

    /// Positions of the points no other point dominates.
    pub fn pareto_front(&self, points: &[&Metrics]) -> Vec<usize> {
        (0..points.len())
            .filter(|&i| {
                !points
                    .iter()
                    .enumerate()
                    .any(|(j, other)| j != i && self.dominates(other, points[i]))
            })
            .collect()
    }

    /// Sum of min-max normalised, oriented objective values of each point
    /// relative to the others. A constant objective contributes nothing.
    pub fn normalized_scores(&self, points: &[&Metrics]) -> Vec<f64> {
        let mut scores = vec![0.0; points.len()];
        for objective in &self.objectives {
            let oriented: Vec<f64> = points
                .iter()
                .map(|m| objective.oriented(m.get(&objective.name).copied().unwrap_or(f64::NAN)))
                .collect();
            let lo = oriented.iter().copied().fold(f64::INFINITY, f64::min);
            let hi = oriented.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let span = hi - lo;
            if !(span > 0.0) {
                continue;
            }
            for (score, value) in scores.iter_mut().zip(&oriented) {
                if value.is_finite() {
                    *score += (value - lo) / span;
                }
            }
        }
        scores
    }
}
