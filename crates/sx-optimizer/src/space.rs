//! Parameter space declarations.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use sx_types::{OptimizerError, ParameterValue, Parameterization, SpecError};

/// A single tunable input of the experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDef {
    /// Parameter name (e.g. "stirring_speed").
    pub name: String,
    /// The kind of range the parameter lives in.
    pub kind: ParameterKind,
}

/// Describes the domain of a parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParameterKind {
    /// Continuous range [low, high].
    FloatRange { low: f64, high: f64 },
    /// Continuous range [low, high] searched in log-space.
    LogUniform { low: f64, high: f64 },
    /// Integer range [low, high] inclusive.
    IntRange { low: i64, high: i64 },
    /// Categorical choices.
    Choice { values: Vec<serde_json::Value> },
}

impl ParameterKind {
    /// Whether `value` lies in this domain.
    pub fn contains(&self, value: &ParameterValue) -> bool {
        match self {
            Self::FloatRange { low, high } | Self::LogUniform { low, high } => value
                .as_f64()
                .is_some_and(|v| v.is_finite() && v >= *low && v <= *high),
            Self::IntRange { low, high } => {
                matches!(value, ParameterValue::Int(v) if v >= low && v <= high)
            }
            Self::Choice { values } => {
                let json = value.to_json();
                values.iter().any(|choice| *choice == json)
            }
        }
    }
}

/// The independent parameters of an experiment, in declaration order.
///
/// Derived parameters are not part of the space; see [`crate::DerivedRules`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpace {
    pub parameters: Vec<ParameterDef>,
}

impl ParameterSpace {
    pub fn new() -> Self {
        Self {
            parameters: Vec::new(),
        }
    }

    pub fn add_float(mut self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::FloatRange { low, high },
        });
        self
    }

    pub fn add_int(mut self, name: impl Into<String>, low: i64, high: i64) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::IntRange { low, high },
        });
        self
    }

    pub fn add_log_uniform(mut self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::LogUniform { low, high },
        });
        self
    }

    pub fn add_choice(mut self, name: impl Into<String>, values: Vec<serde_json::Value>) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::Choice { values },
        });
        self
    }

    pub fn get(&self, name: &str) -> Option<&ParameterDef> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.parameters.iter().map(|p| p.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// Check bounds and name uniqueness.
    pub fn validate(&self) -> Result<(), SpecError> {
        let mut seen = HashSet::new();
        for param in &self.parameters {
            if !seen.insert(param.name.as_str()) {
                return Err(SpecError::DuplicateName {
                    name: param.name.clone(),
                });
            }
            match &param.kind {
                ParameterKind::FloatRange { low, high } => {
                    if !finite_span(*low, *high) {
                        return Err(invalid_bounds(&param.name, *low, *high));
                    }
                }
                ParameterKind::LogUniform { low, high } => {
                    if *low <= 0.0 || !finite_span(*low, *high) || !finite_span(low.ln(), high.ln()) {
                        return Err(invalid_bounds(&param.name, *low, *high));
                    }
                }
                ParameterKind::IntRange { low, high } => {
                    if low >= high {
                        return Err(invalid_bounds(&param.name, *low as f64, *high as f64));
                    }
                }
                ParameterKind::Choice { values } => {
                    if values.is_empty() {
                        return Err(SpecError::EmptyChoices {
                            name: param.name.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Return the candidate unchanged if it assigns every declared parameter a
    /// value inside its domain. Nothing is clamped.
    pub fn resolve(&self, candidate: Parameterization) -> Result<Parameterization, OptimizerError> {
        for param in &self.parameters {
            match candidate.get(&param.name) {
                Some(value) if param.kind.contains(value) => {}
                Some(value) => {
                    return Err(OptimizerError::OutOfBounds {
                        name: param.name.clone(),
                        value: value.to_string(),
                    })
                }
                None => {
                    return Err(OptimizerError::MissingParameter {
                        name: param.name.clone(),
                    })
                }
            }
        }
        if let Some(extra) = candidate.keys().find(|name| !self.contains_name(name)) {
            return Err(OptimizerError::UnknownParameter {
                name: extra.clone(),
            });
        }
        Ok(candidate)
    }

    /// Total number of grid points (returns `None` if any parameter is
    /// continuous without a natural grid, or the count overflows).
    pub fn grid_size(&self) -> Option<usize> {
        let mut total: usize = 1;
        for param in &self.parameters {
            let dim_size = match &param.kind {
                ParameterKind::IntRange { low, high } => {
                    let count = high.checked_sub(*low)?.checked_add(1)?;
                    usize::try_from(count).ok()?
                }
                ParameterKind::Choice { values } => values.len(),
                _ => return None,
            };
            total = total.checked_mul(dim_size)?;
        }
        Some(total)
    }
}

impl Default for ParameterSpace {
    fn default() -> Self {
        Self::new()
    }
}

/// `low < high` with both bounds and the width between them finite. NaN
/// bounds fail the comparison.
fn finite_span(low: f64, high: f64) -> bool {
    low.is_finite() && high.is_finite() && low < high && (high - low).is_finite()
}

fn invalid_bounds(name: &str, low: f64, high: f64) -> SpecError {
    SpecError::InvalidBounds {
        name: name.to_string(),
        low,
        high,
    }
}
