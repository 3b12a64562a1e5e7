//! Derived parameters: values computed from other parameters instead of
//! being searched.
//!
//! A rule removes its output from the search space and reconstructs it before
//! every evaluation, so the algebraic constraint it encodes (for example
//! `organic = 1 − aqueous`) holds exactly on each trial.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use sx_types::{ParameterValue, Parameterization, SpecError, TrialError};

use crate::space::ParameterSpace;

type ComputeFn = Arc<dyn Fn(&[f64]) -> f64 + Send + Sync>;

/// One derived parameter and the pure function that produces it.
#[derive(Clone)]
pub struct DerivedRule {
    produces: String,
    inputs: Vec<String>,
    compute: ComputeFn,
}

impl DerivedRule {
    /// `compute` receives the inputs' numeric values in the order given.
    pub fn new<F>(produces: impl Into<String>, inputs: &[&str], compute: F) -> Self
    where
        F: Fn(&[f64]) -> f64 + Send + Sync + 'static,
    {
        Self {
            produces: produces.into(),
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            compute: Arc::new(compute),
        }
    }

    /// Composition constraint: `produces = total − input`.
    pub fn complement(produces: impl Into<String>, input: &str, total: f64) -> Self {
        Self::new(produces, &[input], move |xs| total - xs[0])
    }

    pub fn produces(&self) -> &str {
        &self.produces
    }

    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }

    fn evaluate(&self, parameterization: &Parameterization) -> Result<ParameterValue, TrialError> {
        let mut values = Vec::with_capacity(self.inputs.len());
        for input in &self.inputs {
            let value = parameterization
                .get(input)
                .ok_or_else(|| TrialError::MissingInput {
                    produces: self.produces.clone(),
                    input: input.clone(),
                })?;
            let numeric = value.as_f64().ok_or_else(|| TrialError::NonNumericInput {
                produces: self.produces.clone(),
                input: input.clone(),
            })?;
            values.push(numeric);
        }
        Ok(ParameterValue::Float((self.compute)(&values)))
    }
}

impl fmt::Debug for DerivedRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedRule")
            .field("produces", &self.produces)
            .field("inputs", &self.inputs)
            .finish_non_exhaustive()
    }
}

/// Ordered set of derived rules, applied in declaration order.
#[derive(Debug, Clone, Default)]
pub struct DerivedRules {
    rules: Vec<DerivedRule>,
}

impl DerivedRules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rule(mut self, rule: DerivedRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rules(&self) -> &[DerivedRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Names of every derived parameter, in declaration order.
    pub fn produced(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|r| r.produces.as_str())
    }

    pub fn produces(&self, name: &str) -> bool {
        self.rules.iter().any(|r| r.produces == name)
    }

    /// Registration-time check against the independent parameters.
    ///
    /// Inputs must be independent parameters or outputs of earlier rules.
    pub fn validate_against(&self, space: &ParameterSpace) -> Result<(), SpecError> {
        let mut available: HashSet<&str> = space.names().collect();
        for (position, rule) in self.rules.iter().enumerate() {
            if available.contains(rule.produces.as_str()) {
                return Err(SpecError::DuplicateName {
                    name: rule.produces.clone(),
                });
            }
            for input in &rule.inputs {
                if available.contains(input.as_str()) {
                    continue;
                }
                let produced_here_or_later = self.rules[position..]
                    .iter()
                    .any(|later| later.produces == *input);
                return Err(if produced_here_or_later {
                    SpecError::CyclicDependency {
                        produces: rule.produces.clone(),
                        input: input.clone(),
                    }
                } else {
                    SpecError::UnknownParameter {
                        name: input.clone(),
                    }
                });
            }
            available.insert(rule.produces.as_str());
        }
        Ok(())
    }

    /// Complete a partial parameterization with every derived value.
    pub fn apply(&self, partial: Parameterization) -> Result<Parameterization, TrialError> {
        let mut full = partial;
        for rule in &self.rules {
            let value = rule.evaluate(&full)?;
            full.insert(rule.produces.clone(), value);
        }
        Ok(full)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn space() -> ParameterSpace {
        ParameterSpace::new()
            .add_float("aqueous_composition", 0.0, 1.0)
            .add_float("temperature", 4.0, 40.0)
    }

    fn partial(aqueous: f64) -> Parameterization {
        let mut p = Parameterization::new();
        p.insert("aqueous_composition".into(), ParameterValue::Float(aqueous));
        p.insert("temperature".into(), ParameterValue::Float(20.0));
        p
    }

    #[test]
    fn complement_fills_organic_fraction() {
        let rules = DerivedRules::new().with_rule(DerivedRule::complement(
            "organic_composition",
            "aqueous_composition",
            1.0,
        ));
        rules.validate_against(&space()).unwrap();

        let full = rules.apply(partial(0.25)).unwrap();
        assert_eq!(full["organic_composition"], ParameterValue::Float(0.75));
        assert_eq!(full["aqueous_composition"], ParameterValue::Float(0.25));
        assert_eq!(full.len(), 3);
    }

    #[test]
    fn chained_rules_see_earlier_outputs() {
        let rules = DerivedRules::new()
            .with_rule(DerivedRule::complement(
                "organic_composition",
                "aqueous_composition",
                1.0,
            ))
            .with_rule(DerivedRule::new(
                "phase_ratio",
                &["organic_composition", "aqueous_composition"],
                |xs| xs[0] / xs[1],
            ));
        rules.validate_against(&space()).unwrap();

        let full = rules.apply(partial(0.5)).unwrap();
        assert_eq!(full["phase_ratio"], ParameterValue::Float(1.0));
    }

    #[test]
    fn forward_reference_is_cyclic() {
        let rules = DerivedRules::new()
            .with_rule(DerivedRule::new("b", &["c"], |xs| xs[0]))
            .with_rule(DerivedRule::new("c", &["aqueous_composition"], |xs| xs[0]));
        assert_eq!(
            rules.validate_against(&space()),
            Err(SpecError::CyclicDependency {
                produces: "b".into(),
                input: "c".into()
            })
        );
    }

    #[test]
    fn self_reference_is_cyclic() {
        let rules = DerivedRules::new().with_rule(DerivedRule::new("x", &["x"], |xs| xs[0]));
        assert!(matches!(
            rules.validate_against(&space()),
            Err(SpecError::CyclicDependency { .. })
        ));
    }

    #[test]
    fn unknown_input_rejected() {
        let rules = DerivedRules::new().with_rule(DerivedRule::new("x", &["pressure"], |xs| xs[0]));
        assert_eq!(
            rules.validate_against(&space()),
            Err(SpecError::UnknownParameter {
                name: "pressure".into()
            })
        );
    }

    #[test]
    fn produced_name_must_not_shadow_independent() {
        let rules = DerivedRules::new().with_rule(DerivedRule::complement(
            "temperature",
            "aqueous_composition",
            1.0,
        ));
        assert!(matches!(
            rules.validate_against(&space()),
            Err(SpecError::DuplicateName { .. })
        ));
    }

    #[test]
    fn missing_input_fails_application() {
        let rules = DerivedRules::new().with_rule(DerivedRule::complement(
            "organic_composition",
            "aqueous_composition",
            1.0,
        ));
        let err = rules.apply(Parameterization::new()).unwrap_err();
        assert_eq!(
            err,
            TrialError::MissingInput {
                produces: "organic_composition".into(),
                input: "aqueous_composition".into()
            }
        );
    }

    #[test]
    fn categorical_input_is_not_numeric() {
        let rules = DerivedRules::new().with_rule(DerivedRule::new("x", &["solvent"], |xs| xs[0]));
        let mut p = Parameterization::new();
        p.insert("solvent".into(), ParameterValue::from("hexane"));
        assert!(matches!(
            rules.apply(p),
            Err(TrialError::NonNumericInput { .. })
        ));
    }
}
