//! Parameter values and the mappings that flow between the optimizer, the
//! derived-parameter rules and the evaluation function.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Index the optimizer assigns to a trial.
pub type TrialIndex = usize;

/// A parameter assignment keyed by parameter name.
///
/// Ordered so that tabular summaries and logs are deterministic.
pub type Parameterization = BTreeMap<String, ParameterValue>;

/// Measured objective values keyed by objective name.
pub type Metrics = BTreeMap<String, f64>;

/// A concrete parameter value produced by a search strategy or a derived rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Int(i64),
    Float(f64),
    Json(serde_json::Value),
}

impl ParameterValue {
    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            Self::Json(v) => v.as_f64(),
        }
    }

    /// The value as JSON, used to compare against categorical choices.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Float(v) => serde_json::json!(v),
            Self::Int(v) => serde_json::json!(v),
            Self::Json(v) => v.clone(),
        }
    }
}

impl std::fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Float(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            // Bare strings read better in tables than quoted JSON.
            Self::Json(serde_json::Value::String(s)) => write!(f, "{s}"),
            Self::Json(v) => write!(f, "{v}"),
        }
    }
}

impl From<f64> for ParameterValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<i64> for ParameterValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<&str> for ParameterValue {
    fn from(v: &str) -> Self {
        Self::Json(serde_json::Value::String(v.to_string()))
    }
}

/// Render a parameterization as `name=value` pairs for log and error lines.
pub fn describe(parameterization: &Parameterization) -> String {
    parameterization
        .iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_view() {
        assert_eq!(ParameterValue::Float(0.25).as_f64(), Some(0.25));
        assert_eq!(ParameterValue::Int(300).as_f64(), Some(300.0));
        assert_eq!(ParameterValue::Json(serde_json::json!(1.5)).as_f64(), Some(1.5));
        assert_eq!(ParameterValue::from("hexane").as_f64(), None);
    }

    #[test]
    fn untagged_serde_keeps_integers_integral() {
        let parsed: ParameterValue = serde_json::from_str("300").unwrap();
        assert_eq!(parsed, ParameterValue::Int(300));
        let parsed: ParameterValue = serde_json::from_str("0.5").unwrap();
        assert_eq!(parsed, ParameterValue::Float(0.5));
        let parsed: ParameterValue = serde_json::from_str("\"toluene\"").unwrap();
        assert_eq!(parsed, ParameterValue::from("toluene"));
    }

    #[test]
    fn describe_is_ordered() {
        let mut p = Parameterization::new();
        p.insert("temperature".into(), ParameterValue::Float(20.0));
        p.insert("aqueous_composition".into(), ParameterValue::Float(0.5));
        assert_eq!(describe(&p), "aqueous_composition=0.5, temperature=20");
    }
}
