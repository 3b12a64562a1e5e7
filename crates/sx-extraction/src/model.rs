//! Reference evaluation model for a liquid-liquid extraction.
//!
//! Stands in for bench measurements: a deterministic function of the five
//! process parameters returning the five extraction metrics. Every metric is
//! saturated into its physical range.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::trace;

use sx_optimizer::Evaluator;
use sx_types::{Metrics, Parameterization, TrialError};

pub const AQUEOUS_COMPOSITION: &str = "aqueous_composition";
pub const ORGANIC_COMPOSITION: &str = "organic_composition";
pub const STIRRING_SPEED: &str = "stirring_speed";
pub const STIRRING_TIME: &str = "stirring_time";
pub const TEMPERATURE: &str = "temperature";

pub const RECOVERY: &str = "recovery";
pub const PURITY: &str = "purity";
pub const SEPARATION: &str = "separation";
pub const EMULSION: &str = "emulsion";
pub const TOTAL_TIME: &str = "total_time";

/// Recovery fraction: `base + organic·o + speed·(v/v_max) + temperature·(T/T_max)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RecoveryCoefficients {
    pub base: f64,
    pub organic: f64,
    pub speed: f64,
    pub temperature: f64,
}

impl Default for RecoveryCoefficients {
    fn default() -> Self {
        Self {
            base: 0.3,
            organic: 0.5,
            speed: 0.2,
            temperature: 0.1,
        }
    }
}

/// Purity percentage: `base + aqueous·a + temperature·(T − T_ref)/T_span`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PurityCoefficients {
    pub base: f64,
    pub aqueous: f64,
    pub temperature: f64,
}

impl Default for PurityCoefficients {
    fn default() -> Self {
        Self {
            base: 85.0,
            aqueous: 10.0,
            temperature: 5.0,
        }
    }
}

/// Separation fraction: `base + speed·(1 − v/v_max) + temperature·(T − T_min)/T_span`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SeparationCoefficients {
    pub base: f64,
    pub speed: f64,
    pub temperature: f64,
}

impl Default for SeparationCoefficients {
    fn default() -> Self {
        Self {
            base: 0.7,
            speed: 0.2,
            temperature: 0.1,
        }
    }
}

/// Emulsion fraction: `base + speed·(v/v_max) + time·(t/t_max)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EmulsionCoefficients {
    pub base: f64,
    pub speed: f64,
    pub time: f64,
}

impl Default for EmulsionCoefficients {
    fn default() -> Self {
        Self {
            base: 0.1,
            speed: 0.6,
            time: 0.3,
        }
    }
}

/// Total processing time in seconds:
/// `t + overhead + separation_penalty·(1 − S/100) + emulsion_penalty·(E/100)`,
/// saturated to `[0, max_duration]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimeCoefficients {
    pub overhead: f64,
    pub separation_penalty: f64,
    pub emulsion_penalty: f64,
    pub max_duration: f64,
}

impl Default for TimeCoefficients {
    fn default() -> Self {
        Self {
            overhead: 50.0,
            separation_penalty: 1000.0,
            emulsion_penalty: 500.0,
            max_duration: 2000.0,
        }
    }
}

/// Normalisation scales shared by the metric formulas.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessScales {
    /// rpm
    pub max_stirring_speed: f64,
    /// seconds
    pub max_stirring_time: f64,
    /// °C
    pub min_temperature: f64,
    pub max_temperature: f64,
    pub reference_temperature: f64,
}

impl ProcessScales {
    pub fn temperature_span(&self) -> f64 {
        self.max_temperature - self.min_temperature
    }
}

impl Default for ProcessScales {
    fn default() -> Self {
        Self {
            max_stirring_speed: 500.0,
            max_stirring_time: 120.0,
            min_temperature: 4.0,
            max_temperature: 40.0,
            reference_temperature: 20.0,
        }
    }
}

/// All tunable constants of [`ExtractionModel`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExtractionCoefficients {
    pub recovery: RecoveryCoefficients,
    pub purity: PurityCoefficients,
    pub separation: SeparationCoefficients,
    pub emulsion: EmulsionCoefficients,
    pub total_time: TimeCoefficients,
    pub scales: ProcessScales,
}

/// The process parameters one evaluation reads.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExtractionInputs {
    pub aqueous_composition: f64,
    pub organic_composition: f64,
    pub stirring_speed: f64,
    pub stirring_time: f64,
    pub temperature: f64,
}

impl ExtractionInputs {
    pub fn from_parameterization(params: &Parameterization) -> Result<Self, TrialError> {
        Ok(Self {
            aqueous_composition: input(params, AQUEOUS_COMPOSITION)?,
            organic_composition: input(params, ORGANIC_COMPOSITION)?,
            stirring_speed: input(params, STIRRING_SPEED)?,
            stirring_time: input(params, STIRRING_TIME)?,
            temperature: input(params, TEMPERATURE)?,
        })
    }
}

fn input(params: &Parameterization, name: &str) -> Result<f64, TrialError> {
    let value = params.get(name).ok_or_else(|| TrialError::EvaluationFailed {
        message: format!("missing input {name}"),
    })?;
    value
        .as_f64()
        .filter(|v| v.is_finite())
        .ok_or_else(|| TrialError::EvaluationFailed {
            message: format!("input {name} is not numeric: {value}"),
        })
}

/// Extraction outcome for one parameterization.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExtractionOutcome {
    /// %
    pub recovery: f64,
    /// %
    pub purity: f64,
    /// %
    pub separation: f64,
    /// %
    pub emulsion: f64,
    /// seconds
    pub total_time: f64,
}

impl ExtractionOutcome {
    pub fn to_metrics(&self) -> Metrics {
        Metrics::from([
            (RECOVERY.to_string(), self.recovery),
            (PURITY.to_string(), self.purity),
            (SEPARATION.to_string(), self.separation),
            (EMULSION.to_string(), self.emulsion),
            (TOTAL_TIME.to_string(), self.total_time),
        ])
    }
}

/// Deterministic extraction model.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractionModel {
    coefficients: ExtractionCoefficients,
}

impl ExtractionModel {
    pub fn new(coefficients: ExtractionCoefficients) -> Self {
        Self { coefficients }
    }

    pub fn coefficients(&self) -> &ExtractionCoefficients {
        &self.coefficients
    }

    pub fn outcome(&self, inputs: &ExtractionInputs) -> ExtractionOutcome {
        let c = &self.coefficients;
        let s = &c.scales;
        let speed = inputs.stirring_speed / s.max_stirring_speed;
        let time = inputs.stirring_time / s.max_stirring_time;

        let recovery = fraction(
            c.recovery.base
                + c.recovery.organic * inputs.organic_composition
                + c.recovery.speed * speed
                + c.recovery.temperature * (inputs.temperature / s.max_temperature),
        );

        let purity = (c.purity.base
            + c.purity.aqueous * inputs.aqueous_composition
            + c.purity.temperature * (inputs.temperature - s.reference_temperature) / s.temperature_span())
        .clamp(0.0, 100.0);

        let separation = fraction(
            c.separation.base
                + c.separation.speed * (1.0 - speed)
                + c.separation.temperature * (inputs.temperature - s.min_temperature) / s.temperature_span(),
        );

        let emulsion = fraction(c.emulsion.base + c.emulsion.speed * speed + c.emulsion.time * time);

        let total_time = (inputs.stirring_time
            + c.total_time.overhead
            + c.total_time.separation_penalty * (1.0 - separation / 100.0)
            + c.total_time.emulsion_penalty * (emulsion / 100.0))
            .clamp(0.0, c.total_time.max_duration);

        ExtractionOutcome {
            recovery,
            purity,
            separation,
            emulsion,
            total_time,
        }
    }
}

/// Saturate a raw fraction to `[0, 1]` and express it as a percentage.
fn fraction(raw: f64) -> f64 {
    raw.clamp(0.0, 1.0) * 100.0
}

#[async_trait]
impl Evaluator for ExtractionModel {
    async fn evaluate(&self, params: &Parameterization) -> Result<Metrics, TrialError> {
        let inputs = ExtractionInputs::from_parameterization(params)?;
        let outcome = self.outcome(&inputs);
        trace!(?inputs, ?outcome, "extraction evaluated");
        Ok(outcome.to_metrics())
    }
}
