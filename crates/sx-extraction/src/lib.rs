//! # sx-extraction
//!
//! Liquid-liquid solvent extraction on top of `sx-optimizer`: the reference
//! evaluation model, the experiment definition with its composition
//! constraint, and the run configuration used by the `ll-extraction` binary.

pub mod config;
pub mod experiment;
pub mod model;

pub use config::{ExperimentConfig, ModelKind, ObjectiveMode, ScriptOptions, StrategyKind, Synchrony, TaskKind};
pub use experiment::{build_driver, extraction_definition, ExtractionDriver};
pub use model::{ExtractionCoefficients, ExtractionInputs, ExtractionModel, ExtractionOutcome};
