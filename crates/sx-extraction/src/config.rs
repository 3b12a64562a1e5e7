//! Run configuration, loaded from JSON.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use sx_types::{config_error, SxResult};

use crate::model::ExtractionCoefficients;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "SOLVEX_CONFIG";

/// Which search strategy the local optimizer runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Random,
    Grid,
    #[default]
    Bayesian,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectiveMode {
    /// Recovery only.
    #[serde(alias = "Single")]
    Single,
    /// Recovery, purity, separation, emulsion and total time.
    #[default]
    #[serde(alias = "Multi")]
    Multi,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    #[default]
    #[serde(alias = "Default")]
    Default,
    #[serde(alias = "Custom")]
    Custom,
    #[serde(alias = "Fully Bayesian", alias = "FullyBayesian")]
    FullyBayesian,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    #[default]
    #[serde(alias = "Single")]
    Single,
    #[serde(alias = "Multi")]
    Multi,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Synchrony {
    #[default]
    #[serde(alias = "Single")]
    Single,
    #[serde(alias = "Batch")]
    Batch,
}

/// Shape of the optimization problem.
///
/// Mirrors the option rows of a script-generator form. Only a subset of the
/// combinations can be run here; [`ScriptOptions::validate`] rejects the rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScriptOptions {
    pub objective: ObjectiveMode,
    pub model: ModelKind,
    pub task: TaskKind,
    pub categorical: bool,
    pub sum_constraint: bool,
    pub order_constraint: bool,
    pub linear_constraint: bool,
    /// Derive organic composition from aqueous composition instead of
    /// searching it independently.
    pub composition_constraint: bool,
    /// Attach satisfaction thresholds to recovery, purity and total time.
    pub custom_threshold: bool,
    pub existing_data: bool,
    pub synchrony: Synchrony,
    /// Export the trial summary as CSV for plotting.
    pub visualize: bool,
}

impl Default for ScriptOptions {
    fn default() -> Self {
        Self {
            objective: ObjectiveMode::Multi,
            model: ModelKind::Default,
            task: TaskKind::Single,
            categorical: false,
            sum_constraint: false,
            order_constraint: false,
            linear_constraint: false,
            composition_constraint: true,
            custom_threshold: true,
            existing_data: false,
            synchrony: Synchrony::Single,
            visualize: true,
        }
    }
}

impl ScriptOptions {
    pub fn validate(&self) -> SxResult<()> {
        if self.model != ModelKind::Default {
            return Err(config_error!("Unsupported option: model = {:?}", self.model));
        }
        if self.task != TaskKind::Single {
            return Err(config_error!("Unsupported option: task = {:?}", self.task));
        }
        if self.synchrony != Synchrony::Single {
            return Err(config_error!("Unsupported option: synchrony = {:?}", self.synchrony));
        }
        let flags = [
            ("categorical", self.categorical),
            ("sum_constraint", self.sum_constraint),
            ("order_constraint", self.order_constraint),
            ("linear_constraint", self.linear_constraint),
            ("existing_data", self.existing_data),
        ];
        if let Some((name, _)) = flags.iter().find(|(_, enabled)| *enabled) {
            return Err(config_error!("Unsupported option: {} = true", name));
        }
        Ok(())
    }
}

/// Top-level configuration for one extraction optimization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExperimentConfig {
    pub name: String,

    /// Total number of trials, completed or failed.
    pub max_trials: usize,

    pub strategy: StrategyKind,

    /// Seed for the search strategy. Unseeded runs draw from the OS.
    pub seed: Option<u64>,

    /// Exploration weight for Bayesian search (ignored for grid/random).
    pub exploration_weight: f64,

    /// Number of steps per continuous dimension for grid search.
    pub grid_steps: usize,

    /// Log progress every this many completed trials; 0 disables.
    pub progress_every: usize,

    /// Where to write the trial summary. Defaults to
    /// [`ExperimentConfig::DEFAULT_SUMMARY_CSV`] when `options.visualize` is set.
    pub summary_csv: Option<PathBuf>,

    pub coefficients: ExtractionCoefficients,

    pub options: ScriptOptions,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            name: "ll_extraction".to_string(),
            max_trials: 30,
            strategy: StrategyKind::Bayesian,
            seed: None,
            exploration_weight: 0.3,
            grid_steps: 5,
            progress_every: 5,
            summary_csv: None,
            coefficients: ExtractionCoefficients::default(),
            options: ScriptOptions::default(),
        }
    }
}

impl ExperimentConfig {
    pub const DEFAULT_SUMMARY_CSV: &'static str = "ll_extraction_trials.csv";

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_max_trials(mut self, max_trials: usize) -> Self {
        self.max_trials = max_trials;
        self
    }

    pub fn with_strategy(mut self, strategy: StrategyKind) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_options(mut self, options: ScriptOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_coefficients(mut self, coefficients: ExtractionCoefficients) -> Self {
        self.coefficients = coefficients;
        self
    }

    pub fn with_summary_csv(mut self, path: impl Into<PathBuf>) -> Self {
        self.summary_csv = Some(path.into());
        self
    }

    pub fn validate(&self) -> SxResult<()> {
        if self.max_trials == 0 {
            return Err(config_error!("max_trials must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.exploration_weight) {
            return Err(config_error!(
                "exploration_weight must be within [0, 1], got {}",
                self.exploration_weight
            ));
        }
        if self.strategy == StrategyKind::Grid && self.grid_steps < 2 {
            return Err(config_error!("grid_steps must be at least 2, got {}", self.grid_steps));
        }
        self.options.validate()
    }

    /// Path the summary CSV goes to, if one should be written.
    pub fn summary_path(&self) -> Option<PathBuf> {
        match (&self.summary_csv, self.options.visualize) {
            (Some(path), _) => Some(path.clone()),
            (None, true) => Some(PathBuf::from(Self::DEFAULT_SUMMARY_CSV)),
            (None, false) => None,
        }
    }

    pub fn from_json_str(json: &str) -> SxResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> SxResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_json_str(&text)?;
        info!(path = %path.as_ref().display(), "loaded configuration");
        Ok(config)
    }

    /// Load from the file named by `SOLVEX_CONFIG`, or fall back to defaults.
    pub fn from_env() -> SxResult<Self> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_json_file(PathBuf::from(path)),
            None => {
                let config = Self::default();
                config.validate()?;
                Ok(config)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sx_types::SxError;

    #[test]
    fn defaults_match_reference_run() {
        let config = ExperimentConfig::default();
        config.validate().unwrap();
        assert_eq!(config.max_trials, 30);
        assert_eq!(config.strategy, StrategyKind::Bayesian);
        assert_eq!(config.options.objective, ObjectiveMode::Multi);
        assert!(config.options.composition_constraint);
        assert!(config.options.custom_threshold);
    }

    #[test]
    fn parses_partial_json() {
        let config = ExperimentConfig::from_json_str(
            r#"{
                "max_trials": 12,
                "strategy": "random",
                "seed": 42,
                "options": {"objective": "single", "visualize": false}
            }"#,
        )
        .unwrap();
        assert_eq!(config.max_trials, 12);
        assert_eq!(config.strategy, StrategyKind::Random);
        assert_eq!(config.seed, Some(42));
        assert_eq!(config.options.objective, ObjectiveMode::Single);
        assert!(config.options.composition_constraint);
        assert_eq!(config.summary_path(), None);
    }

    #[test]
    fn accepts_form_spelling() {
        let options: ScriptOptions =
            serde_json::from_str(r#"{"objective": "Multi", "model": "Default", "task": "Single", "synchrony": "Single"}"#)
                .unwrap();
        options.validate().unwrap();
    }

    #[test]
    fn rejects_unknown_fields() {
        assert!(matches!(
            ExperimentConfig::from_json_str(r#"{"max_trials": 5, "concurrency": 4}"#),
            Err(SxError::Serialization(_))
        ));
        assert!(ExperimentConfig::from_json_str(r#"{"options": {"noise": true}}"#).is_err());
    }

    #[test]
    fn rejects_unsupported_options() {
        for json in [
            r#"{"model": "fully_bayesian"}"#,
            r#"{"task": "multi"}"#,
            r#"{"synchrony": "batch"}"#,
            r#"{"categorical": true}"#,
            r#"{"existing_data": true}"#,
        ] {
            let options: ScriptOptions = serde_json::from_str(json).unwrap();
            let err = options.validate().unwrap_err();
            assert!(matches!(err, SxError::Config(_)), "{json}: {err}");
        }
    }

    #[test]
    fn rejects_bad_run_settings() {
        assert!(ExperimentConfig::default().with_max_trials(0).validate().is_err());
        let mut config = ExperimentConfig::default();
        config.exploration_weight = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("solvex.json");
        let config = ExperimentConfig::default()
            .with_name("bench")
            .with_seed(3)
            .with_summary_csv(dir.path().join("out.csv"));
        std::fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();

        let loaded = ExperimentConfig::from_json_file(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.summary_path(), Some(dir.path().join("out.csv")));
    }
}
