use thiserror::Error;

use crate::values::{describe, Parameterization, TrialIndex};

/// Main error type for the Solvex system
#[derive(Error, Debug)]
pub enum SxError {
    #[error("Specification error: {0}")]
    Spec(#[from] SpecError),

    #[error("Trial error: {0}")]
    Trial(#[from] TrialError),

    #[error("Optimizer error: {0}")]
    Optimizer(#[from] OptimizerError),

    #[error("Selection error: {0}")]
    Selection(#[from] SelectionError),

    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(String),
}

/// Errors raised while declaring an experiment. Fatal to the run; no trial
/// is started once one of these is reported.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SpecError {
    #[error("Invalid bounds for parameter {name}: low {low} must be below high {high}")]
    InvalidBounds { name: String, low: f64, high: f64 },

    #[error("Duplicate name: {name}")]
    DuplicateName { name: String },

    #[error("Cyclic dependency: rule producing {produces} reads {input}, which is not produced by an earlier rule")]
    CyclicDependency { produces: String, input: String },

    #[error("Unknown parameter referenced: {name}")]
    UnknownParameter { name: String },

    #[error("Categorical parameter {name} has no choices")]
    EmptyChoices { name: String },

    #[error("No objectives declared")]
    EmptyObjectives,
}

/// Errors scoped to a single trial. The trial is marked failed and the
/// caller decides whether to continue.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrialError {
    #[error("Missing input {input} for derived parameter {produces}")]
    MissingInput { produces: String, input: String },

    #[error("Input {input} for derived parameter {produces} is not numeric")]
    NonNumericInput { produces: String, input: String },

    #[error("Incomplete result: objective {objective} is {reason}")]
    IncompleteResult { objective: String, reason: String },

    #[error("Evaluation failed: {message}")]
    EvaluationFailed { message: String },

    #[error("Invalid candidate: {0}")]
    InvalidCandidate(#[from] OptimizerError),

    #[error("Trial {index} is already finalized")]
    AlreadyFinalized { index: TrialIndex },
}

impl TrialError {
    /// Short machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingInput { .. } => "MissingInput",
            Self::NonNumericInput { .. } => "NonNumericInput",
            Self::IncompleteResult { .. } => "IncompleteResult",
            Self::EvaluationFailed { .. } => "EvaluationFailed",
            Self::InvalidCandidate(_) => "InvalidCandidate",
            Self::AlreadyFinalized { .. } => "AlreadyFinalized",
        }
    }
}

/// Contract violations at the optimizer boundary.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OptimizerError {
    #[error("Trial {index} has already been completed")]
    DuplicateCompletion { index: TrialIndex },

    #[error("Trial not found: {index}")]
    UnknownTrial { index: TrialIndex },

    #[error("Trial index {index} does not follow previous index {previous}")]
    NonMonotonicIndex { index: TrialIndex, previous: TrialIndex },

    #[error("Parameter {name} value {value} is outside its declared domain")]
    OutOfBounds { name: String, value: String },

    #[error("Candidate is missing parameter {name}")]
    MissingParameter { name: String },

    #[error("Candidate carries undeclared parameter {name}")]
    UnknownParameter { name: String },

    #[error("Candidate carries derived parameter {name}")]
    DerivedParameterSuggested { name: String },

    #[error("Search strategy {strategy} has no candidates left")]
    Exhausted { strategy: String },

    #[error("Experiment has not been created")]
    ExperimentNotCreated,

    #[error("Experiment has already been created")]
    ExperimentAlreadyCreated,
}

/// Errors raised while selecting a best trial from the history.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SelectionError {
    #[error("No completed trials")]
    NoCompletedTrials,

    #[error("Unknown objective: {name}")]
    UnknownObjective { name: String },

    #[error("Selected trial {index} is not in the completed history")]
    UnknownTrial { index: TrialIndex },

    #[error("Selected trial {index} is dominated by trial {dominated_by}")]
    DominatedSelection { index: TrialIndex, dominated_by: TrialIndex },

    #[error("Optimizer could not select a best trial: {0}")]
    Optimizer(#[from] OptimizerError),
}

/// A trial that could not be completed, with everything needed to report it.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("trial {trial_index} failed ({kind}) with [{params}]: {error}", kind = .error.kind(), params = describe(.parameterization))]
pub struct TrialFailure {
    pub trial_index: TrialIndex,
    pub parameterization: Parameterization,
    pub error: TrialError,
}

/// Errors surfaced by the trial driver.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DriverError {
    #[error("{0}")]
    Trial(#[from] TrialFailure),

    #[error("optimizer boundary violation: {0}")]
    Optimizer(#[from] OptimizerError),

    #[error("invalid transition: cannot {action} while {state}")]
    InvalidTransition { action: String, state: String },
}

/// Result type alias for Solvex operations
pub type SxResult<T> = Result<T, SxError>;

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::SxError::Config(format!($($arg)*))
    };
}
