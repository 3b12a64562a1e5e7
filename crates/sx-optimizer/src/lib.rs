//! # sx-optimizer
//!
//! Experiment optimization driver for Solvex.
//!
//! Provides the parameter space, derived-parameter rules and objective set
//! that describe an experiment, the trial driver state machine that runs the
//! suggest → resolve → evaluate → report cycle against an optimizer, and the
//! result aggregator that exposes history, summaries and best trials.

mod aggregator;
mod client;
mod derived;
mod driver;
mod evaluator;
mod frame;
mod objective;
mod search;
mod space;
mod trial;

pub use aggregator::{BestParameterization, ResultAggregator, SelectionPolicy};
pub use client::{BestTrial, LocalOptimizer, OptimizerClient};
pub use derived::{DerivedRule, DerivedRules};
pub use driver::{CancelHandle, DriverState, ExperimentState, RunOutcome, RunReport, TrialDriver};
pub use evaluator::Evaluator;
pub use frame::TrialsFrame;
pub use objective::{Objective, ObjectiveDirection, ObjectiveSet};
pub use search::{BayesianSearch, GridSearch, RandomSearch, SearchStrategy};
pub use space::{ParameterDef, ParameterKind, ParameterSpace};
pub use trial::{ExperimentDefinition, Trial, TrialStatus};
