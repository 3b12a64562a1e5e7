//! Trial driver: the suggest → resolve → evaluate → report state machine.
//!
//! One [`TrialDriver`] owns one [`ExperimentState`] for the lifetime of a run.
//! Trials are strictly sequential: trial *n + 1* is never requested before
//! trial *n* has been reported (or has failed).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use sx_types::{
    describe, DriverError, OptimizerError, Parameterization, SelectionError, TrialError, TrialFailure,
    TrialIndex,
};

use crate::aggregator::{BestParameterization, ResultAggregator, SelectionPolicy};
use crate::client::OptimizerClient;
use crate::evaluator::Evaluator;
use crate::trial::{ExperimentDefinition, Trial, TrialStatus};

/// Unique experiment run identifier.
pub type ExperimentId = Uuid;

/// Where the driver is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriverState {
    Idle,
    AwaitingCandidate,
    Evaluating,
    Done,
}

impl std::fmt::Display for DriverState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::AwaitingCandidate => "awaiting_candidate",
            Self::Evaluating => "evaluating",
            Self::Done => "done",
        };
        f.write_str(label)
    }
}

/// Why a run reached [`DriverState::Done`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunOutcome {
    /// Every trial of the budget was completed or failed.
    BudgetExhausted,
    /// A trial failed; the caller may [`TrialDriver::resume`].
    Failed { trial_index: TrialIndex },
    /// Cancelled between trials.
    Cancelled,
    /// The optimizer broke its contract; the run cannot continue.
    Aborted,
}

/// Shared flag that stops a run at the next candidate boundary.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything one run knows: the definition, every trial and the budget.
#[derive(Debug, Clone)]
pub struct ExperimentState {
    pub id: ExperimentId,
    pub name: String,
    definition: ExperimentDefinition,
    trials: Vec<Trial>,
    budget: usize,
    remaining: usize,
    last_index: Option<TrialIndex>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl ExperimentState {
    fn new(name: String, definition: ExperimentDefinition, budget: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            definition,
            trials: Vec::new(),
            budget,
            remaining: budget,
            last_index: None,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn definition(&self) -> &ExperimentDefinition {
        &self.definition
    }

    /// Every trial in creation order, whatever its status.
    pub fn trials(&self) -> &[Trial] {
        &self.trials
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }

    pub fn count(&self, status: TrialStatus) -> usize {
        self.trials.iter().filter(|t| t.status == status).count()
    }
}

/// Aggregate status of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub experiment_id: ExperimentId,
    pub name: String,
    pub state: DriverState,
    pub outcome: Option<RunOutcome>,
    pub budget: usize,
    pub trials_completed: usize,
    pub trials_failed: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// The trial driver.  Generic over the optimizer and evaluator so callers can
/// plug in a local search strategy or an external service, and a model or a
/// real instrument.
pub struct TrialDriver<O: OptimizerClient, E: Evaluator> {
    optimizer: O,
    evaluator: E,
    state: ExperimentState,
    driver_state: DriverState,
    outcome: Option<RunOutcome>,
    /// Position in `state.trials` of the trial being evaluated.
    in_flight: Option<usize>,
    cancel: CancelHandle,
    progress_every: usize,
}

impl<O: OptimizerClient, E: Evaluator> TrialDriver<O, E> {
    /// Register the experiment with the optimizer and return an idle driver
    /// with a budget of `max_trials`.
    pub async fn new(
        name: impl Into<String>,
        definition: ExperimentDefinition,
        mut optimizer: O,
        evaluator: E,
        max_trials: usize,
    ) -> Result<Self, DriverError> {
        optimizer
            .create_experiment(definition.space(), definition.objectives(), definition.rules())
            .await?;

        Ok(Self {
            optimizer,
            evaluator,
            state: ExperimentState::new(name.into(), definition, max_trials),
            driver_state: DriverState::Idle,
            outcome: None,
            in_flight: None,
            cancel: CancelHandle::default(),
            progress_every: 5,
        })
    }

    /// Log progress every `n` completed trials (0 disables).
    pub fn with_progress_interval(mut self, n: usize) -> Self {
        self.progress_every = n;
        self
    }

    pub fn driver_state(&self) -> DriverState {
        self.driver_state
    }

    pub fn outcome(&self) -> Option<RunOutcome> {
        self.outcome
    }

    pub fn state(&self) -> &ExperimentState {
        &self.state
    }

    pub fn optimizer(&self) -> &O {
        &self.optimizer
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Stop at the next candidate boundary. A trial being evaluated finishes
    /// first.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn results(&self) -> ResultAggregator<'_> {
        ResultAggregator::new(&self.state)
    }

    /// The optimizer's best trial, re-surfaced with its full parameterization.
    pub fn best(&self) -> Result<BestParameterization, SelectionError> {
        self.results()
            .best(&SelectionPolicy::Optimizer(&self.optimizer))
    }

    pub fn report(&self) -> RunReport {
        RunReport {
            experiment_id: self.state.id,
            name: self.state.name.clone(),
            state: self.driver_state,
            outcome: self.outcome,
            budget: self.state.budget,
            trials_completed: self.state.count(TrialStatus::Completed),
            trials_failed: self.state.count(TrialStatus::Failed),
            started_at: self.state.started_at,
            finished_at: self.state.finished_at,
        }
    }

    /// Perform one transition and return the new state. A no-op once done.
    pub async fn step(&mut self) -> Result<DriverState, DriverError> {
        match self.driver_state {
            DriverState::Idle => self.start(),
            DriverState::AwaitingCandidate => self.request_candidate().await?,
            DriverState::Evaluating => self.evaluate_in_flight().await?,
            DriverState::Done => {}
        }
        Ok(self.driver_state)
    }

    /// Step until the run is done.
    ///
    /// A failing trial stops the run with [`DriverError::Trial`]; completed
    /// history stays available through [`Self::results`].
    pub async fn run(&mut self) -> Result<RunReport, DriverError> {
        while self.driver_state != DriverState::Done {
            self.step().await?;
        }
        Ok(self.report())
    }

    /// Continue after a failed trial with a fresh suggestion.
    pub fn resume(&mut self) -> Result<(), DriverError> {
        match (self.driver_state, self.outcome) {
            (DriverState::Done, Some(RunOutcome::Failed { trial_index })) => {
                info!(trial_index, remaining = self.state.remaining, "resuming after failed trial");
                self.outcome = None;
                self.state.finished_at = None;
                self.driver_state = DriverState::AwaitingCandidate;
                Ok(())
            }
            (state, _) => Err(DriverError::InvalidTransition {
                action: "resume".to_string(),
                state: state.to_string(),
            }),
        }
    }

    fn start(&mut self) {
        info!(
            experiment = %self.state.name,
            experiment_id = %self.state.id,
            budget = self.state.budget,
            "starting optimization run"
        );
        self.state.started_at = Some(Utc::now());
        self.driver_state = DriverState::AwaitingCandidate;
    }

    fn finish(&mut self, outcome: RunOutcome) {
        self.state.finished_at = Some(Utc::now());
        self.outcome = Some(outcome);
        self.driver_state = DriverState::Done;
        info!(
            experiment = %self.state.name,
            outcome = ?outcome,
            completed = self.state.count(TrialStatus::Completed),
            failed = self.state.count(TrialStatus::Failed),
            "optimization run finished"
        );
    }

    fn abort(&mut self, err: OptimizerError) -> DriverError {
        error!(error = %err, "optimizer contract violated, aborting run");
        self.finish(RunOutcome::Aborted);
        DriverError::Optimizer(err)
    }

    async fn request_candidate(&mut self) -> Result<(), DriverError> {
        if self.cancel.is_cancelled() {
            self.finish(RunOutcome::Cancelled);
            return Ok(());
        }
        if self.state.remaining == 0 {
            self.finish(RunOutcome::BudgetExhausted);
            return Ok(());
        }

        let (candidate, index) = match self.optimizer.get_next_trial().await {
            Ok(next) => next,
            Err(err) => return Err(self.abort(err)),
        };
        if let Some(previous) = self.state.last_index {
            if index <= previous {
                return Err(self.abort(OptimizerError::NonMonotonicIndex { index, previous }));
            }
        }
        self.state.last_index = Some(index);
        self.state.trials.push(Trial::new(index, candidate.clone()));
        self.in_flight = Some(self.state.trials.len() - 1);
        debug!(trial_index = index, candidate = %describe(&candidate), "candidate received");

        match self.complete_candidate(candidate) {
            Ok(full) => {
                let stored = self.in_flight_trial_mut()?.set_parameterization(full);
                if let Err(err) = stored {
                    return Err(self.fail_in_flight(err).await);
                }
                self.driver_state = DriverState::Evaluating;
                Ok(())
            }
            Err(err) => Err(self.fail_in_flight(err).await),
        }
    }

    /// Resolve a candidate against the space and fill in derived values.
    fn complete_candidate(&self, candidate: Parameterization) -> Result<Parameterization, TrialError> {
        let definition = &self.state.definition;
        if let Some(name) = candidate.keys().find(|name| definition.rules().produces(name)) {
            return Err(OptimizerError::DerivedParameterSuggested { name: name.clone() }.into());
        }
        let resolved = definition.space().resolve(candidate)?;
        definition.rules().apply(resolved)
    }

    async fn evaluate_in_flight(&mut self) -> Result<(), DriverError> {
        let (index, params) = {
            let trial = self.in_flight_trial_mut()?;
            (trial.index, trial.parameterization.clone())
        };

        let evaluated = self
            .evaluator
            .evaluate(&params)
            .await
            .and_then(|raw| self.state.definition.objectives().check_result(&raw));
        let metrics = match evaluated {
            Ok(metrics) => metrics,
            Err(err) => return Err(self.fail_in_flight(err).await),
        };

        let reported = self.optimizer.complete_trial(index, &metrics).await;
        if let Err(err) = reported {
            let trial = self.in_flight_trial_mut()?;
            if let Err(mark_err) = trial.mark_failed(err.to_string()) {
                warn!(trial_index = index, error = %mark_err, "could not mark trial failed");
            }
            self.in_flight = None;
            return Err(self.abort(err));
        }
        let marked = self.in_flight_trial_mut()?.mark_completed(metrics);
        if let Err(err) = marked {
            return Err(self.fail_in_flight(err).await);
        }
        self.in_flight = None;
        self.state.remaining -= 1;

        let completed = self.state.count(TrialStatus::Completed);
        debug!(trial_index = index, remaining = self.state.remaining, "trial completed");
        if self.progress_every > 0 && completed % self.progress_every == 0 {
            info!("Completed {}/{} trials", completed, self.state.budget);
        }
        self.driver_state = DriverState::AwaitingCandidate;
        Ok(())
    }

    /// Mark the in-flight trial failed, tell the optimizer and stop the run.
    async fn fail_in_flight(&mut self, err: TrialError) -> DriverError {
        let trial = match self.in_flight_trial_mut() {
            Ok(trial) => trial,
            Err(driver_err) => return driver_err,
        };
        if let Err(mark_err) = trial.mark_failed(err.to_string()) {
            warn!(trial_index = trial.index, error = %mark_err, "could not mark trial failed");
        }
        let failure = TrialFailure {
            trial_index: trial.index,
            parameterization: trial.parameterization.clone(),
            error: err,
        };
        self.in_flight = None;
        self.state.remaining = self.state.remaining.saturating_sub(1);

        if let Err(report_err) = self.optimizer.fail_trial(failure.trial_index).await {
            warn!(trial_index = failure.trial_index, error = %report_err, "optimizer rejected failure report");
        }
        error!(
            trial_index = failure.trial_index,
            kind = failure.error.kind(),
            parameters = %describe(&failure.parameterization),
            error = %failure.error,
            "trial failed"
        );
        self.finish(RunOutcome::Failed {
            trial_index: failure.trial_index,
        });
        DriverError::Trial(failure)
    }

    fn in_flight_trial_mut(&mut self) -> Result<&mut Trial, DriverError> {
        let state = self.driver_state;
        self.in_flight
            .and_then(|pos| self.state.trials.get_mut(pos))
            .ok_or_else(|| DriverError::InvalidTransition {
                action: "evaluate".to_string(),
                state: format!("{state} with no trial in flight"),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use sx_types::{Metrics, ParameterValue};

    use crate::client::{BestTrial, LocalOptimizer};
    use crate::derived::{DerivedRule, DerivedRules};
    use crate::frame::TrialsFrame;
    use crate::objective::ObjectiveSet;
    use crate::search::RandomSearch;
    use crate::space::ParameterSpace;

    fn definition() -> ExperimentDefinition {
        let space = ParameterSpace::new()
            .add_float("aqueous_composition", 0.0, 1.0)
            .add_float("temperature", 4.0, 40.0);
        let objectives = ObjectiveSet::new()
            .maximize("recovery", Some(50.0))
            .maximize("purity", None);
        let rules = DerivedRules::new().with_rule(DerivedRule::complement(
            "organic_composition",
            "aqueous_composition",
            1.0,
        ));
        ExperimentDefinition::new(space, objectives, rules).unwrap()
    }

    fn optimizer(seed: u64) -> LocalOptimizer {
        LocalOptimizer::new(Box::new(RandomSearch::new(definition().space().clone(), Some(seed))))
    }

    /// Linear toy model; fails on every `fail_every`-th call when set.
    #[derive(Default)]
    struct ToyModel {
        calls: AtomicUsize,
        fail_every: Option<usize>,
        drop_purity: bool,
    }

    #[async_trait]
    impl Evaluator for ToyModel {
        async fn evaluate(&self, p: &Parameterization) -> Result<Metrics, TrialError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_every.is_some_and(|n| call % n == 0) {
                return Err(TrialError::EvaluationFailed {
                    message: format!("instrument fault on call {call}"),
                });
            }
            let organic = p["organic_composition"].as_f64().unwrap();
            let aqueous = p["aqueous_composition"].as_f64().unwrap();
            let mut m = Metrics::new();
            m.insert("recovery".into(), 100.0 * organic);
            if !self.drop_purity {
                m.insert("purity".into(), 100.0 * aqueous);
            }
            Ok(m)
        }
    }

    async fn driver(model: ToyModel, budget: usize) -> TrialDriver<LocalOptimizer, ToyModel> {
        TrialDriver::new("toy", definition(), optimizer(7), model, budget)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn transitions_one_step_at_a_time() {
        let mut d = driver(ToyModel::default(), 1).await;
        assert_eq!(d.driver_state(), DriverState::Idle);
        assert_eq!(d.step().await.unwrap(), DriverState::AwaitingCandidate);
        assert_eq!(d.step().await.unwrap(), DriverState::Evaluating);
        assert_eq!(d.state().trials()[0].status, TrialStatus::Pending);
        assert_eq!(d.step().await.unwrap(), DriverState::AwaitingCandidate);
        assert_eq!(d.state().trials()[0].status, TrialStatus::Completed);
        assert_eq!(d.step().await.unwrap(), DriverState::Done);
        assert_eq!(d.outcome(), Some(RunOutcome::BudgetExhausted));
        assert_eq!(d.step().await.unwrap(), DriverState::Done);
    }

    #[tokio::test]
    async fn budget_yields_contiguous_indices() {
        let mut d = driver(ToyModel::default(), 12).await;
        let report = d.run().await.unwrap();
        assert_eq!(report.trials_completed, 12);
        assert_eq!(report.state, DriverState::Done);
        assert_eq!(d.state().remaining(), 0);

        let indices: Vec<TrialIndex> = d.state().trials().iter().map(|t| t.index).collect();
        assert_eq!(indices, (0..12).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn derived_value_is_recomputed_for_every_trial() {
        let mut d = driver(ToyModel::default(), 20).await;
        d.run().await.unwrap();
        for trial in d.state().trials() {
            let a = trial.parameterization["aqueous_composition"].as_f64().unwrap();
            let o = trial.parameterization["organic_composition"].as_f64().unwrap();
            assert!((a + o - 1.0).abs() < 1e-12);
        }
    }

    #[tokio::test]
    async fn incomplete_result_fails_trial() {
        let model = ToyModel {
            drop_purity: true,
            ..ToyModel::default()
        };
        let mut d = driver(model, 5).await;
        let err = d.run().await.unwrap_err();

        let DriverError::Trial(failure) = err else {
            panic!("expected trial failure, got {err:?}");
        };
        assert_eq!(failure.trial_index, 0);
        assert_eq!(failure.error.kind(), "IncompleteResult");
        assert!(failure.parameterization.contains_key("organic_composition"));
        assert_eq!(d.outcome(), Some(RunOutcome::Failed { trial_index: 0 }));
        assert_eq!(d.state().trials()[0].status, TrialStatus::Failed);
        assert!(d.results().history().next().is_none());
        assert_eq!(d.optimizer().trials()[0].status, TrialStatus::Failed);
    }

    #[tokio::test]
    async fn failure_keeps_partial_history_and_resume_continues() {
        let model = ToyModel {
            fail_every: Some(4),
            ..ToyModel::default()
        };
        let mut d = driver(model, 10).await;

        let err = d.run().await.unwrap_err();
        assert!(matches!(err, DriverError::Trial(ref f) if f.trial_index == 3));
        assert_eq!(d.results().history().count(), 3);

        let mut failures = 1;
        d.resume().unwrap();
        while let Err(err) = d.run().await {
            assert!(matches!(err, DriverError::Trial(_)));
            failures += 1;
            d.resume().unwrap();
        }

        assert_eq!(d.outcome(), Some(RunOutcome::BudgetExhausted));
        assert_eq!(d.state().trials().len(), 10);
        assert_eq!(d.report().trials_failed, failures);
        assert_eq!(d.report().trials_completed, 10 - failures);
        let indices: Vec<TrialIndex> = d.state().trials().iter().map(|t| t.index).collect();
        assert_eq!(indices, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn resume_only_after_failure() {
        let mut d = driver(ToyModel::default(), 2).await;
        assert!(matches!(
            d.resume(),
            Err(DriverError::InvalidTransition { .. })
        ));
        d.run().await.unwrap();
        assert!(d.resume().is_err());
    }

    #[tokio::test]
    async fn cancel_stops_at_candidate_boundary() {
        let mut d = driver(ToyModel::default(), 10).await;
        d.step().await.unwrap(); // idle -> awaiting
        d.step().await.unwrap(); // awaiting -> evaluating
        d.cancel_handle().cancel();

        // The in-flight trial still completes.
        assert_eq!(d.step().await.unwrap(), DriverState::AwaitingCandidate);
        assert_eq!(d.step().await.unwrap(), DriverState::Done);
        assert_eq!(d.outcome(), Some(RunOutcome::Cancelled));
        assert_eq!(d.state().trials().len(), 1);
        assert!(d.state().trials()[0].is_completed());
    }

    /// Optimizer that misbehaves in configurable ways.
    struct RogueOptimizer {
        next: Vec<(Parameterization, TrialIndex)>,
    }

    #[async_trait]
    impl OptimizerClient for RogueOptimizer {
        async fn create_experiment(
            &mut self,
            _space: &ParameterSpace,
            _objectives: &ObjectiveSet,
            _constraints: &DerivedRules,
        ) -> Result<(), OptimizerError> {
            Ok(())
        }

        async fn get_next_trial(&mut self) -> Result<(Parameterization, TrialIndex), OptimizerError> {
            if self.next.is_empty() {
                return Err(OptimizerError::Exhausted {
                    strategy: "rogue".into(),
                });
            }
            Ok(self.next.remove(0))
        }

        async fn complete_trial(&mut self, _i: TrialIndex, _m: &Metrics) -> Result<(), OptimizerError> {
            Ok(())
        }

        async fn fail_trial(&mut self, _i: TrialIndex) -> Result<(), OptimizerError> {
            Ok(())
        }

        fn trials_data_frame(&self) -> TrialsFrame {
            TrialsFrame::default()
        }

        fn best_parameters(&self) -> Result<Option<BestTrial>, OptimizerError> {
            Ok(None)
        }
    }

    fn candidate(aqueous: f64, temperature: f64) -> Parameterization {
        let mut p = Parameterization::new();
        p.insert("aqueous_composition".into(), ParameterValue::Float(aqueous));
        p.insert("temperature".into(), ParameterValue::Float(temperature));
        p
    }

    async fn rogue_driver(next: Vec<(Parameterization, TrialIndex)>) -> TrialDriver<RogueOptimizer, ToyModel> {
        TrialDriver::new("rogue", definition(), RogueOptimizer { next }, ToyModel::default(), 5)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn non_monotonic_index_aborts() {
        let mut d = rogue_driver(vec![(candidate(0.5, 20.0), 4), (candidate(0.5, 20.0), 4)]).await;
        let err = d.run().await.unwrap_err();
        assert_eq!(
            err,
            DriverError::Optimizer(OptimizerError::NonMonotonicIndex {
                index: 4,
                previous: 4
            })
        );
        assert_eq!(d.outcome(), Some(RunOutcome::Aborted));
        assert_eq!(d.results().history().count(), 1);
    }

    #[tokio::test]
    async fn out_of_bounds_candidate_fails_trial() {
        let mut d = rogue_driver(vec![(candidate(1.5, 20.0), 0)]).await;
        let err = d.run().await.unwrap_err();
        let DriverError::Trial(failure) = err else {
            panic!("expected trial failure");
        };
        assert!(matches!(
            failure.error,
            TrialError::InvalidCandidate(OptimizerError::OutOfBounds { .. })
        ));
    }

    #[tokio::test]
    async fn suggested_derived_parameter_fails_trial() {
        let mut c = candidate(0.5, 20.0);
        c.insert("organic_composition".into(), ParameterValue::Float(0.9));
        let mut d = rogue_driver(vec![(c, 0)]).await;
        let err = d.run().await.unwrap_err();
        assert!(matches!(
            err,
            DriverError::Trial(TrialFailure {
                error: TrialError::InvalidCandidate(OptimizerError::DerivedParameterSuggested { .. }),
                ..
            })
        ));
    }

    #[tokio::test]
    async fn exhausted_optimizer_aborts_run() {
        let mut d = rogue_driver(vec![(candidate(0.5, 20.0), 0)]).await;
        let err = d.run().await.unwrap_err();
        assert!(matches!(err, DriverError::Optimizer(OptimizerError::Exhausted { .. })));
        assert_eq!(d.report().trials_completed, 1);
    }
}
