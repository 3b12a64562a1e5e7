//! The optimizer boundary and an in-process optimizer behind it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use sx_types::{Metrics, OptimizerError, ParameterValue, Parameterization, TrialIndex};

use crate::derived::DerivedRules;
use crate::frame::TrialsFrame;
use crate::objective::ObjectiveSet;
use crate::search::SearchStrategy;
use crate::space::ParameterSpace;
use crate::trial::{Trial, TrialStatus};

/// The optimizer's choice of best trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestTrial {
    pub trial_index: TrialIndex,
    /// The parameterization as the optimizer suggested it (no derived values).
    pub parameterization: Parameterization,
    pub values: Metrics,
}

/// Core optimizer interface.
///
/// Implementations may wrap an external optimization service or run a search
/// strategy locally (see [`LocalOptimizer`]). Trial indices must increase
/// monotonically, and completing an index twice must fail with
/// [`OptimizerError::DuplicateCompletion`] without changing any state.
#[async_trait]
pub trait OptimizerClient: Send + Sync {
    /// Register the search space, objectives and derived-parameter rules.
    async fn create_experiment(
        &mut self,
        space: &ParameterSpace,
        objectives: &ObjectiveSet,
        constraints: &DerivedRules,
    ) -> Result<(), OptimizerError>;

    /// Request the next candidate and the index assigned to it.
    async fn get_next_trial(&mut self) -> Result<(Parameterization, TrialIndex), OptimizerError>;

    /// Report measured objective values for a trial.
    async fn complete_trial(&mut self, trial_index: TrialIndex, raw_data: &Metrics) -> Result<(), OptimizerError>;

    /// Report that a trial could not be evaluated.
    async fn fail_trial(&mut self, trial_index: TrialIndex) -> Result<(), OptimizerError>;

    /// Tabular view of every trial the optimizer knows about.
    fn trials_data_frame(&self) -> TrialsFrame;

    /// The optimizer's best trial under its own Pareto/scalarization policy.
    fn best_parameters(&self) -> Result<Option<BestTrial>, OptimizerError>;
}

#[derive(Debug, Clone)]
struct RegisteredExperiment {
    space: ParameterSpace,
    objectives: ObjectiveSet,
}

/// Optimizer that runs a [`SearchStrategy`] in-process.
///
/// Best-parameter policy: among completed trials take the Pareto front,
/// narrow it to the trials meeting every objective threshold when any do, then
/// pick the highest sum of min-max normalised objective values.
pub struct LocalOptimizer {
    strategy: Box<dyn SearchStrategy>,
    experiment: Option<RegisteredExperiment>,
    trials: Vec<Trial>,
}

impl LocalOptimizer {
    pub fn new(strategy: Box<dyn SearchStrategy>) -> Self {
        Self {
            strategy,
            experiment: None,
            trials: Vec::new(),
        }
    }

    pub fn strategy_name(&self) -> &str {
        self.strategy.name()
    }

    pub fn trials(&self) -> &[Trial] {
        &self.trials
    }

    fn experiment(&self) -> Result<&RegisteredExperiment, OptimizerError> {
        self.experiment
            .as_ref()
            .ok_or(OptimizerError::ExperimentNotCreated)
    }

    fn pending_trial(&mut self, index: TrialIndex) -> Result<&mut Trial, OptimizerError> {
        let trial = self
            .trials
            .get_mut(index)
            .ok_or(OptimizerError::UnknownTrial { index })?;
        if trial.status != TrialStatus::Pending {
            warn!(trial_index = index, status = %trial.status, "trial already finalized");
            return Err(OptimizerError::DuplicateCompletion { index });
        }
        Ok(trial)
    }
}

#[async_trait]
impl OptimizerClient for LocalOptimizer {
    async fn create_experiment(
        &mut self,
        space: &ParameterSpace,
        objectives: &ObjectiveSet,
        constraints: &DerivedRules,
    ) -> Result<(), OptimizerError> {
        if self.experiment.is_some() {
            return Err(OptimizerError::ExperimentAlreadyCreated);
        }
        if let Some(name) = constraints.produced().find(|name| space.contains_name(name)) {
            return Err(OptimizerError::DerivedParameterSuggested {
                name: name.to_string(),
            });
        }
        info!(
            strategy = self.strategy.name(),
            parameters = space.len(),
            objectives = objectives.len(),
            derived = constraints.rules().len(),
            "experiment created"
        );
        self.experiment = Some(RegisteredExperiment {
            space: space.clone(),
            objectives: objectives.clone(),
        });
        Ok(())
    }

    async fn get_next_trial(&mut self) -> Result<(Parameterization, TrialIndex), OptimizerError> {
        self.experiment()?;
        let candidate = self
            .strategy
            .suggest()
            .ok_or_else(|| OptimizerError::Exhausted {
                strategy: self.strategy.name().to_string(),
            })?;
        let index = self.trials.len();
        debug!(trial_index = index, strategy = self.strategy.name(), "suggested candidate");
        self.trials.push(Trial::new(index, candidate.clone()));
        Ok((candidate, index))
    }

    async fn complete_trial(&mut self, trial_index: TrialIndex, raw_data: &Metrics) -> Result<(), OptimizerError> {
        let objectives = self.experiment()?.objectives.clone();
        let observed: Metrics = objectives
            .names()
            .filter_map(|name| raw_data.get(name).map(|v| (name.to_string(), *v)))
            .collect();

        let trial = self.pending_trial(trial_index)?;
        trial
            .mark_completed(observed.clone())
            .map_err(|_| OptimizerError::DuplicateCompletion { index: trial_index })?;
        let params = trial.parameterization.clone();
        self.strategy.report(&params, &observed);
        Ok(())
    }

    async fn fail_trial(&mut self, trial_index: TrialIndex) -> Result<(), OptimizerError> {
        self.experiment()?;
        let trial = self.pending_trial(trial_index)?;
        trial
            .mark_failed("reported failed by driver".to_string())
            .map_err(|_| OptimizerError::DuplicateCompletion { index: trial_index })
    }

    fn trials_data_frame(&self) -> TrialsFrame {
        let Some(experiment) = &self.experiment else {
            return TrialsFrame::default();
        };
        let mut columns = vec!["trial_index".to_string(), "trial_status".to_string()];
        columns.extend(experiment.space.names().map(str::to_string));
        columns.extend(experiment.objectives.names().map(str::to_string));

        let mut frame = TrialsFrame::new(columns);
        for trial in &self.trials {
            let mut row = vec![
                Some(ParameterValue::Int(trial.index as i64)),
                Some(ParameterValue::from(trial.status.to_string().as_str())),
            ];
            row.extend(
                experiment
                    .space
                    .names()
                    .map(|name| trial.parameterization.get(name).cloned()),
            );
            row.extend(experiment.objectives.names().map(|name| {
                trial
                    .result
                    .as_ref()
                    .and_then(|r| r.get(name))
                    .map(|v| ParameterValue::Float(*v))
            }));
            frame.push_row(row);
        }
        frame
    }

    fn best_parameters(&self) -> Result<Option<BestTrial>, OptimizerError> {
        let objectives = &self.experiment()?.objectives;
        let completed: Vec<(&Trial, &Metrics)> = self
            .trials
            .iter()
            .filter_map(|t| t.result.as_ref().map(|r| (t, r)))
            .collect();
        if completed.is_empty() {
            return Ok(None);
        }

        let points: Vec<&Metrics> = completed.iter().map(|(_, m)| *m).collect();
        let mut candidates: Vec<(&Trial, &Metrics)> = objectives
            .pareto_front(&points)
            .into_iter()
            .map(|i| completed[i])
            .collect();
        if candidates.iter().any(|(_, m)| objectives.meets_thresholds(m)) {
            candidates.retain(|(_, m)| objectives.meets_thresholds(m));
        }

        let candidate_points: Vec<&Metrics> = candidates.iter().map(|(_, m)| *m).collect();
        let scores = objectives.normalized_scores(&candidate_points);
        // Candidates are in index order, so a strict comparison keeps the lowest index on ties.
        let mut best = 0;
        for (i, score) in scores.iter().enumerate() {
            if *score > scores[best] {
                best = i;
            }
        }
        let (trial, values) = candidates[best];
        Ok(Some(BestTrial {
            trial_index: trial.index,
            parameterization: trial.parameterization.clone(),
            values: values.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::derived::DerivedRule;
    use crate::search::RandomSearch;

    fn space() -> ParameterSpace {
        ParameterSpace::new()
            .add_float("aqueous_composition", 0.0, 1.0)
            .add_float("temperature", 4.0, 40.0)
    }

    fn objectives() -> ObjectiveSet {
        ObjectiveSet::new()
            .maximize("recovery", Some(50.0))
            .minimize("total_time", Some(1200.0))
    }

    fn metrics(recovery: f64, total_time: f64) -> Metrics {
        let mut m = Metrics::new();
        m.insert("recovery".into(), recovery);
        m.insert("total_time".into(), total_time);
        m
    }

    async fn created() -> LocalOptimizer {
        let mut opt = LocalOptimizer::new(Box::new(RandomSearch::new(space(), Some(5))));
        opt.create_experiment(&space(), &objectives(), &DerivedRules::new())
            .await
            .unwrap();
        opt
    }

    #[tokio::test]
    async fn requires_experiment() {
        let mut opt = LocalOptimizer::new(Box::new(RandomSearch::new(space(), Some(5))));
        assert_eq!(
            opt.get_next_trial().await,
            Err(OptimizerError::ExperimentNotCreated)
        );
        assert!(opt.best_parameters().is_err());
        assert!(opt.trials_data_frame().is_empty());
    }

    #[tokio::test]
    async fn experiment_created_once() {
        let mut opt = created().await;
        assert_eq!(
            opt.create_experiment(&space(), &objectives(), &DerivedRules::new()).await,
            Err(OptimizerError::ExperimentAlreadyCreated)
        );
    }

    #[tokio::test]
    async fn derived_parameter_cannot_be_searched() {
        let mut opt = LocalOptimizer::new(Box::new(RandomSearch::new(space(), None)));
        let rules = DerivedRules::new().with_rule(DerivedRule::complement(
            "temperature",
            "aqueous_composition",
            1.0,
        ));
        assert!(matches!(
            opt.create_experiment(&space(), &objectives(), &rules).await,
            Err(OptimizerError::DerivedParameterSuggested { .. })
        ));
    }

    #[tokio::test]
    async fn indices_increase_monotonically() {
        let mut opt = created().await;
        for expected in 0..5 {
            let (_, index) = opt.get_next_trial().await.unwrap();
            assert_eq!(index, expected);
        }
    }

    #[tokio::test]
    async fn duplicate_completion_rejected_without_mutation() {
        let mut opt = created().await;
        let (_, index) = opt.get_next_trial().await.unwrap();
        opt.complete_trial(index, &metrics(70.0, 500.0)).await.unwrap();
        let before = opt.trials_data_frame();

        assert_eq!(
            opt.complete_trial(index, &metrics(10.0, 1900.0)).await,
            Err(OptimizerError::DuplicateCompletion { index })
        );
        assert_eq!(opt.trials_data_frame(), before);
        assert_eq!(opt.trials()[index].result.as_ref().unwrap()["recovery"], 70.0);
    }

    #[tokio::test]
    async fn unknown_and_failed_trials() {
        let mut opt = created().await;
        assert_eq!(
            opt.complete_trial(9, &metrics(70.0, 500.0)).await,
            Err(OptimizerError::UnknownTrial { index: 9 })
        );

        let (_, index) = opt.get_next_trial().await.unwrap();
        opt.fail_trial(index).await.unwrap();
        assert!(opt.complete_trial(index, &metrics(70.0, 500.0)).await.is_err());
        assert_eq!(opt.trials()[index].status, TrialStatus::Failed);
    }

    #[tokio::test]
    async fn data_frame_lists_every_trial() {
        let mut opt = created().await;
        let (_, a) = opt.get_next_trial().await.unwrap();
        let (_, _b) = opt.get_next_trial().await.unwrap();
        opt.complete_trial(a, &metrics(70.0, 500.0)).await.unwrap();

        let frame = opt.trials_data_frame();
        assert_eq!(frame.len(), 2);
        assert_eq!(
            frame.columns,
            vec!["trial_index", "trial_status", "aqueous_composition", "temperature", "recovery", "total_time"]
        );
        assert_eq!(frame.numeric_column("recovery").unwrap(), vec![Some(70.0), None]);
        assert_eq!(frame.rows[1][1], Some(ParameterValue::from("pending")));
    }

    #[tokio::test]
    async fn best_prefers_threshold_satisfying_front() {
        let mut opt = created().await;
        let results = [
            metrics(95.0, 1500.0), // front, misses total_time threshold
            metrics(60.0, 700.0),  // dominated by the next one
            metrics(80.0, 600.0),  // front, meets thresholds
            metrics(55.0, 300.0),  // front, meets thresholds
        ];
        for m in &results {
            let (_, index) = opt.get_next_trial().await.unwrap();
            opt.complete_trial(index, m).await.unwrap();
        }

        let best = opt.best_parameters().unwrap().unwrap();
        assert_eq!(best.trial_index, 2);
        assert_eq!(best.values["recovery"], 80.0);
    }

    #[tokio::test]
    async fn best_is_none_without_completions() {
        let mut opt = created().await;
        opt.get_next_trial().await.unwrap();
        assert_eq!(opt.best_parameters().unwrap(), None);
    }
}
