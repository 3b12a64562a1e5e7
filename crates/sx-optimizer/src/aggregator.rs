//! Read-only queries over the trials of a run.

use serde::{Deserialize, Serialize};

use sx_types::{Metrics, ParameterValue, Parameterization, SelectionError, TrialIndex};

use crate::client::OptimizerClient;
use crate::driver::ExperimentState;
use crate::frame::TrialsFrame;
use crate::trial::{Trial, TrialStatus};

/// How [`ResultAggregator::best`] picks a trial.
pub enum SelectionPolicy<'a> {
    /// The best value of one objective, in its declared direction.
    Objective(&'a str),
    /// Whatever the optimizer's own Pareto/scalarization policy chooses.
    Optimizer(&'a dyn OptimizerClient),
}

/// A selected trial with its full (independent and derived) parameterization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestParameterization {
    pub trial_index: TrialIndex,
    pub parameterization: Parameterization,
    pub values: Metrics,
    pub meets_thresholds: bool,
}

/// View over the completed history of one [`ExperimentState`].
#[derive(Debug, Clone, Copy)]
pub struct ResultAggregator<'a> {
    state: &'a ExperimentState,
}

impl<'a> ResultAggregator<'a> {
    pub fn new(state: &'a ExperimentState) -> Self {
        Self { state }
    }

    /// Completed trials in completion order.
    pub fn history(&self) -> impl Iterator<Item = &'a Trial> + 'a {
        let state = self.state;
        state.trials().iter().filter(|t| t.is_completed())
    }

    pub fn failed(&self) -> impl Iterator<Item = &'a Trial> + 'a {
        let state = self.state;
        state
            .trials()
            .iter()
            .filter(|t| t.status == TrialStatus::Failed)
    }

    /// Completed trials not dominated by any other completed trial.
    pub fn pareto_front(&self) -> Vec<&'a Trial> {
        let completed = self.completed_with_results();
        let points: Vec<&Metrics> = completed.iter().map(|(_, m)| *m).collect();
        self.state
            .definition()
            .objectives()
            .pareto_front(&points)
            .into_iter()
            .map(|i| completed[i].0)
            .collect()
    }

    pub fn best(&self, policy: &SelectionPolicy<'_>) -> Result<BestParameterization, SelectionError> {
        let completed = self.completed_with_results();
        if completed.is_empty() {
            return Err(SelectionError::NoCompletedTrials);
        }
        let objectives = self.state.definition().objectives();

        let (chosen, values) = match policy {
            SelectionPolicy::Objective(name) => {
                let objective = objectives
                    .get(name)
                    .ok_or_else(|| SelectionError::UnknownObjective {
                        name: name.to_string(),
                    })?;
                let value = |m: &Metrics| m.get(&objective.name).copied().unwrap_or(f64::NAN);
                let mut best = completed[0];
                for candidate in &completed[1..] {
                    if objective.is_better(value(candidate.1), value(best.1)) {
                        best = *candidate;
                    }
                }
                best
            }
            SelectionPolicy::Optimizer(optimizer) => {
                let pick = optimizer
                    .best_parameters()?
                    .ok_or(SelectionError::NoCompletedTrials)?;
                let chosen = completed
                    .iter()
                    .copied()
                    .find(|(t, _)| t.index == pick.trial_index)
                    .ok_or(SelectionError::UnknownTrial {
                        index: pick.trial_index,
                    })?;
                if let Some((dominator, _)) = completed
                    .iter()
                    .find(|(_, m)| objectives.dominates(m, chosen.1))
                {
                    return Err(SelectionError::DominatedSelection {
                        index: pick.trial_index,
                        dominated_by: dominator.index,
                    });
                }
                chosen
            }
        };

        Ok(BestParameterization {
            trial_index: chosen.index,
            parameterization: chosen.parameterization.clone(),
            values: values.clone(),
            meets_thresholds: objectives.meets_thresholds(values),
        })
    }

    /// One row per completed trial: index, independent parameters, derived
    /// parameters, then objectives.
    pub fn summary(&self) -> TrialsFrame {
        let definition = self.state.definition();
        let parameter_columns: Vec<&str> = definition
            .space()
            .names()
            .chain(definition.rules().produced())
            .collect();
        let objective_columns: Vec<&str> = definition.objectives().names().collect();

        let mut columns = vec!["trial_index".to_string()];
        columns.extend(parameter_columns.iter().map(|c| c.to_string()));
        columns.extend(objective_columns.iter().map(|c| c.to_string()));

        let mut frame = TrialsFrame::new(columns);
        for (trial, result) in self.completed_with_results() {
            let mut row = vec![Some(ParameterValue::Int(trial.index as i64))];
            row.extend(
                parameter_columns
                    .iter()
                    .map(|name| trial.parameterization.get(*name).cloned()),
            );
            row.extend(
                objective_columns
                    .iter()
                    .map(|name| result.get(*name).map(|v| ParameterValue::Float(*v))),
            );
            frame.push_row(row);
        }
        frame
    }

    fn completed_with_results(&self) -> Vec<(&'a Trial, &'a Metrics)> {
        self.history()
            .filter_map(|t| t.result.as_ref().map(|r| (t, r)))
            .collect()
    }
}
