//! Trials and the validated experiment definition they are run against.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sx_types::{Metrics, Parameterization, SpecError, TrialError, TrialIndex};

use crate::derived::DerivedRules;
use crate::objective::ObjectiveSet;
use crate::space::ParameterSpace;

/// Parameter space, objectives and derived rules that passed every
/// specification-time check.
#[derive(Debug, Clone)]
pub struct ExperimentDefinition {
    space: ParameterSpace,
    objectives: ObjectiveSet,
    rules: DerivedRules,
}

impl ExperimentDefinition {
    pub fn new(
        space: ParameterSpace,
        objectives: ObjectiveSet,
        rules: DerivedRules,
    ) -> Result<Self, SpecError> {
        space.validate()?;
        objectives.validate()?;
        rules.validate_against(&space)?;
        // Objective names share the summary's column namespace with parameters.
        for name in objectives.names() {
            if space.contains_name(name) || rules.produces(name) {
                return Err(SpecError::DuplicateName {
                    name: name.to_string(),
                });
            }
        }
        Ok(Self {
            space,
            objectives,
            rules,
        })
    }

    pub fn space(&self) -> &ParameterSpace {
        &self.space
    }

    pub fn objectives(&self) -> &ObjectiveSet {
        &self.objectives
    }

    pub fn rules(&self) -> &DerivedRules {
        &self.rules
    }
}

/// A single trial: one parameterization and, once evaluated, its result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub index: TrialIndex,
    /// The candidate as suggested; completed with derived values before
    /// evaluation.
    pub parameterization: Parameterization,
    pub status: TrialStatus,
    pub result: Option<Metrics>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Trial {
    pub fn new(index: TrialIndex, parameterization: Parameterization) -> Self {
        Self {
            index,
            parameterization,
            status: TrialStatus::Pending,
            result: None,
            error: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == TrialStatus::Completed
    }

    /// Replace the parameterization of a pending trial.
    pub fn set_parameterization(&mut self, parameterization: Parameterization) -> Result<(), TrialError> {
        self.ensure_pending()?;
        self.parameterization = parameterization;
        Ok(())
    }

    pub fn mark_completed(&mut self, result: Metrics) -> Result<(), TrialError> {
        self.ensure_pending()?;
        self.status = TrialStatus::Completed;
        self.finished_at = Some(Utc::now());
        self.result = Some(result);
        Ok(())
    }

    pub fn mark_failed(&mut self, error: String) -> Result<(), TrialError> {
        self.ensure_pending()?;
        self.status = TrialStatus::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
        Ok(())
    }

    fn ensure_pending(&self) -> Result<(), TrialError> {
        if self.status == TrialStatus::Pending {
            Ok(())
        } else {
            Err(TrialError::AlreadyFinalized { index: self.index })
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrialStatus {
    Pending,
    Completed,
    Failed,
}

impl std::fmt::Display for TrialStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}
