//! The solvent extraction experiment: search space, objectives, the
//! composition rule, and the driver wired to the local optimizer.

use tracing::info;

use sx_optimizer::{
    BayesianSearch, DerivedRule, DerivedRules, ExperimentDefinition, GridSearch, LocalOptimizer, ObjectiveSet,
    ParameterSpace, RandomSearch, SearchStrategy, TrialDriver,
};
use sx_types::SxResult;

use crate::config::{ExperimentConfig, ObjectiveMode, ScriptOptions, StrategyKind};
use crate::model::*;

pub const RECOVERY_THRESHOLD: f64 = 50.0;
pub const PURITY_THRESHOLD: f64 = 90.0;
pub const TOTAL_TIME_THRESHOLD: f64 = 1200.0;

/// Driver type the binary runs.
pub type ExtractionDriver = TrialDriver<LocalOptimizer, ExtractionModel>;

/// Aqueous fraction, stirring speed (rpm), stirring time (s) and temperature
/// (°C). Organic fraction is searched too when it is not derived.
pub fn extraction_space(options: &ScriptOptions) -> ParameterSpace {
    let space = ParameterSpace::new().add_float(AQUEOUS_COMPOSITION, 0.0, 1.0);
    let space = if options.composition_constraint {
        space
    } else {
        space.add_float(ORGANIC_COMPOSITION, 0.0, 1.0)
    };
    space
        .add_int(STIRRING_SPEED, 100, 500)
        .add_int(STIRRING_TIME, 10, 120)
        .add_int(TEMPERATURE, 4, 40)
}

pub fn extraction_objectives(options: &ScriptOptions) -> ObjectiveSet {
    let threshold = |t: f64| options.custom_threshold.then_some(t);
    let objectives = ObjectiveSet::new().maximize(RECOVERY, threshold(RECOVERY_THRESHOLD));
    match options.objective {
        ObjectiveMode::Single => objectives,
        ObjectiveMode::Multi => objectives
            .maximize(PURITY, threshold(PURITY_THRESHOLD))
            .maximize(SEPARATION, None)
            .minimize(EMULSION, None)
            .minimize(TOTAL_TIME, threshold(TOTAL_TIME_THRESHOLD)),
    }
}

/// `organic_composition = 1 − aqueous_composition`, or nothing when the
/// composition is unconstrained.
pub fn extraction_rules(options: &ScriptOptions) -> DerivedRules {
    if options.composition_constraint {
        DerivedRules::new().with_rule(DerivedRule::complement(ORGANIC_COMPOSITION, AQUEOUS_COMPOSITION, 1.0))
    } else {
        DerivedRules::new()
    }
}

pub fn extraction_definition(options: &ScriptOptions) -> SxResult<ExperimentDefinition> {
    Ok(ExperimentDefinition::new(
        extraction_space(options),
        extraction_objectives(options),
        extraction_rules(options),
    )?)
}

pub fn search_strategy(config: &ExperimentConfig, definition: &ExperimentDefinition) -> Box<dyn SearchStrategy> {
    let space = definition.space().clone();
    match config.strategy {
        StrategyKind::Random => Box::new(RandomSearch::new(space, config.seed)),
        StrategyKind::Grid => Box::new(GridSearch::new(&space, config.grid_steps)),
        StrategyKind::Bayesian => Box::new(BayesianSearch::new(
            space,
            definition.objectives().clone(),
            config.exploration_weight,
            config.seed,
        )),
    }
}

/// Validate the configuration and build an idle driver for it.
pub async fn build_driver(config: &ExperimentConfig) -> SxResult<ExtractionDriver> {
    config.validate()?;
    let definition = extraction_definition(&config.options)?;
    let optimizer = LocalOptimizer::new(search_strategy(config, &definition));
    info!(
        experiment = %config.name,
        strategy = optimizer.strategy_name(),
        objectives = definition.objectives().len(),
        composition_constraint = config.options.composition_constraint,
        "building extraction experiment"
    );

    let model = ExtractionModel::new(config.coefficients);
    let driver = TrialDriver::new(config.name.clone(), definition, optimizer, model, config.max_trials)
        .await?
        .with_progress_interval(config.progress_every);
    Ok(driver)
}
