//! The evaluation seam between the driver and whatever measures a candidate.

use async_trait::async_trait;

use sx_types::{Metrics, Parameterization, TrialError};

/// Maps a fully resolved parameterization to measured objective values.
///
/// Implementations may compute a model in-process or call out to an
/// instrument or simulator. They must be total over the declared parameter
/// domain; the driver rejects results that miss a declared objective or carry
/// a non-finite value.
#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(&self, parameterization: &Parameterization) -> Result<Metrics, TrialError>;
}
