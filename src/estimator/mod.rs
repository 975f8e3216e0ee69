//! Trainable and evaluable models driven by the run strategies.

mod neumf;
mod pair;

pub use neumf::{CHECKPOINT_FILE, NeuMfEstimator};
pub use pair::{EstimatorPair, construct_estimator};

use std::sync::Arc;

use data_pipeline::{Batch, BatchSource};
use serde::Serialize;

use crate::{
    error::{NcfError, Result},
    hooks::TrainHook,
};

/// The metrics of one evaluation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct EvalResult {
    pub hit_rate: f32,
    pub ndcg: f32,
    pub loss: f32,
    pub global_step: u64,
}

/// What a `train` call went through.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TrainSummary {
    pub steps: usize,
    /// The mean loss across the call's steps.
    pub loss: f32,
    pub accuracy: Option<f32>,
    pub examples: usize,
    pub global_step: u64,
}

pub trait Estimator: Send {
    /// Runs exactly `steps` optimization steps out of `input`.
    fn train(
        &mut self,
        steps: usize,
        input: &mut dyn BatchSource,
        hooks: &mut [Box<dyn TrainHook>],
    ) -> Result<TrainSummary>;

    /// Evaluates exactly `steps` steps worth of batches out of `input`.
    fn evaluate(&mut self, steps: usize, input: &mut dyn BatchSource) -> Result<EvalResult>;
}

/// Pulls the `batches_per_step` batches of one step.
pub(crate) fn next_step(
    input: &mut dyn BatchSource,
    batches_per_step: usize,
    step: usize,
    steps: usize,
) -> Result<Vec<Arc<Batch>>> {
    (0..batches_per_step)
        .map(|_| input.next_batch()?.ok_or(NcfError::InputExhausted { step, steps }))
        .collect()
}
