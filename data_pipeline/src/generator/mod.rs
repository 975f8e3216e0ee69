//! Batch generation, the work a producer runs in the background.

mod ratings;
mod synthetic;

pub use ratings::RatingsGenerator;
pub use synthetic::SyntheticGenerator;

use crate::{Batch, Result, batch};

/// Generates the batches of every training epoch and the evaluation batches.
pub trait BatchGenerator: Send + 'static {
    fn num_users(&self) -> usize;

    fn num_items(&self) -> usize;

    /// The amount of batches `train_epoch` returns, padding batches included.
    fn train_batches_per_epoch(&self) -> usize;

    /// The amount of batches `eval_batches` returns, padding batches included.
    fn eval_batches_per_epoch(&self) -> usize;

    /// Generates the shuffled training batches of one epoch.
    fn train_epoch(&mut self, epoch: usize) -> Result<Vec<Batch>>;

    /// Generates the evaluation batches, called once per run.
    fn eval_batches(&mut self) -> Result<Vec<Batch>>;
}

/// Runs one training epoch, logging its digest when `hash` is set.
pub(crate) fn epoch_batches<G: BatchGenerator + ?Sized>(
    generator: &mut G,
    epoch: usize,
    hash: bool,
) -> Result<Vec<Batch>> {
    let batches = generator.train_epoch(epoch)?;
    if hash {
        log::info!(epoch = epoch; "training data hash {}", batch::digest(&batches));
    }

    Ok(batches)
}
