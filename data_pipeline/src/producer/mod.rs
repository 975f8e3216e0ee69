//! The producers owning batch generation for a run.
//!
//! A producer is started once before training, hands out input sources for training and
//! evaluation and is stopped and joined once when the run ends.

mod background;
mod inline;
mod source;

pub use background::BackgroundProducer;
pub use inline::InlineProducer;
pub use source::SliceSource;

use std::sync::Arc;

use crate::{
    Batch, PipelineConfig, Result,
    generator::{BatchGenerator, RatingsGenerator, SyntheticGenerator},
    preprocessing::RatingIndex,
};

/// A stream of batches consumed by the estimator.
pub trait BatchSource {
    /// Returns the next batch, or `None` once the source is exhausted or stopped.
    fn next_batch(&mut self) -> Result<Option<Arc<Batch>>>;
}

/// The lifecycle of a run's data generation.
pub trait Producer: Send {
    fn num_users(&self) -> usize;

    fn num_items(&self) -> usize;

    fn train_batches_per_epoch(&self) -> usize;

    fn eval_batches_per_epoch(&self) -> usize;

    /// Starts generating data, must be called exactly once before asking for any input.
    fn start(&mut self) -> Result<()>;

    /// The training batches of every epoch, in order.
    fn train_input(&mut self) -> Result<Box<dyn BatchSource + '_>>;

    /// The evaluation batches, from the beginning on every call.
    fn eval_input(&mut self) -> Result<Box<dyn BatchSource + '_>>;

    /// Signals the generation to stop, never blocks on a full queue.
    fn stop_loop(&mut self);

    /// Waits for the generation to finish.
    fn join(&mut self) -> Result<()>;
}

/// Builds the producer the config asks for, loading and preprocessing the dataset if needed.
pub fn instantiate_producer(config: &PipelineConfig) -> Result<Box<dyn Producer>> {
    config.validate()?;

    if config.use_synthetic_data {
        log::info!(dataset = config.dataset.name(); "using synthetic data");
        return Ok(wrap(SyntheticGenerator::new(config), config));
    }

    let index = RatingIndex::load_or_build(
        config.dataset,
        &config.data_dir,
        config.cache_id,
        config.download_if_missing,
    )?;

    Ok(wrap(RatingsGenerator::new(index, config)?, config))
}

fn wrap<G: BatchGenerator>(generator: G, config: &PipelineConfig) -> Box<dyn Producer> {
    if config.use_subprocess {
        Box::new(BackgroundProducer::new(
            generator,
            config.train_epochs,
            config.hash_pipeline,
        ))
    } else {
        Box::new(InlineProducer::new(
            generator,
            config.train_epochs,
            config.hash_pipeline,
        ))
    }
}
