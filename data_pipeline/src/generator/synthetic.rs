use rand::{Rng, rngs::StdRng};

use super::BatchGenerator;
use crate::{
    Batch, PipelineConfig, Result,
    constants::{EVAL_GROUP_SIZE, SYNTHETIC_BATCHES_PER_EPOCH},
};

/// Generates random batches shaped like the real dataset's, used to benchmark the model
/// without touching the disk.
pub struct SyntheticGenerator {
    num_users: usize,
    num_items: usize,
    batch_size: usize,
    eval_batch_size: usize,
    batches_per_epoch: usize,
    rng: StdRng,
}

impl SyntheticGenerator {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            num_users: config.dataset.num_users(),
            num_items: config.dataset.num_items(),
            batch_size: config.batch_size,
            eval_batch_size: config.eval_batch_size,
            batches_per_epoch: SYNTHETIC_BATCHES_PER_EPOCH * config.batches_per_step,
            rng: config.rng(),
        }
    }

    /// Overrides the amount of batches per epoch.
    pub fn with_batches_per_epoch(mut self, batches_per_epoch: usize) -> Self {
        self.batches_per_epoch = batches_per_epoch;
        self
    }

    fn random_pair(&mut self) -> (u32, u32) {
        (
            self.rng.random_range(0..self.num_users as u32),
            self.rng.random_range(0..self.num_items as u32),
        )
    }
}

impl BatchGenerator for SyntheticGenerator {
    fn num_users(&self) -> usize {
        self.num_users
    }

    fn num_items(&self) -> usize {
        self.num_items
    }

    fn train_batches_per_epoch(&self) -> usize {
        self.batches_per_epoch
    }

    fn eval_batches_per_epoch(&self) -> usize {
        self.batches_per_epoch
    }

    fn train_epoch(&mut self, _epoch: usize) -> Result<Vec<Batch>> {
        let mut batches = Vec::with_capacity(self.batches_per_epoch);
        for _ in 0..self.batches_per_epoch {
            let mut batch = Batch::with_capacity(self.batch_size);
            for _ in 0..self.batch_size {
                let (user, item) = self.random_pair();
                let label = if self.rng.random_bool(0.5) { 1.0 } else { 0.0 };
                batch.push(user, item, label);
            }

            batches.push(batch);
        }

        Ok(batches)
    }

    fn eval_batches(&mut self) -> Result<Vec<Batch>> {
        let mut batches = Vec::with_capacity(self.batches_per_epoch);
        for _ in 0..self.batches_per_epoch {
            let mut batch = Batch::with_capacity(self.eval_batch_size);
            for _ in 0..self.eval_batch_size / EVAL_GROUP_SIZE {
                let (user, _) = self.random_pair();
                for candidate in 0..EVAL_GROUP_SIZE {
                    let item = self.rng.random_range(0..self.num_items as u32);
                    let label = if candidate == EVAL_GROUP_SIZE - 1 { 1.0 } else { 0.0 };
                    batch.push(user, item, label);
                }
            }

            batches.push(batch);
        }

        Ok(batches)
    }
}
