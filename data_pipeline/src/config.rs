use std::path::PathBuf;

use rand::{SeedableRng, rngs::StdRng};

use crate::{Dataset, PipelineErr, Result, constants::EVAL_GROUP_SIZE};

/// Everything the pipeline needs to produce batches.
///
/// Batch sizes are per device, one step consumes `batches_per_step` batches.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub dataset: Dataset,
    pub data_dir: PathBuf,
    pub cache_id: u64,
    pub download_if_missing: bool,
    pub use_synthetic_data: bool,
    /// Whether batches are generated on a background worker or on the consumer's thread.
    pub use_subprocess: bool,
    pub num_neg: usize,
    pub batch_size: usize,
    pub eval_batch_size: usize,
    pub batches_per_step: usize,
    pub train_epochs: usize,
    pub seed: Option<u64>,
    pub hash_pipeline: bool,
    /// Flag repeated evaluation candidates so they are only counted once.
    pub match_mlperf: bool,
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(PipelineErr::InvalidConfig(
                "batch size must be positive".to_string(),
            ));
        }

        if self.eval_batch_size == 0 || self.eval_batch_size % EVAL_GROUP_SIZE != 0 {
            return Err(PipelineErr::InvalidConfig(format!(
                "eval batch size {} is not a positive multiple of {EVAL_GROUP_SIZE}",
                self.eval_batch_size
            )));
        }

        if self.batches_per_step == 0 {
            return Err(PipelineErr::InvalidConfig(
                "batches per step must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// The generator's RNG, seeded when a seed was given.
    pub fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        }
    }
}

#[cfg(test)]
pub(crate) fn test_config(data_dir: PathBuf) -> PipelineConfig {
    PipelineConfig {
        dataset: Dataset::Ml1m,
        data_dir,
        cache_id: 1,
        download_if_missing: false,
        use_synthetic_data: false,
        use_subprocess: true,
        num_neg: 2,
        batch_size: 16,
        eval_batch_size: EVAL_GROUP_SIZE,
        batches_per_step: 1,
        train_epochs: 2,
        seed: Some(7),
        hash_pipeline: false,
        match_mlperf: false,
    }
}
