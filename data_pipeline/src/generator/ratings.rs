use std::collections::HashSet;

use rand::{Rng, rngs::StdRng, seq::SliceRandom};

use super::BatchGenerator;
use crate::{
    Batch, PipelineConfig, PipelineErr, Result,
    batch::padded_batch_count,
    constants::{EVAL_GROUP_SIZE, NUM_EVAL_NEGATIVES},
    preprocessing::RatingIndex,
};

/// Generates batches out of preprocessed MovieLens ratings.
///
/// Every training epoch holds each training positive once plus `num_neg` negatives for it.
/// Evaluation holds one group per user, `NUM_EVAL_NEGATIVES` negatives followed by the
/// user's held out positive.
pub struct RatingsGenerator {
    index: RatingIndex,
    num_neg: usize,
    batch_size: usize,
    eval_batch_size: usize,
    batches_per_step: usize,
    match_mlperf: bool,
    rng: StdRng,
}

impl RatingsGenerator {
    /// Creates a new `RatingsGenerator`.
    ///
    /// # Returns
    /// The generator or `SaturatedUser` if some user has no item left to sample as negative.
    pub fn new(index: RatingIndex, config: &PipelineConfig) -> Result<Self> {
        for user in 0..index.num_users() {
            let num_items = index.num_items() as u32;
            if (0..num_items).all(|item| index.is_positive(user, item)) {
                return Err(PipelineErr::SaturatedUser {
                    user,
                    positives: index.train_positives(user).len() + 1,
                });
            }
        }

        Ok(Self {
            index,
            num_neg: config.num_neg,
            batch_size: config.batch_size,
            eval_batch_size: config.eval_batch_size,
            batches_per_step: config.batches_per_step,
            match_mlperf: config.match_mlperf,
            rng: config.rng(),
        })
    }

    pub fn index(&self) -> &RatingIndex {
        &self.index
    }

    fn groups_per_eval_batch(&self) -> usize {
        (self.eval_batch_size / EVAL_GROUP_SIZE).max(1)
    }
}

/// Draws uniformly among the items `user` never rated.
fn sample_negative(index: &RatingIndex, rng: &mut StdRng, user: usize) -> u32 {
    let num_items = index.num_items() as u32;
    loop {
        let item = rng.random_range(0..num_items);
        if !index.is_positive(user, item) {
            return item;
        }
    }
}

impl BatchGenerator for RatingsGenerator {
    fn num_users(&self) -> usize {
        self.index.num_users()
    }

    fn num_items(&self) -> usize {
        self.index.num_items()
    }

    fn train_batches_per_epoch(&self) -> usize {
        let entries = self.index.num_train_positives() * (1 + self.num_neg);
        padded_batch_count(entries, self.batch_size, self.batches_per_step)
    }

    fn eval_batches_per_epoch(&self) -> usize {
        padded_batch_count(
            self.index.num_users(),
            self.groups_per_eval_batch(),
            self.batches_per_step,
        )
    }

    fn train_epoch(&mut self, epoch: usize) -> Result<Vec<Batch>> {
        let count = self.train_batches_per_epoch();
        let Self {
            index,
            num_neg,
            batch_size,
            rng,
            ..
        } = self;

        let mut entries = Vec::with_capacity(index.num_train_positives() * (1 + *num_neg));
        for (user, item) in index.iter_train() {
            entries.push((user, item, 1.0));
            for _ in 0..*num_neg {
                entries.push((user, sample_negative(index, rng, user as usize), 0.0));
            }
        }

        entries.shuffle(rng);

        let mut chunks = entries.chunks(*batch_size);
        let batches = (0..count)
            .map(|_| {
                let mut batch = Batch::with_capacity(*batch_size);
                for &(user, item, label) in chunks.next().unwrap_or_default() {
                    batch.push(user, item, label);
                }

                batch.pad_to(*batch_size);
                batch
            })
            .collect();

        log::debug!(epoch = epoch, examples = entries.len(), batches = count; "training epoch generated");
        Ok(batches)
    }

    fn eval_batches(&mut self) -> Result<Vec<Batch>> {
        let count = self.eval_batches_per_epoch();
        let groups = self.groups_per_eval_batch();
        let len = groups * EVAL_GROUP_SIZE;
        let Self {
            index,
            match_mlperf,
            rng,
            ..
        } = self;

        let mut users = 0..index.num_users();
        let mut seen = HashSet::with_capacity(NUM_EVAL_NEGATIVES);
        let mut batches = Vec::with_capacity(count);

        for _ in 0..count {
            let mut batch = Batch::with_capacity(len);
            if *match_mlperf {
                batch.duplicates = Some(Vec::with_capacity(len));
            }

            for user in users.by_ref().take(groups) {
                seen.clear();
                for _ in 0..NUM_EVAL_NEGATIVES {
                    let item = sample_negative(index, rng, user);
                    batch.push_candidate(user as u32, item, 0.0, !seen.insert(item));
                }

                batch.push_candidate(user as u32, index.test_positive(user), 1.0, false);
            }

            batch.pad_to(len);
            batches.push(batch);
        }

        log::debug!(users = index.num_users(), batches = count; "evaluation data generated");
        Ok(batches)
    }
}
