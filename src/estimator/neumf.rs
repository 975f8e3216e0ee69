use std::{
    fs,
    path::{Path, PathBuf},
    time::Instant,
};

use data_pipeline::{BatchSource, constants::EVAL_GROUP_SIZE};
use machine_learning::{
    arch::{Model, NeuMf, loss::LossFn},
    checkpoint::Checkpoint,
    metrics::RankingAccumulator,
    optimization::Adam,
    training::{BatchRef, ModelTrainer},
};
use rand::{SeedableRng, rngs::StdRng};

use super::{Estimator, EvalResult, TrainSummary, next_step};
use crate::{
    configs::Settings,
    error::Result,
    hooks::{StepContext, TrainHook},
};

/// The file the estimator checkpoints into, inside the model dir.
pub const CHECKPOINT_FILE: &str = "model.ckpt.safetensors";

/// Trains and evaluates NeuMF, checkpointing into the model dir after every `train` call.
pub struct NeuMfEstimator<L: LossFn> {
    trainer: ModelTrainer<NeuMf, Adam, L>,
    model_dir: PathBuf,
    batches_per_step: usize,
    match_mlperf: bool,
    reload_before_eval: bool,
}

impl<L: LossFn> NeuMfEstimator<L> {
    /// Creates a new `NeuMfEstimator`, restoring the checkpoint in the model dir if any.
    ///
    /// # Arguments
    /// * `settings` - The run's settings.
    /// * `num_users`, `num_items` - The dataset's size, known once the producer exists.
    /// * `loss_fn` - The loss minimized during training and reported on evaluation.
    pub fn new(settings: &Settings, num_users: usize, num_items: usize, loss_fn: L) -> Result<Self> {
        let model = NeuMf::new(settings.model_config(num_users, num_items))?;

        let mut rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let params = model.init_params(&mut rng)?;

        let adam = Adam::new(
            model.size(),
            settings.learning_rate,
            settings.beta1,
            settings.beta2,
            settings.epsilon,
        );

        let mut estimator = Self {
            trainer: ModelTrainer::new(model, adam, loss_fn, params)?,
            model_dir: settings.model_dir.clone(),
            batches_per_step: settings.batches_per_step,
            match_mlperf: settings.match_mlperf,
            reload_before_eval: false,
        };

        estimator.restore()?;
        Ok(estimator)
    }

    /// Makes every evaluation start by reloading the checkpoint, so another estimator's
    /// training shows up.
    pub fn reload_before_eval(mut self, reload: bool) -> Self {
        self.reload_before_eval = reload;
        self
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.model_dir.join(CHECKPOINT_FILE)
    }

    pub fn model_dir(&self) -> &Path {
        &self.model_dir
    }

    pub fn global_step(&self) -> u64 {
        self.trainer.global_step()
    }

    pub fn params(&self) -> &[f32] {
        self.trainer.params()
    }

    /// Loads the model dir's checkpoint.
    ///
    /// # Returns
    /// Whether there was a checkpoint to restore.
    pub fn restore(&mut self) -> Result<bool> {
        let path = self.checkpoint_path();
        if !path.is_file() {
            return Ok(false);
        }

        let ckpt = Checkpoint::load(&path)?;
        self.trainer.set_params(ckpt.params)?;
        self.trainer
            .optimizer_mut()
            .restore(ckpt.adam_v, ckpt.adam_s, ckpt.beta_powers)?;
        self.trainer.set_global_step(ckpt.global_step);

        log::debug!(global_step = ckpt.global_step; "restored {}", path.display());
        Ok(true)
    }

    pub fn save(&self) -> Result<()> {
        fs::create_dir_all(&self.model_dir)?;

        let (v, s) = self.trainer.optimizer().moments();
        let ckpt = Checkpoint {
            params: self.trainer.params().to_vec(),
            adam_v: v.to_vec(),
            adam_s: s.to_vec(),
            beta_powers: self.trainer.optimizer().powers(),
            global_step: self.trainer.global_step(),
        };

        ckpt.save(&self.checkpoint_path())?;
        Ok(())
    }

    /// Logs every parameter block and the model's size.
    pub fn log_summary(&self) {
        let layout = self.trainer.model().layout();
        for block in layout.blocks() {
            log::info!("{:<28} {:>8} x {:<4}", block.name, block.shape.0, block.shape.1);
        }
        log::info!("total params: {}", layout.len());
    }
}

impl<L: LossFn + 'static> Estimator for NeuMfEstimator<L> {
    fn train(
        &mut self,
        steps: usize,
        input: &mut dyn BatchSource,
        hooks: &mut [Box<dyn TrainHook>],
    ) -> Result<TrainSummary> {
        for hook in hooks.iter_mut() {
            hook.begin(self.global_step())?;
        }

        let mut loss = 0.0;
        let mut accuracy = None;
        let mut examples = 0;

        for step in 0..steps {
            let batches = next_step(input, self.batches_per_step, step, steps)?;
            let refs: Vec<BatchRef<'_>> = batches.iter().map(|b| b.as_batch_ref()).collect();

            let start = Instant::now();
            let stats = self.trainer.step(&refs)?;
            let ctx = StepContext {
                global_step: self.global_step(),
                loss: stats.loss,
                accuracy: stats.accuracy,
                examples: stats.examples as usize,
                elapsed: start.elapsed(),
            };

            for hook in hooks.iter_mut() {
                hook.after_step(&ctx)?;
            }

            loss += stats.loss;
            examples += ctx.examples;
            if let Some(acc) = stats.accuracy {
                *accuracy.get_or_insert(0.0) += acc;
            }
        }

        self.save()?;

        for hook in hooks.iter_mut() {
            hook.end(self.global_step())?;
        }

        let n = steps.max(1) as f32;
        Ok(TrainSummary {
            steps,
            loss: loss / n,
            accuracy: accuracy.map(|acc| acc / n),
            examples,
            global_step: self.global_step(),
        })
    }

    fn evaluate(&mut self, steps: usize, input: &mut dyn BatchSource) -> Result<EvalResult> {
        if self.reload_before_eval {
            self.restore()?;
        }

        let mut acc = RankingAccumulator::new();
        for step in 0..steps {
            let batches = next_step(input, self.batches_per_step, step, steps)?;
            let refs: Vec<BatchRef<'_>> = batches
                .iter()
                .map(|b| {
                    let mut batch = b.as_batch_ref();
                    if !self.match_mlperf {
                        batch.duplicates = None;
                    }
                    batch
                })
                .collect();

            self.trainer.evaluate(&refs, EVAL_GROUP_SIZE, &mut acc)?;
        }

        let metrics = acc.finish();
        Ok(EvalResult {
            hit_rate: metrics.hit_rate,
            ndcg: metrics.ndcg,
            loss: metrics.loss,
            global_step: self.global_step(),
        })
    }
}
