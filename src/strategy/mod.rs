//! The two ways a run can train: train/evaluate cycles or a single fit.

mod cycle;
mod fit;

pub use cycle::{CycleController, past_stop_threshold};
pub use fit::{FitEpoch, FitStrategy};

use data_pipeline::{Producer, constants::SYNTHETIC_BATCHES_PER_EPOCH};

use crate::{
    configs::Settings,
    error::{NcfError, Result},
    estimator::{EvalResult, construct_estimator},
    hooks::TrainHook,
    logs::{BenchmarkLogger, MlPerfLogger},
};

/// How many steps every phase of the run takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepPlan {
    /// Steps per training cycle, covering `epochs_between_evals` epochs.
    pub num_train_steps: usize,
    pub num_eval_steps: usize,
    pub total_training_cycle: usize,
    /// Steps in a single training epoch.
    pub steps_per_epoch: usize,
}

impl StepPlan {
    /// Synthetic data runs a fixed amount of steps per epoch, whatever the device count.
    ///
    /// # Errors
    /// `UnevenBatches` if a per epoch batch count isn't a multiple of `batches_per_step`.
    pub fn new(settings: &Settings, producer: &dyn Producer) -> Result<Self> {
        if settings.use_synthetic_data {
            return Ok(Self {
                num_train_steps: settings.epochs_between_evals * SYNTHETIC_BATCHES_PER_EPOCH,
                num_eval_steps: SYNTHETIC_BATCHES_PER_EPOCH,
                total_training_cycle: settings.total_training_cycle(),
                steps_per_epoch: SYNTHETIC_BATCHES_PER_EPOCH,
            });
        }

        let per_step = settings.batches_per_step;
        let train_batches = producer.train_batches_per_epoch();
        let eval_batches = producer.eval_batches_per_epoch();

        for (what, batches) in [("training", train_batches), ("evaluation", eval_batches)] {
            if batches % per_step != 0 {
                return Err(NcfError::UnevenBatches {
                    what,
                    batches,
                    batches_per_step: per_step,
                });
            }
        }

        Ok(Self {
            num_train_steps: settings.epochs_between_evals * train_batches / per_step,
            num_eval_steps: eval_batches / per_step,
            total_training_cycle: settings.total_training_cycle(),
            steps_per_epoch: train_batches / per_step,
        })
    }
}

/// Everything a strategy drives during a run.
pub struct RunContext<'a> {
    pub settings: &'a Settings,
    pub producer: &'a mut dyn Producer,
    pub plan: &'a StepPlan,
    pub mlperf: &'a MlPerfLogger,
    pub benchmark: &'a BenchmarkLogger,
    pub hooks: &'a mut [Box<dyn TrainHook>],
}

/// How a run ended.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunOutcome {
    pub cycles: usize,
    pub target_reached: bool,
    pub last_eval: Option<EvalResult>,
    pub fit_history: Vec<FitEpoch>,
}

pub trait RunTraining {
    fn run(&mut self, ctx: RunContext<'_>) -> Result<RunOutcome>;
}

/// Picks the strategy the settings ask for, building its estimators.
pub fn select_strategy(
    settings: &Settings,
    num_users: usize,
    num_items: usize,
) -> Result<Box<dyn RunTraining>> {
    if settings.use_keras {
        return Ok(Box::new(FitStrategy::keras(settings, num_users, num_items)?));
    }

    let estimators = construct_estimator(settings, num_users, num_items)?;
    Ok(Box::new(CycleController::new(estimators)))
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use data_pipeline::instantiate_producer;

    use super::*;
    use crate::configs::NcfArgs;

    fn settings(flags: &[&str]) -> Settings {
        let args = NcfArgs::parse_from(std::iter::once("ncf").chain(flags.iter().copied()));
        Settings::assemble(&args).unwrap()
    }

    #[test]
    fn synthetic_steps_ignore_the_device_count() {
        for gpus in ["1", "2", "3", "7"] {
            let settings = settings(&[
                "--use_synthetic_data",
                "--num_gpus",
                gpus,
                "--train_epochs",
                "4",
                "--epochs_between_evals",
                "2",
            ]);
            let producer = instantiate_producer(&settings.pipeline_config()).unwrap();
            let plan = StepPlan::new(&settings, producer.as_ref()).unwrap();

            assert_eq!(plan.num_train_steps, 2 * SYNTHETIC_BATCHES_PER_EPOCH);
            assert_eq!(plan.num_eval_steps, SYNTHETIC_BATCHES_PER_EPOCH);
            assert_eq!(plan.steps_per_epoch, SYNTHETIC_BATCHES_PER_EPOCH);
            assert_eq!(plan.total_training_cycle, 2);

            // Enough input for every step of every device.
            assert_eq!(
                producer.train_batches_per_epoch(),
                plan.steps_per_epoch * settings.batches_per_step
            );
            assert_eq!(
                producer.eval_batches_per_epoch(),
                plan.num_eval_steps * settings.batches_per_step
            );
        }
    }
}
