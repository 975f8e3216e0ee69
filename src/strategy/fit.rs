use machine_learning::arch::loss::TwoClassSoftmax;

use super::{RunContext, RunOutcome, RunTraining};
use crate::{
    configs::Settings,
    error::Result,
    estimator::{Estimator, NeuMfEstimator},
};

/// The loss and accuracy of one fitted epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitEpoch {
    pub epoch: usize,
    pub loss: f32,
    pub accuracy: Option<f32>,
}

/// Fits the model for every training epoch in one go, without evaluating.
pub struct FitStrategy {
    estimator: Box<dyn Estimator>,
}

impl FitStrategy {
    pub fn new(estimator: Box<dyn Estimator>) -> Self {
        Self { estimator }
    }

    /// Builds the two-class softmax variant of the model, the single logit `x` is scored as
    /// the logits `[0, x]`.
    pub fn keras(settings: &Settings, num_users: usize, num_items: usize) -> Result<Self> {
        let estimator = NeuMfEstimator::new(settings, num_users, num_items, TwoClassSoftmax)?;
        estimator.log_summary();
        Ok(Self::new(Box::new(estimator)))
    }
}

impl RunTraining for FitStrategy {
    fn run(&mut self, ctx: RunContext<'_>) -> Result<RunOutcome> {
        let RunContext {
            settings,
            producer,
            plan,
            hooks,
            ..
        } = ctx;

        let mut outcome = RunOutcome::default();
        for epoch in 0..settings.train_epochs {
            let summary = {
                let mut input = producer.train_input()?;
                self.estimator
                    .train(plan.steps_per_epoch, input.as_mut(), hooks)?
            };

            log::info!(
                "Epoch {}/{}: loss = {:.4}, accuracy = {:.4}",
                epoch + 1,
                settings.train_epochs,
                summary.loss,
                summary.accuracy.unwrap_or_default()
            );

            outcome.fit_history.push(FitEpoch {
                epoch,
                loss: summary.loss,
                accuracy: summary.accuracy,
            });
        }

        Ok(outcome)
    }
}
