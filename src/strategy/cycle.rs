use data_pipeline::constants::NUM_EVAL_NEGATIVES;
use serde_json::json;

use super::{RunContext, RunOutcome, RunTraining};
use crate::{error::Result, estimator::EstimatorPair, logs::Tag};

/// Whether `value` reached the stopping threshold, if there is one.
pub fn past_stop_threshold(threshold: Option<f32>, value: f32) -> bool {
    threshold.is_some_and(|threshold| value >= threshold)
}

/// Alternates training and evaluation until the cycles run out or the hit rate threshold is
/// reached.
pub struct CycleController {
    estimators: EstimatorPair,
}

impl CycleController {
    pub fn new(estimators: EstimatorPair) -> Self {
        Self { estimators }
    }
}

impl RunTraining for CycleController {
    fn run(&mut self, ctx: RunContext<'_>) -> Result<RunOutcome> {
        let RunContext {
            settings,
            producer,
            plan,
            mlperf,
            benchmark,
            hooks,
        } = ctx;

        let total = plan.total_training_cycle;
        let mut outcome = RunOutcome::default();

        for cycle_index in 0..total {
            log::info!("Starting a training cycle: {}/{total}", cycle_index + 1);
            mlperf.ncf_print(Tag::TrainEpoch, Some(json!(cycle_index)));

            {
                let mut input = producer.train_input()?;
                self.estimators
                    .train_estimator()
                    .train(plan.num_train_steps, input.as_mut(), hooks)?;
            }

            log::info!("Beginning evaluation.");
            mlperf.ncf_print(Tag::EvalStart, Some(json!(cycle_index)));

            let result = {
                let mut input = producer.eval_input()?;
                self.estimators
                    .eval_estimator()
                    .evaluate(plan.num_eval_steps, input.as_mut())?
            };
            log::info!("Evaluation complete.");

            let hr = result.hit_rate;
            mlperf.ncf_print(
                Tag::EvalTarget,
                Some(json!({"epoch": cycle_index, "value": settings.hr_threshold})),
            );
            mlperf.ncf_print(
                Tag::EvalAccuracy,
                Some(json!({"epoch": cycle_index, "value": hr})),
            );
            mlperf.ncf_print(
                Tag::EvalHpNumNeg,
                Some(json!({"epoch": cycle_index, "value": NUM_EVAL_NEGATIVES})),
            );
            mlperf.ncf_print(Tag::EvalStop, Some(json!(cycle_index)));

            benchmark.log_evaluation_result(&result)?;
            log::info!(
                "Iteration {}: HR = {hr:.4}, NDCG = {:.4}, Loss = {:.4}",
                cycle_index + 1,
                result.ndcg,
                result.loss
            );

            outcome.cycles += 1;
            outcome.last_eval = Some(result);

            if past_stop_threshold(settings.hr_threshold, hr) {
                outcome.target_reached = true;
                break;
            }
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds_are_inclusive() {
        assert!(past_stop_threshold(Some(0.5), 0.5));
        assert!(!past_stop_threshold(Some(0.5), 0.49));
        assert!(!past_stop_threshold(None, 1.0));
    }
}
