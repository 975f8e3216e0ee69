use machine_learning::arch::loss::SigmoidCrossEntropy;

use super::{Estimator, NeuMfEstimator};
use crate::{configs::Settings, error::Result};

/// The estimators a run trains and evaluates with.
pub enum EstimatorPair {
    /// A single estimator does both.
    Shared(Box<dyn Estimator>),
    /// Distinct estimators sharing their state through the model dir.
    Split {
        train: Box<dyn Estimator>,
        eval: Box<dyn Estimator>,
    },
}

impl EstimatorPair {
    pub fn train_estimator(&mut self) -> &mut dyn Estimator {
        match self {
            Self::Shared(estimator) => estimator.as_mut(),
            Self::Split { train, .. } => train.as_mut(),
        }
    }

    pub fn eval_estimator(&mut self) -> &mut dyn Estimator {
        match self {
            Self::Shared(estimator) => estimator.as_mut(),
            Self::Split { eval, .. } => eval.as_mut(),
        }
    }

    pub fn is_shared(&self) -> bool {
        matches!(self, Self::Shared(_))
    }
}

/// Builds the estimators for the accelerator the settings ask for.
pub fn construct_estimator(
    settings: &Settings,
    num_users: usize,
    num_items: usize,
) -> Result<EstimatorPair> {
    if settings.use_tpu {
        log::info!(
            tpu = settings.tpu.as_deref().unwrap_or_default(),
            zone = settings.tpu_zone.as_deref().unwrap_or_default(),
            project = settings.tpu_gcp_project.as_deref().unwrap_or_default();
            "building separate train and eval estimators"
        );

        let train = NeuMfEstimator::new(settings, num_users, num_items, SigmoidCrossEntropy)?;
        let eval = NeuMfEstimator::new(settings, num_users, num_items, SigmoidCrossEntropy)?
            .reload_before_eval(true);

        return Ok(EstimatorPair::Split {
            train: Box::new(train),
            eval: Box::new(eval),
        });
    }

    if settings.use_xla_for_gpu {
        log::info!("Using XLA for GPU for training and evaluation.");
    }

    let estimator = NeuMfEstimator::new(settings, num_users, num_items, SigmoidCrossEntropy)?;
    log::info!(
        replicas = settings.batches_per_step;
        "built estimator over {} parameters",
        estimator.params().len()
    );

    Ok(EstimatorPair::Shared(Box::new(estimator)))
}
