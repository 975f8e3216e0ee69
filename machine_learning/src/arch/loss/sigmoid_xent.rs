use ndarray::{Array1, ArrayView1, Zip};

use super::LossFn;
use crate::arch::activations::sigmoid;

/// Binary cross entropy computed straight from the logits.
#[derive(Debug, Default, Clone, Copy)]
pub struct SigmoidCrossEntropy;

impl SigmoidCrossEntropy {
    pub fn new() -> Self {
        Self
    }
}

impl LossFn for SigmoidCrossEntropy {
    fn loss(&self, logits: ArrayView1<f32>, labels: ArrayView1<f32>, weights: ArrayView1<f32>) -> f32 {
        let total = weights.sum();
        if total <= 0.0 {
            return 0.0;
        }

        // max(x, 0) - x * y + log(1 + exp(-|x|))
        let sum = Zip::from(&logits)
            .and(&labels)
            .and(&weights)
            .fold(0.0, |acc, &x, &y, &w| {
                acc + w * (x.max(0.0) - x * y + (-x.abs()).exp().ln_1p())
            });

        sum / total
    }

    fn loss_prime(
        &self,
        logits: ArrayView1<f32>,
        labels: ArrayView1<f32>,
        weights: ArrayView1<f32>,
    ) -> Array1<f32> {
        let total = weights.sum();
        if total <= 0.0 {
            return Array1::zeros(logits.len());
        }

        Zip::from(&logits)
            .and(&labels)
            .and(&weights)
            .map_collect(|&x, &y, &w| w * (sigmoid(x) - y) / total)
    }
}
