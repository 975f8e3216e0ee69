use ndarray::{Array1, Array2, ArrayView1, Zip};

use super::LossFn;
use crate::arch::activations::sigmoid;

/// Turns single logits `x` into two-class logits `[0, x]`.
///
/// The softmax of `[0, x]` assigns `sigmoid(x)` to the positive class, which lets a
/// single-logit model be trained as a two-class classifier.
pub fn two_class_logits(logits: ArrayView1<f32>) -> Array2<f32> {
    Array2::from_shape_fn((logits.len(), 2), |(i, class)| if class == 1 { logits[i] } else { 0.0 })
}

/// Sparse softmax cross entropy over two-class logits, with accuracy tracking.
#[derive(Debug, Default, Clone, Copy)]
pub struct TwoClassSoftmax;

impl TwoClassSoftmax {
    pub fn new() -> Self {
        Self
    }
}

impl LossFn for TwoClassSoftmax {
    fn loss(&self, logits: ArrayView1<f32>, labels: ArrayView1<f32>, weights: ArrayView1<f32>) -> f32 {
        let total = weights.sum();
        if total <= 0.0 {
            return 0.0;
        }

        let logits = two_class_logits(logits);
        let sum = Zip::from(logits.rows())
            .and(&labels)
            .and(&weights)
            .fold(0.0, |acc, row, &y, &w| {
                let max = row[0].max(row[1]);
                let lse = max + ((row[0] - max).exp() + (row[1] - max).exp()).ln();
                let target = if y > 0.5 { row[1] } else { row[0] };
                acc + w * (lse - target)
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

        // Only the second column depends on the logit, its softmax probability is sigmoid(x).
        Zip::from(&logits)
            .and(&labels)
            .and(&weights)
            .map_collect(|&x, &y, &w| w * (sigmoid(x) - y) / total)
    }

    fn accuracy(
        &self,
        logits: ArrayView1<f32>,
        labels: ArrayView1<f32>,
        weights: ArrayView1<f32>,
    ) -> Option<f32> {
        let total = weights.sum();
        if total <= 0.0 {
            return Some(0.0);
        }

        let logits = two_class_logits(logits);
        let correct = Zip::from(logits.rows())
            .and(&labels)
            .and(&weights)
            .fold(0.0, |acc, row, &y, &w| {
                let predicted = if row[1] > row[0] { 1.0 } else { 0.0 };
                if predicted == y { acc + w } else { acc }
            });

        Some(correct / total)
    }
}
