use ndarray::{Array1, ArrayView1};

/// A loss over a batch of logits with binary labels.
///
/// Every entry carries a weight, padded entries have weight zero and must not contribute
/// neither to the loss nor to its derivative.
pub trait LossFn: Send + Sync {
    /// The weighted mean loss of the batch.
    fn loss(&self, logits: ArrayView1<f32>, labels: ArrayView1<f32>, weights: ArrayView1<f32>)
    -> f32;

    /// The derivative of `loss` with respect to each logit.
    fn loss_prime(
        &self,
        logits: ArrayView1<f32>,
        labels: ArrayView1<f32>,
        weights: ArrayView1<f32>,
    ) -> Array1<f32>;

    /// The weighted accuracy of the batch, for losses that track it.
    fn accuracy(
        &self,
        _logits: ArrayView1<f32>,
        _labels: ArrayView1<f32>,
        _weights: ArrayView1<f32>,
    ) -> Option<f32> {
        None
    }
}
