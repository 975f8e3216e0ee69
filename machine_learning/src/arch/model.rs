use ndarray::{Array1, ArrayView1};

use super::ParameterLayout;
use crate::Result;

/// A model scoring `(user, item)` pairs with a single logit.
///
/// Models don't own their parameters, they read them from a flat buffer described by their
/// `ParameterLayout` and write gradients into a buffer with the same layout.
pub trait Model: Send + Sync {
    /// The values the forward pass keeps around for the backward pass.
    type Cache: Send;

    /// Returns the layout of the model's parameters.
    fn layout(&self) -> &ParameterLayout;

    /// Returns the amount of parameters in the model.
    fn size(&self) -> usize {
        self.layout().len()
    }

    /// Computes the logits of every `(users[i], items[i])` pair.
    fn forward(
        &self,
        params: &[f32],
        users: &[u32],
        items: &[u32],
    ) -> Result<(Array1<f32>, Self::Cache)>;

    /// Accumulates the gradient of the loss into `grad`.
    ///
    /// # Arguments
    /// * `params` - The parameters used in the forward pass.
    /// * `cache` - The cache returned by the forward pass.
    /// * `d_logits` - The derivative of the loss with respect to each logit.
    /// * `grad` - The gradient buffer, it is **not** zeroed.
    fn backward(
        &self,
        params: &[f32],
        cache: Self::Cache,
        d_logits: ArrayView1<f32>,
        grad: &mut [f32],
    ) -> Result<()>;

    /// Adds the derivative of the model's regularization penalty to `grad`.
    fn regularize(&self, params: &[f32], grad: &mut [f32]) -> Result<()>;

    /// Computes the logits without keeping a cache around.
    fn logits(&self, params: &[f32], users: &[u32], items: &[u32]) -> Result<Array1<f32>> {
        self.forward(params, users, items).map(|(logits, _)| logits)
    }
}
