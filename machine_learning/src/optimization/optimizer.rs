use crate::Result;

pub trait Optimizer: Send {
    /// Updates `params` following the gradient `grad`.
    ///
    /// # Returns
    /// A `SizeMismatch` error if the buffers don't have the expected length.
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()>;
}
