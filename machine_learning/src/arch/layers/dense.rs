use ndarray::{Array2, Axis};

use crate::{
    MlErr, Result,
    arch::{ParameterLayout, activations::ActFn},
};

/// A fully connected layer whose kernel and bias live in a flat parameter buffer.
///
/// The layer itself is stateless, the values needed by the backward pass are returned
/// in a `DenseCache` so several replicas can share the same layer.
#[derive(Clone, Debug)]
pub struct Dense {
    dim: (usize, usize),
    kernel: usize,
    bias: usize,
    act_fn: Option<ActFn>,
}

/// The forward metadata of a `Dense` layer.
#[derive(Debug)]
pub struct DenseCache {
    x: Array2<f32>,
    z: Array2<f32>,
}

impl Dense {
    /// Creates a new `Dense` layer and registers its parameters in the layout.
    ///
    /// # Arguments
    /// * `layout` - The layout the kernel and bias are pushed to.
    /// * `name` - The prefix of the block names.
    /// * `dim` - The `(inputs, outputs)` dimension of the layer.
    /// * `act_fn` - An optional activation function.
    ///
    /// # Returns
    /// A new `Dense` instance.
    pub fn new(
        layout: &mut ParameterLayout,
        name: &str,
        dim: (usize, usize),
        act_fn: Option<ActFn>,
    ) -> Self {
        let kernel = layout.push(format!("{name}/kernel"), dim);
        let bias = layout.push(format!("{name}/bias"), (1, dim.1));

        Self {
            dim,
            kernel,
            bias,
            act_fn,
        }
    }

    pub fn dim(&self) -> (usize, usize) {
        self.dim
    }

    /// The block id of the kernel.
    pub fn kernel(&self) -> usize {
        self.kernel
    }

    /// The block id of the bias.
    pub fn bias(&self) -> usize {
        self.bias
    }

    /// Computes `act_fn(x · W + b)`.
    ///
    /// # Returns
    /// The activations and the cache needed to run the backward pass.
    pub fn forward(
        &self,
        layout: &ParameterLayout,
        params: &[f32],
        x: Array2<f32>,
    ) -> Result<(Array2<f32>, DenseCache)> {
        if x.ncols() != self.dim.0 {
            return Err(MlErr::SizeMismatch {
                what: "dense layer inputs",
                got: x.ncols(),
                expected: self.dim.0,
            });
        }

        let w = layout.view(self.kernel, params)?;
        let b = layout.view(self.bias, params)?;

        let mut z = x.dot(&w);
        z += &b;

        let a = match &self.act_fn {
            Some(act_fn) => z.mapv(|z| act_fn.f(z)),
            None => z.clone(),
        };

        Ok((a, DenseCache { x, z }))
    }

    /// Accumulates this layer's gradient into `grad` and returns the delta of its inputs.
    ///
    /// # Arguments
    /// * `d` - The delta of this layer's outputs.
    pub fn backward(
        &self,
        layout: &ParameterLayout,
        params: &[f32],
        grad: &mut [f32],
        cache: DenseCache,
        mut d: Array2<f32>,
    ) -> Result<Array2<f32>> {
        let DenseCache { x, z } = cache;

        if let Some(act_fn) = &self.act_fn {
            d.zip_mut_with(&z, |d, &z| *d *= act_fn.df(z));
        }

        let dw = x.t().dot(&d);
        layout.view_mut(self.kernel, grad)?.scaled_add(1.0, &dw);

        let db = d.sum_axis(Axis(0));
        layout.view_mut(self.bias, grad)?.row_mut(0).scaled_add(1.0, &db);

        let w = layout.view(self.kernel, params)?;
        Ok(d.dot(&w.t()))
    }
}
