use super::Optimizer;
use crate::{MlErr, Result};

#[derive(Debug, Clone)]
pub struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    beta1_t: f32,
    beta2_t: f32,
    v: Box<[f32]>,
    s: Box<[f32]>,
    epsilon: f32,
}

impl Adam {
    /// Creates a new `Adam` optimizer.
    ///
    /// # Arguments
    /// * `len` - The amount of parameters this instance should hold.
    /// * `learning_rate` - The small coefficient that modulates the amount of training per update.
    /// * `beta1`, `beta2`, `epsilon` - Hyperparameters to the optimization algorithm.
    ///
    /// # Returns
    /// A new `Adam` instance.
    pub fn new(len: usize, learning_rate: f32, beta1: f32, beta2: f32, epsilon: f32) -> Self {
        Self {
            learning_rate,
            beta1,
            beta2,
            beta1_t: 1.,
            beta2_t: 1.,
            v: vec![0.; len].into_boxed_slice(),
            s: vec![0.; len].into_boxed_slice(),
            epsilon,
        }
    }

    /// The first and second moment estimates.
    pub fn moments(&self) -> (&[f32], &[f32]) {
        (&self.v, &self.s)
    }

    /// The accumulated powers of `beta1` and `beta2`.
    pub fn powers(&self) -> (f32, f32) {
        (self.beta1_t, self.beta2_t)
    }

    /// Restores a previously saved state.
    ///
    /// # Returns
    /// A `SizeMismatch` error if the moments don't have the optimizer's length.
    pub fn restore(&mut self, v: Vec<f32>, s: Vec<f32>, powers: (f32, f32)) -> Result<()> {
        for (what, got) in [("adam first moment", v.len()), ("adam second moment", s.len())] {
            if got != self.v.len() {
                return Err(MlErr::SizeMismatch {
                    what,
                    got,
                    expected: self.v.len(),
                });
            }
        }

        self.v = v.into_boxed_slice();
        self.s = s.into_boxed_slice();
        (self.beta1_t, self.beta2_t) = powers;
        Ok(())
    }
}

impl Optimizer for Adam {
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()> {
        for (what, got) in [("gradient", grad.len()), ("parameters", params.len())] {
            if got != self.v.len() {
                return Err(MlErr::SizeMismatch {
                    what,
                    got,
                    expected: self.v.len(),
                });
            }
        }

        let Self {
            learning_rate: lr,
            beta1: b1,
            beta2: b2,
            epsilon: eps,
            ..
        } = *self;

        self.beta1_t *= b1;
        self.beta2_t *= b2;

        let bc1 = 1. - self.beta1_t;
        let bc2 = 1. - self.beta2_t;
        let step_size = lr * (bc2.sqrt() / bc1);

        params
            .iter_mut()
            .zip(grad)
            .zip(self.v.iter_mut())
            .zip(self.s.iter_mut())
            .for_each(|(((p, g), v), s)| {
                *v = b1 * *v + (1. - b1) * g;
                *s = b2 * *s + (1. - b2) * g.powi(2);
                *p -= step_size * *v / (s.sqrt() + eps);
            });

        Ok(())
    }
}
