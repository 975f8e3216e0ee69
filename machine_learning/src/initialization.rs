use rand::Rng;
use rand_distr::{Distribution, Normal, Uniform};

use crate::Result;

/// The ways a block of parameters can be initialized.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Initializer {
    Zeros,
    Normal { mean: f32, std_dev: f32 },
    /// Uniform in `±sqrt(6 / (fan_in + fan_out))`.
    GlorotUniform { fan_in: usize, fan_out: usize },
    /// Uniform in `±sqrt(3 / fan_in)`.
    LecunUniform { fan_in: usize },
}

impl Initializer {
    /// Fills `out` with values drawn from this initializer.
    ///
    /// # Returns
    /// An error if the underlying distribution can't be built.
    pub fn fill<R: Rng + ?Sized>(&self, rng: &mut R, out: &mut [f32]) -> Result<()> {
        match *self {
            Initializer::Zeros => out.fill(0.0),
            Initializer::Normal { mean, std_dev } => {
                sample_into(rng, Normal::new(mean, std_dev)?, out)
            }
            Initializer::GlorotUniform { fan_in, fan_out } => {
                let range = (6. / (fan_in + fan_out) as f32).sqrt();
                sample_into(rng, Uniform::new(-range, range)?, out)
            }
            Initializer::LecunUniform { fan_in } => {
                let range = (3. / fan_in as f32).sqrt();
                sample_into(rng, Uniform::new(-range, range)?, out)
            }
        }

        Ok(())
    }
}

fn sample_into<R, D>(rng: &mut R, distribution: D, out: &mut [f32])
where
    R: Rng + ?Sized,
    D: Distribution<f32>,
{
    out.iter_mut().for_each(|x| *x = distribution.sample(rng));
}
