use ndarray::{Array2, ArrayView2, Axis};

use crate::{MlErr, Result, arch::ParameterLayout};

/// A lookup table mapping ids to dense vectors.
#[derive(Clone, Debug)]
pub struct Embedding {
    block: usize,
    vocab: usize,
    dim: usize,
}

impl Embedding {
    /// Creates a new `Embedding` and registers its table in the layout.
    ///
    /// # Arguments
    /// * `layout` - The layout the table is pushed to.
    /// * `name` - The name of the table block.
    /// * `vocab` - The amount of rows, one per id.
    /// * `dim` - The size of each embedding vector.
    pub fn new(layout: &mut ParameterLayout, name: &str, vocab: usize, dim: usize) -> Self {
        let block = layout.push(name, (vocab, dim));
        Self { block, vocab, dim }
    }

    pub fn block(&self) -> usize {
        self.block
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Gathers the rows of the given ids.
    ///
    /// # Returns
    /// A `(ids.len(), dim)` matrix or an error if any id is out of range.
    pub fn gather(
        &self,
        layout: &ParameterLayout,
        params: &[f32],
        ids: &[u32],
    ) -> Result<Array2<f32>> {
        let mut rows = Vec::with_capacity(ids.len());

        for &id in ids {
            let id = id as usize;
            if id >= self.vocab {
                return Err(MlErr::IndexOutOfRange {
                    what: "embedding",
                    index: id,
                    len: self.vocab,
                });
            }

            rows.push(id);
        }

        let table = layout.view(self.block, params)?;
        Ok(table.select(Axis(0), &rows))
    }

    /// Adds each row of `d` to the gradient row of its id.
    ///
    /// The ids must have been validated by a previous `gather`.
    pub fn scatter_add(
        &self,
        layout: &ParameterLayout,
        grad: &mut [f32],
        ids: &[u32],
        d: ArrayView2<f32>,
    ) -> Result<()> {
        let mut table = layout.view_mut(self.block, grad)?;

        for (row, &id) in d.rows().into_iter().zip(ids) {
            table.row_mut(id as usize).scaled_add(1.0, &row);
        }

        Ok(())
    }
}
