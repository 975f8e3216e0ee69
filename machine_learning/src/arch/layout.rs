use std::ops::Range;

use ndarray::{ArrayView2, ArrayViewMut2};

use crate::{MlErr, Result};

/// A named, two dimensional tensor living inside a flat parameter buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub name: String,
    pub shape: (usize, usize),
    pub range: Range<usize>,
}

/// Maps a flat parameter buffer into named tensors.
///
/// Blocks are laid out back to back in insertion order, so the same layout
/// describes both the parameters and the gradient buffer of a model.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParameterLayout {
    blocks: Vec<Block>,
    len: usize,
}

impl ParameterLayout {
    /// Creates an empty `ParameterLayout`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a new block at the end of the layout.
    ///
    /// # Arguments
    /// * `name` - The name the block is checkpointed under.
    /// * `shape` - The `(rows, cols)` shape of the block.
    ///
    /// # Returns
    /// The id of the new block.
    pub fn push<S: Into<String>>(&mut self, name: S, shape: (usize, usize)) -> usize {
        let size = shape.0 * shape.1;
        let range = self.len..self.len + size;
        self.len += size;

        self.blocks.push(Block {
            name: name.into(),
            shape,
            range,
        });

        self.blocks.len() - 1
    }

    /// The total amount of parameters described by this layout.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn block(&self, id: usize) -> &Block {
        &self.blocks[id]
    }

    /// Interprets a block of the flat buffer as a matrix.
    ///
    /// # Returns
    /// A `SizeMismatch` error if the buffer is shorter than the layout.
    pub fn view<'a>(&self, id: usize, buf: &'a [f32]) -> Result<ArrayView2<'a, f32>> {
        let (shape, range) = self.locate(id, buf.len())?;
        Ok(ArrayView2::from_shape(shape, &buf[range])?)
    }

    /// Interprets a block of the flat buffer as a mutable matrix.
    pub fn view_mut<'a>(&self, id: usize, buf: &'a mut [f32]) -> Result<ArrayViewMut2<'a, f32>> {
        let (shape, range) = self.locate(id, buf.len())?;
        Ok(ArrayViewMut2::from_shape(shape, &mut buf[range])?)
    }

    fn locate(&self, id: usize, buf_len: usize) -> Result<((usize, usize), Range<usize>)> {
        let Block { shape, range, .. } = self.blocks.get(id).ok_or(MlErr::IndexOutOfRange {
            what: "parameter block",
            index: id,
            len: self.blocks.len(),
        })?;

        if range.end > buf_len {
            return Err(MlErr::SizeMismatch {
                what: "parameter buffer",
                got: buf_len,
                expected: self.len,
            });
        }

        Ok((*shape, range.clone()))
    }
}
