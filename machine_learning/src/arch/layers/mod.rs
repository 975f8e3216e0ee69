mod dense;
mod embedding;

pub use dense::{Dense, DenseCache};
pub use embedding::Embedding;
