pub mod activations;
pub mod layers;
mod layout;
pub mod loss;
mod model;
mod neumf;

pub use layout::{Block, ParameterLayout};
pub use model::Model;
pub use neumf::{NeuMf, NeuMfConfig, NeuMfCache};
