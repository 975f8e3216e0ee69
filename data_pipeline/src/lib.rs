pub mod batch;
mod config;
pub mod constants;
pub mod error;
pub mod generator;
pub mod movielens;
pub mod preprocessing;
pub mod producer;

pub use batch::Batch;
pub use config::PipelineConfig;
pub use error::{PipelineErr, Result};
pub use movielens::Dataset;
pub use producer::{BatchSource, Producer, instantiate_producer};
