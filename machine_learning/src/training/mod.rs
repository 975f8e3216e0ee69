mod batch;
mod model_trainer;

pub use batch::BatchRef;
pub use model_trainer::{ModelTrainer, StepStats};
