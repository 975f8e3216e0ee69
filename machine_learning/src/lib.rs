pub mod arch;
pub mod checkpoint;
pub mod error;
pub mod initialization;
pub mod metrics;
pub mod optimization;
pub mod training;

pub use error::{MlErr, Result};
