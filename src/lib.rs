//! Neural collaborative filtering on MovieLens: training, evaluation and the logging around
//! them.

pub mod configs;
pub mod error;
pub mod estimator;
pub mod hooks;
pub mod logs;
pub mod run;
pub mod strategy;

pub use configs::{NcfArgs, Settings};
pub use error::{NcfError, Result};
pub use run::{ProducerGuard, run_ncf, run_with};
