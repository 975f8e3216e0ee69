pub mod benchmark;
pub mod mlperf;

pub use benchmark::{BenchmarkLogger, RunParams, RunStatus};
pub use mlperf::{MlPerfLogger, Tag};
