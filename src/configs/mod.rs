mod args;
mod settings;

pub use args::{BenchmarkLoggerType, NcfArgs};
pub use settings::{BenchmarkSettings, Settings, per_device_batch_size};
