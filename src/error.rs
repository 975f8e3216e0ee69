use std::{fmt, io};

use data_pipeline::PipelineErr;
use machine_learning::MlErr;

/// The driver's result type.
pub type Result<T> = std::result::Result<T, NcfError>;

/// All errors that can occur while running NCF.
#[derive(Debug)]
pub enum NcfError {
    /// Invalid configuration, caught before anything starts.
    InvalidConfig(String),
    /// The producer's batch counts don't split into whole steps.
    UnevenBatches {
        what: &'static str,
        batches: usize,
        batches_per_step: usize,
    },
    /// An input source ran dry before the requested steps were done.
    InputExhausted { step: usize, steps: usize },
    Pipeline(PipelineErr),
    Model(MlErr),
    Json(serde_json::Error),
    Io(io::Error),
}

impl fmt::Display for NcfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            Self::UnevenBatches {
                what,
                batches,
                batches_per_step,
            } => write!(
                f,
                "{batches} {what} batches per epoch can't be split in steps of {batches_per_step}"
            ),
            Self::InputExhausted { step, steps } => {
                write!(f, "input exhausted at step {step} of {steps}")
            }
            Self::Pipeline(e) => write!(f, "data pipeline error: {e}"),
            Self::Model(e) => write!(f, "model error: {e}"),
            Self::Json(e) => write!(f, "json error: {e}"),
            Self::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl std::error::Error for NcfError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Pipeline(e) => Some(e),
            Self::Model(e) => Some(e),
            Self::Json(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<PipelineErr> for NcfError {
    fn from(e: PipelineErr) -> Self {
        Self::Pipeline(e)
    }
}

impl From<MlErr> for NcfError {
    fn from(e: MlErr) -> Self {
        Self::Model(e)
    }
}

impl From<serde_json::Error> for NcfError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

impl From<io::Error> for NcfError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}
