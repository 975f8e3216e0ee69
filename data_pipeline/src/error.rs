use std::{error::Error, fmt, io, path::PathBuf};

/// The data pipeline's result type.
pub type Result<T> = std::result::Result<T, PipelineErr>;

/// Data pipeline failures.
#[derive(Debug)]
pub enum PipelineErr {
    Io(io::Error),
    UnknownDataset(String),
    MissingDataset {
        path: PathBuf,
        url: Option<&'static str>,
    },
    Parse {
        path: PathBuf,
        line: usize,
        detail: String,
    },
    EmptyDataset,
    SaturatedUser {
        user: usize,
        positives: usize,
    },
    Cache(String),
    InvalidConfig(String),
    NotStarted,
    AlreadyStarted,
    WorkerPanicked,
}

impl fmt::Display for PipelineErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineErr::Io(e) => write!(f, "io error: {e}"),
            PipelineErr::UnknownDataset(name) => {
                write!(f, "unknown dataset {name}, expected one of ml-1m, ml-20m")
            }
            PipelineErr::MissingDataset {
                path,
                url: Some(url),
            } => write!(
                f,
                "{} is missing, download and extract {url} into the data dir",
                path.display()
            ),
            PipelineErr::MissingDataset { path, url: None } => write!(
                f,
                "{} is missing, pass --download_if_missing to see where to get it",
                path.display()
            ),
            PipelineErr::Parse { path, line, detail } => {
                write!(f, "malformed rating at {}:{line}: {detail}", path.display())
            }
            PipelineErr::EmptyDataset => {
                write!(f, "no user has enough ratings to build the dataset")
            }
            PipelineErr::SaturatedUser { user, positives } => write!(
                f,
                "user {user} rated every item ({positives}), no negatives can be sampled"
            ),
            PipelineErr::Cache(detail) => write!(f, "preprocessing cache error: {detail}"),
            PipelineErr::InvalidConfig(detail) => write!(f, "invalid pipeline config: {detail}"),
            PipelineErr::NotStarted => write!(f, "the producer was used before being started"),
            PipelineErr::AlreadyStarted => write!(f, "the producer was already started"),
            PipelineErr::WorkerPanicked => write!(f, "the producer worker panicked"),
        }
    }
}

impl Error for PipelineErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            PipelineErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for PipelineErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}
