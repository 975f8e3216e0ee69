use ndarray::ShapeError;
use std::{
    error::Error,
    fmt::{self, Display},
    io,
};

/// The result type used in the entire machine learning module.
pub type Result<T> = std::result::Result<T, MlErr>;

/// The machine learning module's error type.
#[derive(Debug)]
pub enum MlErr {
    SizeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    IndexOutOfRange {
        what: &'static str,
        index: usize,
        len: usize,
    },
    InvalidArch(String),
    InvalidDistribution(String),
    EmptyBatch,
    Shape(ShapeError),
    Checkpoint(String),
    Io(io::Error),
}

impl Display for MlErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MlErr::SizeMismatch {
                what,
                got,
                expected,
            } => format!("There's a size mismatch in {what}, got {got} and expected {expected}"),
            MlErr::IndexOutOfRange { what, index, len } => {
                format!("The {what} index {index} is out of range, there are only {len}")
            }
            MlErr::InvalidArch(detail) => format!("Invalid model architecture: {detail}"),
            MlErr::InvalidDistribution(detail) => {
                format!("Failed to build the weight distribution: {detail}")
            }
            MlErr::Shape(e) => format!("Shape error: {e}"),
            MlErr::EmptyBatch => "Tried to run a step without any batch".to_string(),
            MlErr::Checkpoint(detail) => format!("Checkpoint error: {detail}"),
            MlErr::Io(e) => format!("io error: {e}"),
        };

        write!(f, "{s}")
    }
}

impl Error for MlErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            MlErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for MlErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<ShapeError> for MlErr {
    fn from(value: ShapeError) -> Self {
        Self::Shape(value)
    }
}

impl From<rand_distr::NormalError> for MlErr {
    fn from(value: rand_distr::NormalError) -> Self {
        Self::InvalidDistribution(value.to_string())
    }
}

impl From<rand_distr::uniform::Error> for MlErr {
    fn from(value: rand_distr::uniform::Error) -> Self {
        Self::InvalidDistribution(value.to_string())
    }
}
