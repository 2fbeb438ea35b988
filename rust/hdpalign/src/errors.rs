use std::fmt::Display;

pub use mzalign::errors::{
    AlignmentError,
    DataProcessingError,
    Result,
    Stage,
};

/// Failure of a single identity lookup.
///
/// Lookups only feed annotations, so this error never aborts a run: the
/// caller logs it and records an empty result.
#[derive(Debug, Clone, PartialEq)]
pub enum LookupError {
    Unavailable { msg: String },
    InvalidQuery { mass: f64, msg: String },
}

impl Display for LookupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable { msg } => write!(f, "Identity lookup unavailable: {}", msg),
            Self::InvalidQuery { mass, msg } => {
                write!(f, "Invalid identity query for mass {}: {}", mass, msg)
            }
        }
    }
}

impl std::error::Error for LookupError {}

pub(crate) fn hdp_error(error: DataProcessingError) -> AlignmentError {
    AlignmentError::DataProcessing {
        stage: Stage::Hdp,
        error,
    }
}
