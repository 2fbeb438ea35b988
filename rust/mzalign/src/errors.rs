use std::fmt::Display;
use std::path::PathBuf;

/// Errors raised while validating or transforming numeric data.
#[derive(Debug)]
pub enum DataProcessingError {
    ExpectedSlicesSameLength {
        expected: usize,
        other: usize,
        context: String,
    },
    ExpectedNonEmptyData {
        context: Option<String>,
    },
    ExpectedFiniteNonNanData {
        context: String,
    },
    ExpectedSquareMatrix {
        rows: usize,
        cols: usize,
        context: String,
    },
    ValueOutOfRange {
        value: f64,
        context: String,
    },
}

impl DataProcessingError {
    pub fn append_to_context(mut self, context: &str) -> Self {
        match &mut self {
            DataProcessingError::ExpectedSlicesSameLength {
                context: owned_context,
                ..
            }
            | DataProcessingError::ExpectedFiniteNonNanData {
                context: owned_context,
            }
            | DataProcessingError::ExpectedSquareMatrix {
                context: owned_context,
                ..
            }
            | DataProcessingError::ValueOutOfRange {
                context: owned_context,
                ..
            } => {
                owned_context.push_str(context);
            }
            DataProcessingError::ExpectedNonEmptyData {
                context: owned_context,
            } => match owned_context {
                Some(x) => x.push_str(context),
                None => *owned_context = Some(context.to_string()),
            },
        }
        self
    }
}

impl Display for DataProcessingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ExpectedSlicesSameLength {
                expected,
                other,
                context,
            } => write!(
                f,
                "expected slices of the same length ({} != {}) in {}",
                expected, other, context
            ),
            Self::ExpectedNonEmptyData { context } => match context {
                Some(x) => write!(f, "expected non-empty data in {}", x),
                None => write!(f, "expected non-empty data"),
            },
            Self::ExpectedFiniteNonNanData { context } => {
                write!(f, "expected finite, non-NaN data in {}", context)
            }
            Self::ExpectedSquareMatrix {
                rows,
                cols,
                context,
            } => write!(
                f,
                "expected a square matrix, got {}x{} in {}",
                rows, cols, context
            ),
            Self::ValueOutOfRange { value, context } => {
                write!(f, "value {} out of range in {}", value, context)
            }
        }
    }
}

/// Stage of the pipeline an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Config,
    Grouping,
    Matching,
    Filtering,
    Scoring,
    Graph,
    Hdp,
    Io,
}

impl Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Config => "config",
            Stage::Grouping => "grouping",
            Stage::Matching => "matching",
            Stage::Filtering => "filtering",
            Stage::Scoring => "scoring",
            Stage::Graph => "graph",
            Stage::Hdp => "hdp",
            Stage::Io => "io",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug)]
pub enum AlignmentError {
    /// Missing or contradictory configuration, raised before any sample is processed.
    Config { msg: String },
    /// An external collaborator (grouping backend, subprocess) failed.
    Backend { stage: Stage, msg: String },
    /// The matching method produced no correspondence table.
    MatchingFailed { method: String },
    DataProcessing {
        stage: Stage,
        error: DataProcessingError,
    },
    Io {
        source: std::io::Error,
        path: Option<PathBuf>,
    },
    Parse { msg: String },
}

impl AlignmentError {
    pub fn config(msg: impl Display) -> Self {
        Self::Config {
            msg: msg.to_string(),
        }
    }

    pub fn backend(stage: Stage, msg: impl Display) -> Self {
        Self::Backend {
            stage,
            msg: msg.to_string(),
        }
    }

    /// The pipeline stage that failed.
    pub fn stage(&self) -> Stage {
        match self {
            Self::Config { .. } => Stage::Config,
            Self::Backend { stage, .. } => *stage,
            Self::MatchingFailed { .. } => Stage::Matching,
            Self::DataProcessing { stage, .. } => *stage,
            Self::Io { .. } | Self::Parse { .. } => Stage::Io,
        }
    }
}

impl Display for AlignmentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config { msg } => write!(f, "Invalid configuration: {}", msg),
            Self::Backend { stage, msg } => {
                write!(f, "External backend failed during {}: {}", stage, msg)
            }
            Self::MatchingFailed { method } => {
                write!(f, "Matching method '{}' produced no result", method)
            }
            Self::DataProcessing { stage, error } => {
                write!(f, "Data processing failed during {}: {}", stage, error)
            }
            Self::Io { source, path } => match path {
                Some(path) => write!(f, "Error reading file {}: {}", path.display(), source),
                None => write!(f, "IO error: {}", source),
            },
            Self::Parse { msg } => write!(f, "Parse error: {}", msg),
        }
    }
}

impl std::error::Error for AlignmentError {}

pub type Result<T> = std::result::Result<T, AlignmentError>;

impl From<std::io::Error> for AlignmentError {
    fn from(x: std::io::Error) -> Self {
        Self::Io {
            source: x,
            path: None,
        }
    }
}

impl From<serde_json::Error> for AlignmentError {
    fn from(val: serde_json::Error) -> Self {
        AlignmentError::Parse {
            msg: val.to_string(),
        }
    }
}

impl From<std::num::ParseIntError> for AlignmentError {
    fn from(x: std::num::ParseIntError) -> Self {
        Self::Parse { msg: x.to_string() }
    }
}

impl From<std::num::ParseFloatError> for AlignmentError {
    fn from(x: std::num::ParseFloatError) -> Self {
        Self::Parse { msg: x.to_string() }
    }
}
