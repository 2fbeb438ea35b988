#![doc = include_str!("../README.md")]

// Re-export main structures
pub use crate::coclustering::CoClusteringMatrix;
pub use crate::config::{
    AlignmentConfig,
    HdpConfig,
    IonisationMode,
};
pub use crate::models::{
    Feature,
    FeatureGroup,
    FeatureInput,
    FeatureKey,
    Sample,
};
pub use crate::table::{
    AlignmentRow,
    CorrespondenceTable,
};
pub use crate::tolerance::{
    MassTolerance,
    Tolerance,
};

// Re-export traits
pub use crate::filter::ResultFilter;
pub use crate::grouping::{
    GroupingBackend,
    GroupingStrategy,
    ProfileSource,
};
pub use crate::matching::FeatureMatcher;
pub use crate::scoring::ReferenceLibrary;

// Declare modules
pub mod alignment;
pub mod coclustering;
pub mod config;
pub mod errors;
pub mod filter;
pub mod graph;
pub mod grouping;
pub mod matching;
pub mod models;
pub mod scoring;
pub mod table;
pub mod tolerance;
pub mod utils;

pub use crate::alignment::{
    Aligner,
    AlignmentState,
};
pub use crate::graph::{
    CorrespondenceGraph,
    GraphEdgeConstructor,
};

// Re-export errors
pub use crate::errors::{
    AlignmentError,
    DataProcessingError,
    Result,
    Stage,
};
