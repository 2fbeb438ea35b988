#![doc = include_str!("../README.md")]

// Re-export main structures
pub use crate::adducts::{
    AdductTransform,
    AdductTransformComputer,
};
pub use crate::annotation::HdpAnnotation;
pub use crate::draws::{
    DrawFingerprint,
    HdpSampleHandler,
    HdpSingleSample,
};
pub use crate::identity::{
    CachedLookup,
    Compound,
    InMemoryCompoundDb,
};
pub use crate::matcher::HdpMatcher;
pub use crate::model::{
    ClusteringState,
    HdpMassRtClustering,
};
pub use crate::params::HdpParams;
pub use crate::processor::{
    HdpSampleProcessor,
    MetaboliteKey,
};
pub use crate::results::{
    AlignedSet,
    HdpAlignmentResults,
};
pub use crate::sampler::HdpSampler;

// Re-export traits
pub use crate::identity::IdentityLookup;

// Declare modules
pub mod adducts;
pub mod annotation;
pub mod draws;
pub mod errors;
pub mod identity;
pub mod matcher;
pub mod model;
pub mod params;
pub mod processor;
pub mod results;
pub mod sampler;

// Re-export errors
pub use crate::errors::LookupError;
