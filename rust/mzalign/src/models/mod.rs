pub mod feature;
pub mod sample;

pub use feature::{
    Feature,
    FeatureGroup,
    FeatureInput,
    FeatureKey,
};
pub use sample::Sample;
