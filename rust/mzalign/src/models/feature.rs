use serde::{
    Deserialize,
    Serialize,
};
use std::fmt::Display;

/// Identifies a feature across the whole run: the sample it was detected in
/// and its position inside that sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FeatureKey {
    pub sample_id: usize,
    pub feature_id: usize,
}

impl Display for FeatureKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.sample_id, self.feature_id)
    }
}

/// A detected chromatographic peak.
///
/// Everything but `group_id` and `aligned` is fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub id: usize,
    pub sample_id: usize,
    pub mass: f64,
    pub log_mass: f64,
    pub rt: f64,
    pub intensity: f64,
    pub group_id: Option<u32>,
    pub aligned: bool,
}

impl Feature {
    pub fn new(sample_id: usize, id: usize, mass: f64, rt: f64, intensity: f64) -> Self {
        Self {
            id,
            sample_id,
            mass,
            log_mass: mass.ln(),
            rt,
            intensity,
            group_id: None,
            aligned: false,
        }
    }

    pub fn key(&self) -> FeatureKey {
        FeatureKey {
            sample_id: self.sample_id,
            feature_id: self.id,
        }
    }
}

/// Raw peak values as delivered by a sample loader.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureInput {
    pub mass: f64,
    pub rt: f64,
    #[serde(default)]
    pub intensity: f64,
}

/// Features of one sample that a grouping strategy decided belong together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureGroup {
    pub group_id: u32,
    pub sample_id: usize,
    pub feature_ids: Vec<usize>,
}

impl FeatureGroup {
    pub fn len(&self) -> usize {
        self.feature_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.feature_ids.is_empty()
    }

    pub fn contains(&self, feature_id: usize) -> bool {
        self.feature_ids.contains(&feature_id)
    }
}
