use serde::{
    Deserialize,
    Serialize,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::GroupingStrategy;
use super::greedy::greedy_assign;
use crate::coclustering::CoClusteringMatrix;
use crate::errors::Result;
use crate::models::{
    FeatureGroup,
    Sample,
};
use crate::utils::correlation::{
    cosine_similarity,
    pearson_correlation,
};

/// Supplies the intensity-vs-scan profile of a feature.
///
/// Profiles of one sample must share the same scan axis so they can be
/// compared element-wise.
pub trait ProfileSource: Send + Sync {
    fn profile(&self, sample: &Sample, feature_id: usize) -> Option<Vec<f64>>;
}

/// Profiles held in memory, keyed by sample name and feature id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InMemoryProfiles {
    profiles: HashMap<String, HashMap<usize, Vec<f64>>>,
}

impl InMemoryProfiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, sample_name: &str, feature_id: usize, profile: Vec<f64>) {
        self.profiles
            .entry(sample_name.to_string())
            .or_default()
            .insert(feature_id, profile);
    }
}

impl ProfileSource for InMemoryProfiles {
    fn profile(&self, sample: &Sample, feature_id: usize) -> Option<Vec<f64>> {
        self.profiles
            .get(&sample.name)
            .and_then(|x| x.get(&feature_id))
            .cloned()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CorrelationMeasure {
    #[default]
    #[serde(rename = "pearson")]
    Pearson,
    #[serde(rename = "cosine")]
    Cosine,
}

/// Greedy grouping that also requires correlated peak shapes.
///
/// A candidate inside the retention time window joins the seed's group only
/// when the correlation of their profiles is at least `min_corr_signal`.
/// Features without a profile end up alone in their group.
pub struct CorrelationGrouping {
    pub rt_window: f64,
    pub min_corr_signal: f64,
    pub measure: CorrelationMeasure,
    profiles: Arc<dyn ProfileSource>,
    sparse_threshold: usize,
}

impl CorrelationGrouping {
    pub fn new(
        rt_window: f64,
        min_corr_signal: f64,
        measure: CorrelationMeasure,
        profiles: Arc<dyn ProfileSource>,
        sparse_threshold: usize,
    ) -> Self {
        Self {
            rt_window,
            min_corr_signal,
            measure,
            profiles,
            sparse_threshold,
        }
    }

    fn correlation(&self, a: &[f64], b: &[f64]) -> Option<f64> {
        let res = match self.measure {
            CorrelationMeasure::Pearson => pearson_correlation(a, b),
            CorrelationMeasure::Cosine => cosine_similarity(a, b),
        };
        match res {
            Ok(x) if x.is_finite() => Some(x),
            Ok(_) => None,
            Err(e) => {
                debug!("Skipping profile comparison: {}", e);
                None
            }
        }
    }
}

impl GroupingStrategy for CorrelationGrouping {
    fn name(&self) -> &'static str {
        "correlation"
    }

    fn group(&mut self, sample: &mut Sample) -> Result<Vec<FeatureGroup>> {
        let profiles: Vec<Option<Vec<f64>>> = (0..sample.len())
            .map(|i| self.profiles.profile(sample, i))
            .collect();
        let missing = profiles.iter().filter(|p| p.is_none()).count();
        if missing > 0 {
            debug!(
                "{} of {} features in '{}' have no profile",
                missing,
                sample.len(),
                sample.name
            );
        }

        let assignments = greedy_assign(sample, self.rt_window, |seed, candidate| {
            match (&profiles[seed.id], &profiles[candidate.id]) {
                (Some(a), Some(b)) => self
                    .correlation(a, b)
                    .is_some_and(|c| c >= self.min_corr_signal),
                _ => false,
            }
        });
        let matrix = CoClusteringMatrix::from_assignments(&assignments, self.sparse_threshold);
        sample.apply_grouping(&assignments, matrix)
    }
}
