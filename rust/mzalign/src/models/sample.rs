use serde::{
    Deserialize,
    Serialize,
};
use std::collections::BTreeMap;

use super::feature::{
    Feature,
    FeatureGroup,
    FeatureInput,
};
use crate::coclustering::CoClusteringMatrix;
use crate::errors::{
    AlignmentError,
    DataProcessingError,
    Result,
    Stage,
};
use crate::tolerance::Tolerance;

/// One LC-MS run and the features detected in it.
///
/// Features keep their load order (their `id` is the position), a second
/// index sorted by mass backs the range queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sample {
    pub id: usize,
    pub name: String,
    features: Vec<Feature>,
    by_mass: Vec<usize>,
    coclustering: Option<CoClusteringMatrix>,
}

impl Sample {
    pub fn new(id: usize, name: impl Into<String>, inputs: &[FeatureInput]) -> Result<Self> {
        let name = name.into();
        let mut features = Vec::with_capacity(inputs.len());
        for (i, input) in inputs.iter().enumerate() {
            if !(input.mass.is_finite() && input.mass > 0.0 && input.rt.is_finite()) {
                return Err(AlignmentError::DataProcessing {
                    stage: Stage::Io,
                    error: DataProcessingError::ExpectedFiniteNonNanData {
                        context: format!("feature {} of sample '{}'", i, name),
                    },
                });
            }
            features.push(Feature::new(id, i, input.mass, input.rt, input.intensity));
        }
        let mut by_mass: Vec<usize> = (0..features.len()).collect();
        by_mass.sort_by(|a, b| features[*a].mass.total_cmp(&features[*b].mass));
        Ok(Self {
            id,
            name,
            features,
            by_mass,
            coclustering: None,
        })
    }

    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    pub fn feature(&self, feature_id: usize) -> Option<&Feature> {
        self.features.get(feature_id)
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Features ordered by ascending mass.
    pub fn features_by_mass(&self) -> impl Iterator<Item = &Feature> {
        self.by_mass.iter().map(|&i| &self.features[i])
    }

    /// Features with `lower <= mass <= upper`, in ascending mass order.
    pub fn features_in_mass_range(&self, lower: f64, upper: f64) -> Vec<&Feature> {
        let start = self
            .by_mass
            .partition_point(|&i| self.features[i].mass < lower);
        self.by_mass[start..]
            .iter()
            .map(|&i| &self.features[i])
            .take_while(|f| f.mass <= upper)
            .collect()
    }

    /// Features with `lower <= rt <= upper`, in load order.
    pub fn features_in_rt_range(&self, lower: f64, upper: f64) -> Vec<&Feature> {
        self.features
            .iter()
            .filter(|f| f.rt >= lower && f.rt <= upper)
            .collect()
    }

    /// Features matching both the mass and the retention time windows.
    pub fn features_within(&self, mass: f64, rt: f64, tolerance: &Tolerance) -> Vec<&Feature> {
        let (lower, upper) = tolerance.mass_range(mass);
        self.features_in_mass_range(lower, upper)
            .into_iter()
            .filter(|f| tolerance.within(mass, rt, f.mass, f.rt))
            .collect()
    }

    pub fn coclustering(&self) -> Option<&CoClusteringMatrix> {
        self.coclustering.as_ref()
    }

    pub fn is_grouped(&self) -> bool {
        self.features.iter().all(|f| f.group_id.is_some())
    }

    pub fn clear_groups(&mut self) {
        self.features.iter_mut().for_each(|f| f.group_id = None);
        self.coclustering = None;
    }

    /// Members of a group, in load order.
    pub fn group_members(&self, group_id: u32) -> Vec<&Feature> {
        self.features
            .iter()
            .filter(|f| f.group_id == Some(group_id))
            .collect()
    }

    /// Groups currently assigned to the features of this sample.
    pub fn groups(&self) -> Vec<FeatureGroup> {
        let mut groups: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
        for f in self.features.iter() {
            if let Some(g) = f.group_id {
                groups.entry(g).or_default().push(f.id);
            }
        }
        groups
            .into_iter()
            .map(|(group_id, feature_ids)| FeatureGroup {
                group_id,
                sample_id: self.id,
                feature_ids,
            })
            .collect()
    }

    /// Stores the outcome of a grouping run: one group id per feature and the
    /// co-clustering matrix over all features.
    ///
    /// # Arguments
    ///
    /// * `assignments` - Group id of every feature, in load order
    /// * `matrix` - Pairwise co-clustering over the same features
    ///
    /// # Returns
    ///
    /// The resulting groups, ordered by group id.
    pub fn apply_grouping(
        &mut self,
        assignments: &[u32],
        matrix: CoClusteringMatrix,
    ) -> Result<Vec<FeatureGroup>> {
        if assignments.len() != self.features.len() {
            return Err(AlignmentError::DataProcessing {
                stage: Stage::Grouping,
                error: DataProcessingError::ExpectedSlicesSameLength {
                    expected: self.features.len(),
                    other: assignments.len(),
                    context: format!("group assignments of sample '{}'", self.name),
                },
            });
        }
        if matrix.dim() != self.features.len() {
            return Err(AlignmentError::DataProcessing {
                stage: Stage::Grouping,
                error: DataProcessingError::ExpectedSlicesSameLength {
                    expected: self.features.len(),
                    other: matrix.dim(),
                    context: format!("co-clustering matrix of sample '{}'", self.name),
                },
            });
        }
        for (f, g) in self.features.iter_mut().zip(assignments.iter()) {
            f.group_id = Some(*g);
        }
        self.coclustering = Some(matrix);
        Ok(self.groups())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tolerance::MassTolerance;

    fn inputs() -> Vec<FeatureInput> {
        vec![
            FeatureInput {
                mass: 300.0,
                rt: 10.0,
                intensity: 5.0,
            },
            FeatureInput {
                mass: 100.0,
                rt: 20.0,
                intensity: 1.0,
            },
            FeatureInput {
                mass: 200.0,
                rt: 30.0,
                intensity: 2.0,
            },
            FeatureInput {
                mass: 100.0005,
                rt: 40.0,
                intensity: 3.0,
            },
        ]
    }

    #[test]
    fn test_features_keep_load_order() {
        let sample = Sample::new(3, "s", &inputs()).unwrap();
        let ids: Vec<usize> = sample.features().iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3]);
        assert!(sample.features().iter().all(|f| f.sample_id == 3));
        assert!((sample.features()[1].log_mass - 100f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn test_mass_range_query() {
        let sample = Sample::new(0, "s", &inputs()).unwrap();
        let found: Vec<usize> = sample
            .features_in_mass_range(99.0, 201.0)
            .iter()
            .map(|f| f.id)
            .collect();
        assert_eq!(found, vec![1, 3, 2]);
        assert!(sample.features_in_mass_range(400.0, 500.0).is_empty());
    }

    #[test]
    fn test_rt_range_query() {
        let sample = Sample::new(0, "s", &inputs()).unwrap();
        let found: Vec<usize> = sample
            .features_in_rt_range(15.0, 35.0)
            .iter()
            .map(|f| f.id)
            .collect();
        assert_eq!(found, vec![1, 2]);
    }

    #[test]
    fn test_features_within_both_dimensions() {
        let sample = Sample::new(0, "s", &inputs()).unwrap();
        let tol = Tolerance::new(MassTolerance::Ppm(10.0), 5.0);
        let found: Vec<usize> = sample
            .features_within(100.0, 21.0, &tol)
            .iter()
            .map(|f| f.id)
            .collect();
        assert_eq!(found, vec![1]);
    }

    #[test]
    fn test_rejects_non_finite_mass() {
        let bad = vec![FeatureInput {
            mass: f64::NAN,
            rt: 1.0,
            intensity: 1.0,
        }];
        assert!(Sample::new(0, "bad", &bad).is_err());
    }

    #[test]
    fn test_apply_grouping_length_mismatch() {
        let mut sample = Sample::new(0, "s", &inputs()).unwrap();
        let matrix = CoClusteringMatrix::from_assignments(&[1, 2, 3, 4], 1000);
        assert!(sample.apply_grouping(&[1, 2], matrix).is_err());
        assert!(!sample.is_grouped());
    }
}
