use itertools::Itertools;
use mzalign::{
    AlignmentRow,
    Feature,
    FeatureKey,
    Sample,
};
use serde::Serialize;
use std::collections::{
    HashMap,
    HashSet,
};

use crate::draws::HdpSingleSample;

/// A set of features that shared a mass cluster, with the fraction of draws
/// in which it appeared.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlignedSet {
    pub features: Vec<FeatureKey>,
    pub probability: f64,
}

/// Frequencies of aligned feature sets over the retained draws.
#[derive(Debug, Clone, Default)]
pub struct HdpAlignmentResults {
    samples_taken: usize,
    sets: HashMap<Vec<FeatureKey>, usize>,
    pairs: HashMap<(FeatureKey, FeatureKey), usize>,
}

fn ordered(a: FeatureKey, b: FeatureKey) -> (FeatureKey, FeatureKey) {
    if a <= b { (a, b) } else { (b, a) }
}

impl HdpAlignmentResults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&mut self, draw: &HdpSingleSample) {
        self.samples_taken += 1;
        for cluster in draw.metabolites.iter().flat_map(|m| m.mass_clusters.iter()) {
            let mut keys = cluster.features.clone();
            keys.sort();
            for (a, b) in keys.iter().tuple_combinations() {
                if a.sample_id != b.sample_id {
                    *self.pairs.entry(ordered(*a, *b)).or_insert(0) += 1;
                }
            }
            *self.sets.entry(keys).or_insert(0) += 1;
        }
    }

    pub fn samples_taken(&self) -> usize {
        self.samples_taken
    }

    fn fraction(&self, count: usize) -> f64 {
        if self.samples_taken == 0 {
            return 0.0;
        }
        count as f64 / self.samples_taken as f64
    }

    pub fn set_probability(&self, features: &[FeatureKey]) -> f64 {
        let mut keys = features.to_vec();
        keys.sort();
        self.fraction(self.sets.get(&keys).copied().unwrap_or(0))
    }

    /// Fraction of draws in which `a` and `b` shared a mass cluster.
    pub fn pair_probability(&self, a: FeatureKey, b: FeatureKey) -> f64 {
        self.fraction(self.pairs.get(&ordered(a, b)).copied().unwrap_or(0))
    }

    /// All sets, most probable first.
    pub fn aligned_sets(&self) -> Vec<AlignedSet> {
        self.sets
            .iter()
            .map(|(keys, count)| AlignedSet {
                features: keys.clone(),
                probability: self.fraction(*count),
            })
            .sorted_by(|a, b| {
                b.probability
                    .total_cmp(&a.probability)
                    .then_with(|| b.features.len().cmp(&a.features.len()))
                    .then_with(|| a.features.cmp(&b.features))
            })
            .collect()
    }

    /// Turns the sets into disjoint rows.
    ///
    /// Sets are taken greedily by decreasing probability while it stays at or
    /// above `threshold`. Only sets spanning two or more distinct samples
    /// qualify, and every feature not covered ends in a singleton row.
    pub fn rows(&self, samples: &[Sample], threshold: f64) -> Vec<AlignmentRow> {
        let features: HashMap<FeatureKey, &Feature> = samples
            .iter()
            .flat_map(|s| s.features().iter())
            .map(|f| (f.key(), f))
            .collect();
        let mut used: HashSet<FeatureKey> = HashSet::new();
        let mut rows = Vec::new();

        for set in self.aligned_sets() {
            if set.probability < threshold {
                break;
            }
            if set.features.len() < 2
                || !set.features.iter().map(|k| k.sample_id).all_unique()
                || set.features.iter().any(|k| used.contains(k))
            {
                continue;
            }
            let Some(members) = set
                .features
                .iter()
                .map(|k| features.get(k).map(|f| **f))
                .collect::<Option<Vec<Feature>>>()
            else {
                continue;
            };
            used.extend(set.features.iter().copied());
            rows.push(AlignmentRow::new(rows.len(), members).with_score(set.probability));
        }

        for f in samples.iter().flat_map(|s| s.features().iter()) {
            if !used.contains(&f.key()) {
                rows.push(AlignmentRow::new(rows.len(), vec![*f]));
            }
        }
        rows
    }
}
