use super::GroupingStrategy;
use crate::coclustering::CoClusteringMatrix;
use crate::errors::Result;
use crate::models::{
    Feature,
    FeatureGroup,
    Sample,
};
use crate::tolerance::within_tolerance;

/// Greedy one-pass grouping on retention time.
///
/// Features are visited in load order. Each feature that is still ungrouped
/// opens a new group and pulls in every other ungrouped feature within
/// `rt_window` of it. Group ids start at 1.
#[derive(Debug, Clone)]
pub struct GreedyGrouping {
    pub rt_window: f64,
    sparse_threshold: usize,
}

impl GreedyGrouping {
    pub fn new(rt_window: f64, sparse_threshold: usize) -> Self {
        Self {
            rt_window,
            sparse_threshold,
        }
    }
}

/// Shared skeleton of the greedy strategies.
///
/// `admit(seed, candidate)` gets the final say over candidates that already
/// passed the retention time window.
pub(crate) fn greedy_assign<F>(sample: &Sample, rt_window: f64, mut admit: F) -> Vec<u32>
where
    F: FnMut(&Feature, &Feature) -> bool,
{
    let features = sample.features();
    let mut by_rt: Vec<usize> = (0..features.len()).collect();
    by_rt.sort_by(|a, b| features[*a].rt.total_cmp(&features[*b].rt));

    let mut assignments: Vec<Option<u32>> = vec![None; features.len()];
    let mut next_group = 1u32;
    for seed in features.iter() {
        if assignments[seed.id].is_some() {
            continue;
        }
        let group_id = next_group;
        next_group += 1;
        assignments[seed.id] = Some(group_id);

        let start = by_rt.partition_point(|&i| features[i].rt < seed.rt - rt_window - 1e-9);
        for &i in by_rt[start..].iter() {
            let candidate = &features[i];
            if candidate.rt > seed.rt + rt_window + 1e-9 {
                break;
            }
            if assignments[i].is_some() {
                continue;
            }
            if within_tolerance(seed.rt, candidate.rt, rt_window, false) && admit(seed, candidate)
            {
                assignments[i] = Some(group_id);
            }
        }
    }
    assignments.into_iter().map(|g| g.unwrap_or(0)).collect()
}

impl GroupingStrategy for GreedyGrouping {
    fn name(&self) -> &'static str {
        "greedy"
    }

    fn group(&mut self, sample: &mut Sample) -> Result<Vec<FeatureGroup>> {
        let assignments = greedy_assign(sample, self.rt_window, |_, _| true);
        let matrix = CoClusteringMatrix::from_assignments(&assignments, self.sparse_threshold);
        sample.apply_grouping(&assignments, matrix)
    }
}
