use rayon::prelude::*;
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::{
    debug,
    info,
    warn,
};

use super::FeatureMatcher;
use crate::coclustering::CoClusteringMatrix;
use crate::errors::Result;
use crate::models::Sample;
use crate::scoring::RowScorer;
use crate::table::{
    AlignmentRow,
    CorrespondenceTable,
};

/// Greedy join alignment.
///
/// Samples are merged one at a time into a growing master list of rows.
/// For each feature of the incoming sample, every master row whose average
/// mass and retention time are within tolerance is a candidate. All
/// (feature, row) candidates are then accepted greedily by descending score,
/// at most one feature per row and one row per feature. Features left over
/// open new rows.
///
/// With [`JoinMatcher::with_groups`] and grouped samples, candidate scores
/// are mixed with the score propagated through the feature groups of both
/// sides (see [`JoinMatcher::propagate_groups`]).
///
/// Rows never hold two features of the same sample.
#[derive(Debug, Clone)]
pub struct JoinMatcher {
    scorer: RowScorer,
    group_alpha: Option<f64>,
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    feature_id: usize,
    row_idx: usize,
    row_id: usize,
    score: f64,
}

fn compare(a: &Candidate, b: &Candidate) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.row_id.cmp(&b.row_id))
        .then_with(|| a.feature_id.cmp(&b.feature_id))
}

/// Mean co-clustering of the features two rows share a sample on.
///
/// Rows without a common sample get 0.
fn row_coclustering(
    a: &AlignmentRow,
    b: &AlignmentRow,
    matrices: &HashMap<usize, &CoClusteringMatrix>,
) -> f64 {
    let mut total = 0.0;
    let mut count = 0usize;
    for fa in a.features.iter() {
        for fb in b.features.iter().filter(|f| f.sample_id == fa.sample_id) {
            total += if fa.id == fb.id {
                1.0
            } else {
                matrices
                    .get(&fa.sample_id)
                    .map_or(0.0, |m| m.get(fa.id, fb.id))
            };
            count += 1;
        }
    }
    if count == 0 {
        0.0
    } else {
        total / count as f64
    }
}

impl JoinMatcher {
    pub fn new(scorer: RowScorer) -> Self {
        Self {
            scorer,
            group_alpha: None,
        }
    }

    /// Mixes in group-propagated scores, `group_alpha` being the weight of
    /// the plain score.
    pub fn with_groups(mut self, group_alpha: f64) -> Self {
        self.group_alpha = Some(group_alpha);
        self
    }

    fn candidates(&self, sample: &Sample, master: &[AlignmentRow]) -> Vec<Candidate> {
        let tolerance = &self.scorer.tolerance;
        let summaries: Vec<(f64, f64)> = master.iter().map(|r| (r.avg_mass(), r.avg_rt())).collect();
        let mut by_mass: Vec<usize> = (0..master.len()).collect();
        by_mass.sort_by(|a, b| summaries[*a].0.total_cmp(&summaries[*b].0));

        sample
            .features()
            .par_iter()
            .flat_map_iter(|feature| {
                let single = AlignmentRow::new(usize::MAX, vec![*feature]);
                let (lower, upper) = tolerance.mass_range(feature.mass);
                let start = by_mass.partition_point(|&i| summaries[i].0 < lower);
                by_mass[start..]
                    .iter()
                    .take_while(|&&i| summaries[i].0 <= upper)
                    .filter(|&&i| {
                        let (mass, rt) = summaries[i];
                        !master[i].contains_sample(sample.id)
                            && tolerance.within(mass, rt, feature.mass, feature.rt)
                    })
                    .map(|&row_idx| Candidate {
                        feature_id: feature.id,
                        row_idx,
                        row_id: master[row_idx].row_id,
                        score: self.scorer.weighted_score(&master[row_idx], &single),
                    })
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Replaces every candidate score `W[r][f]` by
    /// `group_alpha * W[r][f] + (1 - group_alpha) * D[r][f]`.
    ///
    /// `D[r][f]` sums `A[r][r2] * W[r2][f2] * B[f2][f]` over the other
    /// candidates, `A` being the co-clustering between master rows and `B`
    /// the one within the incoming sample, both with a zero diagonal. `W` and
    /// `D` are each scaled to a maximum of 1 first. Only candidates get a
    /// score, so `D` is masked by `W > 0`.
    fn propagate_groups(
        group_alpha: f64,
        incoming: &CoClusteringMatrix,
        master: &[AlignmentRow],
        matrices: &HashMap<usize, &CoClusteringMatrix>,
        candidates: &mut [Candidate],
    ) {
        let w_max = candidates.iter().map(|c| c.score).fold(0.0, f64::max);
        if w_max <= 0.0 {
            return;
        }

        let mut rows: Vec<usize> = candidates.iter().map(|c| c.row_idx).collect();
        rows.sort_unstable();
        rows.dedup();
        let position: HashMap<usize, usize> = rows.iter().enumerate().map(|(p, r)| (*r, p)).collect();
        let k = rows.len();

        let mut by_row: Vec<Vec<(usize, f64)>> = vec![Vec::new(); k];
        for c in candidates.iter() {
            by_row[position[&c.row_idx]].push((c.feature_id, c.score / w_max));
        }

        let mut affinity = vec![0.0; k * k];
        for i in 0..k {
            for j in (i + 1)..k {
                let a = row_coclustering(&master[rows[i]], &master[rows[j]], matrices);
                affinity[i * k + j] = a;
                affinity[j * k + i] = a;
            }
        }

        let propagated: Vec<f64> = candidates
            .par_iter()
            .map(|c| {
                let i = position[&c.row_idx];
                (0..k)
                    .filter(|&j| affinity[i * k + j] > 0.0)
                    .map(|j| {
                        let spread: f64 = by_row[j]
                            .iter()
                            .filter(|(f2, _)| *f2 != c.feature_id)
                            .map(|(f2, w)| w * incoming.get(*f2, c.feature_id))
                            .sum();
                        affinity[i * k + j] * spread
                    })
                    .sum()
            })
            .collect();

        let d_max = propagated.iter().copied().fold(0.0, f64::max);
        for (c, d) in candidates.iter_mut().zip(propagated.iter()) {
            let d = if d_max > 0.0 { d / d_max } else { 0.0 };
            c.score = group_alpha * c.score / w_max + (1.0 - group_alpha) * d;
        }
    }
}

impl FeatureMatcher for JoinMatcher {
    fn name(&self) -> &'static str {
        "join"
    }

    fn match_features(&mut self, samples: &[Sample]) -> Result<Option<CorrespondenceTable>> {
        let matrices: HashMap<usize, &CoClusteringMatrix> = samples
            .iter()
            .filter_map(|s| s.coclustering().map(|m| (s.id, m)))
            .collect();
        let group_alpha = match self.group_alpha {
            Some(_) if matrices.len() < samples.len() => {
                warn!("Not every sample is grouped, joining on plain scores");
                None
            }
            other => other,
        };

        let mut master: Vec<AlignmentRow> = Vec::new();
        // (sum of accepted scores, number of accepted pairs) per master row
        let mut score_acc: Vec<(f64, usize)> = Vec::new();
        let mut next_row_id = 0usize;

        for sample in samples.iter() {
            let mut candidates = self.candidates(sample, &master);
            if let (Some(alpha), Some(incoming)) = (group_alpha, sample.coclustering()) {
                Self::propagate_groups(alpha, incoming, &master, &matrices, &mut candidates);
            }
            candidates.sort_by(compare);

            let mut feature_mapped = vec![false; sample.len()];
            let mut row_mapped = vec![false; master.len()];
            let mut accepted = 0usize;
            for c in candidates.iter() {
                if feature_mapped[c.feature_id] || row_mapped[c.row_idx] {
                    continue;
                }
                feature_mapped[c.feature_id] = true;
                row_mapped[c.row_idx] = true;
                accepted += 1;
                master[c.row_idx].features.push(sample.features()[c.feature_id]);
                score_acc[c.row_idx].0 += c.score;
                score_acc[c.row_idx].1 += 1;
            }

            let mut opened = 0usize;
            for feature in sample.features().iter() {
                if feature_mapped[feature.id] {
                    continue;
                }
                master.push(AlignmentRow::new(next_row_id, vec![*feature]));
                score_acc.push((0.0, 0));
                next_row_id += 1;
                opened += 1;
            }
            debug!(
                "Joined '{}': {} candidates, {} matched, {} new rows",
                sample.name,
                candidates.len(),
                accepted,
                opened
            );
        }

        for (row, (sum, n)) in master.iter_mut().zip(score_acc.iter()) {
            if *n > 0 {
                row.score = Some(sum / *n as f64);
            }
        }

        let mut table = CorrespondenceTable::new("join", master);
        table.mark_aligned();
        info!(
            "Join alignment produced {} rows ({} aligned) from {} samples",
            table.len(),
            table.aligned_rows().len(),
            samples.len()
        );
        Ok(Some(table))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FeatureInput;
    use crate::tolerance::{
        MassTolerance,
        Tolerance,
    };

    fn sample(id: usize, feats: &[(f64, f64)]) -> Sample {
        let inputs: Vec<FeatureInput> = feats
            .iter()
            .map(|(mass, rt)| FeatureInput {
                mass: *mass,
                rt: *rt,
                intensity: 1.0,
            })
            .collect();
        Sample::new(id, format!("s{}", id), &inputs).unwrap()
    }

    fn matcher(ppm: f64, rt: f64) -> JoinMatcher {
        JoinMatcher::new(RowScorer::new(
            Tolerance::new(MassTolerance::Ppm(ppm), rt),
            0.5,
        ))
    }

    #[test]
    fn test_one_to_one_prefers_best_score() {
        // Both features of s1 are candidates for the single row, the closer one wins.
        let samples = vec![
            sample(0, &[(100.0, 10.0)]),
            sample(1, &[(100.0, 10.8), (100.0, 10.1)]),
        ];
        let table = matcher(10.0, 1.0).match_features(&samples).unwrap().unwrap();
        assert_eq!(table.len(), 2);
        let aligned = table.aligned_rows();
        assert_eq!(aligned.len(), 1);
        assert_eq!(aligned[0].features[1].id, 1);
        assert!(aligned[0].score.is_some());
        assert!(table.unaligned_rows()[0].score.is_none());
    }

    #[test]
    fn test_rows_never_repeat_a_sample() {
        let samples = vec![
            sample(0, &[(100.0, 10.0), (100.0, 10.5)]),
            sample(1, &[(100.0, 10.2)]),
            sample(2, &[(100.0, 10.3), (100.0, 10.4)]),
        ];
        let table = matcher(10.0, 2.0).match_features(&samples).unwrap().unwrap();
        assert!(table.rows().iter().all(|r| r.has_distinct_samples()));
        assert_eq!(table.feature_count(), 5);
    }

    #[test]
    fn test_row_ids_are_unique_and_dense() {
        let samples = vec![
            sample(0, &[(100.0, 10.0), (300.0, 10.0)]),
            sample(1, &[(500.0, 10.0)]),
        ];
        let table = matcher(10.0, 2.0).match_features(&samples).unwrap().unwrap();
        let mut ids: Vec<usize> = table.rows().iter().map(|r| r.row_id).collect();
        ids.sort();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    fn key(sample_id: usize, feature_id: usize) -> crate::models::FeatureKey {
        crate::models::FeatureKey {
            sample_id,
            feature_id,
        }
    }

    #[test]
    fn test_candidates_follow_the_mass_window() {
        // Rows are opened out of mass order, the lookup must still find them.
        let samples = vec![
            sample(0, &[(500.0, 10.0), (100.0, 10.0), (300.0, 10.0)]),
            sample(1, &[(300.001, 10.5), (100.0005, 10.2), (500.0, 11.0), (700.0, 10.0)]),
        ];
        let table = matcher(10.0, 2.0).match_features(&samples).unwrap().unwrap();
        assert_eq!(table.aligned_rows().len(), 3);
        assert!(table.is_aligned(key(0, 0), key(1, 2)));
        assert!(table.is_aligned(key(0, 1), key(1, 1)));
        assert!(table.is_aligned(key(0, 2), key(1, 0)));
        assert_eq!(table.len(), 4);
    }

    #[test]
    fn test_groups_resolve_ambiguous_assignment() {
        use crate::grouping::{
            GreedyGrouping,
            GroupingStrategy,
        };

        // s1 feature 2 is the closest match for the 100 Da row, but feature 0
        // shares a group with feature 1, which matches the row grouped with it.
        let grouped_samples = || {
            let mut samples = vec![
                sample(0, &[(100.0, 10.0), (300.0, 10.5)]),
                sample(1, &[(100.0, 11.0), (300.0, 11.2), (100.0, 9.9)]),
            ];
            let mut grouping = GreedyGrouping::new(0.6, 1000);
            for s in samples.iter_mut() {
                grouping.group(s).unwrap();
            }
            samples
        };
        let samples = grouped_samples();
        assert_eq!(samples[1].coclustering().unwrap().get(0, 1), 1.0);
        assert_eq!(samples[1].coclustering().unwrap().get(0, 2), 0.0);

        let plain = matcher(10.0, 5.0).match_features(&samples).unwrap().unwrap();
        assert!(plain.is_aligned(key(0, 0), key(1, 2)));
        assert!(plain.is_aligned(key(0, 1), key(1, 1)));

        let grouped = matcher(10.0, 5.0)
            .with_groups(0.5)
            .match_features(&grouped_samples())
            .unwrap()
            .unwrap();
        assert!(grouped.is_aligned(key(0, 0), key(1, 0)));
        assert!(grouped.is_aligned(key(0, 1), key(1, 1)));
        assert!(!grouped.is_aligned(key(0, 0), key(1, 2)));
        assert_eq!(grouped.feature_count(), 5);
    }

    #[test]
    fn test_groups_ignored_without_matrices() {
        let samples = vec![
            sample(0, &[(100.0, 10.0), (300.0, 10.5)]),
            sample(1, &[(100.0, 11.0), (300.0, 11.2), (100.0, 9.9)]),
        ];
        let plain = matcher(10.0, 5.0).match_features(&samples).unwrap().unwrap();
        let grouped = matcher(10.0, 5.0)
            .with_groups(0.5)
            .match_features(&samples)
            .unwrap()
            .unwrap();
        assert_eq!(plain.rows(), grouped.rows());
    }
}
