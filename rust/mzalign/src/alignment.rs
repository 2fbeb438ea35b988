//! Match-then-filter alignment pipeline.

use tracing::{
    error,
    info,
};

use crate::errors::{
    AlignmentError,
    Result,
};
use crate::filter::ResultFilter;
use crate::matching::FeatureMatcher;
use crate::models::Sample;
use crate::table::CorrespondenceTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlignmentState {
    Unaligned,
    Matched,
    /// Number of filters applied so far.
    Filtered(usize),
    Done,
}

/// Runs a matching method and then every configured filter in order.
///
/// Rows rejected by a filter are not dropped: each one is replaced by one
/// singleton row per feature, with fresh ids above every existing id. Later
/// filters see the rewritten table. Features therefore never leave the table,
/// they can only lose their alignment.
pub struct Aligner<M: FeatureMatcher> {
    matcher: M,
    filters: Vec<Box<dyn ResultFilter>>,
    state: AlignmentState,
    result: Option<CorrespondenceTable>,
}

impl<M: FeatureMatcher> Aligner<M> {
    pub fn new(matcher: M, filters: Vec<Box<dyn ResultFilter>>) -> Self {
        Self {
            matcher,
            filters,
            state: AlignmentState::Unaligned,
            result: None,
        }
    }

    pub fn state(&self) -> AlignmentState {
        self.state
    }

    /// The cached result of the last successful [`Aligner::align`].
    pub fn result(&self) -> Option<&CorrespondenceTable> {
        self.result.as_ref()
    }

    pub fn matcher(&self) -> &M {
        &self.matcher
    }

    pub fn matcher_mut(&mut self) -> &mut M {
        &mut self.matcher
    }

    pub fn align(&mut self, samples: &[Sample]) -> Result<&CorrespondenceTable> {
        self.state = AlignmentState::Unaligned;
        self.result = None;

        let mut table = match self.matcher.match_features(samples)? {
            Some(table) => table,
            None => {
                error!("Matching method '{}' returned no result", self.matcher.name());
                return Err(AlignmentError::MatchingFailed {
                    method: self.matcher.name().to_string(),
                });
            }
        };
        self.state = AlignmentState::Matched;
        info!(
            "Matched {} features into {} rows using {}",
            table.feature_count(),
            table.len(),
            self.matcher.name()
        );

        for (k, filter) in self.filters.iter().enumerate() {
            table = apply_filter(filter.as_ref(), table);
            self.state = AlignmentState::Filtered(k + 1);
        }

        table.mark_aligned();
        self.state = AlignmentState::Done;
        Ok(self.result.insert(table))
    }
}

/// Applies one filter and explodes its rejected rows.
pub fn apply_filter(filter: &dyn ResultFilter, table: CorrespondenceTable) -> CorrespondenceTable {
    let outcome = filter.process(&table);
    let mut next_id = table.next_row_id();
    let n_rejected = outcome.rejected.len();

    let mut rows = outcome.accepted;
    for row in outcome.rejected.into_iter() {
        let n = row.len();
        rows.extend(row.explode(next_id));
        next_id += n;
    }
    info!(
        "Filter '{}' accepted {} rows and exploded {} rejected rows",
        filter.name(),
        rows.len() - (next_id - table.next_row_id()),
        n_rejected
    );
    CorrespondenceTable::new(table.id, rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterOutcome;
    use crate::models::FeatureInput;
    use crate::table::AlignmentRow;

    struct FixedMatcher {
        table: Option<CorrespondenceTable>,
    }

    impl FeatureMatcher for FixedMatcher {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn match_features(&mut self, _samples: &[Sample]) -> Result<Option<CorrespondenceTable>> {
            Ok(self.table.clone())
        }
    }

    struct RejectMulti;

    impl ResultFilter for RejectMulti {
        fn name(&self) -> &'static str {
            "reject_multi"
        }

        fn process(&self, table: &CorrespondenceTable) -> FilterOutcome {
            let (rejected, accepted) = table.rows().iter().cloned().partition(|r| r.len() > 1);
            FilterOutcome { accepted, rejected }
        }
    }

    fn samples() -> Vec<Sample> {
        (0..3)
            .map(|i| {
                let inputs = vec![
                    FeatureInput {
                        mass: 100.0,
                        rt: 10.0,
                        intensity: 1.0,
                    },
                    FeatureInput {
                        mass: 200.0,
                        rt: 20.0,
                        intensity: 1.0,
                    },
                ];
                Sample::new(i, format!("s{}", i), &inputs).unwrap()
            })
            .collect()
    }

    #[test]
    fn test_no_result_fails_alignment() {
        let mut aligner = Aligner::new(FixedMatcher { table: None }, vec![]);
        let err = aligner.align(&samples()).err().unwrap();
        assert!(matches!(err, AlignmentError::MatchingFailed { .. }));
        assert!(aligner.result().is_none());
        assert_eq!(aligner.state(), AlignmentState::Unaligned);
    }

    #[test]
    fn test_without_filters_matched_table_is_final() {
        let s = samples();
        let table = CorrespondenceTable::singletons("t", &s);
        let mut aligner = Aligner::new(
            FixedMatcher {
                table: Some(table.clone()),
            },
            vec![],
        );
        let out = aligner.align(&s).unwrap().clone();
        assert_eq!(out, table);
        assert_eq!(aligner.state(), AlignmentState::Done);
        assert_eq!(aligner.result(), Some(&out));
    }

    #[test]
    fn test_reject_explosion() {
        let s = samples();
        let rows = vec![
            AlignmentRow::new(
                0,
                vec![s[0].features()[0], s[1].features()[0], s[2].features()[0]],
            ),
            AlignmentRow::new(4, vec![s[0].features()[1]]),
            AlignmentRow::new(2, vec![s[1].features()[1]]),
        ];
        let table = CorrespondenceTable::new("t", rows);
        let before = table.feature_keys();

        let mut aligner = Aligner::new(
            FixedMatcher { table: Some(table) },
            vec![Box::new(RejectMulti)],
        );
        let out = aligner.align(&s).unwrap();
        assert_eq!(out.len(), 5);
        assert!(out.rows().iter().all(|r| r.len() == 1));
        assert!(out.rows().iter().all(|r| r.row_id != 0));
        let mut ids: Vec<usize> = out.rows().iter().map(|r| r.row_id).collect();
        ids.sort();
        assert_eq!(ids, vec![2, 4, 5, 6, 7]);
        assert_eq!(out.feature_keys(), before);
        assert!(out.rows().iter().all(|r| r.features.iter().all(|f| !f.aligned)));
    }

    #[test]
    fn test_filters_run_in_order_on_rewritten_table() {
        let s = samples();
        let rows = vec![AlignmentRow::new(
            0,
            vec![s[0].features()[0], s[1].features()[0]],
        )];
        let mut aligner = Aligner::new(
            FixedMatcher {
                table: Some(CorrespondenceTable::new("t", rows)),
            },
            vec![Box::new(RejectMulti), Box::new(RejectMulti)],
        );
        let out = aligner.align(&s).unwrap();
        let ids: Vec<usize> = out.rows().iter().map(|r| r.row_id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(aligner.state(), AlignmentState::Done);
    }
}
