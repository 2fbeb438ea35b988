//! Post-hoc filters over a correspondence table.

use serde::{
    Deserialize,
    Serialize,
};

use crate::errors::{
    AlignmentError,
    Result,
};
use crate::table::{
    AlignmentRow,
    CorrespondenceTable,
};

/// Rows a filter kept and rows it rejected.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterOutcome {
    pub accepted: Vec<AlignmentRow>,
    pub rejected: Vec<AlignmentRow>,
}

pub trait ResultFilter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Splits the rows of `table`. Every row must land in exactly one side.
    fn process(&self, table: &CorrespondenceTable) -> FilterOutcome;
}

/// Keeps the best scoring fraction of the aligned rows.
///
/// Aligned rows are ranked by score (missing scores rank last, ties by row
/// id) and the top `floor((1 - threshold) * n)` are accepted. Single-feature
/// rows have nothing to reject and always pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreResultFilter {
    pub threshold: f64,
}

impl ScoreResultFilter {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }
}

impl ResultFilter for ScoreResultFilter {
    fn name(&self) -> &'static str {
        "score"
    }

    fn process(&self, table: &CorrespondenceTable) -> FilterOutcome {
        let (mut aligned, singles): (Vec<AlignmentRow>, Vec<AlignmentRow>) = table
            .rows()
            .iter()
            .cloned()
            .partition(|r| r.is_aligned());
        aligned.sort_by(|a, b| {
            let sa = a.score.unwrap_or(f64::NEG_INFINITY);
            let sb = b.score.unwrap_or(f64::NEG_INFINITY);
            sb.total_cmp(&sa).then_with(|| a.row_id.cmp(&b.row_id))
        });
        let keep = ((1.0 - self.threshold) * aligned.len() as f64).floor() as usize;
        let rejected = aligned.split_off(keep.min(aligned.len()));

        let mut accepted = singles;
        accepted.extend(aligned);
        accepted.sort_by_key(|r| r.row_id);
        FilterOutcome { accepted, rejected }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FilterConfig {
    #[serde(rename = "score")]
    Score { threshold: f64 },
}

pub fn build_filters(configs: &[FilterConfig]) -> Result<Vec<Box<dyn ResultFilter>>> {
    configs
        .iter()
        .map(|c| match c {
            FilterConfig::Score { threshold } => {
                if !(0.0..=1.0).contains(threshold) {
                    return Err(AlignmentError::config(format!(
                        "score filter threshold must be in [0, 1], got {}",
                        threshold
                    )));
                }
                Ok(Box::new(ScoreResultFilter::new(*threshold)) as Box<dyn ResultFilter>)
            }
        })
        .collect()
}
