use std::cmp::Ordering;
use std::sync::Arc;

use crate::table::AlignmentRow;
use crate::tolerance::Tolerance;

/// Keeps the weighted distance away from zero for identical rows.
const MIN_DISTANCE: f64 = 1e-6;

/// Ground-truth knowledge about which rows should align.
///
/// Returning `None` means the library has nothing to say about this pair
/// and the default score is used.
pub trait ReferenceLibrary: Send + Sync {
    fn weight(&self, a: &AlignmentRow, b: &AlignmentRow) -> Option<f64>;
}

/// Scores row-vs-row candidates.
///
/// `alpha` balances the mass (`alpha`) and retention time (`1 - alpha`)
/// contributions of the weighted distance, both deltas measured in units of
/// their tolerance.
#[derive(Clone)]
pub struct RowScorer {
    pub tolerance: Tolerance,
    pub alpha: f64,
    library: Option<Arc<dyn ReferenceLibrary>>,
}

impl std::fmt::Debug for RowScorer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowScorer")
            .field("tolerance", &self.tolerance)
            .field("alpha", &self.alpha)
            .field("library", &self.library.is_some())
            .finish()
    }
}

impl RowScorer {
    pub fn new(tolerance: Tolerance, alpha: f64) -> Self {
        Self {
            tolerance,
            alpha,
            library: None,
        }
    }

    pub fn with_library(mut self, library: Arc<dyn ReferenceLibrary>) -> Self {
        self.library = Some(library);
        self
    }

    /// Euclidean distance between the row averages in (mass, rt) space.
    pub fn distance(&self, a: &AlignmentRow, b: &AlignmentRow) -> f64 {
        let dm = a.avg_mass() - b.avg_mass();
        let drt = a.avg_rt() - b.avg_rt();
        (dm * dm + drt * drt).sqrt()
    }

    /// Distance with both deltas scaled by their tolerance and mixed by `alpha`.
    pub fn weighted_distance(&self, a: &AlignmentRow, b: &AlignmentRow) -> f64 {
        let (ma, mb) = (a.avg_mass(), b.avg_mass());
        let mass_window = self.tolerance.mass.window_at(ma.abs().max(mb.abs()));
        let dm = scaled(ma - mb, mass_window);
        let drt = scaled(a.avg_rt() - b.avg_rt(), self.tolerance.rt);
        (self.alpha * dm * dm + (1.0 - self.alpha) * drt * drt).sqrt()
    }

    /// Higher is better.
    ///
    /// With a reference library that knows the pair, the library weight is
    /// divided by the weighted distance. Otherwise `1 / (1 + d)`.
    pub fn weighted_score(&self, a: &AlignmentRow, b: &AlignmentRow) -> f64 {
        let d = self.weighted_distance(a, b);
        match self.library.as_ref().and_then(|lib| lib.weight(a, b)) {
            Some(weight) => weight / d.max(MIN_DISTANCE),
            None => 1.0 / (1.0 + d),
        }
    }
}

fn scaled(delta: f64, window: f64) -> f64 {
    if window > 0.0 {
        delta / window
    } else if delta == 0.0 {
        0.0
    } else {
        delta.signum() * f64::MAX.sqrt()
    }
}

/// A candidate row and its score against some reference.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredCandidate {
    pub row_id: usize,
    pub score: f64,
}

/// Descending score, ties broken by ascending row id.
pub fn compare_candidates(a: &ScoredCandidate, b: &ScoredCandidate) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.row_id.cmp(&b.row_id))
}

pub fn rank_candidates(candidates: &mut [ScoredCandidate]) {
    candidates.sort_by(compare_candidates);
}
