//! Producers of the initial correspondence table.

pub mod external;
pub mod join;

pub use external::CorrespondenceFileMatcher;
pub use join::JoinMatcher;

use crate::errors::Result;
use crate::models::Sample;
use crate::table::CorrespondenceTable;

pub trait FeatureMatcher {
    fn name(&self) -> &'static str;

    /// Builds the initial table. `Ok(None)` means the method could not
    /// produce any result, which fails the whole alignment.
    fn match_features(&mut self, samples: &[Sample]) -> Result<Option<CorrespondenceTable>>;
}

impl<T: FeatureMatcher + ?Sized> FeatureMatcher for Box<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn match_features(&mut self, samples: &[Sample]) -> Result<Option<CorrespondenceTable>> {
        (**self).match_features(samples)
    }
}
