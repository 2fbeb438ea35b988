use mzalign::{
    CorrespondenceTable,
    FeatureMatcher,
    HdpConfig,
    Sample,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::errors::Result;
use crate::identity::IdentityLookup;
use crate::model::HdpMassRtClustering;

/// Matches features with the joint model instead of a pairwise join.
pub struct HdpMatcher {
    config: HdpConfig,
    results_path: Option<PathBuf>,
    lookup: Option<Arc<dyn IdentityLookup>>,
    last_run: Option<HdpMassRtClustering>,
}

impl HdpMatcher {
    pub fn new(config: HdpConfig) -> Self {
        Self {
            config,
            results_path: None,
            lookup: None,
            last_run: None,
        }
    }

    pub fn with_results_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.results_path = Some(path.into());
        self
    }

    pub fn with_identity_lookup(mut self, lookup: Arc<dyn IdentityLookup>) -> Self {
        self.lookup = Some(lookup);
        self
    }

    /// The model of the latest call, kept for its draws and annotations.
    pub fn last_run(&self) -> Option<&HdpMassRtClustering> {
        self.last_run.as_ref()
    }
}

impl FeatureMatcher for HdpMatcher {
    fn name(&self) -> &'static str {
        "hdp"
    }

    fn match_features(&mut self, samples: &[Sample]) -> Result<Option<CorrespondenceTable>> {
        if samples.iter().all(|s| s.is_empty()) {
            return Ok(None);
        }
        let mut model = HdpMassRtClustering::new(samples, &self.config)?;
        if let Some(path) = self.results_path.as_ref() {
            model = model.with_results_path(path.clone());
        }
        if let Some(lookup) = self.lookup.clone() {
            model = model.with_identity_lookup(lookup);
        }
        model.run_clustering()?;

        let mut table = CorrespondenceTable::new(self.name(), model.rows());
        table.mark_aligned();
        info!(
            "Joint model produced {} rows, {} aligned",
            table.len(),
            table.aligned_rows().len()
        );
        self.last_run = Some(model);
        Ok(Some(table))
    }
}
