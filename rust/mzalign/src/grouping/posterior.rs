use std::path::PathBuf;
use tracing::{
    error,
    info,
};

use super::backend::{
    GroupingBackend,
    GroupingRequest,
};
use super::saved::persist_grouping;
use super::GroupingStrategy;
use crate::errors::{
    AlignmentError,
    Result,
    Stage,
};
use crate::models::{
    FeatureGroup,
    Sample,
};

/// Probabilistic grouping delegated to a mixture sampler backend.
///
/// The co-clustering matrix holds posterior co-occurrence probabilities
/// instead of 0/1 indicators. A backend failure aborts the run, there is no
/// fallback grouping.
pub struct PosteriorGrouping {
    backend: Box<dyn GroupingBackend>,
    rt_window: f64,
    alpha: f64,
    num_samples: usize,
    burn_in: usize,
    seed: Option<u64>,
    persist_dir: Option<PathBuf>,
    closed: bool,
}

impl PosteriorGrouping {
    pub fn new(
        backend: Box<dyn GroupingBackend>,
        rt_window: f64,
        alpha: f64,
        num_samples: usize,
        burn_in: usize,
        seed: Option<u64>,
    ) -> Self {
        Self {
            backend,
            rt_window,
            alpha,
            num_samples,
            burn_in,
            seed,
            persist_dir: None,
            closed: false,
        }
    }

    /// Writes every computed grouping to `dir` so a saved grouping can reuse it.
    pub fn with_persist_dir(mut self, dir: PathBuf) -> Self {
        self.persist_dir = Some(dir);
        self
    }

    fn request_for(&self, sample: &Sample) -> GroupingRequest {
        let features = sample.features();
        GroupingRequest {
            sample_name: sample.name.clone(),
            masses: features.iter().map(|f| f.mass).collect(),
            rts: features.iter().map(|f| f.rt).collect(),
            intensities: features.iter().map(|f| f.intensity).collect(),
            rt_window: self.rt_window,
            alpha: self.alpha,
            num_samples: self.num_samples,
            burn_in: self.burn_in,
            seed: self.seed.map(|s| s.wrapping_add(sample.id as u64)),
        }
    }
}

impl GroupingStrategy for PosteriorGrouping {
    fn name(&self) -> &'static str {
        "posterior"
    }

    fn group(&mut self, sample: &mut Sample) -> Result<Vec<FeatureGroup>> {
        if self.closed {
            return Err(AlignmentError::backend(
                Stage::Grouping,
                "posterior grouping used after close",
            ));
        }
        let request = self.request_for(sample);
        info!(
            "Running {} backend on '{}' ({} features, {} draws)",
            self.backend.name(),
            sample.name,
            request.len(),
            self.num_samples
        );
        let response = match self.backend.cluster(&request) {
            Ok(x) => x,
            Err(e) => {
                error!("Grouping backend failed on '{}': {}", sample.name, e);
                return Err(e);
            }
        };
        if response.assignments.len() != sample.len() || response.coclustering.dim() != sample.len()
        {
            return Err(AlignmentError::backend(
                Stage::Grouping,
                format!(
                    "backend returned {} assignments and a {}x{} matrix for {} features of '{}'",
                    response.assignments.len(),
                    response.coclustering.dim(),
                    response.coclustering.dim(),
                    sample.len(),
                    sample.name
                ),
            ));
        }
        if let Some(dir) = &self.persist_dir {
            persist_grouping(dir, sample, &response.assignments, &response.coclustering)?;
        }
        sample.apply_grouping(&response.assignments, response.coclustering)
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.backend.close()
    }
}

impl Drop for PosteriorGrouping {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!("Failed to close grouping backend: {}", e);
        }
    }
}
