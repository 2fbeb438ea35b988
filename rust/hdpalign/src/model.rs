use mzalign::{
    AlignmentRow,
    HdpConfig,
    Sample,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{
    info,
    warn,
};

use crate::draws::{
    DrawFingerprint,
    HdpSampleHandler,
    HdpSingleSample,
};
use crate::errors::Result;
use crate::identity::IdentityLookup;
use crate::processor::HdpSampleProcessor;
use crate::results::HdpAlignmentResults;
use crate::sampler::HdpSampler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusteringState {
    Initialized,
    /// Draws are available, either sampled or loaded.
    Sampled,
    /// Draws were reduced into results and annotations.
    Reduced,
}

/// Runs the joint model over a set of samples and reduces its draws.
///
/// With a results path, draws stored there by an earlier run are replayed
/// instead of sampling again, and fresh draws are written to it. Stored
/// draws are only replayed when their fingerprint matches the current
/// samples and chain settings; otherwise the chain is run again and the
/// file overwritten.
pub struct HdpMassRtClustering {
    samples: Vec<Sample>,
    config: HdpConfig,
    results_path: Option<PathBuf>,
    lookup: Option<Arc<dyn IdentityLookup>>,
    handler: HdpSampleHandler,
    processor: HdpSampleProcessor,
    state: ClusteringState,
}

impl HdpMassRtClustering {
    pub fn new(samples: &[Sample], config: &HdpConfig) -> Result<Self> {
        config.validate_for(samples.len())?;
        let processor =
            HdpSampleProcessor::new(samples, config.mass_tol_ppm, config.ionisation_mode)?;
        Ok(Self {
            samples: samples.to_vec(),
            config: config.clone(),
            results_path: None,
            lookup: None,
            handler: HdpSampleHandler::new(),
            processor,
            state: ClusteringState::Initialized,
        })
    }

    pub fn with_results_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.results_path = Some(path.into());
        self
    }

    pub fn with_identity_lookup(mut self, lookup: Arc<dyn IdentityLookup>) -> Self {
        self.lookup = Some(lookup);
        self
    }

    pub fn state(&self) -> ClusteringState {
        self.state
    }

    pub fn run_clustering(&mut self) -> Result<()> {
        let fingerprint = DrawFingerprint::new(&self.samples, &self.config);
        let loaded = match self.results_path.as_deref() {
            Some(path) => HdpSampleHandler::load(path)?,
            None => None,
        };
        let replayable = loaded.filter(|handler| {
            match handler.check_replayable(&fingerprint, &self.samples) {
                Ok(()) => true,
                Err(reason) => {
                    warn!("Ignoring stored draws ({}), sampling again", reason);
                    false
                }
            }
        });
        match replayable {
            Some(handler) => {
                info!("Replaying {} stored posterior draws", handler.len());
                self.handler = handler;
            }
            None => {
                let mut sampler = HdpSampler::new(&self.samples, &self.config)?;
                let mut handler = HdpSampleHandler::with_fingerprint(fingerprint);
                sampler.run(&mut handler)?;
                if let Some(path) = self.results_path.as_deref() {
                    handler.persist(path)?;
                }
                self.handler = handler;
            }
        }
        self.state = ClusteringState::Sampled;

        let mut processor = HdpSampleProcessor::new(
            &self.samples,
            self.config.mass_tol_ppm,
            self.config.ionisation_mode,
        )?;
        if let Some(lookup) = self.lookup.clone() {
            processor = processor.with_identity_lookup(lookup);
        }
        processor.process(self.handler.draws());
        self.processor = processor;
        self.state = ClusteringState::Reduced;
        Ok(())
    }

    pub fn samples_taken(&self) -> usize {
        self.processor.samples_taken()
    }

    pub fn last_sample(&self) -> Option<&HdpSingleSample> {
        self.processor.last_sample()
    }

    pub fn draws(&self) -> &HdpSampleHandler {
        &self.handler
    }

    pub fn alignment_results(&self) -> &HdpAlignmentResults {
        self.processor.results()
    }

    pub fn processor(&self) -> &HdpSampleProcessor {
        &self.processor
    }

    /// Rows at the configured posterior threshold.
    pub fn rows(&self) -> Vec<AlignmentRow> {
        self.alignment_results()
            .rows(&self.samples, self.config.posterior_threshold)
    }
}
