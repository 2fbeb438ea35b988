//! Within-sample feature grouping.
//!
//! A grouping strategy partitions the features of one sample into groups
//! (isotopes, adducts, fragments of the same compound) and attaches the
//! resulting co-clustering matrix to the sample.
//!
//! Strategies are selected through [`GroupingMethod`] and built with
//! [`build_grouping`]. Strategies backed by an external process release it in
//! [`GroupingStrategy::close`], [`run_grouping`] calls it on every exit path.

pub mod backend;
pub mod correlation;
pub mod greedy;
pub mod posterior;
pub mod saved;

use serde::{
    Deserialize,
    Serialize,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{
    error,
    info,
};

pub use backend::{
    BackendConfig,
    DpMixtureBackend,
    GroupingBackend,
    GroupingRequest,
    GroupingResponse,
    SubprocessBackend,
};
pub use correlation::{
    CorrelationGrouping,
    CorrelationMeasure,
    InMemoryProfiles,
    ProfileSource,
};
pub use greedy::GreedyGrouping;
pub use posterior::PosteriorGrouping;
pub use saved::{
    SavedGrouping,
    load_grouping,
    persist_grouping,
};

use crate::errors::{
    AlignmentError,
    Result,
};
use crate::models::{
    FeatureGroup,
    Sample,
};

pub trait GroupingStrategy: Send {
    fn name(&self) -> &'static str;

    /// Groups the features of one sample.
    ///
    /// Every feature gets a group id and the sample gets its co-clustering
    /// matrix. Group ids are only unique within the sample.
    fn group(&mut self, sample: &mut Sample) -> Result<Vec<FeatureGroup>>;

    /// Groups every sample in order, concatenating the groups.
    fn group_all(&mut self, samples: &mut [Sample]) -> Result<Vec<FeatureGroup>> {
        let mut out = Vec::new();
        for sample in samples.iter_mut() {
            let groups = self.group(sample)?;
            info!(
                "Grouped {} features of '{}' into {} groups using {}",
                sample.len(),
                sample.name,
                groups.len(),
                self.name()
            );
            out.extend(groups);
        }
        Ok(out)
    }

    /// Releases external resources. Must be safe to call more than once.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Groups all samples and closes the strategy, also when grouping fails.
pub fn run_grouping(
    strategy: &mut dyn GroupingStrategy,
    samples: &mut [Sample],
) -> Result<Vec<FeatureGroup>> {
    let grouped = strategy.group_all(samples);
    let closed = strategy.close();
    match (grouped, closed) {
        (Ok(groups), Ok(())) => Ok(groups),
        (Err(e), closed) => {
            if let Err(close_err) = closed {
                error!(
                    "Failed to release {} after a grouping error: {}",
                    strategy.name(),
                    close_err
                );
            }
            Err(e)
        }
        (Ok(_), Err(e)) => Err(e),
    }
}

fn default_rt_window() -> f64 {
    5.0
}

fn default_min_corr_signal() -> f64 {
    0.9
}

fn default_dp_alpha() -> f64 {
    1.0
}

fn default_num_samples() -> usize {
    200
}

fn default_burn_in() -> usize {
    100
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum GroupingMethod {
    #[serde(rename = "greedy")]
    Greedy {
        #[serde(default = "default_rt_window")]
        rt_window: f64,
    },
    #[serde(rename = "correlation")]
    Correlation {
        #[serde(default = "default_rt_window")]
        rt_window: f64,
        #[serde(default = "default_min_corr_signal")]
        min_corr_signal: f64,
        #[serde(default)]
        measure: CorrelationMeasure,
    },
    #[serde(rename = "posterior")]
    Posterior {
        #[serde(default = "default_rt_window")]
        rt_window: f64,
        #[serde(default = "default_dp_alpha")]
        alpha: f64,
        #[serde(default = "default_num_samples")]
        num_samples: usize,
        #[serde(default = "default_burn_in")]
        burn_in: usize,
        #[serde(default)]
        backend: BackendConfig,
        #[serde(default)]
        timeout_secs: Option<u64>,
        #[serde(default)]
        persist_dir: Option<PathBuf>,
        #[serde(default)]
        seed: Option<u64>,
    },
    #[serde(rename = "saved")]
    Saved { directory: PathBuf },
}

impl Default for GroupingMethod {
    fn default() -> Self {
        GroupingMethod::Greedy {
            rt_window: default_rt_window(),
        }
    }
}

impl GroupingMethod {
    pub fn validate(&self) -> Result<()> {
        let check_window = |w: f64| {
            if w.is_finite() && w >= 0.0 {
                Ok(())
            } else {
                Err(AlignmentError::config(format!(
                    "grouping rt_window must be non-negative, got {}",
                    w
                )))
            }
        };
        match self {
            GroupingMethod::Greedy { rt_window } => check_window(*rt_window),
            GroupingMethod::Correlation {
                rt_window,
                min_corr_signal,
                ..
            } => {
                check_window(*rt_window)?;
                if !(0.0..=1.0).contains(min_corr_signal) {
                    return Err(AlignmentError::config(format!(
                        "min_corr_signal must be in [0, 1], got {}",
                        min_corr_signal
                    )));
                }
                Ok(())
            }
            GroupingMethod::Posterior {
                rt_window,
                alpha,
                num_samples,
                burn_in,
                ..
            } => {
                check_window(*rt_window)?;
                if *rt_window <= 0.0 {
                    return Err(AlignmentError::config(
                        "posterior grouping needs a positive rt_window",
                    ));
                }
                if !(alpha.is_finite() && *alpha > 0.0) {
                    return Err(AlignmentError::config(format!(
                        "posterior grouping alpha must be positive, got {}",
                        alpha
                    )));
                }
                if burn_in >= num_samples {
                    return Err(AlignmentError::config(format!(
                        "burn_in ({}) must be smaller than num_samples ({})",
                        burn_in, num_samples
                    )));
                }
                Ok(())
            }
            GroupingMethod::Saved { .. } => Ok(()),
        }
    }
}

/// Builds the strategy selected by `method`.
///
/// The correlation strategy needs a profile source, every other strategy
/// ignores it.
pub fn build_grouping(
    method: &GroupingMethod,
    sparse_threshold: usize,
    profiles: Option<Arc<dyn ProfileSource>>,
) -> Result<Box<dyn GroupingStrategy>> {
    method.validate()?;
    let strategy: Box<dyn GroupingStrategy> = match method {
        GroupingMethod::Greedy { rt_window } => {
            Box::new(GreedyGrouping::new(*rt_window, sparse_threshold))
        }
        GroupingMethod::Correlation {
            rt_window,
            min_corr_signal,
            measure,
        } => {
            let profiles = profiles.ok_or_else(|| {
                AlignmentError::config("correlation grouping requires a source of peak profiles")
            })?;
            Box::new(CorrelationGrouping::new(
                *rt_window,
                *min_corr_signal,
                *measure,
                profiles,
                sparse_threshold,
            ))
        }
        GroupingMethod::Posterior {
            rt_window,
            alpha,
            num_samples,
            burn_in,
            backend,
            timeout_secs,
            persist_dir,
            seed,
        } => {
            let backend: Box<dyn GroupingBackend> = match backend {
                BackendConfig::DpMixture => Box::new(DpMixtureBackend::new(sparse_threshold)),
                BackendConfig::Subprocess { program, args } => Box::new(SubprocessBackend::new(
                    program.clone(),
                    args.clone(),
                    timeout_secs.map(Duration::from_secs),
                    sparse_threshold,
                )),
            };
            let mut strategy = PosteriorGrouping::new(
                backend,
                *rt_window,
                *alpha,
                *num_samples,
                *burn_in,
                *seed,
            );
            if let Some(dir) = persist_dir {
                strategy = strategy.with_persist_dir(dir.clone());
            }
            Box::new(strategy)
        }
        GroupingMethod::Saved { directory } => {
            Box::new(SavedGrouping::new(directory.clone(), sparse_threshold))
        }
    };
    Ok(strategy)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_parsing_uses_defaults() {
        let method: GroupingMethod = serde_json::from_str(r#"{"type": "greedy"}"#).unwrap();
        assert_eq!(method, GroupingMethod::Greedy { rt_window: 5.0 });

        let method: GroupingMethod =
            serde_json::from_str(r#"{"type": "posterior", "num_samples": 20, "burn_in": 5}"#)
                .unwrap();
        match method {
            GroupingMethod::Posterior {
                num_samples,
                burn_in,
                backend,
                ..
            } => {
                assert_eq!(num_samples, 20);
                assert_eq!(burn_in, 5);
                assert_eq!(backend, BackendConfig::DpMixture);
            }
            other => panic!("unexpected method {:?}", other),
        }
    }

    #[test]
    fn test_invalid_methods_are_rejected() {
        let bad = GroupingMethod::Correlation {
            rt_window: 5.0,
            min_corr_signal: 1.5,
            measure: CorrelationMeasure::Pearson,
        };
        assert!(bad.validate().is_err());

        let bad = GroupingMethod::Posterior {
            rt_window: 5.0,
            alpha: 1.0,
            num_samples: 10,
            burn_in: 10,
            backend: BackendConfig::DpMixture,
            timeout_secs: None,
            persist_dir: None,
            seed: None,
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_correlation_needs_profiles() {
        let method = GroupingMethod::Correlation {
            rt_window: 5.0,
            min_corr_signal: 0.9,
            measure: CorrelationMeasure::Pearson,
        };
        let err = build_grouping(&method, 1000, None).err().unwrap();
        assert_eq!(err.stage(), crate::errors::Stage::Config);
    }
}
