//! Retained posterior draws and their persistence.

use mzalign::{
    FeatureKey,
    HdpConfig,
    Sample,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

use crate::errors::{
    AlignmentError,
    Result,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MassClusterDraw {
    /// Log of the mean raw mass of the members.
    pub theta: f64,
    /// Member features, sorted by key.
    pub features: Vec<FeatureKey>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RtClusterDraw {
    pub sample_id: usize,
    pub tjk: f64,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaboliteDraw {
    pub ti: f64,
    pub rt_clusters: Vec<RtClusterDraw>,
    pub mass_clusters: Vec<MassClusterDraw>,
}

/// One retained state of the sampler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HdpSingleSample {
    /// Position of the draw in the chain, burn-in included.
    pub index: usize,
    pub metabolites: Vec<MetaboliteDraw>,
    /// Peaks taken out of the sweep, each standing alone.
    #[serde(default)]
    pub frozen: Vec<FeatureKey>,
}

impl HdpSingleSample {
    pub fn num_mass_clusters(&self) -> usize {
        self.metabolites.iter().map(|m| m.mass_clusters.len()).sum()
    }

    /// Keys of every peak placed in a mass cluster.
    pub fn clustered_features(&self) -> impl Iterator<Item = &FeatureKey> {
        self.metabolites
            .iter()
            .flat_map(|m| m.mass_clusters.iter())
            .flat_map(|c| c.features.iter())
    }
}

/// FNV-1a over the bit patterns of every feature's mass and retention time.
fn feature_digest(sample: &Sample) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    sample
        .features()
        .iter()
        .flat_map(|f| [f.mass.to_bits(), f.rt.to_bits()])
        .flat_map(u64::to_le_bytes)
        .fold(OFFSET, |hash, byte| (hash ^ byte as u64).wrapping_mul(PRIME))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleFingerprint {
    pub sample_id: usize,
    pub name: String,
    pub num_features: usize,
    pub digest: u64,
}

/// Settings that shape the chain itself.
///
/// Reduction settings (posterior threshold, ionisation mode) are left out,
/// stored draws stay valid when only those change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainSettings {
    pub alpha_rt: f64,
    pub alpha_mass: f64,
    pub top_alpha: f64,
    pub global_rt_stdev: f64,
    pub local_rt_stdev: f64,
    pub mass_tol_ppm: f64,
    pub num_draws: usize,
    pub burn_in: usize,
    pub speed_up: bool,
    pub speed_up_num_sample: usize,
    pub ref_sample_index: Option<usize>,
    pub seed: Option<u64>,
}

impl From<&HdpConfig> for ChainSettings {
    fn from(config: &HdpConfig) -> Self {
        Self {
            alpha_rt: config.alpha_rt,
            alpha_mass: config.alpha_mass,
            top_alpha: config.top_alpha,
            global_rt_stdev: config.global_rt_stdev,
            local_rt_stdev: config.local_rt_stdev,
            mass_tol_ppm: config.mass_tol_ppm,
            num_draws: config.num_draws,
            burn_in: config.burn_in,
            speed_up: config.speed_up,
            speed_up_num_sample: config.speed_up_num_sample,
            ref_sample_index: config.ref_sample_index,
            seed: config.seed,
        }
    }
}

/// Identifies the input and settings a set of draws was sampled from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrawFingerprint {
    pub samples: Vec<SampleFingerprint>,
    pub settings: ChainSettings,
}

impl DrawFingerprint {
    pub fn new(samples: &[Sample], config: &HdpConfig) -> Self {
        Self {
            samples: samples
                .iter()
                .map(|s| SampleFingerprint {
                    sample_id: s.id,
                    name: s.name.clone(),
                    num_features: s.len(),
                    digest: feature_digest(s),
                })
                .collect(),
            settings: ChainSettings::from(config),
        }
    }
}

/// Ordered collection of retained draws.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HdpSampleHandler {
    #[serde(default)]
    fingerprint: Option<DrawFingerprint>,
    draws: Vec<HdpSingleSample>,
}

impl HdpSampleHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fingerprint(fingerprint: DrawFingerprint) -> Self {
        Self {
            fingerprint: Some(fingerprint),
            draws: Vec::new(),
        }
    }

    pub fn fingerprint(&self) -> Option<&DrawFingerprint> {
        self.fingerprint.as_ref()
    }

    /// Checks that these draws were sampled from `samples` under the same
    /// chain settings. The error names the first mismatch.
    pub fn check_replayable(
        &self,
        expected: &DrawFingerprint,
        samples: &[Sample],
    ) -> std::result::Result<(), String> {
        let Some(stored) = self.fingerprint.as_ref() else {
            return Err("draws carry no fingerprint".to_string());
        };
        if stored.samples != expected.samples {
            return Err("draws were sampled from different samples".to_string());
        }
        if stored.settings != expected.settings {
            return Err("draws were sampled with different chain settings".to_string());
        }
        if self.draws.is_empty() {
            return Err("no draws stored".to_string());
        }

        let known: HashSet<FeatureKey> = samples
            .iter()
            .flat_map(|s| s.features().iter().map(|f| f.key()))
            .collect();
        for draw in self.draws.iter() {
            let mut seen = HashSet::with_capacity(known.len());
            for key in draw.clustered_features().chain(draw.frozen.iter()) {
                if !known.contains(key) {
                    return Err(format!("draw {} references unknown feature {}", draw.index, key));
                }
                if !seen.insert(*key) {
                    return Err(format!("draw {} places feature {} twice", draw.index, key));
                }
            }
            if seen.len() != known.len() {
                return Err(format!(
                    "draw {} covers {} of {} features",
                    draw.index,
                    seen.len(),
                    known.len()
                ));
            }
        }
        Ok(())
    }

    pub fn store(&mut self, draw: HdpSingleSample) {
        self.draws.push(draw);
    }

    pub fn draws(&self) -> &[HdpSingleSample] {
        &self.draws
    }

    pub fn last(&self) -> Option<&HdpSingleSample> {
        self.draws.last()
    }

    pub fn len(&self) -> usize {
        self.draws.len()
    }

    pub fn is_empty(&self) -> bool {
        self.draws.is_empty()
    }

    pub fn persist(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| AlignmentError::Io {
                source: e,
                path: Some(parent.to_path_buf()),
            })?;
        }
        let file = std::fs::File::create(path).map_err(|e| AlignmentError::Io {
            source: e,
            path: Some(path.to_path_buf()),
        })?;
        serde_json::to_writer(std::io::BufWriter::new(file), self)?;
        info!("Saved {} posterior draws to {}", self.draws.len(), path.display());
        Ok(())
    }

    /// Loads draws written by [`HdpSampleHandler::persist`].
    ///
    /// A missing file is not an error and yields `None`.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let file = std::fs::File::open(path).map_err(|e| AlignmentError::Io {
            source: e,
            path: Some(path.to_path_buf()),
        })?;
        let handler: Self = serde_json::from_reader(std::io::BufReader::new(file))?;
        info!(
            "Loaded {} posterior draws from {}",
            handler.draws.len(),
            path.display()
        );
        Ok(Some(handler))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(sample_id: usize, feature_id: usize) -> FeatureKey {
        FeatureKey {
            sample_id,
            feature_id,
        }
    }

    fn draw(index: usize) -> HdpSingleSample {
        HdpSingleSample {
            index,
            metabolites: vec![MetaboliteDraw {
                ti: 12.5,
                rt_clusters: vec![
                    RtClusterDraw {
                        sample_id: 0,
                        tjk: 12.25,
                        count: 1,
                    },
                    RtClusterDraw {
                        sample_id: 1,
                        tjk: 12.75,
                        count: 1,
                    },
                ],
                mass_clusters: vec![MassClusterDraw {
                    theta: 5.25,
                    features: vec![key(0, 0), key(1, 0)],
                }],
            }],
            frozen: vec![key(1, 1)],
        }
    }

    #[test]
    fn test_counts() {
        let d = draw(3);
        assert_eq!(d.num_mass_clusters(), 1);
        assert_eq!(d.clustered_features().count(), 2);
    }

    fn samples(second_rt: f64) -> Vec<Sample> {
        let input = |mass, rt| mzalign::FeatureInput {
            mass,
            rt,
            intensity: 1.0,
        };
        vec![
            Sample::new(0, "a", &[input(180.06, 12.2)]).unwrap(),
            Sample::new(1, "b", &[input(180.06, 12.8), input(300.1, second_rt)]).unwrap(),
        ]
    }

    #[test]
    fn test_fingerprint_tracks_input_and_settings() {
        let config = HdpConfig::default();
        let base = DrawFingerprint::new(&samples(20.0), &config);
        assert_eq!(base, DrawFingerprint::new(&samples(20.0), &config));
        assert_ne!(base, DrawFingerprint::new(&samples(20.5), &config));

        let reseeded = HdpConfig {
            seed: Some(7),
            ..config.clone()
        };
        assert_ne!(base, DrawFingerprint::new(&samples(20.0), &reseeded));
        let rethresholded = HdpConfig {
            posterior_threshold: 0.3,
            ..config
        };
        assert_eq!(base, DrawFingerprint::new(&samples(20.0), &rethresholded));
    }

    #[test]
    fn test_replay_check() {
        let config = HdpConfig::default();
        let current = samples(20.0);
        let fingerprint = DrawFingerprint::new(&current, &config);

        let mut handler = HdpSampleHandler::with_fingerprint(fingerprint.clone());
        assert!(handler.check_replayable(&fingerprint, &current).is_err());
        handler.store(draw(0));
        assert!(handler.check_replayable(&fingerprint, &current).is_ok());

        let mut unmarked = HdpSampleHandler::new();
        unmarked.store(draw(0));
        assert!(unmarked.check_replayable(&fingerprint, &current).is_err());

        let moved = samples(20.5);
        let err = handler
            .check_replayable(&DrawFingerprint::new(&moved, &config), &moved)
            .unwrap_err();
        assert!(err.contains("different samples"));

        let mut stray = draw(1);
        stray.frozen = vec![key(1, 1), key(2, 0)];
        let mut handler = HdpSampleHandler::with_fingerprint(fingerprint.clone());
        handler.store(stray);
        let err = handler.check_replayable(&fingerprint, &current).unwrap_err();
        assert!(err.contains("unknown feature 2:0"));

        let mut partial = draw(2);
        partial.frozen.clear();
        let mut handler = HdpSampleHandler::with_fingerprint(fingerprint.clone());
        handler.store(partial);
        let err = handler.check_replayable(&fingerprint, &current).unwrap_err();
        assert!(err.contains("covers 2 of 3"));
    }

    #[test]
    fn test_persist_and_load() {
        let dir = std::env::temp_dir().join(format!("hdpalign_draws_{}", std::process::id()));
        let path = dir.join("draws.json");
        assert!(HdpSampleHandler::load(&path).unwrap().is_none());

        let fingerprint = DrawFingerprint::new(&samples(20.0), &HdpConfig::default());
        let mut handler = HdpSampleHandler::with_fingerprint(fingerprint.clone());
        handler.store(draw(0));
        handler.store(draw(1));
        handler.persist(&path).unwrap();
        let loaded = HdpSampleHandler::load(&path).unwrap().unwrap();
        assert_eq!(loaded, handler);
        assert_eq!(loaded.last().map(|d| d.index), Some(1));
        assert_eq!(loaded.fingerprint(), Some(&fingerprint));
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
