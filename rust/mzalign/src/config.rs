use serde::{
    Deserialize,
    Serialize,
};

use crate::coclustering::DEFAULT_SPARSE_THRESHOLD;
use crate::errors::{
    AlignmentError,
    Result,
};
use crate::filter::FilterConfig;
use crate::grouping::GroupingMethod;
use crate::tolerance::Tolerance;

/// Everything an alignment run needs to know, fixed before the first sample
/// is touched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AlignmentConfig {
    pub use_group: bool,
    pub grouping: GroupingMethod,
    pub tolerance: Tolerance,
    /// Weight of the mass term against the retention time term when scoring.
    pub alpha: f64,
    /// Weight of the plain score against the group-propagated score when
    /// `use_group` is set.
    pub group_alpha: f64,
    pub filters: Vec<FilterConfig>,
    /// Feature count above which co-clustering matrices are stored sparse.
    pub sparse_threshold: usize,
    pub hdp: HdpConfig,
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            use_group: false,
            grouping: GroupingMethod::default(),
            tolerance: Tolerance::default(),
            alpha: 0.5,
            group_alpha: 0.5,
            filters: Vec::new(),
            sparse_threshold: DEFAULT_SPARSE_THRESHOLD,
            hdp: HdpConfig::default(),
        }
    }
}

impl AlignmentConfig {
    pub fn validate(&self) -> Result<()> {
        self.tolerance.validate()?;
        if !(0.0..=1.0).contains(&self.alpha) {
            return Err(AlignmentError::config(format!(
                "alpha must be in [0, 1], got {}",
                self.alpha
            )));
        }
        if !(0.0..=1.0).contains(&self.group_alpha) {
            return Err(AlignmentError::config(format!(
                "group_alpha must be in [0, 1], got {}",
                self.group_alpha
            )));
        }
        if self.sparse_threshold == 0 {
            return Err(AlignmentError::config("sparse_threshold must be positive"));
        }
        if self.use_group {
            self.grouping.validate()?;
        }
        self.hdp.validate()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum IonisationMode {
    #[serde(rename = "pos")]
    Positive,
    #[serde(rename = "neg")]
    Negative,
}

/// Settings of the joint mass / retention time model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HdpConfig {
    /// Concentration of the local retention time clusters within a sample.
    pub alpha_rt: f64,
    /// Concentration of the mass clusters within a metabolite.
    pub alpha_mass: f64,
    /// Concentration of the metabolites shared by all samples.
    pub top_alpha: f64,
    pub global_rt_stdev: f64,
    pub local_rt_stdev: f64,
    pub mass_tol_ppm: f64,
    pub num_draws: usize,
    pub burn_in: usize,
    pub speed_up: bool,
    /// Consecutive singleton sweeps before a peak is frozen.
    pub speed_up_num_sample: usize,
    pub ref_sample_index: Option<usize>,
    pub seed: Option<u64>,
    /// Minimum fraction of draws a feature set needs to become a row.
    pub posterior_threshold: f64,
    pub ionisation_mode: Option<IonisationMode>,
}

impl Default for HdpConfig {
    fn default() -> Self {
        Self {
            alpha_rt: 10.0,
            alpha_mass: 100.0,
            top_alpha: 10.0,
            global_rt_stdev: 20.0,
            local_rt_stdev: 2.0,
            mass_tol_ppm: 2.0,
            num_draws: 200,
            burn_in: 100,
            speed_up: false,
            speed_up_num_sample: 100,
            ref_sample_index: None,
            seed: None,
            posterior_threshold: 0.5,
            ionisation_mode: None,
        }
    }
}

impl HdpConfig {
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("alpha_rt", self.alpha_rt),
            ("alpha_mass", self.alpha_mass),
            ("top_alpha", self.top_alpha),
            ("global_rt_stdev", self.global_rt_stdev),
            ("local_rt_stdev", self.local_rt_stdev),
            ("mass_tol_ppm", self.mass_tol_ppm),
        ];
        for (name, value) in positive.iter() {
            if !(value.is_finite() && *value > 0.0) {
                return Err(AlignmentError::config(format!(
                    "hdp.{} must be positive, got {}",
                    name, value
                )));
            }
        }
        if self.burn_in >= self.num_draws {
            return Err(AlignmentError::config(format!(
                "hdp.burn_in ({}) must be smaller than hdp.num_draws ({})",
                self.burn_in, self.num_draws
            )));
        }
        if !(0.0..=1.0).contains(&self.posterior_threshold) {
            return Err(AlignmentError::config(format!(
                "hdp.posterior_threshold must be in [0, 1], got {}",
                self.posterior_threshold
            )));
        }
        Ok(())
    }

    /// Checks settings that depend on the loaded samples.
    pub fn validate_for(&self, num_samples: usize) -> Result<()> {
        self.validate()?;
        if let Some(idx) = self.ref_sample_index {
            if idx >= num_samples {
                return Err(AlignmentError::config(format!(
                    "hdp.ref_sample_index {} out of range for {} samples",
                    idx, num_samples
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tolerance::MassTolerance;

    #[test]
    fn test_defaults_from_empty_json() {
        let config: AlignmentConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, AlignmentConfig::default());
        assert!(config.validate().is_ok());
        assert_eq!(config.hdp.num_draws, 200);
        assert_eq!(config.tolerance.mass, MassTolerance::Ppm(10.0));
    }

    #[test]
    fn test_partial_json() {
        let text = r#"{
            "use_group": true,
            "grouping": {"type": "greedy", "rt_window": 3.0},
            "tolerance": {"mass": {"da": 0.01}, "rt": 5.0},
            "filters": [{"type": "score", "threshold": 0.1}],
            "hdp": {"num_draws": 20, "burn_in": 10, "ionisation_mode": "pos"}
        }"#;
        let config: AlignmentConfig = serde_json::from_str(text).unwrap();
        assert!(config.use_group);
        assert_eq!(config.group_alpha, 0.5);
        assert_eq!(config.grouping, GroupingMethod::Greedy { rt_window: 3.0 });
        assert_eq!(config.tolerance.mass, MassTolerance::Absolute(0.01));
        assert_eq!(config.filters.len(), 1);
        assert_eq!(config.hdp.ionisation_mode, Some(IonisationMode::Positive));
        assert_eq!(config.hdp.alpha_mass, 100.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_contradictory_settings_are_rejected() {
        let mut config = AlignmentConfig::default();
        config.alpha = 1.5;
        assert!(config.validate().is_err());

        let mut config = AlignmentConfig::default();
        config.group_alpha = -0.1;
        assert!(config.validate().is_err());

        let mut config = AlignmentConfig::default();
        config.hdp.burn_in = 300;
        assert!(config.validate().is_err());

        let mut config = AlignmentConfig::default();
        config.tolerance.rt = -1.0;
        assert!(config.validate().is_err());

        let mut config = AlignmentConfig::default();
        config.hdp.ref_sample_index = Some(3);
        assert!(config.validate().is_ok());
        assert!(config.hdp.validate_for(3).is_err());
        assert!(config.hdp.validate_for(4).is_ok());
    }
}
