use mzalign::{
    HdpConfig,
    Sample,
};

use crate::errors::{
    DataProcessingError,
    Result,
    hdp_error,
};

/// Precision of the prior on global retention times and on mass clusters.
const PRIOR_PRECISION: f64 = 1.0 / 5e6;

/// Hyper-parameters of the joint model, all normals given as precisions.
///
/// Masses enter the model on the log scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HdpParams {
    /// Prior mean of metabolite retention times.
    pub mu0: f64,
    /// Prior mean of mass cluster log masses.
    pub psi0: f64,
    pub sigma0_prec: f64,
    pub rho0_prec: f64,
    /// Spread of a sample's retention time cluster around its metabolite.
    pub delta_prec: f64,
    /// Spread of a peak around its retention time cluster.
    pub gamma_prec: f64,
    /// Spread of a peak's log mass around its mass cluster.
    pub rho_prec: f64,
    pub alpha_rt: f64,
    pub alpha_mass: f64,
    pub top_alpha: f64,
    pub num_draws: usize,
    pub burn_in: usize,
    pub speed_up: bool,
    pub speed_up_num_sample: usize,
    pub ref_sample_index: Option<usize>,
}

/// Precision of a log-mass normal whose two-sigma width is `ppm`.
pub fn mass_precision(ppm: f64) -> f64 {
    let stdev = 1e-6f64.ln_1p() * ppm / 2.0;
    1.0 / (stdev * stdev)
}

impl HdpParams {
    pub fn new(config: &HdpConfig, samples: &[Sample]) -> Result<Self> {
        config.validate_for(samples.len())?;
        let (n, rt_sum, mass_sum) = samples
            .iter()
            .flat_map(|s| s.features().iter())
            .fold((0usize, 0.0, 0.0), |(n, rt, mass), f| {
                (n + 1, rt + f.rt, mass + f.mass)
            });
        if n == 0 {
            return Err(hdp_error(DataProcessingError::ExpectedNonEmptyData {
                context: Some("joint model input".to_string()),
            }));
        }

        Ok(Self {
            mu0: rt_sum / n as f64,
            psi0: (mass_sum / n as f64).ln(),
            sigma0_prec: PRIOR_PRECISION,
            rho0_prec: PRIOR_PRECISION,
            delta_prec: 1.0 / (config.global_rt_stdev * config.global_rt_stdev),
            gamma_prec: 1.0 / (config.local_rt_stdev * config.local_rt_stdev),
            rho_prec: mass_precision(config.mass_tol_ppm),
            alpha_rt: config.alpha_rt,
            alpha_mass: config.alpha_mass,
            top_alpha: config.top_alpha,
            num_draws: config.num_draws,
            burn_in: config.burn_in,
            speed_up: config.speed_up,
            speed_up_num_sample: config.speed_up_num_sample,
            ref_sample_index: config.ref_sample_index,
        })
    }

    /// Number of draws kept once burn-in is discarded.
    pub fn retained_draws(&self) -> usize {
        self.num_draws.saturating_sub(self.burn_in)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mzalign::FeatureInput;

    #[test]
    fn test_derived_from_data() {
        let inputs = [
            FeatureInput {
                mass: 100.0,
                rt: 10.0,
                intensity: 1.0,
            },
            FeatureInput {
                mass: 300.0,
                rt: 30.0,
                intensity: 1.0,
            },
        ];
        let samples = vec![Sample::new(0, "a", &inputs).unwrap()];
        let config = HdpConfig::default();
        let params = HdpParams::new(&config, &samples).unwrap();
        assert_eq!(params.mu0, 20.0);
        assert!((params.psi0 - 200.0f64.ln()).abs() < 1e-12);
        assert_eq!(params.gamma_prec, 0.25);
        assert_eq!(params.retained_draws(), 100);
        // 2 ppm corresponds to one ppm of log mass per sigma
        assert!((1.0 / params.rho_prec.sqrt() - 1e-6f64.ln_1p()).abs() < 1e-15);
    }

    #[test]
    fn test_empty_input_is_rejected() {
        let samples = vec![Sample::new(0, "a", &[]).unwrap()];
        assert!(HdpParams::new(&HdpConfig::default(), &samples).is_err());
    }
}
