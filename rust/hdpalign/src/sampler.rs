//! Gibbs sampler of the joint mass / retention time model.
//!
//! Metabolites are shared by every sample and carry a global retention time.
//! Each sample owns local retention time clusters that point at one
//! metabolite, and each metabolite partitions its peaks into mass clusters.
//! A sweep removes every peak from the state and reassigns it, then the
//! cluster parameters are redrawn from their conditionals.

use indicatif::{
    ProgressBar,
    ProgressStyle,
};
use itertools::Itertools;
use mzalign::utils::stats::{
    log_sum_exp,
    normal_ln_pdf,
    sample_log_weights,
    sample_normal,
};
use mzalign::{
    FeatureKey,
    HdpConfig,
    Sample,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{
    debug,
    info,
};

use crate::draws::{
    HdpSampleHandler,
    HdpSingleSample,
    MassClusterDraw,
    MetaboliteDraw,
    RtClusterDraw,
};
use crate::errors::{
    DataProcessingError,
    Result,
    hdp_error,
};
use crate::params::HdpParams;

#[derive(Debug, Clone, Copy)]
struct Peak {
    key: FeatureKey,
    mass: f64,
    log_mass: f64,
    rt: f64,
}

#[derive(Debug, Clone)]
struct RtCluster {
    count: usize,
    sum_rt: f64,
    tjk: f64,
    metabolite: usize,
}

#[derive(Debug, Clone)]
struct SampleState {
    sample_id: usize,
    /// Global peak indices, in feature order.
    peaks: Vec<usize>,
    /// Local cluster of every peak, `None` while it is being reassigned.
    z: Vec<Option<usize>>,
    clusters: Vec<RtCluster>,
}

#[derive(Debug, Clone)]
struct MassCluster {
    members: Vec<usize>,
    sum_log_mass: f64,
    theta: f64,
}

#[derive(Debug, Clone)]
struct Metabolite {
    ti: f64,
    /// Number of local clusters pointing here.
    fi: usize,
    /// Sum of their retention times.
    si: f64,
    mass_clusters: Vec<MassCluster>,
}

impl Metabolite {
    fn mass_cluster_of(&self, peak: usize) -> Option<usize> {
        self.mass_clusters
            .iter()
            .position(|c| c.members.contains(&peak))
    }

    fn num_peaks(&self) -> usize {
        self.mass_clusters.iter().map(|c| c.members.len()).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerState {
    Initialized,
    /// Running draw `t`.
    Sampling(usize),
    BudgetExhausted,
}

/// Local cluster retention time, pinned to its mean on the reference sample.
fn cluster_rt(
    rng: &mut ChaCha8Rng,
    ref_sample: Option<usize>,
    mean: f64,
    precision: f64,
    sample: usize,
) -> Result<f64> {
    if ref_sample == Some(sample) {
        return Ok(mean);
    }
    sample_normal(rng, mean, precision).map_err(hdp_error)
}

fn draw_index(rng: &mut ChaCha8Rng, log_weights: &[f64], context: &str) -> Result<usize> {
    sample_log_weights(rng, log_weights).ok_or_else(|| {
        hdp_error(DataProcessingError::ExpectedFiniteNonNanData {
            context: context.to_string(),
        })
    })
}

fn ln_normal(x: f64, mean: f64, precision: f64) -> Result<f64> {
    normal_ln_pdf(x, mean, precision).map_err(hdp_error)
}

pub struct HdpSampler {
    params: HdpParams,
    peaks: Vec<Peak>,
    samples: Vec<SampleState>,
    metabolites: Vec<Metabolite>,
    rng: ChaCha8Rng,
    frozen: Vec<bool>,
    singleton_sweeps: Vec<usize>,
    state: SamplerState,
}

impl HdpSampler {
    pub fn new(samples: &[Sample], config: &HdpConfig) -> Result<Self> {
        let params = HdpParams::new(config, samples)?;
        let rng = match config.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        let mut sampler = Self {
            params,
            peaks: Vec::new(),
            samples: Vec::with_capacity(samples.len()),
            metabolites: Vec::new(),
            rng,
            frozen: Vec::new(),
            singleton_sweeps: Vec::new(),
            state: SamplerState::Initialized,
        };
        sampler.initialize(samples)?;
        Ok(sampler)
    }

    /// Places every peak in a single metabolite, one local cluster per sample.
    fn initialize(&mut self, samples: &[Sample]) -> Result<()> {
        let ti = sample_normal(&mut self.rng, self.params.mu0, self.params.sigma0_prec)
            .map_err(hdp_error)?;
        let mut metabolite = Metabolite {
            ti,
            fi: 0,
            si: 0.0,
            mass_clusters: Vec::new(),
        };
        let mut all_peaks = MassCluster {
            members: Vec::new(),
            sum_log_mass: 0.0,
            theta: 0.0,
        };
        let mut mass_sum = 0.0;

        for (j, sample) in samples.iter().enumerate() {
            let mut state = SampleState {
                sample_id: sample.id,
                peaks: Vec::with_capacity(sample.len()),
                z: vec![Some(0); sample.len()],
                clusters: Vec::new(),
            };
            let mut sum_rt = 0.0;
            for f in sample.features() {
                let idx = self.peaks.len();
                self.peaks.push(Peak {
                    key: f.key(),
                    mass: f.mass,
                    log_mass: f.log_mass,
                    rt: f.rt,
                });
                state.peaks.push(idx);
                all_peaks.members.push(idx);
                all_peaks.sum_log_mass += f.log_mass;
                mass_sum += f.mass;
                sum_rt += f.rt;
            }
            if !sample.is_empty() {
                let tjk = cluster_rt(
                    &mut self.rng,
                    self.params.ref_sample_index,
                    ti,
                    self.params.delta_prec,
                    j,
                )?;
                state.clusters.push(RtCluster {
                    count: sample.len(),
                    sum_rt,
                    tjk,
                    metabolite: 0,
                });
                metabolite.fi += 1;
                metabolite.si += tjk;
            }
            self.samples.push(state);
        }

        all_peaks.theta = (mass_sum / self.peaks.len() as f64).ln();
        metabolite.mass_clusters.push(all_peaks);
        self.metabolites.push(metabolite);
        self.frozen = vec![false; self.peaks.len()];
        self.singleton_sweeps = vec![0; self.peaks.len()];
        Ok(())
    }

    pub fn params(&self) -> &HdpParams {
        &self.params
    }

    pub fn state(&self) -> SamplerState {
        self.state
    }

    pub fn num_peaks(&self) -> usize {
        self.peaks.len()
    }

    pub fn num_metabolites(&self) -> usize {
        self.metabolites.len()
    }

    pub fn num_frozen(&self) -> usize {
        self.frozen.iter().filter(|x| **x).count()
    }

    /// Runs the whole chain and keeps the draws past burn-in.
    pub fn run(&mut self, handler: &mut HdpSampleHandler) -> Result<()> {
        let style = ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({eta})",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar());
        let pb = ProgressBar::new(self.params.num_draws as u64).with_style(style);

        info!(
            "Sampling {} draws ({} burn-in) over {} peaks in {} samples",
            self.params.num_draws,
            self.params.burn_in,
            self.peaks.len(),
            self.samples.len()
        );
        for s in 0..self.params.num_draws {
            self.state = SamplerState::Sampling(s);
            let processed = self.sweep()?;
            self.update_parameters()?;
            debug!(
                "Draw {}: processed {}/{} peaks, I={}, A=[{}]",
                s,
                processed,
                self.peaks.len(),
                self.metabolites.len(),
                self.metabolites
                    .iter()
                    .map(|m| m.mass_clusters.len())
                    .join(",")
            );
            if s >= self.params.burn_in {
                handler.store(self.snapshot(s));
            }
            pb.inc(1);
        }
        pb.finish_and_clear();
        self.state = SamplerState::BudgetExhausted;
        info!(
            "Sampling done with {} metabolites, {} frozen peaks",
            self.metabolites.len(),
            self.num_frozen()
        );
        Ok(())
    }

    /// Reassigns every active peak once. Returns the number of peaks processed.
    pub fn sweep(&mut self) -> Result<usize> {
        let mut processed = 0;
        for j in 0..self.samples.len() {
            for n in 0..self.samples[j].peaks.len() {
                let p = self.samples[j].peaks[n];
                if self.frozen[p] {
                    continue;
                }
                let Some(k) = self.samples[j].z[n] else {
                    continue;
                };
                let i = self.samples[j].clusters[k].metabolite;

                if self.params.speed_up && self.is_settled_singleton(p, i) {
                    self.remove_peak(j, n);
                    self.frozen[p] = true;
                    continue;
                }

                self.remove_peak(j, n);
                self.reassign_peak(j, n)?;
                processed += 1;
            }
        }
        Ok(processed)
    }

    /// Tracks how long `p` has been alone in its mass cluster.
    fn is_settled_singleton(&mut self, p: usize, metabolite: usize) -> bool {
        let met = &self.metabolites[metabolite];
        let alone = met
            .mass_cluster_of(p)
            .is_some_and(|a| met.mass_clusters[a].members.len() == 1);
        if alone {
            self.singleton_sweeps[p] += 1;
            self.singleton_sweeps[p] >= self.params.speed_up_num_sample
        } else {
            self.singleton_sweeps[p] = 0;
            false
        }
    }

    /// Takes peak `n` of sample `j` out of the state, dropping emptied
    /// clusters and metabolites.
    fn remove_peak(&mut self, j: usize, n: usize) {
        let Some(k) = self.samples[j].z[n] else {
            return;
        };
        let p = self.samples[j].peaks[n];
        let peak = self.peaks[p];
        let i = self.samples[j].clusters[k].metabolite;

        let state = &mut self.samples[j];
        state.z[n] = None;
        state.clusters[k].count -= 1;
        state.clusters[k].sum_rt -= peak.rt;

        let met = &mut self.metabolites[i];
        if let Some(a) = met.mass_cluster_of(p) {
            let cluster = &mut met.mass_clusters[a];
            cluster.members.retain(|q| *q != p);
            cluster.sum_log_mass -= peak.log_mass;
            if cluster.members.is_empty() {
                met.mass_clusters.remove(a);
            }
        }

        if self.samples[j].clusters[k].count > 0 {
            return;
        }
        let state = &mut self.samples[j];
        let removed = state.clusters.remove(k);
        for z in state.z.iter_mut().flatten() {
            if *z > k {
                *z -= 1;
            }
        }

        let met = &mut self.metabolites[i];
        met.fi -= 1;
        met.si -= removed.tjk;
        if met.fi == 0 {
            self.metabolites.remove(i);
            for cluster in self.samples.iter_mut().flat_map(|s| s.clusters.iter_mut()) {
                if cluster.metabolite > i {
                    cluster.metabolite -= 1;
                }
            }
        }
    }

    /// Log posterior of the peak joining each mass cluster of metabolite `i`,
    /// the last entry being a new cluster.
    fn mass_log_posterior(&self, peak: &Peak, i: usize) -> Result<Vec<f64>> {
        let params = &self.params;
        let met = &self.metabolites[i];
        let n = met.num_peaks() as f64;
        let denom = n + params.alpha_mass;

        let mut out = Vec::with_capacity(met.mass_clusters.len() + 1);
        for cluster in met.mass_clusters.iter() {
            let same_sample = cluster
                .members
                .iter()
                .any(|q| self.peaks[*q].key.sample_id == peak.key.sample_id);
            if same_sample {
                out.push(f64::NEG_INFINITY);
                continue;
            }
            let count = cluster.members.len() as f64;
            let post_prec = params.rho0_prec + params.rho_prec * count;
            let post_mean =
                (params.rho0_prec * params.psi0 + params.rho_prec * cluster.sum_log_mass) / post_prec;
            let pred_prec = 1.0 / (1.0 / post_prec + 1.0 / params.rho_prec);
            out.push((count / denom).ln() + ln_normal(peak.log_mass, post_mean, pred_prec)?);
        }
        let new_prec = 1.0 / (1.0 / params.rho0_prec + 1.0 / params.rho_prec);
        out.push((params.alpha_mass / denom).ln() + ln_normal(peak.log_mass, params.psi0, new_prec)?);
        Ok(out)
    }

    fn reassign_peak(&mut self, j: usize, n: usize) -> Result<()> {
        let p = self.samples[j].peaks[n];
        let peak = self.peaks[p];
        let params = self.params;
        let (gamma, delta) = (params.gamma_prec, params.delta_prec);

        let mass_like = (0..self.metabolites.len())
            .map(|i| Ok(log_sum_exp(&self.mass_log_posterior(&peak, i)?)))
            .collect::<Result<Vec<f64>>>()?;

        let state = &self.samples[j];
        let rt_denom = state.clusters.iter().map(|c| c.count).sum::<usize>() as f64 + params.alpha_rt;
        let mut cluster_post = Vec::with_capacity(state.clusters.len() + 1);
        for cluster in state.clusters.iter() {
            cluster_post.push(
                (cluster.count as f64 / rt_denom).ln()
                    + ln_normal(peak.rt, cluster.tjk, gamma)?
                    + mass_like[cluster.metabolite],
            );
        }

        let top_denom =
            self.metabolites.iter().map(|m| m.fi).sum::<usize>() as f64 + params.top_alpha;
        let rt_prec = 1.0 / (1.0 / gamma + 1.0 / delta);
        let mut met_post = Vec::with_capacity(self.metabolites.len() + 1);
        for (i, met) in self.metabolites.iter().enumerate() {
            met_post.push(
                (met.fi as f64 / top_denom).ln()
                    + ln_normal(peak.rt, met.ti, rt_prec)?
                    + mass_like[i],
            );
        }
        let new_rt_prec = 1.0 / (1.0 / gamma + 1.0 / delta + 1.0 / params.sigma0_prec);
        let new_mass_prec = 1.0 / (1.0 / params.rho_prec + 1.0 / params.rho0_prec);
        met_post.push(
            (params.top_alpha / top_denom).ln()
                + ln_normal(peak.rt, params.mu0, new_rt_prec)?
                + ln_normal(peak.log_mass, params.psi0, new_mass_prec)?,
        );
        cluster_post.push((params.alpha_rt / rt_denom).ln() + log_sum_exp(&met_post));

        let mut k = draw_index(&mut self.rng, &cluster_post, "retention time cluster posterior")?;
        if k == self.samples[j].clusters.len() {
            k = self.open_rt_cluster(j, &peak, &met_post)?;
        }

        let i = self.samples[j].clusters[k].metabolite;
        let mass_post = self.mass_log_posterior(&peak, i)?;
        let a = draw_index(&mut self.rng, &mass_post, "mass cluster posterior")?;
        let met = &mut self.metabolites[i];
        if a == met.mass_clusters.len() {
            met.mass_clusters.push(MassCluster {
                members: Vec::new(),
                sum_log_mass: 0.0,
                theta: peak.log_mass,
            });
        }
        let cluster = &mut met.mass_clusters[a];
        cluster.members.push(p);
        cluster.sum_log_mass += peak.log_mass;

        let state = &mut self.samples[j];
        state.z[n] = Some(k);
        state.clusters[k].count += 1;
        state.clusters[k].sum_rt += peak.rt;
        Ok(())
    }

    /// Creates a local cluster in sample `j` for `peak`, picking its
    /// metabolite (possibly a new one) from `met_post`.
    fn open_rt_cluster(&mut self, j: usize, peak: &Peak, met_post: &[f64]) -> Result<usize> {
        let params = &self.params;
        let (gamma, delta) = (params.gamma_prec, params.delta_prec);
        let i = draw_index(&mut self.rng, met_post, "metabolite posterior")?;
        if i == self.metabolites.len() {
            let temp = 1.0 / (1.0 / gamma + 1.0 / delta);
            let prec = temp + params.sigma0_prec;
            let mean = (temp * peak.rt + params.sigma0_prec * params.mu0) / prec;
            let ti = sample_normal(&mut self.rng, mean, prec).map_err(hdp_error)?;
            self.metabolites.push(Metabolite {
                ti,
                fi: 0,
                si: 0.0,
                mass_clusters: Vec::new(),
            });
        }

        let prec = gamma + delta;
        let mean = (gamma * peak.rt + delta * self.metabolites[i].ti) / prec;
        let tjk = cluster_rt(&mut self.rng, params.ref_sample_index, mean, prec, j)?;
        let met = &mut self.metabolites[i];
        met.fi += 1;
        met.si += tjk;

        let state = &mut self.samples[j];
        state.clusters.push(RtCluster {
            count: 0,
            sum_rt: 0.0,
            tjk,
            metabolite: i,
        });
        Ok(state.clusters.len() - 1)
    }

    /// Redraws local and global retention times and refreshes mass centres.
    pub fn update_parameters(&mut self) -> Result<()> {
        let (gamma, delta) = (self.params.gamma_prec, self.params.delta_prec);
        let ref_sample = self.params.ref_sample_index;

        for (j, state) in self.samples.iter_mut().enumerate() {
            for cluster in state.clusters.iter_mut() {
                let ti = self.metabolites[cluster.metabolite].ti;
                let prec = delta + cluster.count as f64 * gamma;
                let mean = (ti * delta + gamma * cluster.sum_rt) / prec;
                cluster.tjk = cluster_rt(&mut self.rng, ref_sample, mean, prec, j)?;
            }
        }

        for met in self.metabolites.iter_mut() {
            met.si = 0.0;
        }
        for cluster in self.samples.iter().flat_map(|s| s.clusters.iter()) {
            self.metabolites[cluster.metabolite].si += cluster.tjk;
        }

        let (mu0, sigma0) = (self.params.mu0, self.params.sigma0_prec);
        for met in self.metabolites.iter_mut() {
            let prec = sigma0 + met.fi as f64 * delta;
            let mean = (mu0 * sigma0 + delta * met.si) / prec;
            met.ti = sample_normal(&mut self.rng, mean, prec).map_err(hdp_error)?;
            for cluster in met.mass_clusters.iter_mut() {
                let total: f64 = cluster.members.iter().map(|q| self.peaks[*q].mass).sum();
                cluster.theta = (total / cluster.members.len() as f64).ln();
            }
        }
        Ok(())
    }

    /// Copy of the current state, features referenced by key.
    pub fn snapshot(&self, index: usize) -> HdpSingleSample {
        let mut metabolites: Vec<MetaboliteDraw> = self
            .metabolites
            .iter()
            .map(|met| MetaboliteDraw {
                ti: met.ti,
                rt_clusters: Vec::new(),
                mass_clusters: met
                    .mass_clusters
                    .iter()
                    .map(|c| MassClusterDraw {
                        theta: c.theta,
                        features: c
                            .members
                            .iter()
                            .map(|q| self.peaks[*q].key)
                            .sorted()
                            .collect(),
                    })
                    .collect(),
            })
            .collect();
        for state in self.samples.iter() {
            for cluster in state.clusters.iter() {
                metabolites[cluster.metabolite].rt_clusters.push(RtClusterDraw {
                    sample_id: state.sample_id,
                    tjk: cluster.tjk,
                    count: cluster.count,
                });
            }
        }
        let frozen = self
            .frozen
            .iter()
            .zip(self.peaks.iter())
            .filter(|(f, _)| **f)
            .map(|(_, p)| p.key)
            .sorted()
            .collect();
        HdpSingleSample {
            index,
            metabolites,
            frozen,
        }
    }

    #[cfg(test)]
    fn check_consistency(&self) {
        for state in self.samples.iter() {
            let total: usize = state.clusters.iter().map(|c| c.count).sum();
            let active = state
                .peaks
                .iter()
                .filter(|p| !self.frozen[**p])
                .count();
            assert_eq!(total, active);
            assert!(state.clusters.iter().all(|c| c.count > 0));
        }
        for (i, met) in self.metabolites.iter().enumerate() {
            let fi = self
                .samples
                .iter()
                .flat_map(|s| s.clusters.iter())
                .filter(|c| c.metabolite == i)
                .count();
            assert_eq!(met.fi, fi);
            assert!(met.fi > 0);
            for cluster in met.mass_clusters.iter() {
                assert!(
                    cluster
                        .members
                        .iter()
                        .map(|q| self.peaks[*q].key.sample_id)
                        .all_unique()
                        || self.state == SamplerState::Initialized
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mzalign::FeatureInput;

    fn sample(id: usize, features: &[(f64, f64)]) -> Sample {
        let inputs: Vec<FeatureInput> = features
            .iter()
            .map(|(mass, rt)| FeatureInput {
                mass: *mass,
                rt: *rt,
                intensity: 100.0,
            })
            .collect();
        Sample::new(id, format!("s{}", id), &inputs).unwrap()
    }

    fn config(num_draws: usize, burn_in: usize) -> HdpConfig {
        HdpConfig {
            num_draws,
            burn_in,
            seed: Some(42),
            ..HdpConfig::default()
        }
    }

    fn two_compounds() -> Vec<Sample> {
        (0..3)
            .map(|i| {
                let shift = i as f64 * 0.05;
                sample(i, &[(180.0634, 60.0 + shift), (342.1162, 300.0 - shift)])
            })
            .collect()
    }

    #[test]
    fn test_initial_state() {
        let samples = two_compounds();
        let sampler = HdpSampler::new(&samples, &config(10, 5)).unwrap();
        assert_eq!(sampler.state(), SamplerState::Initialized);
        assert_eq!(sampler.num_peaks(), 6);
        assert_eq!(sampler.num_metabolites(), 1);
        let snap = sampler.snapshot(0);
        assert_eq!(snap.metabolites[0].rt_clusters.len(), 3);
        assert_eq!(snap.metabolites[0].mass_clusters.len(), 1);
        sampler.check_consistency();
    }

    #[test]
    fn test_sweeps_keep_state_consistent() {
        let samples = two_compounds();
        let mut sampler = HdpSampler::new(&samples, &config(10, 5)).unwrap();
        for _ in 0..10 {
            sampler.state = SamplerState::Sampling(0);
            assert_eq!(sampler.sweep().unwrap(), 6);
            sampler.update_parameters().unwrap();
            sampler.check_consistency();
        }
        let snap = sampler.snapshot(9);
        let mut keys: Vec<FeatureKey> = snap.clustered_features().copied().collect();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), 6);
    }

    #[test]
    fn test_reference_sample_is_pinned() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert_eq!(cluster_rt(&mut rng, Some(0), 42.0, 1e-4, 0).unwrap(), 42.0);
        assert_ne!(cluster_rt(&mut rng, Some(0), 42.0, 1e-4, 1).unwrap(), 42.0);

        let samples = two_compounds();
        let mut cfg = config(4, 2);
        cfg.ref_sample_index = Some(0);
        let mut sampler = HdpSampler::new(&samples, &cfg).unwrap();
        let mut handler = HdpSampleHandler::new();
        sampler.run(&mut handler).unwrap();
        assert_eq!(sampler.state(), SamplerState::BudgetExhausted);
        assert_eq!(handler.len(), 2);
        assert_eq!(handler.draws()[0].index, 2);
    }

    #[test]
    fn test_speed_up_freezes_lonely_peaks() {
        let samples = vec![
            sample(0, &[(100.0, 10.0), (500.0, 900.0)]),
            sample(1, &[(100.0, 10.0)]),
        ];
        let mut cfg = config(30, 10);
        cfg.speed_up = true;
        cfg.speed_up_num_sample = 3;
        let mut sampler = HdpSampler::new(&samples, &cfg).unwrap();
        let mut handler = HdpSampleHandler::new();
        sampler.run(&mut handler).unwrap();
        sampler.check_consistency();
        assert!(sampler.num_frozen() >= 1);
        let last = handler.last().unwrap();
        assert!(last.frozen.contains(&FeatureKey {
            sample_id: 0,
            feature_id: 1,
        }));
    }
}
