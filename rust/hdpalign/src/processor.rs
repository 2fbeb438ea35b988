//! Reduction of retained draws into alignment probabilities and annotations.

use mzalign::{
    Feature,
    FeatureKey,
    IonisationMode,
    Sample,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{
    debug,
    info,
};

use crate::adducts::AdductTransformComputer;
use crate::annotation::HdpAnnotation;
use crate::draws::{
    HdpSingleSample,
    MetaboliteDraw,
};
use crate::errors::Result;
use crate::identity::{
    CachedLookup,
    IdentityLookup,
};
use crate::results::HdpAlignmentResults;

/// Mass differences of the heavy isotopes that get labelled.
pub const ISOTOPE_DIFFS: [(&str, f64); 4] = [
    ("C13", 13.00335483780 - 12.0),
    ("N15", 15.00010889840 - 14.00307400524),
    ("O18", 17.99916040000 - 15.99491462210),
    ("S34", 33.96786683000 - 31.97207069000),
];

/// Retries granted to each identity query before it is recorded as empty.
const LOOKUP_RETRIES: usize = 2;

/// Identifies a metabolite within one draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MetaboliteKey {
    pub draw: usize,
    pub metabolite: usize,
}

/// A neutral mass explaining two or more mass clusters of a metabolite.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrecursorMass {
    pub mass: f64,
    /// Mass cluster pairs that agreed on it.
    pub count: usize,
}

impl PrecursorMass {
    fn new(mass: f64) -> Self {
        Self { mass, count: 1 }
    }

    /// Strict window of `ppm` around this mass.
    pub fn within_tolerance(&self, other: f64, ppm: f64) -> bool {
        let delta = self.mass * ppm / 1e6;
        other > self.mass - delta && other < self.mass + delta
    }
}

/// Precursors found in one metabolite and the one each mass cluster got.
#[derive(Debug, Clone, Default)]
struct MetabolitePrecursors {
    masses: Vec<PrecursorMass>,
    by_cluster: Vec<Option<usize>>,
}

pub struct HdpSampleProcessor {
    ppm: f64,
    features: HashMap<FeatureKey, Feature>,
    samples_taken: usize,
    results: HdpAlignmentResults,
    adducts: Option<(IonisationMode, AdductTransformComputer)>,
    lookup: Option<CachedLookup>,
    ionisation_products: HdpAnnotation<FeatureKey>,
    isotopes: HdpAnnotation<FeatureKey>,
    metabolite_features: HdpAnnotation<FeatureKey>,
    metabolites: HdpAnnotation<MetaboliteKey>,
    last_sample: Option<HdpSingleSample>,
}

impl HdpSampleProcessor {
    pub fn new(samples: &[Sample], ppm: f64, mode: Option<IonisationMode>) -> Result<Self> {
        let adducts = match mode {
            Some(mode) => Some((mode, AdductTransformComputer::for_mode(mode)?)),
            None => None,
        };
        let features = samples
            .iter()
            .flat_map(|s| s.features().iter())
            .map(|f| (f.key(), *f))
            .collect();
        Ok(Self {
            ppm,
            features,
            samples_taken: 0,
            results: HdpAlignmentResults::new(),
            adducts,
            lookup: None,
            ionisation_products: HdpAnnotation::new(),
            isotopes: HdpAnnotation::new(),
            metabolite_features: HdpAnnotation::new(),
            metabolites: HdpAnnotation::new(),
            last_sample: None,
        })
    }

    /// Enables identity annotation of precursor masses.
    pub fn with_identity_lookup(mut self, lookup: Arc<dyn IdentityLookup>) -> Self {
        self.lookup = Some(CachedLookup::new(lookup, LOOKUP_RETRIES));
        self
    }

    pub fn process(&mut self, draws: &[HdpSingleSample]) {
        for draw in draws.iter() {
            self.process_sample(draw);
        }
        if let Some(lookup) = self.lookup.as_ref() {
            if lookup.failures() > 0 {
                info!("{} identity lookups failed and were skipped", lookup.failures());
            }
        }
        info!("Processed {} posterior draws", self.samples_taken);
    }

    pub fn process_sample(&mut self, draw: &HdpSingleSample) {
        self.samples_taken += 1;
        self.results.store(draw);

        if self.adducts.is_some() {
            for (i, metabolite) in draw.metabolites.iter().enumerate() {
                let precursors = self.annotate_ionisation_products(metabolite);
                debug!(
                    "Draw {} metabolite {}: {} precursor masses",
                    draw.index,
                    i,
                    precursors.masses.len()
                );
                let key = MetaboliteKey {
                    draw: draw.index,
                    metabolite: i,
                };
                self.annotate_metabolite(key, metabolite, &precursors);
            }
        }
        self.last_sample = Some(draw.clone());
    }

    /// Looks for pairs of mass clusters explained by the same precursor under
    /// two different adducts.
    fn annotate_ionisation_products(&mut self, metabolite: &MetaboliteDraw) -> MetabolitePrecursors {
        let Some((mode, computer)) = self.adducts.as_ref() else {
            return MetabolitePrecursors::default();
        };
        let clusters = &metabolite.mass_clusters;
        let candidates: Vec<Vec<f64>> = clusters
            .iter()
            .map(|c| computer.precursor_masses(c.theta.exp()))
            .collect();
        let names = computer.transforms();
        let mut out = MetabolitePrecursors {
            masses: Vec::new(),
            by_cluster: vec![None; clusters.len()],
        };

        for j in 0..clusters.len() {
            for k in (j + 1)..clusters.len() {
                for (c1, &mass1) in candidates[j].iter().enumerate() {
                    if mass1 <= 0.0 {
                        continue;
                    }
                    let existing = out
                        .masses
                        .iter()
                        .position(|pc| pc.within_tolerance(mass1, self.ppm));
                    let reference = existing.map_or(PrecursorMass::new(mass1), |e| out.masses[e]);
                    let Some(c2) = candidates[k]
                        .iter()
                        .position(|&m| m > 0.0 && reference.within_tolerance(m, self.ppm))
                    else {
                        continue;
                    };

                    for f in clusters[j].features.iter() {
                        self.ionisation_products.annotate(f, names[c1].name.as_str());
                    }
                    for f in clusters[k].features.iter() {
                        self.ionisation_products.annotate(f, names[c2].name.as_str());
                    }
                    let idx = match existing {
                        Some(e) => {
                            out.masses[e].count += 1;
                            e
                        }
                        None => {
                            out.masses.push(reference);
                            out.masses.len() - 1
                        }
                    };
                    out.by_cluster[j].get_or_insert(idx);
                    out.by_cluster[k].get_or_insert(idx);
                    break;
                }
            }
        }

        if out.masses.is_empty() {
            // Fall back to the most intense peak under the default adduct.
            let default_adduct = match mode {
                IonisationMode::Positive => "M+H",
                IonisationMode::Negative => "M-H",
            };
            let loudest = clusters
                .iter()
                .enumerate()
                .flat_map(|(a, c)| c.features.iter().map(move |f| (a, f)))
                .filter_map(|(a, f)| self.features.get(f).map(|feat| (a, feat.intensity)))
                .max_by(|x, y| x.1.total_cmp(&y.1));
            if let Some((a, _)) = loudest {
                if let Some(mass) = computer.precursor_mass(clusters[a].theta.exp(), default_adduct) {
                    out.masses.push(PrecursorMass::new(mass));
                    out.by_cluster[a] = Some(0);
                }
            }
        }
        out
    }

    /// Labels isotope peaks and looks up identities of the remaining
    /// precursors.
    fn annotate_metabolite(
        &mut self,
        key: MetaboliteKey,
        metabolite: &MetaboliteDraw,
        precursors: &MetabolitePrecursors,
    ) {
        let masses = &precursors.masses;
        let mut isotope_labels: Vec<Vec<String>> = vec![Vec::new(); masses.len()];
        for (p1, pc1) in masses.iter().enumerate() {
            for (p2, pc2) in masses.iter().enumerate() {
                if p1 == p2 {
                    continue;
                }
                for (label, diff) in ISOTOPE_DIFFS.iter() {
                    if pc2.within_tolerance(pc1.mass + diff, self.ppm) {
                        isotope_labels[p2].push(format!("{} of {:.5}", label, pc1.mass));
                    }
                }
            }
        }

        for (a, cluster) in metabolite.mass_clusters.iter().enumerate() {
            let Some(p) = precursors.by_cluster[a] else {
                continue;
            };
            if !isotope_labels[p].is_empty() {
                for f in cluster.features.iter() {
                    for label in isotope_labels[p].iter() {
                        self.isotopes.annotate(f, label.as_str());
                    }
                }
                continue;
            }
            let Some(lookup) = self.lookup.as_mut() else {
                continue;
            };
            let mass = masses[p].mass;
            let compounds = lookup.get(mass, 3.0 * self.ppm).to_vec();
            for compound in compounds.iter() {
                for f in cluster.features.iter() {
                    self.metabolite_features.annotate(f, compound.formula.as_str());
                }
                self.metabolites
                    .annotate(&key, format!("{} @ m/z {:.5}", compound.formula, mass));
            }
        }
    }

    pub fn samples_taken(&self) -> usize {
        self.samples_taken
    }

    pub fn results(&self) -> &HdpAlignmentResults {
        &self.results
    }

    pub fn last_sample(&self) -> Option<&HdpSingleSample> {
        self.last_sample.as_ref()
    }

    pub fn ionisation_mode(&self) -> Option<IonisationMode> {
        self.adducts.as_ref().map(|(mode, _)| *mode)
    }

    pub fn ionisation_product_annotations(&self) -> &HdpAnnotation<FeatureKey> {
        &self.ionisation_products
    }

    pub fn isotope_annotations(&self) -> &HdpAnnotation<FeatureKey> {
        &self.isotopes
    }

    pub fn metabolite_feature_annotations(&self) -> &HdpAnnotation<FeatureKey> {
        &self.metabolite_features
    }

    pub fn metabolite_annotations(&self) -> &HdpAnnotation<MetaboliteKey> {
        &self.metabolites
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adducts::{
        AdductTransform,
        ELECTRON_MASS,
    };
    use crate::draws::MassClusterDraw;
    use crate::identity::{
        Compound,
        InMemoryCompoundDb,
    };
    use mzalign::FeatureInput;

    const GLUCOSE: f64 = 180.06339;

    fn key(sample_id: usize, feature_id: usize) -> FeatureKey {
        FeatureKey {
            sample_id,
            feature_id,
        }
    }

    fn cluster(ion: f64, features: Vec<FeatureKey>) -> MassClusterDraw {
        MassClusterDraw {
            theta: ion.ln(),
            features,
        }
    }

    fn ion(adduct: &str, neutral: f64) -> f64 {
        AdductTransform::parse(adduct).unwrap().ion_mass(neutral)
    }

    fn samples(ions: &[f64]) -> Vec<Sample> {
        (0..2)
            .map(|id| {
                let inputs: Vec<FeatureInput> = ions
                    .iter()
                    .enumerate()
                    .map(|(n, m)| FeatureInput {
                        mass: *m,
                        rt: 60.0,
                        intensity: 1000.0 * (n + 1) as f64,
                    })
                    .collect();
                Sample::new(id, format!("s{}", id), &inputs).unwrap()
            })
            .collect()
    }

    fn draw(index: usize, clusters: Vec<MassClusterDraw>) -> HdpSingleSample {
        HdpSingleSample {
            index,
            metabolites: vec![MetaboliteDraw {
                ti: 60.0,
                rt_clusters: Vec::new(),
                mass_clusters: clusters,
            }],
            frozen: Vec::new(),
        }
    }

    #[test]
    fn test_adduct_pair_is_annotated() {
        let h = ion("M+H", GLUCOSE);
        let na = ion("M+Na", GLUCOSE);
        let samples = samples(&[h, na]);
        let mut processor =
            HdpSampleProcessor::new(&samples, 2.0, Some(IonisationMode::Positive)).unwrap();
        let d = draw(
            0,
            vec![
                cluster(h, vec![key(0, 0), key(1, 0)]),
                cluster(na, vec![key(0, 1), key(1, 1)]),
            ],
        );
        processor.process(&[d.clone(), d]);

        let annots = processor.ionisation_product_annotations();
        assert_eq!(annots.count(&key(0, 0), "M+H"), 2);
        assert_eq!(annots.count(&key(1, 1), "M+Na"), 2);
        assert_eq!(processor.samples_taken(), 2);
        assert_eq!(processor.results().pair_probability(key(0, 0), key(1, 0)), 1.0);
    }

    #[test]
    fn test_identity_and_isotope_annotations() {
        let h = ion("M+H", GLUCOSE);
        let na = ion("M+Na", GLUCOSE);
        let heavy = GLUCOSE + ISOTOPE_DIFFS[0].1;
        let heavy_h = ion("M+H", heavy);
        let heavy_na = ion("M+Na", heavy);
        let samples = samples(&[h, na, heavy_h, heavy_na]);
        let db = InMemoryCompoundDb::new(vec![Compound {
            name: "glucose".into(),
            formula: "C6H12O6".into(),
            mass: GLUCOSE,
        }]);
        let mut processor = HdpSampleProcessor::new(&samples, 2.0, Some(IonisationMode::Positive))
            .unwrap()
            .with_identity_lookup(Arc::new(db));
        let d = draw(
            4,
            vec![
                cluster(h, vec![key(0, 0), key(1, 0)]),
                cluster(na, vec![key(0, 1), key(1, 1)]),
                cluster(heavy_h, vec![key(0, 2), key(1, 2)]),
                cluster(heavy_na, vec![key(0, 3), key(1, 3)]),
            ],
        );
        processor.process(&[d]);

        assert_eq!(processor.metabolite_feature_annotations().count(&key(0, 0), "C6H12O6"), 1);
        let label = format!("C13 of {:.5}", GLUCOSE);
        let found_label = processor
            .isotope_annotations()
            .get(&key(1, 2))
            .map(|labels| labels.keys().any(|l| l.starts_with("C13 of ")))
            .unwrap_or(false);
        assert!(found_label, "expected {}", label);
        assert!(processor.isotope_annotations().get(&key(0, 0)).is_none());

        let met = MetaboliteKey {
            draw: 4,
            metabolite: 0,
        };
        let labels = processor.metabolite_annotations().get(&met).unwrap();
        assert!(labels.keys().all(|l| l.starts_with("C6H12O6 @ m/z ")));
    }

    #[test]
    fn test_fallback_uses_most_intense_peak() {
        let proton = 1.0078250319 - ELECTRON_MASS;
        let samples = samples(&[GLUCOSE + proton, 500.0]);
        let mut processor =
            HdpSampleProcessor::new(&samples, 2.0, Some(IonisationMode::Positive)).unwrap();
        let metabolite = MetaboliteDraw {
            ti: 60.0,
            rt_clusters: Vec::new(),
            mass_clusters: vec![
                cluster(GLUCOSE + proton, vec![key(0, 0)]),
                cluster(500.0, vec![key(0, 1)]),
            ],
        };
        let precursors = processor.annotate_ionisation_products(&metabolite);
        assert_eq!(precursors.masses.len(), 1);
        assert_eq!(precursors.by_cluster, vec![None, Some(0)]);
        assert!((precursors.masses[0].mass - (500.0 - proton)).abs() < 1e-6);
    }

    #[test]
    fn test_without_mode_only_counts() {
        let samples = samples(&[100.0]);
        let mut processor = HdpSampleProcessor::new(&samples, 2.0, None).unwrap();
        processor.process(&[draw(0, vec![cluster(100.0, vec![key(0, 0), key(1, 0)])])]);
        assert!(processor.ionisation_product_annotations().is_empty());
        assert_eq!(processor.last_sample().map(|d| d.index), Some(0));
    }
}
