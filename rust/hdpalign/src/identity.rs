//! Candidate identities for precursor masses.

use serde::{
    Deserialize,
    Serialize,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{
    debug,
    warn,
};

use crate::errors::LookupError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Compound {
    pub name: String,
    pub formula: String,
    pub mass: f64,
}

/// A chemical database that can be searched by mass.
pub trait IdentityLookup: Send + Sync {
    /// Compounds whose mass lies within `ppm` parts-per-million of `mass`.
    fn lookup(&self, mass: f64, ppm: f64) -> std::result::Result<Vec<Compound>, LookupError>;
}

/// Compounds held in memory, sorted by mass.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCompoundDb {
    compounds: Vec<Compound>,
}

impl InMemoryCompoundDb {
    pub fn new(mut compounds: Vec<Compound>) -> Self {
        compounds.sort_by(|a, b| a.mass.total_cmp(&b.mass));
        Self { compounds }
    }

    pub fn len(&self) -> usize {
        self.compounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.compounds.is_empty()
    }
}

impl IdentityLookup for InMemoryCompoundDb {
    fn lookup(&self, mass: f64, ppm: f64) -> std::result::Result<Vec<Compound>, LookupError> {
        if !(mass.is_finite() && mass > 0.0) {
            return Err(LookupError::InvalidQuery {
                mass,
                msg: "mass must be positive".to_string(),
            });
        }
        let delta = mass * ppm / 1e6;
        let lo = self.compounds.partition_point(|c| c.mass < mass - delta);
        Ok(self.compounds[lo..]
            .iter()
            .take_while(|c| c.mass <= mass + delta)
            .cloned()
            .collect())
    }
}

/// Wraps a lookup with a cache keyed by query window and a retry budget.
///
/// A query that keeps failing is logged and cached as empty, so the run goes
/// on with fewer annotations.
pub struct CachedLookup {
    inner: Arc<dyn IdentityLookup>,
    retries: usize,
    cache: HashMap<(u64, u64), Vec<Compound>>,
    failures: usize,
}

impl CachedLookup {
    pub fn new(inner: Arc<dyn IdentityLookup>, retries: usize) -> Self {
        Self {
            inner,
            retries,
            cache: HashMap::new(),
            failures: 0,
        }
    }

    /// Number of queries that ended up recorded as empty after failing.
    pub fn failures(&self) -> usize {
        self.failures
    }

    pub fn get(&mut self, mass: f64, ppm: f64) -> &[Compound] {
        let key = (mass.to_bits(), ppm.to_bits());
        if !self.cache.contains_key(&key) {
            let found = self.query(mass, ppm);
            self.cache.insert(key, found);
        }
        self.cache.get(&key).map(|v| v.as_slice()).unwrap_or(&[])
    }

    fn query(&mut self, mass: f64, ppm: f64) -> Vec<Compound> {
        let mut attempt = 0;
        loop {
            match self.inner.lookup(mass, ppm) {
                Ok(found) => {
                    debug!("Lookup of {:.5} found {} compounds", mass, found.len());
                    return found;
                }
                Err(e) if attempt < self.retries => {
                    debug!("Retrying lookup of {:.5} after error: {}", mass, e);
                    attempt += 1;
                }
                Err(e) => {
                    warn!("Identity lookup failed for mass {:.5}: {}", mass, e);
                    self.failures += 1;
                    return Vec::new();
                }
            }
        }
    }
}
