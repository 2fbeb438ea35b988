use serde::{
    Deserialize,
    Serialize,
};

/// Slack added to every window so values sitting exactly on the boundary
/// (after decimal-to-binary rounding) still compare as inside.
const BOUNDARY_SLACK: f64 = 1e-9;

/// Tolerance settings used to decide if two features can be the same entity.
///
/// Example:
/// ```
/// use mzalign::Tolerance;
///
/// let tolerance = Tolerance::default();
/// assert!(tolerance.mass_within(500.0, 500.001));
/// ```
///
/// Convention:
/// Windows are symmetric and given as positive values, a tolerance of 1 on
/// a value of 10 means the range (9, 11).
/// Retention time tolerances are always absolute and in seconds, only the
/// mass dimension supports parts-per-million.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Tolerance {
    pub mass: MassTolerance,
    pub rt: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum MassTolerance {
    #[serde(rename = "da")]
    Absolute(f64),
    #[serde(rename = "ppm")]
    Ppm(f64),
}

impl Default for Tolerance {
    fn default() -> Self {
        Tolerance {
            mass: MassTolerance::Ppm(10.0),
            rt: 30.0,
        }
    }
}

impl MassTolerance {
    /// Half width of the window around `mass` in daltons.
    pub fn window_at(&self, mass: f64) -> f64 {
        match self {
            MassTolerance::Absolute(da) => *da,
            MassTolerance::Ppm(ppm) => mass.abs() * ppm / 1e6,
        }
    }

    pub fn is_ppm(&self) -> bool {
        matches!(self, MassTolerance::Ppm(_))
    }

    pub fn value(&self) -> f64 {
        match self {
            MassTolerance::Absolute(x) | MassTolerance::Ppm(x) => *x,
        }
    }
}

/// Decides whether `candidate` is within `window` of `reference`.
///
/// When `use_ppm` is set, the window is read as parts-per-million. The ppm
/// base is the larger magnitude of the two values, which keeps the relation
/// symmetric: `within_tolerance(a, b, ..) == within_tolerance(b, a, ..)`.
///
/// # Example
///
/// ```
/// use mzalign::tolerance::within_tolerance;
///
/// assert!(within_tolerance(100.0, 100.0005, 5.0, true));
/// assert!(!within_tolerance(100.0, 100.001, 5.0, true));
/// assert!(within_tolerance(10.0, 10.2, 1.0, false));
/// ```
pub fn within_tolerance(reference: f64, candidate: f64, window: f64, use_ppm: bool) -> bool {
    if window < 0.0 || reference.is_nan() || candidate.is_nan() {
        return false;
    }
    let half_width = if use_ppm {
        reference.abs().max(candidate.abs()) * window / 1e6
    } else {
        window
    };
    (reference - candidate).abs() <= half_width + BOUNDARY_SLACK
}

impl Tolerance {
    pub fn new(mass: MassTolerance, rt: f64) -> Self {
        Self { mass, rt }
    }

    pub fn mass_within(&self, reference: f64, candidate: f64) -> bool {
        within_tolerance(
            reference,
            candidate,
            self.mass.value(),
            self.mass.is_ppm(),
        )
    }

    pub fn rt_within(&self, reference: f64, candidate: f64) -> bool {
        within_tolerance(reference, candidate, self.rt, false)
    }

    /// Both dimensions at once.
    pub fn within(&self, ref_mass: f64, ref_rt: f64, mass: f64, rt: f64) -> bool {
        self.mass_within(ref_mass, mass) && self.rt_within(ref_rt, rt)
    }

    /// Inclusive mass range searched around `mass`.
    ///
    /// The range is slightly wider than [`Tolerance::mass_within`] accepts for ppm
    /// windows (it uses the upper bound as base), so range queries followed by
    /// the exact check never miss a match.
    pub fn mass_range(&self, mass: f64) -> (f64, f64) {
        let upper_base = match self.mass {
            MassTolerance::Absolute(_) => mass,
            MassTolerance::Ppm(ppm) => mass.abs() * (1.0 + ppm / 1e6),
        };
        let half = self.mass.window_at(upper_base) + BOUNDARY_SLACK;
        (mass - half, mass + half)
    }

    pub fn rt_range(&self, rt: f64) -> (f64, f64) {
        let half = self.rt + BOUNDARY_SLACK;
        (rt - half, rt + half)
    }

    pub fn with_rt_tolerance(&self, rt: f64) -> Self {
        Self { mass: self.mass, rt }
    }

    pub fn validate(&self) -> crate::Result<()> {
        let mass = self.mass.value();
        if !(mass.is_finite() && mass >= 0.0) {
            return Err(crate::AlignmentError::config(format!(
                "mass tolerance must be finite and non-negative, got {}",
                mass
            )));
        }
        if !(self.rt.is_finite() && self.rt >= 0.0) {
            return Err(crate::AlignmentError::config(format!(
                "rt tolerance must be finite and non-negative, got {}",
                self.rt
            )));
        }
        Ok(())
    }
}
