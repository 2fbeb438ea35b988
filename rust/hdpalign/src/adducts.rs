//! Ionisation product arithmetic.
//!
//! An adduct such as `2M+ACN+H` describes how a neutral precursor of mass `M`
//! becomes an observed ion. Each adduct reduces to a pair `(mul, sub)` so
//! that `ion = mul * M + sub`.

use crate::errors::{
    AlignmentError,
    Result,
};
use mzalign::IonisationMode;

pub const ELECTRON_MASS: f64 = 0.00054857990924;

pub const POSITIVE_ADDUCTS: [&str; 14] = [
    "M+2H",
    "M+H",
    "M+ACN+H",
    "2M+Na",
    "M+H+NH4",
    "M+NH4",
    "M+ACN+Na",
    "2M+ACN+H",
    "M+ACN+2H",
    "M+Na",
    "M+2ACN+H",
    "M+2ACN+2H",
    "M+CH3OH+H",
    "2M+H",
];

pub const NEGATIVE_ADDUCTS: [&str; 8] = [
    "M-H2O-H",
    "M+K-2H",
    "M-H",
    "M+FA-H",
    "M+Na-2H",
    "2M-H",
    "M+Cl",
    "2M+FA-H",
];

fn atom_mass(symbol: &str) -> Option<f64> {
    match symbol {
        "O" => Some(15.9949146223),
        "H" => Some(1.0078250319),
        "C" => Some(12.0),
        "N" => Some(14.0030740074),
        "Na" => Some(22.98976966),
        "K" => Some(38.9637069),
        "S" => Some(31.97207073),
        "Cl" => Some(34.96885268),
        "Br" => Some(78.9183371),
        _ => None,
    }
}

fn charge_of(component: &str) -> i32 {
    match component {
        "H" | "Na" | "NH4" | "K" => 1,
        "Cl" | "Br" => -1,
        _ => 0,
    }
}

fn expand_formula(component: &str) -> &str {
    match component {
        "IsoProp" => "C3H8O",
        "DMSO" => "C2H6OS",
        "ACN" => "C2H3N",
        "FA" => "CH2O2",
        other => other,
    }
}

fn leading_digit(s: &str) -> (Option<u32>, &str) {
    match s.chars().next().and_then(|c| c.to_digit(10)) {
        Some(d) => (Some(d), &s[1..]),
        None => (None, s),
    }
}

/// Monoisotopic mass of a formula made of single-digit counts, e.g. `C2H3N`.
fn formula_mass(adduct: &str, formula: &str) -> Result<f64> {
    let mut rest = formula;
    let mut total = 0.0;
    while !rest.is_empty() {
        let (symbol, mass) = match rest.get(..2).and_then(|two| atom_mass(two).map(|m| (two, m))) {
            Some(found) => found,
            None => {
                let one = rest.get(..1).unwrap_or(rest);
                let mass = atom_mass(one).ok_or_else(|| AlignmentError::Parse {
                    msg: format!("unknown element '{}' in adduct '{}'", rest, adduct),
                })?;
                (one, mass)
            }
        };
        rest = &rest[symbol.len()..];
        let (count, after) = leading_digit(rest);
        rest = after;
        total += count.unwrap_or(1) as f64 * mass;
    }
    Ok(total)
}

#[derive(Debug, Clone, PartialEq)]
pub struct AdductTransform {
    pub name: String,
    pub multiplicity: u32,
    pub charge: i32,
    pub mul: f64,
    pub sub: f64,
}

impl AdductTransform {
    pub fn parse(adduct: &str) -> Result<Self> {
        let parse_err = |msg: &str| AlignmentError::Parse {
            msg: format!("{} in adduct '{}'", msg, adduct),
        };
        let split = adduct
            .find(['+', '-'])
            .ok_or_else(|| parse_err("missing '+' or '-'"))?;
        let (mass_term, add_term) = adduct.split_at(split);
        let multiplicity = match leading_digit(mass_term) {
            (Some(d), "M") => d,
            (None, "M") => 1,
            _ => return Err(parse_err("malformed mass term")),
        };

        let mut charge = 0i32;
        let mut adduct_mass = 0.0;
        let mut components: Vec<(f64, &str)> = Vec::new();
        let mut start = 0usize;
        for (i, c) in add_term.char_indices().skip(1) {
            if c == '+' || c == '-' {
                components.push(Self::signed(&add_term[start..i]));
                start = i;
            }
        }
        components.push(Self::signed(&add_term[start..]));

        for (polarity, component) in components {
            let (fac, name) = leading_digit(component);
            if name.is_empty() {
                return Err(parse_err("empty component"));
            }
            let fac = fac.unwrap_or(1) as f64;
            let formula = expand_formula(name);
            charge += (fac * polarity) as i32 * charge_of(formula);
            adduct_mass += fac * polarity * formula_mass(adduct, formula)?;
        }
        if charge == 0 {
            return Err(parse_err("zero net charge"));
        }

        let abs_charge = charge.unsigned_abs() as f64;
        Ok(Self {
            name: adduct.to_string(),
            multiplicity,
            charge,
            mul: multiplicity as f64 / abs_charge,
            sub: (adduct_mass - charge as f64 * ELECTRON_MASS) / abs_charge,
        })
    }

    fn signed(component: &str) -> (f64, &str) {
        match component.strip_prefix('-') {
            Some(rest) => (-1.0, rest),
            None => (1.0, component.strip_prefix('+').unwrap_or(component)),
        }
    }

    pub fn precursor_mass(&self, ion_mass: f64) -> f64 {
        (ion_mass - self.sub) / self.mul
    }

    pub fn ion_mass(&self, precursor_mass: f64) -> f64 {
        precursor_mass * self.mul + self.sub
    }
}

/// Precursor masses of an ion under every adduct of one ionisation mode.
#[derive(Debug, Clone)]
pub struct AdductTransformComputer {
    transforms: Vec<AdductTransform>,
}

impl AdductTransformComputer {
    pub fn new(adducts: &[&str]) -> Result<Self> {
        let transforms = adducts
            .iter()
            .map(|a| AdductTransform::parse(a))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { transforms })
    }

    pub fn for_mode(mode: IonisationMode) -> Result<Self> {
        match mode {
            IonisationMode::Positive => Self::new(&POSITIVE_ADDUCTS),
            IonisationMode::Negative => Self::new(&NEGATIVE_ADDUCTS),
        }
    }

    pub fn transforms(&self) -> &[AdductTransform] {
        &self.transforms
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    /// One precursor mass per adduct, in adduct order.
    pub fn precursor_masses(&self, ion_mass: f64) -> Vec<f64> {
        self.transforms
            .iter()
            .map(|t| t.precursor_mass(ion_mass))
            .collect()
    }

    pub fn precursor_mass(&self, ion_mass: f64, adduct: &str) -> Option<f64> {
        self.transforms
            .iter()
            .find(|t| t.name == adduct)
            .map(|t| t.precursor_mass(ion_mass))
    }
}
