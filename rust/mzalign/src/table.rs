//! Cross-sample correspondence table.

use serde::{
    Deserialize,
    Serialize,
};
use std::collections::{
    BTreeSet,
    HashMap,
};
use std::io::BufRead;
use tracing::{
    info,
    warn,
};

use crate::errors::{
    AlignmentError,
    Result,
};
use crate::models::{
    Feature,
    FeatureKey,
    Sample,
};
use crate::tolerance::Tolerance;

/// Features believed to be the same entity across samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentRow {
    pub row_id: usize,
    pub features: Vec<Feature>,
    pub score: Option<f64>,
}

/// Two features of a row, ordered by key.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeaturePair<'a> {
    pub first: &'a Feature,
    pub second: &'a Feature,
}

impl AlignmentRow {
    pub fn new(row_id: usize, features: Vec<Feature>) -> Self {
        Self {
            row_id,
            features,
            score: None,
        }
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.score = Some(score);
        self
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// A row is aligned once it holds more than one feature.
    pub fn is_aligned(&self) -> bool {
        self.features.len() > 1
    }

    pub fn avg_mass(&self) -> f64 {
        if self.features.is_empty() {
            return f64::NAN;
        }
        self.features.iter().map(|f| f.mass).sum::<f64>() / self.features.len() as f64
    }

    pub fn avg_rt(&self) -> f64 {
        if self.features.is_empty() {
            return f64::NAN;
        }
        self.features.iter().map(|f| f.rt).sum::<f64>() / self.features.len() as f64
    }

    pub fn contains(&self, key: FeatureKey) -> bool {
        self.features.iter().any(|f| f.key() == key)
    }

    pub fn contains_sample(&self, sample_id: usize) -> bool {
        self.features.iter().any(|f| f.sample_id == sample_id)
    }

    pub fn sample_ids(&self) -> BTreeSet<usize> {
        self.features.iter().map(|f| f.sample_id).collect()
    }

    /// `(sample_id, group_id)` of every grouped feature.
    pub fn group_ids(&self) -> BTreeSet<(usize, u32)> {
        self.features
            .iter()
            .filter_map(|f| f.group_id.map(|g| (f.sample_id, g)))
            .collect()
    }

    /// True when no two features come from the same sample.
    pub fn has_distinct_samples(&self) -> bool {
        self.sample_ids().len() == self.features.len()
    }

    pub fn keys(&self) -> Vec<FeatureKey> {
        self.features.iter().map(|f| f.key()).collect()
    }

    /// Every unordered pair of features in the row.
    pub fn pairs(&self) -> Vec<FeaturePair<'_>> {
        let mut out = Vec::new();
        for (i, a) in self.features.iter().enumerate() {
            for b in self.features[i + 1..].iter() {
                let (first, second) = if a.key() <= b.key() { (a, b) } else { (b, a) };
                out.push(FeaturePair { first, second });
            }
        }
        out
    }

    /// One singleton row per feature, ids starting at `first_id`.
    pub fn explode(self, first_id: usize) -> Vec<AlignmentRow> {
        self.features
            .into_iter()
            .enumerate()
            .map(|(i, mut f)| {
                f.aligned = false;
                AlignmentRow::new(first_id + i, vec![f])
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorrespondenceTable {
    pub id: String,
    rows: Vec<AlignmentRow>,
}

impl CorrespondenceTable {
    pub fn new(id: impl Into<String>, rows: Vec<AlignmentRow>) -> Self {
        Self {
            id: id.into(),
            rows,
        }
    }

    /// Every feature of every sample in its own row.
    pub fn singletons(id: impl Into<String>, samples: &[Sample]) -> Self {
        let rows = samples
            .iter()
            .flat_map(|s| s.features().iter().copied())
            .enumerate()
            .map(|(i, f)| AlignmentRow::new(i, vec![f]))
            .collect();
        Self::new(id, rows)
    }

    pub fn rows(&self) -> &[AlignmentRow] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<AlignmentRow> {
        self.rows
    }

    pub fn set_rows(&mut self, rows: Vec<AlignmentRow>) {
        self.rows = rows;
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Largest row id, `None` for an empty table.
    pub fn last_row_id(&self) -> Option<usize> {
        self.rows.iter().map(|r| r.row_id).max()
    }

    /// Id the next new row should take.
    pub fn next_row_id(&self) -> usize {
        self.last_row_id().map_or(0, |x| x + 1)
    }

    pub fn feature_count(&self) -> usize {
        self.rows.iter().map(|r| r.len()).sum()
    }

    /// Keys of all features, sorted. Duplicates are kept.
    pub fn feature_keys(&self) -> Vec<FeatureKey> {
        let mut keys: Vec<FeatureKey> = self.rows.iter().flat_map(|r| r.keys()).collect();
        keys.sort();
        keys
    }

    /// Rows whose average mass and retention time are within `tolerance` of
    /// those of `reference`. The reference itself is included when present.
    pub fn rows_in_range(&self, reference: &AlignmentRow, tolerance: &Tolerance) -> Vec<&AlignmentRow> {
        let (mass, rt) = (reference.avg_mass(), reference.avg_rt());
        self.rows
            .iter()
            .filter(|r| tolerance.within(mass, rt, r.avg_mass(), r.avg_rt()))
            .collect()
    }

    pub fn aligned_rows(&self) -> Vec<&AlignmentRow> {
        self.rows.iter().filter(|r| r.is_aligned()).collect()
    }

    pub fn unaligned_rows(&self) -> Vec<&AlignmentRow> {
        self.rows.iter().filter(|r| !r.is_aligned()).collect()
    }

    pub fn row_containing(&self, key: FeatureKey) -> Option<&AlignmentRow> {
        self.rows.iter().find(|r| r.contains(key))
    }

    /// True if both features sit in the same multi-feature row.
    pub fn is_aligned(&self, a: FeatureKey, b: FeatureKey) -> bool {
        if a == b {
            return false;
        }
        self.rows
            .iter()
            .any(|r| r.is_aligned() && r.contains(a) && r.contains(b))
    }

    /// Sets the `aligned` flag of every feature from the row layout.
    pub fn mark_aligned(&mut self) {
        for row in self.rows.iter_mut() {
            let aligned = row.is_aligned();
            row.features.iter_mut().for_each(|f| f.aligned = aligned);
        }
    }

    /// Reads the correspondence output of an external aligner.
    ///
    /// One feature per line, whitespace separated:
    /// `groupId sampleName featureIdx [mass rt] [prob annotation...]`.
    /// Lines sharing a `groupId` form one row, rows keep the order in which
    /// their group first appears. Empty lines and lines starting with `#` are
    /// ignored. Lines naming an unknown sample or an out-of-range feature
    /// index are skipped with a warning. A probability column, when present,
    /// becomes the row score (the mean over the row's lines).
    ///
    /// Two features of the same sample sharing a group are kept in one row.
    pub fn from_correspondence_reader<R: BufRead>(
        id: impl Into<String>,
        reader: R,
        samples: &[Sample],
    ) -> Result<Self> {
        let by_name: HashMap<&str, &Sample> =
            samples.iter().map(|s| (s.name.as_str(), s)).collect();

        let mut order: Vec<String> = Vec::new();
        let mut grouped: HashMap<String, (Vec<Feature>, Vec<f64>)> = HashMap::new();
        let mut skipped = 0usize;

        for (line_no, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| AlignmentError::Io {
                source: e,
                path: None,
            })?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let tokens: Vec<&str> = trimmed.split_whitespace().collect();
            if tokens.len() < 3 {
                warn!(
                    "Skipping correspondence line {}: expected at least 3 columns",
                    line_no + 1
                );
                skipped += 1;
                continue;
            }
            let Some(sample) = by_name.get(tokens[1]) else {
                warn!(
                    "Skipping correspondence line {}: unknown sample '{}'",
                    line_no + 1,
                    tokens[1]
                );
                skipped += 1;
                continue;
            };
            let feature = match tokens[2].parse::<usize>() {
                Ok(idx) => sample.feature(idx),
                Err(_) => None,
            };
            let Some(feature) = feature else {
                warn!(
                    "Skipping correspondence line {}: feature index '{}' out of range for '{}'",
                    line_no + 1,
                    tokens[2],
                    sample.name
                );
                skipped += 1;
                continue;
            };
            let prob = match tokens.len() {
                n if n >= 6 => tokens[5].parse::<f64>().ok(),
                4 => tokens[3].parse::<f64>().ok(),
                _ => None,
            };

            let group = tokens[0].to_string();
            let entry = grouped.entry(group.clone()).or_insert_with(|| {
                order.push(group);
                (Vec::new(), Vec::new())
            });
            entry.0.push(*feature);
            if let Some(p) = prob {
                entry.1.push(p);
            }
        }

        let rows: Vec<AlignmentRow> = order
            .into_iter()
            .enumerate()
            .filter_map(|(row_id, group)| {
                let (features, probs) = grouped.remove(&group)?;
                let mut row = AlignmentRow::new(row_id, features);
                if !probs.is_empty() {
                    row.score = Some(probs.iter().sum::<f64>() / probs.len() as f64);
                }
                Some(row)
            })
            .collect();

        info!(
            "Read {} correspondence rows ({} lines skipped)",
            rows.len(),
            skipped
        );
        let mut table = Self::new(id, rows);
        table.mark_aligned();
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FeatureInput;
    use crate::tolerance::MassTolerance;

    fn samples() -> Vec<Sample> {
        let a = vec![
            FeatureInput {
                mass: 100.0,
                rt: 10.0,
                intensity: 1.0,
            },
            FeatureInput {
                mass: 200.0,
                rt: 50.0,
                intensity: 1.0,
            },
        ];
        let b = vec![
            FeatureInput {
                mass: 100.0004,
                rt: 10.5,
                intensity: 1.0,
            },
            FeatureInput {
                mass: 200.001,
                rt: 51.0,
                intensity: 1.0,
            },
        ];
        vec![
            Sample::new(0, "a", &a).unwrap(),
            Sample::new(1, "b", &b).unwrap(),
        ]
    }

    #[test]
    fn test_row_statistics() {
        let s = samples();
        let row = AlignmentRow::new(
            0,
            vec![s[0].features()[0], s[1].features()[0]],
        );
        assert!(row.is_aligned());
        assert!((row.avg_mass() - 100.0002).abs() < 1e-9);
        assert!((row.avg_rt() - 10.25).abs() < 1e-9);
        assert!(row.has_distinct_samples());
        assert_eq!(row.pairs().len(), 1);
    }

    #[test]
    fn test_queries() {
        let s = samples();
        let rows = vec![
            AlignmentRow::new(3, vec![s[0].features()[0], s[1].features()[0]]),
            AlignmentRow::new(7, vec![s[0].features()[1]]),
            AlignmentRow::new(5, vec![s[1].features()[1]]),
        ];
        let table = CorrespondenceTable::new("t", rows);
        assert_eq!(table.last_row_id(), Some(7));
        assert_eq!(table.next_row_id(), 8);
        assert_eq!(table.aligned_rows().len(), 1);
        assert_eq!(table.unaligned_rows().len(), 2);
        let a0 = s[0].features()[0].key();
        let b0 = s[1].features()[0].key();
        let a1 = s[0].features()[1].key();
        assert!(table.is_aligned(a0, b0));
        assert!(!table.is_aligned(a0, a1));
        assert_eq!(table.row_containing(a1).map(|r| r.row_id), Some(7));

        let tol = Tolerance::new(MassTolerance::Ppm(10.0), 2.0);
        let in_range: Vec<usize> = table
            .rows_in_range(&table.rows()[1], &tol)
            .iter()
            .map(|r| r.row_id)
            .collect();
        assert_eq!(in_range, vec![7, 5]);
    }

    #[test]
    fn test_explode_assigns_consecutive_ids() {
        let s = samples();
        let row = AlignmentRow::new(0, vec![s[0].features()[0], s[1].features()[0]]);
        let exploded = row.explode(10);
        let ids: Vec<usize> = exploded.iter().map(|r| r.row_id).collect();
        assert_eq!(ids, vec![10, 11]);
        assert!(exploded.iter().all(|r| r.len() == 1));
    }

    #[test]
    fn test_parse_correspondence_file() {
        let s = samples();
        let text = "\
# group sample feature mass rt prob annotation
1 a 0 100.0 10.0 0.9 foo
1 b 0 100.0004 10.5 0.7 foo
2 a 1
2 b 9
3 c 0
2 b 1
";
        let table = CorrespondenceTable::from_correspondence_reader("ext", text.as_bytes(), &s)
            .unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.rows()[0].len(), 2);
        assert!((table.rows()[0].score.unwrap() - 0.8).abs() < 1e-12);
        assert_eq!(table.rows()[1].len(), 2);
        assert_eq!(table.rows()[1].score, None);
        assert!(table.rows()[0].features.iter().all(|f| f.aligned));
    }

    #[test]
    fn test_parse_keeps_same_sample_rows() {
        let s = samples();
        let text = "1 a 0\n1 a 1\n";
        let table = CorrespondenceTable::from_correspondence_reader("ext", text.as_bytes(), &s)
            .unwrap();
        assert_eq!(table.len(), 1);
        assert!(!table.rows()[0].has_distinct_samples());
    }
}
