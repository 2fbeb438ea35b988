//! Pairwise "same group" matrix over the features of one sample.
//!
//! Entries are probabilities in `[0, 1]` (or 0/1 indicators for deterministic
//! groupings). The matrix is symmetric and its diagonal is always 1.
//! Small samples use a dense buffer, samples above the configured threshold
//! keep only the non-zero entries per row.

use serde::{
    Deserialize,
    Serialize,
};

use crate::errors::{
    AlignmentError,
    DataProcessingError,
    Result,
    Stage,
};

/// Feature count above which the sparse representation is used.
pub const DEFAULT_SPARSE_THRESHOLD: usize = 1000;

/// Entries at or below this value are not stored in the sparse form.
const SPARSE_ZERO: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "storage")]
pub enum CoClusteringMatrix {
    #[serde(rename = "dense")]
    Dense { dim: usize, values: Vec<f64> },
    #[serde(rename = "sparse")]
    Sparse {
        dim: usize,
        // Sorted by column; both halves are stored.
        rows: Vec<Vec<(usize, f64)>>,
    },
}

fn out_of_range(value: f64, context: String) -> AlignmentError {
    AlignmentError::DataProcessing {
        stage: Stage::Grouping,
        error: DataProcessingError::ValueOutOfRange { value, context },
    }
}

impl CoClusteringMatrix {
    /// Identity matrix of size `dim`, sparse when `dim > sparse_threshold`.
    pub fn new(dim: usize, sparse_threshold: usize) -> Self {
        if dim > sparse_threshold {
            let rows = (0..dim).map(|i| vec![(i, 1.0)]).collect();
            CoClusteringMatrix::Sparse { dim, rows }
        } else {
            let mut values = vec![0.0; dim * dim];
            for i in 0..dim {
                values[i * dim + i] = 1.0;
            }
            CoClusteringMatrix::Dense { dim, values }
        }
    }

    /// Binary `Z·Zᵗ` from one group id per feature.
    ///
    /// # Example
    ///
    /// ```
    /// use mzalign::CoClusteringMatrix;
    ///
    /// let m = CoClusteringMatrix::from_assignments(&[1, 1, 2], 1000);
    /// assert_eq!(m.get(0, 1), 1.0);
    /// assert_eq!(m.get(0, 2), 0.0);
    /// assert_eq!(m.get(2, 2), 1.0);
    /// ```
    pub fn from_assignments(assignments: &[u32], sparse_threshold: usize) -> Self {
        let dim = assignments.len();
        let mut members: std::collections::HashMap<u32, Vec<usize>> =
            std::collections::HashMap::new();
        for (i, g) in assignments.iter().enumerate() {
            members.entry(*g).or_default().push(i);
        }
        let mut out = Self::new(dim, sparse_threshold);
        for group in members.values() {
            for (pos, &i) in group.iter().enumerate() {
                for &j in group[pos + 1..].iter() {
                    out.put(i, j, 1.0);
                }
            }
        }
        out
    }

    /// Builds a matrix from dense rows (as returned by a grouping backend or
    /// read from disk), checking shape, symmetry and value range.
    pub fn from_dense_rows(rows: &[Vec<f64>], sparse_threshold: usize) -> Result<Self> {
        let dim = rows.len();
        for row in rows.iter() {
            if row.len() != dim {
                return Err(AlignmentError::DataProcessing {
                    stage: Stage::Grouping,
                    error: DataProcessingError::ExpectedSquareMatrix {
                        rows: dim,
                        cols: row.len(),
                        context: "co-clustering matrix".to_string(),
                    },
                });
            }
        }
        let mut out = Self::new(dim, sparse_threshold);
        for i in 0..dim {
            for j in (i + 1)..dim {
                let (a, b) = (rows[i][j], rows[j][i]);
                if (a - b).abs() > 1e-6 {
                    return Err(out_of_range(
                        a - b,
                        format!("asymmetric co-clustering entry ({}, {})", i, j),
                    ));
                }
                out.set(i, j, a)?;
            }
        }
        Ok(out)
    }

    pub fn dim(&self) -> usize {
        match self {
            CoClusteringMatrix::Dense { dim, .. } | CoClusteringMatrix::Sparse { dim, .. } => *dim,
        }
    }

    pub fn is_sparse(&self) -> bool {
        matches!(self, CoClusteringMatrix::Sparse { .. })
    }

    /// Returns 0 for indices outside the matrix.
    pub fn get(&self, i: usize, j: usize) -> f64 {
        match self {
            CoClusteringMatrix::Dense { dim, values } => {
                if i >= *dim || j >= *dim {
                    return 0.0;
                }
                values[i * dim + j]
            }
            CoClusteringMatrix::Sparse { dim, rows } => {
                if i >= *dim || j >= *dim {
                    return 0.0;
                }
                match rows[i].binary_search_by(|(col, _)| col.cmp(&j)) {
                    Ok(pos) => rows[i][pos].1,
                    Err(_) => 0.0,
                }
            }
        }
    }

    /// Sets both `(i, j)` and `(j, i)`. The diagonal is pinned at 1.
    pub fn set(&mut self, i: usize, j: usize, value: f64) -> Result<()> {
        let dim = self.dim();
        if i >= dim || j >= dim {
            return Err(out_of_range(
                i.max(j) as f64,
                format!("index outside co-clustering matrix of size {}", dim),
            ));
        }
        if !(0.0..=1.0).contains(&value) {
            return Err(out_of_range(
                value,
                format!("co-clustering entry ({}, {})", i, j),
            ));
        }
        if i == j {
            return Ok(());
        }
        self.put(i, j, value);
        Ok(())
    }

    fn put(&mut self, i: usize, j: usize, value: f64) {
        match self {
            CoClusteringMatrix::Dense { dim, values } => {
                values[i * *dim + j] = value;
                values[j * *dim + i] = value;
            }
            CoClusteringMatrix::Sparse { rows, .. } => {
                put_sparse(&mut rows[i], j, value);
                put_sparse(&mut rows[j], i, value);
            }
        }
    }

    /// Non-zero entries of row `i` as `(column, value)`, diagonal included.
    pub fn row(&self, i: usize) -> Vec<(usize, f64)> {
        match self {
            CoClusteringMatrix::Dense { dim, values } => {
                if i >= *dim {
                    return Vec::new();
                }
                values[i * dim..(i + 1) * dim]
                    .iter()
                    .enumerate()
                    .filter(|(_, v)| **v > SPARSE_ZERO)
                    .map(|(j, v)| (j, *v))
                    .collect()
            }
            CoClusteringMatrix::Sparse { rows, .. } => rows.get(i).cloned().unwrap_or_default(),
        }
    }

    /// Off-diagonal non-zero entries of the upper triangle.
    pub fn nonzero_pairs(&self) -> Vec<(usize, usize, f64)> {
        (0..self.dim())
            .flat_map(|i| {
                self.row(i)
                    .into_iter()
                    .filter(move |(j, _)| *j > i)
                    .map(move |(j, v)| (i, j, v))
            })
            .collect()
    }

    pub fn has_unit_diagonal(&self) -> bool {
        (0..self.dim()).all(|i| self.get(i, i) == 1.0)
    }

    /// Dense copy of the matrix, row major.
    pub fn to_dense_rows(&self) -> Vec<Vec<f64>> {
        let dim = self.dim();
        let mut out = vec![vec![0.0; dim]; dim];
        for (i, row) in out.iter_mut().enumerate() {
            for (j, v) in self.row(i) {
                row[j] = v;
            }
        }
        out
    }
}

fn put_sparse(row: &mut Vec<(usize, f64)>, col: usize, value: f64) {
    match row.binary_search_by(|(c, _)| c.cmp(&col)) {
        Ok(pos) => {
            if value <= SPARSE_ZERO {
                row.remove(pos);
            } else {
                row[pos].1 = value;
            }
        }
        Err(pos) => {
            if value > SPARSE_ZERO {
                row.insert(pos, (col, value));
            }
        }
    }
}
