use serde::{
    Deserialize,
    Serialize,
};
use std::path::{
    Path,
    PathBuf,
};
use tracing::{
    error,
    info,
};

use super::GroupingStrategy;
use crate::coclustering::CoClusteringMatrix;
use crate::errors::{
    AlignmentError,
    Result,
    Stage,
};
use crate::models::{
    FeatureGroup,
    Sample,
};

/// On-disk form of one sample's grouping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedGroupingFile {
    pub sample: String,
    pub assignments: Vec<u32>,
    pub coclustering: CoClusteringMatrix,
}

pub fn grouping_path(dir: &Path, sample_name: &str) -> PathBuf {
    dir.join(format!("{}.grouping.json", sample_name))
}

/// Writes `<dir>/<sample>.grouping.json`.
pub fn persist_grouping(
    dir: &Path,
    sample: &Sample,
    assignments: &[u32],
    coclustering: &CoClusteringMatrix,
) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|e| AlignmentError::Io {
        source: e,
        path: Some(dir.to_path_buf()),
    })?;
    let path = grouping_path(dir, &sample.name);
    let file = std::fs::File::create(&path).map_err(|e| AlignmentError::Io {
        source: e,
        path: Some(path.clone()),
    })?;
    let saved = SavedGroupingFile {
        sample: sample.name.clone(),
        assignments: assignments.to_vec(),
        coclustering: coclustering.clone(),
    };
    serde_json::to_writer(std::io::BufWriter::new(file), &saved)?;
    info!("Saved grouping of '{}' to {}", sample.name, path.display());
    Ok(())
}

pub fn load_grouping(dir: &Path, sample_name: &str) -> Result<SavedGroupingFile> {
    let path = grouping_path(dir, sample_name);
    let file = std::fs::File::open(&path).map_err(|e| AlignmentError::Io {
        source: e,
        path: Some(path.clone()),
    })?;
    let saved: SavedGroupingFile = serde_json::from_reader(std::io::BufReader::new(file))?;
    Ok(saved)
}

/// Reuses groupings persisted by an earlier run.
///
/// A missing or inconsistent file is fatal, same as a failing backend.
#[derive(Debug, Clone)]
pub struct SavedGrouping {
    directory: PathBuf,
    sparse_threshold: usize,
}

impl SavedGrouping {
    pub fn new(directory: PathBuf, sparse_threshold: usize) -> Self {
        Self {
            directory,
            sparse_threshold,
        }
    }
}

impl GroupingStrategy for SavedGrouping {
    fn name(&self) -> &'static str {
        "saved"
    }

    fn group(&mut self, sample: &mut Sample) -> Result<Vec<FeatureGroup>> {
        let saved = match load_grouping(&self.directory, &sample.name) {
            Ok(x) => x,
            Err(e) => {
                error!("Unable to load saved grouping of '{}': {}", sample.name, e);
                return Err(AlignmentError::backend(Stage::Grouping, e));
            }
        };
        if saved.sample != sample.name {
            return Err(AlignmentError::backend(
                Stage::Grouping,
                format!(
                    "saved grouping belongs to '{}', expected '{}'",
                    saved.sample, sample.name
                ),
            ));
        }
        // Honour the current threshold even if the file was written with another one.
        let matrix = if saved.coclustering.is_sparse() == (sample.len() > self.sparse_threshold) {
            saved.coclustering
        } else {
            let mut m = CoClusteringMatrix::new(saved.coclustering.dim(), self.sparse_threshold);
            for (i, j, v) in saved.coclustering.nonzero_pairs() {
                m.set(i, j, v)?;
            }
            m
        };
        sample.apply_grouping(&saved.assignments, matrix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grouping::GreedyGrouping;
    use crate::models::FeatureInput;

    fn sample(name: &str) -> Sample {
        let inputs: Vec<FeatureInput> = [1.0, 2.0, 30.0]
            .iter()
            .map(|rt| FeatureInput {
                mass: 120.0,
                rt: *rt,
                intensity: 1.0,
            })
            .collect();
        Sample::new(0, name, &inputs).unwrap()
    }

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "mzalign-saved-{}-{}",
            tag,
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_saved_grouping_reproduces_persisted_result() {
        let dir = temp_dir("roundtrip");
        let mut original = sample("s1");
        GreedyGrouping::new(5.0, 1000).group(&mut original).unwrap();
        let assignments: Vec<u32> = original
            .features()
            .iter()
            .map(|f| f.group_id.unwrap())
            .collect();
        persist_grouping(
            &dir,
            &original,
            &assignments,
            original.coclustering().unwrap(),
        )
        .unwrap();

        let mut fresh = sample("s1");
        let groups = SavedGrouping::new(dir.clone(), 1000)
            .group(&mut fresh)
            .unwrap();
        assert_eq!(groups, original.groups());
        assert_eq!(fresh.coclustering(), original.coclustering());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_missing_file_is_fatal() {
        let dir = temp_dir("missing");
        let mut s = sample("nope");
        let err = SavedGrouping::new(dir, 1000).group(&mut s).err().unwrap();
        assert_eq!(err.stage(), Stage::Grouping);
    }
}
