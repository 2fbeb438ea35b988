use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use tracing::warn;

use super::FeatureMatcher;
use crate::errors::{
    AlignmentError,
    Result,
};
use crate::models::Sample;
use crate::table::CorrespondenceTable;

/// Uses the correspondence file written by an external aligner as the
/// matching result.
///
/// A missing output file means the external aligner produced nothing.
#[derive(Debug, Clone)]
pub struct CorrespondenceFileMatcher {
    path: PathBuf,
}

impl CorrespondenceFileMatcher {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl FeatureMatcher for CorrespondenceFileMatcher {
    fn name(&self) -> &'static str {
        "correspondence_file"
    }

    fn match_features(&mut self, samples: &[Sample]) -> Result<Option<CorrespondenceTable>> {
        if !self.path.exists() {
            warn!(
                "No correspondence file found at {}",
                self.path.display()
            );
            return Ok(None);
        }
        let file = File::open(&self.path).map_err(|e| AlignmentError::Io {
            source: e,
            path: Some(self.path.clone()),
        })?;
        let id = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "external".to_string());
        let table = CorrespondenceTable::from_correspondence_reader(id, BufReader::new(file), samples)?;
        Ok(Some(table))
    }
}
