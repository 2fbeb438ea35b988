use mzalign::{
    FeatureInput,
    Sample,
};
use serde::Deserialize;
use std::fs::File;
use std::io::{
    BufReader,
    Read,
};
use std::path::Path;
use tracing::info;

use crate::errors::CliError;

/// JSON sample file.
#[derive(Debug, Deserialize)]
struct SampleFile {
    name: Option<String>,
    features: Vec<FeatureInput>,
}

pub fn parse_json_sample<R: Read>(id: usize, default_name: &str, reader: R) -> Result<Sample, CliError> {
    let file: SampleFile = serde_json::from_reader(reader)?;
    let name = file.name.unwrap_or_else(|| default_name.to_string());
    Ok(Sample::new(id, name, &file.features)?)
}

/// CSV with a `mass,rt,intensity` header, intensity being optional.
pub fn parse_csv_sample<R: Read>(id: usize, name: &str, reader: R) -> Result<Sample, CliError> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    let features = rdr
        .deserialize::<FeatureInput>()
        .collect::<Result<Vec<_>, csv::Error>>()?;
    Ok(Sample::new(id, name, &features)?)
}

pub fn load_sample(id: usize, path: &Path) -> Result<Sample, CliError> {
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| format!("sample_{}", id));
    let file = File::open(path).map_err(|e| CliError::io(e, path))?;
    let reader = BufReader::new(file);
    let is_csv = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
    let sample = if is_csv {
        parse_csv_sample(id, &name, reader)?
    } else {
        parse_json_sample(id, &name, reader)?
    };
    info!(
        "Loaded sample '{}' with {} features from {}",
        sample.name,
        sample.len(),
        path.display()
    );
    Ok(sample)
}

pub fn load_samples(paths: &[impl AsRef<Path>]) -> Result<Vec<Sample>, CliError> {
    paths
        .iter()
        .enumerate()
        .map(|(id, p)| load_sample(id, p.as_ref()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_with_and_without_intensity() {
        let text = "mass, rt, intensity\n100.5, 12.0, 300\n200.25, 14.5, 10\n";
        let sample = parse_csv_sample(2, "run", text.as_bytes()).unwrap();
        assert_eq!(sample.len(), 2);
        assert_eq!(sample.id, 2);
        assert_eq!(sample.features()[1].mass, 200.25);
        assert_eq!(sample.features()[0].intensity, 300.0);

        let text = "mass,rt\n100.5,12.0\n";
        let sample = parse_csv_sample(0, "run", text.as_bytes()).unwrap();
        assert_eq!(sample.features()[0].intensity, 0.0);
    }

    #[test]
    fn test_json_sample() {
        let text = r#"{"features": [{"mass": 181.07, "rt": 60.0, "intensity": 5.0}]}"#;
        let sample = parse_json_sample(1, "fallback", text.as_bytes()).unwrap();
        assert_eq!(sample.name, "fallback");
        assert_eq!(sample.features()[0].key().sample_id, 1);

        let text = r#"{"name": "qc_1", "features": []}"#;
        let sample = parse_json_sample(0, "fallback", text.as_bytes()).unwrap();
        assert_eq!(sample.name, "qc_1");
        assert!(sample.is_empty());
    }

    #[test]
    fn test_bad_rows_are_errors() {
        assert!(parse_csv_sample(0, "run", "mass,rt\nabc,1.0\n".as_bytes()).is_err());
        assert!(parse_csv_sample(0, "run", "mass,rt\n-5.0,1.0\n".as_bytes()).is_err());
        assert!(parse_json_sample(0, "run", "{}".as_bytes()).is_err());
    }
}
