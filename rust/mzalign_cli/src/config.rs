use mzalign::AlignmentConfig;
use serde::{
    Deserialize,
    Serialize,
};
use std::path::PathBuf;

use crate::cli::{
    Cli,
    Method,
};
use crate::errors::CliError;

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub input: InputConfig,
    pub method: MethodConfig,
    pub alignment: AlignmentConfig,
    pub graph: GraphConfig,
    pub output: Option<OutputConfig>,
    /// JSON list of `{name, formula, mass}` used to annotate joint model precursors.
    pub compound_db: Option<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct InputConfig {
    pub samples: Vec<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(tag = "type")]
pub enum MethodConfig {
    #[default]
    #[serde(rename = "join")]
    Join,
    #[serde(rename = "hdp")]
    Hdp,
    #[serde(rename = "correspondence")]
    Correspondence { path: PathBuf },
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct GraphConfig {
    /// Mass difference (Da) that costs as much as `drt` seconds.
    pub dmz: f64,
    pub drt: f64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            dmz: 0.01,
            drt: 30.0,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct OutputConfig {
    pub directory: PathBuf,
    /// Keep the joint model draws in `hdp_samples.json`, reused on the next run
    /// over the same samples and chain settings.
    #[serde(default)]
    pub save_hdp_samples: bool,
}

impl Config {
    /// Applies command line overrides and checks that the run is fully specified.
    pub fn with_cli_args(mut self, args: &Cli) -> Result<Self, CliError> {
        if !args.samples.is_empty() {
            self.input.samples = args.samples.clone();
        }
        if let Some(method) = args.method {
            self.method = match method {
                Method::Join => MethodConfig::Join,
                Method::Hdp => MethodConfig::Hdp,
            };
        }
        if let Some(path) = args.correspondence.as_ref() {
            self.method = MethodConfig::Correspondence { path: path.clone() };
        }
        if let Some(seed) = args.seed {
            self.alignment.hdp.seed = Some(seed);
        }
        if let Some(directory) = args.output_dir.as_ref() {
            let save_hdp_samples = self
                .output
                .as_ref()
                .is_some_and(|o| o.save_hdp_samples);
            self.output = Some(OutputConfig {
                directory: directory.clone(),
                save_hdp_samples,
            });
        }

        if self.input.samples.is_empty() {
            return Err(CliError::Config {
                source: "No samples provided, please provide them in either the config file or with the --samples flag".to_string(),
            });
        }
        if self.output.is_none() {
            return Err(CliError::Config {
                source: "No output directory provided, please provide one in either the config file or with the --output-dir flag".to_string(),
            });
        }
        self.alignment.validate()?;
        Ok(self)
    }
}
