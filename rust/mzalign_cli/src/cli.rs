use clap::{
    Parser,
    ValueEnum,
};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Method {
    /// Greedy join over pairwise scores
    Join,
    /// Joint mass / retention time clustering
    Hdp,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the JSON configuration file
    #[arg(short, long)]
    pub config: PathBuf,

    /// Sample files, JSON or CSV (will over-write the config file)
    #[arg(short, long, num_args = 1..)]
    pub samples: Vec<PathBuf>,

    /// Path to the output directory
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Matching method (will over-write the config file)
    #[arg(short, long, value_enum)]
    pub method: Option<Method>,

    /// Use the correspondence file of an external aligner as the matching result
    #[arg(long, conflicts_with = "method")]
    pub correspondence: Option<PathBuf>,

    /// Seed of the joint model sampler
    #[arg(long)]
    pub seed: Option<u64>,
}
