mod cli;
mod config;
mod errors;
mod loader;
mod processing;

use clap::Parser;
use tracing::info;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use cli::Cli;
use config::Config;
use errors::CliError;

#[cfg(target_os = "windows")]
use mimalloc::MiMalloc;

#[cfg(target_os = "windows")]
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn main() -> std::result::Result<(), CliError> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        ) // This uses RUST_LOG environment variable
        .init();

    let args = Cli::parse();

    let conf = std::fs::File::open(&args.config).map_err(|e| CliError::io(e, &args.config))?;
    let config: Config = match serde_json::from_reader(std::io::BufReader::new(conf)) {
        Ok(x) => x,
        Err(e) => {
            return Err(CliError::ParseError { msg: e.to_string() });
        }
    };
    let config = config.with_cli_args(&args)?;
    info!("Parsed configuration: {:#?}", config);

    let output_config = config.output.clone().ok_or_else(|| CliError::Config {
        source: "No output directory provided".to_string(),
    })?;

    let mut samples = loader::load_samples(&config.input.samples)?;
    let output = processing::run(&config, &mut samples)?;
    processing::write_outputs(&output, &output_config)?;
    info!("Results written to {}", output_config.directory.display());
    Ok(())
}
