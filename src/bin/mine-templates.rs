/// Mine templates from console log files
///
/// Usage: mine-templates <log file>...
///
/// Configuration comes from the JSON file named by `CONFIG_FILE` (optional),
/// overlaid with environment variables (`TRAINING`, `CONTEXT`, `LIB_SIZE`, ...).
/// A `.env` file in the working directory is honored.
use anyhow::{Context, Result};
use console_log_analyzer::config::Config;
use console_log_analyzer::pipeline::Pipeline;
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    // Load .env file if present (fails silently if not found)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let paths: Vec<PathBuf> = std::env::args().skip(1).map(PathBuf::from).collect();
    if paths.is_empty() {
        anyhow::bail!("usage: mine-templates <log file>...");
    }

    let config = match std::env::var("CONFIG_FILE") {
        Ok(file) => Config::load(Path::new(&file))
            .with_context(|| format!("Failed to load configuration from {}", file))?,
        Err(_) => Config::default(),
    };
    let config = config
        .apply_env()
        .context("Invalid configuration in environment")?;
    config.log_config();

    let pipeline = Pipeline::new(config).context("Failed to set up the pipeline")?;

    let mut failed = 0;
    for (path, result) in pipeline.run_files(&paths) {
        match result {
            Ok(report) => {
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
            Err(e) => {
                error!("{}: {}", path.display(), e);
                failed += 1;
            }
        }
    }

    info!("Processed {} files, {} failed", paths.len(), failed);
    if failed > 0 {
        anyhow::bail!("{} of {} files failed", failed, paths.len());
    }
    Ok(())
}
