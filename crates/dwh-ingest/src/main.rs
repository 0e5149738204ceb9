//! DWH Ingest - Main entry point

use clap::Parser;
use dwh_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use dwh_ingest::config::IngestConfig;
use dwh_ingest::{commands, Cli};
use std::process;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // stdout carries command output, logs go to stderr
    let log_config = LogConfig::builder()
        .level(log_level)
        .output(LogOutput::Console)
        .log_file_prefix("dwh-ingest".to_string())
        .build();

    // LOG_* variables take precedence over the flags
    let log_config = log_config.clone().merge_env().unwrap_or(log_config);

    if let Err(e) = init_logging(&log_config) {
        eprintln!("Warning: logging disabled: {e}");
    }

    if let Err(e) = run(cli).await {
        error!(error = %e, "Command failed");
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = IngestConfig::from_env()?;
    config.validate()?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    commands::run(cli.command, &config, &mut out).await?;

    info!("Done");
    Ok(())
}
