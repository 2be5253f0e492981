//! logship agent binary.
//!
//! Loads pipeline configurations, starts every pipeline, and runs
//! until interrupted; ctrl-c triggers a graceful drain-and-stop.
//! Process supervision and hot reload belong to an external service
//! manager; this binary only starts and stops.

use clap::Parser;
use logship_pipeline::{Pipeline, PipelineConfig, Registry};
use logship_queue::QueueConfig;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Durable log-shipping agent.
#[derive(Parser)]
#[command(name = "logship")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Pipeline configuration file, or a directory of *.json files
    #[arg(short, long)]
    config: PathBuf,

    /// Directory for durable queue data
    #[arg(short, long, default_value = "./data")]
    data_dir: PathBuf,

    /// Override the pipeline name (single-file configs only)
    #[arg(short, long)]
    name: Option<String>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "agent failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> logship_pipeline::PipelineResult<()> {
    let configs = load_configs(&cli)?;
    if configs.is_empty() {
        warn!("no pipeline configurations found, nothing to do");
        return Ok(());
    }

    // Build everything before starting anything, so a bad config is a
    // clean failure with no queues touched.
    let registry = Registry::builtin();
    let mut pipelines = Vec::with_capacity(configs.len());
    for config in &configs {
        pipelines.push(Pipeline::build(config, &registry, QueueConfig::default())?);
    }

    for pipeline in &mut pipelines {
        pipeline.start()?;
        info!(pipeline = %pipeline.name(), "running");
    }

    tokio::signal::ctrl_c().await?;
    info!("interrupt received, draining pipelines");

    for pipeline in &mut pipelines {
        pipeline.stop().await;
    }
    Ok(())
}

fn load_configs(cli: &Cli) -> logship_pipeline::PipelineResult<Vec<PipelineConfig>> {
    if cli.config.is_dir() {
        PipelineConfig::load_dir(&cli.config, &cli.data_dir)
    } else {
        let mut config = PipelineConfig::load_file(&cli.config, &cli.data_dir)?;
        if let Some(name) = &cli.name {
            config.name = name.clone();
        }
        Ok(vec![config])
    }
}
