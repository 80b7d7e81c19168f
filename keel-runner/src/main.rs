//! Keel Runner
//!
//! Executes a single pipeline run against the local Docker daemon.
//!
//! Architecture:
//! - Configuration: Flags with environment fallbacks, validated up front
//! - Engine: Container lifecycle per step (keel-engine)
//! - Executor: Step ordering, run policies, output streaming and cleanup
//!
//! Ctrl-C cancels the run; the run's containers, volumes and network are
//! removed before the process exits.

mod config;
mod executor;
mod line;

use anyhow::{Context, Result};
use clap::Parser;
use keel_engine::{ContainerEngine, DockerRuntime, Engine};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Config, LogFormat};
use crate::executor::{Executor, RunReport, StepStatus};

#[derive(Parser, Debug)]
#[command(name = "keel")]
#[command(about = "Run a pipeline in Docker containers", long_about = None)]
#[command(version)]
struct Cli {
    /// Pipeline specification (JSON)
    #[arg(env = "KEEL_SPEC")]
    spec: PathBuf,

    /// Docker config.json with registry credentials
    #[arg(long, env = "KEEL_DOCKER_CONFIG")]
    docker_config: Option<PathBuf>,

    /// Maximum seconds a single step may run
    #[arg(long, env = "KEEL_STEP_TIMEOUT", default_value_t = 3600)]
    step_timeout: u64,

    /// Format of the runner's logs
    #[arg(long, env = "KEEL_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

impl From<Cli> for Config {
    fn from(cli: Cli) -> Self {
        Self {
            docker_config: cli.docker_config,
            step_timeout: Duration::from_secs(cli.step_timeout),
            log_format: cli.log_format,
            ..Config::new(cli.spec)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from(Cli::parse());
    init_tracing(config.log_format);

    info!("Starting Keel Runner");
    config.validate()?;

    let spec = config.load_spec()?;
    info!(
        "Loaded pipeline {} ({}): {} steps",
        spec.metadata.name,
        spec.metadata.uid,
        spec.steps.len()
    );

    let runtime = DockerRuntime::connect().context("Failed to connect to Docker")?;
    let engine: Arc<dyn Engine> = Arc::new(ContainerEngine::new(Arc::new(runtime)));

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling run");
                cancel.cancel();
            }
        }
    });

    let executor = Executor::new(engine, config.step_timeout, cancel);
    let report = executor.run(&spec).await;
    summarize(&report);

    if !report.succeeded() {
        anyhow::bail!("Pipeline {} failed", spec.metadata.name);
    }

    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "keel_runner=info,keel_engine=info".into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

fn summarize(report: &RunReport) {
    if let Some(e) = &report.setup_error {
        error!("Setup failed: {}", e);
    }

    for step in &report.steps {
        match step.status {
            StepStatus::Failed => error!(
                "  {} failed: {}",
                step.name,
                step.error.as_deref().unwrap_or("unknown error")
            ),
            status => match step.state {
                Some(state) => info!(
                    "  {} {:?} (exit code {}, {} lines)",
                    step.name, status, state.exit_code, step.lines
                ),
                None => info!("  {} {:?}", step.name, status),
            },
        }
    }

    if let Some(e) = &report.cleanup_error {
        error!("Cleanup failed, resources may have leaked: {}", e);
    }
}
