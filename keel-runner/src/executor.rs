//! Pipeline executor
//!
//! Drives one run through the engine: Setup, every step in declaration
//! order, then Destroy. Destroy always runs, including after a failed Setup
//! or a cancelled run.

use keel_core::domain::pipeline::PipelineSpec;
use keel_core::domain::state::ExecutionState;
use keel_core::domain::step::Step;
use keel_engine::Engine;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::line::read_lines;

/// Final status of a step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Succeeded,
    Failed,
    /// Not run because of its run policy
    Skipped,
    /// Started in the background and never awaited
    Detached,
    Cancelled,
}

/// Outcome of a single step
#[derive(Debug, Clone)]
pub struct StepReport {
    pub name: String,
    pub status: StepStatus,
    pub state: Option<ExecutionState>,
    pub error: Option<String>,
    /// Number of output lines streamed
    pub lines: usize,
}

impl StepReport {
    fn new(step: &Step, status: StepStatus) -> Self {
        Self {
            name: step.metadata.name.clone(),
            status,
            state: None,
            error: None,
            lines: 0,
        }
    }

    fn failed(step: &Step, error: impl ToString) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::new(step, StepStatus::Failed)
        }
    }
}

/// Outcome of a whole run
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub steps: Vec<StepReport>,
    pub setup_error: Option<String>,
    pub cleanup_error: Option<String>,
}

impl RunReport {
    /// Returns true if setup and cleanup succeeded and no step failed or
    /// was cancelled
    pub fn succeeded(&self) -> bool {
        self.setup_error.is_none()
            && self.cleanup_error.is_none()
            && self
                .steps
                .iter()
                .all(|step| !matches!(step.status, StepStatus::Failed | StepStatus::Cancelled))
    }
}

/// Sequential executor for a pipeline run
pub struct Executor {
    engine: Arc<dyn Engine>,
    step_timeout: Duration,
    cancel: CancellationToken,
}

impl Executor {
    /// Creates a new executor
    ///
    /// # Arguments
    /// * `engine` - Engine the steps are executed on
    /// * `step_timeout` - Maximum time a single step may run
    /// * `cancel` - Token that cancels the run; cleanup still happens
    pub fn new(engine: Arc<dyn Engine>, step_timeout: Duration, cancel: CancellationToken) -> Self {
        Self {
            engine,
            step_timeout,
            cancel,
        }
    }

    /// Executes the pipeline and tears it down
    pub async fn run(&self, spec: &PipelineSpec) -> RunReport {
        let mut report = RunReport::default();
        info!(
            "Starting run {} ({} steps)",
            spec.metadata.uid,
            spec.steps.len()
        );

        let setup = tokio::select! {
            result = self.engine.setup(spec) => result.map_err(|e| e.to_string()),
            _ = self.cancel.cancelled() => Err("cancelled during setup".to_string()),
        };

        match setup {
            Ok(()) => self.run_steps(spec, &mut report).await,
            Err(e) => {
                error!("Setup of run {} failed: {}", spec.metadata.uid, e);
                report.setup_error = Some(e);
            }
        }

        match self.engine.destroy(spec).await {
            Ok(cleanup) if cleanup.is_clean() => {
                info!("Run {} cleaned up", spec.metadata.uid);
            }
            Ok(cleanup) => {
                for failure in &cleanup.suppressed {
                    warn!(
                        "Leaked resource {} during cleanup: {}",
                        failure.resource, failure.error
                    );
                }
            }
            Err(e) => {
                error!("Cleanup of run {} failed: {}", spec.metadata.uid, e);
                report.cleanup_error = Some(e.to_string());
            }
        }

        report
    }

    async fn run_steps(&self, spec: &PipelineSpec, report: &mut RunReport) {
        let mut run_failed = false;

        for step in &spec.steps {
            if self.cancel.is_cancelled() {
                report.steps.push(StepReport::new(step, StepStatus::Cancelled));
                continue;
            }
            if !step.run_policy.should_run(run_failed) {
                info!("Skipping step {}", step.metadata.name);
                report.steps.push(StepReport::new(step, StepStatus::Skipped));
                continue;
            }

            let outcome = tokio::select! {
                outcome = self.run_step(spec, step) => outcome,
                _ = self.cancel.cancelled() => StepReport::new(step, StepStatus::Cancelled),
            };

            match outcome.status {
                StepStatus::Failed | StepStatus::Cancelled => {
                    warn!(
                        "Step {} {:?}: {}",
                        step.metadata.name,
                        outcome.status,
                        outcome.error.as_deref().unwrap_or("cancelled")
                    );
                    run_failed = true;
                }
                status => info!("Step {} {:?}", step.metadata.name, status),
            }
            report.steps.push(outcome);
        }
    }

    async fn run_step(&self, spec: &PipelineSpec, step: &Step) -> StepReport {
        let name = &step.metadata.name;

        if let Err(e) = self.engine.create(spec, step).await {
            return StepReport::failed(step, e);
        }
        if let Err(e) = self.engine.start(spec, step).await {
            return StepReport::failed(step, e);
        }
        if step.detached {
            return StepReport::new(step, StepStatus::Detached);
        }

        let tail = async {
            match self.engine.tail(spec, step).await {
                Ok(reader) => {
                    let streamed = read_lines(reader, |line| {
                        info!(step = %name, line = line.number, "{}", line.message);
                    })
                    .await;
                    streamed.unwrap_or_else(|e| {
                        warn!("Reading output of step {} failed: {}", name, e);
                        0
                    })
                }
                Err(e) => {
                    warn!("Failed to tail step {}: {}", name, e);
                    0
                }
            }
        };

        let finished = tokio::time::timeout(self.step_timeout, async {
            tokio::join!(tail, self.engine.wait(spec, step))
        })
        .await;

        let (lines, waited) = match finished {
            Ok(finished) => finished,
            Err(_) => {
                return StepReport::failed(
                    step,
                    format!("timed out after {}s", self.step_timeout.as_secs()),
                );
            }
        };

        let state = match waited {
            Ok(state) => state,
            Err(e) => return StepReport::failed(step, e),
        };

        let mut report = if state.succeeded() {
            StepReport::new(step, StepStatus::Succeeded)
        } else if state.oom_killed {
            StepReport::failed(step, "killed by the OOM killer")
        } else if !state.exited {
            StepReport::failed(step, "container still running after wait")
        } else {
            StepReport::failed(step, format!("exit code {}", state.exit_code))
        };
        report.state = Some(state);
        report.lines = lines;
        report
    }
}
