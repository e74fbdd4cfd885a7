//! Runs a job's steps in order and decides whether the job succeeded.
//!
//! A failing step is recorded and the next step still runs. The job succeeds
//! when its critical step succeeds; if the critical step was not part of the
//! plan, it succeeds when no step failed.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, info_span, warn, Instrument};

use super::job::{Job, JobStep};
use super::registry::JobRegistry;

/// Executes one named side effect for a job.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(&self, step: JobStep, job: &Job) -> Result<()>;
}

/// Where the job came from, for log correlation.
#[derive(Debug, Clone, Copy, Default)]
pub struct JobContext {
    pub message_id: Option<i64>,
    /// How many times the queue has delivered this message
    pub attempt: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepReport {
    pub step: JobStep,
    pub succeeded: bool,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobOutcome {
    pub success: bool,
    /// One entry per failed step, as `"<step>: <error>"`
    pub errors: Vec<String>,
    pub steps: Vec<StepReport>,
}

#[derive(Clone)]
pub struct JobProcessor {
    registry: Arc<JobRegistry>,
    executor: Arc<dyn StepExecutor>,
}

impl JobProcessor {
    pub fn new(registry: Arc<JobRegistry>, executor: Arc<dyn StepExecutor>) -> Self {
        Self { registry, executor }
    }

    pub async fn process(&self, job: &Job, context: JobContext) -> JobOutcome {
        let span = info_span!(
            "job",
            msg_id = context.message_id,
            entity_id = %job.entity_id,
            kind = %job.kind,
            attempt = context.attempt,
        );

        self.run(job).instrument(span).await
    }

    async fn run(&self, job: &Job) -> JobOutcome {
        let (steps, critical) = match self.registry.plan(job) {
            Ok(plan) => plan,
            Err(e) => {
                warn!(error = %e, "job has no runnable plan");
                return JobOutcome {
                    success: false,
                    errors: vec![e.to_string()],
                    steps: Vec::new(),
                };
            }
        };

        let started = Instant::now();
        let mut reports = Vec::with_capacity(steps.len());
        let mut errors = Vec::new();

        for step in steps {
            let step_started = Instant::now();
            info!(step = %step, "step started");

            let result = self.executor.execute(step, job).await;
            let elapsed_ms = step_started.elapsed().as_millis() as u64;

            match result {
                Ok(()) => {
                    info!(step = %step, elapsed_ms, "step succeeded");
                    reports.push(StepReport {
                        step,
                        succeeded: true,
                        elapsed_ms,
                        error: None,
                    });
                }
                Err(e) => {
                    warn!(step = %step, elapsed_ms, error = %e, "step failed");
                    errors.push(format!("{}: {:#}", step, e));
                    reports.push(StepReport {
                        step,
                        succeeded: false,
                        elapsed_ms,
                        error: Some(format!("{:#}", e)),
                    });
                }
            }
        }

        let success = match reports.iter().find(|r| r.step == critical) {
            Some(report) => report.succeeded,
            None => errors.is_empty(),
        };

        info!(
            success,
            failed_steps = errors.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "job finished"
        );

        JobOutcome {
            success,
            errors,
            steps: reports,
        }
    }
}
