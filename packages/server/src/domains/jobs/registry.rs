//! Step tables per job kind.
//!
//! The registry is built once at startup. Processing a job looks its kind up
//! in a map of enum keys; there is no dispatch on strings at run time.

use std::collections::HashMap;

use anyhow::{anyhow, Result};
use tracing::warn;

use super::job::{Job, JobKind, JobStep};

/// Ordered steps for a kind plus the step whose result decides success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDefinition {
    pub steps: Vec<JobStep>,
    pub critical: JobStep,
}

impl JobDefinition {
    pub fn new(steps: impl IntoIterator<Item = JobStep>, critical: JobStep) -> Self {
        Self {
            steps: steps.into_iter().collect(),
            critical,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct JobRegistry {
    definitions: HashMap<JobKind, JobDefinition>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The pipeline's job kinds.
    pub fn standard() -> Self {
        use JobStep::*;

        Self::new()
            .register(
                JobKind::RepositoryPush,
                JobDefinition::new(
                    [PersistRecord, SyncCommitHistory, NotifyChannel, InvalidateCache, TriggerRecompute],
                    PersistRecord,
                ),
            )
            .register(
                JobKind::PullRequestActivity,
                JobDefinition::new([PersistRecord, NotifyChannel, InvalidateCache], PersistRecord),
            )
            .register(
                JobKind::ExternalEvent,
                JobDefinition::new([PersistRecord, NotifyChannel, TriggerRecompute], PersistRecord),
            )
    }

    pub fn register(mut self, kind: JobKind, definition: JobDefinition) -> Self {
        self.definitions.insert(kind, definition);
        self
    }

    pub fn definition(&self, kind: JobKind) -> Option<&JobDefinition> {
        self.definitions.get(&kind)
    }

    /// Steps to run for `job`, in declared order.
    ///
    /// Required steps the kind does not declare are skipped with a warning.
    pub fn plan(&self, job: &Job) -> Result<(Vec<JobStep>, JobStep)> {
        let definition = self
            .definition(job.kind)
            .ok_or_else(|| anyhow!("no steps registered for job kind {}", job.kind))?;

        if job.steps_required.is_empty() {
            return Ok((definition.steps.clone(), definition.critical));
        }

        for step in &job.steps_required {
            if !definition.steps.contains(step) {
                warn!(kind = %job.kind, step = %step, "required step not declared for kind, skipping");
            }
        }

        let steps = definition
            .steps
            .iter()
            .copied()
            .filter(|step| job.steps_required.contains(step))
            .collect();
        Ok((steps, definition.critical))
    }
}
