use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What kind of work a job represents. Each kind has a fixed step table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    RepositoryPush,
    PullRequestActivity,
    ExternalEvent,
}

impl JobKind {
    pub const ALL: [JobKind; 3] = [
        JobKind::RepositoryPush,
        JobKind::PullRequestActivity,
        JobKind::ExternalEvent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::RepositoryPush => "repository_push",
            JobKind::PullRequestActivity => "pull_request_activity",
            JobKind::ExternalEvent => "external_event",
        }
    }

    /// Record collection the job's canonical record lives in.
    pub fn collection(&self) -> &'static str {
        match self {
            JobKind::RepositoryPush => "repositories",
            JobKind::PullRequestActivity => "pull_requests",
            JobKind::ExternalEvent => "external_events",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named side effect a job can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStep {
    PersistRecord,
    SyncCommitHistory,
    NotifyChannel,
    InvalidateCache,
    TriggerRecompute,
}

impl JobStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStep::PersistRecord => "persist_record",
            JobStep::SyncCommitHistory => "sync_commit_history",
            JobStep::NotifyChannel => "notify_channel",
            JobStep::InvalidateCache => "invalidate_cache",
            JobStep::TriggerRecompute => "trigger_recompute",
        }
    }
}

impl fmt::Display for JobStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unit of work carried on the job queue as camelCase JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub entity_id: String,
    pub kind: JobKind,
    /// Steps to run; empty means every step declared for the kind
    #[serde(default)]
    pub steps_required: Vec<JobStep>,
    #[serde(default)]
    pub payload: Value,
}

impl Job {
    pub fn new(kind: JobKind, entity_id: impl Into<String>, payload: Value) -> Self {
        Self {
            entity_id: entity_id.into(),
            kind,
            steps_required: Vec::new(),
            payload,
        }
    }

    pub fn with_steps(mut self, steps: impl IntoIterator<Item = JobStep>) -> Self {
        self.steps_required = steps.into_iter().collect();
        self
    }
}
