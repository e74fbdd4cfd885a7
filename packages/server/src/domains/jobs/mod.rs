//! Job queue consumption and multi-step job execution.

pub mod analytics;
pub mod consumer;
pub mod job;
pub mod processor;
pub mod registry;
pub mod steps;

pub use analytics::{AnalyticsBatchConsumer, AnalyticsSummary};
pub use consumer::{clamp_batch_size, BatchSummary, MessageResult, MessageStatus, QueueConsumer};
pub use job::{Job, JobKind, JobStep};
pub use processor::{JobContext, JobOutcome, JobProcessor, StepExecutor, StepReport};
pub use registry::{JobDefinition, JobRegistry};
pub use steps::PipelineSteps;
