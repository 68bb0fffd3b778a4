//! Job types: descriptors, lifecycle states, snapshots, and the processor
//! plug point.

use crate::pipeline::batch::{BatchOutcome, BatchRunError, FileResult, FileSpec, PipelineContext};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

/// Admission priority of a job. Higher priorities are admitted first when a
/// job slot frees; running jobs are never preempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    /// Admitted only when nothing more urgent is pending.
    Low,
    /// Default tier.
    #[default]
    Normal,
    /// Admitted ahead of all other tiers.
    High,
}

/// Lifecycle state of a job.
///
/// Jobs are created `Queued`, move to `Running` when admitted, and terminate
/// in exactly one of the three terminal states. `Running` never moves back to
/// `Queued`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting in the priority queue.
    Queued,
    /// Admitted and executing (including retry backoff waits).
    Running,
    /// Processor finished, possibly with per-file errors.
    Completed,
    /// Processor gave up after exhausting retries, or failed outright.
    Failed,
    /// Cancellation was observed before or during execution.
    Cancelled,
}

impl JobStatus {
    /// Whether the state is terminal.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Everything needed to enqueue a job.
#[derive(Debug, Clone)]
pub struct JobDescriptor {
    /// Free-form job kind label, recorded for observability.
    pub job_type: String,
    /// Owner the job (and its tracker) belongs to.
    pub owner_id: String,
    /// Admission priority.
    pub priority: JobPriority,
    /// Work items the processor will receive.
    pub files: Vec<FileSpec>,
}

/// Pluggable job body executed by the scheduler.
#[async_trait]
pub trait JobProcessor: Send + Sync {
    /// Run the job to completion, observing `ctx` cancellation between
    /// stages. Returning a retryable error asks the scheduler to re-run the
    /// job after a backoff delay.
    async fn run(
        &self,
        files: &[FileSpec],
        ctx: &PipelineContext,
    ) -> Result<BatchOutcome, BatchRunError>;
}

/// Point-in-time view of a job returned by the status API.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    /// Job id.
    pub id: Uuid,
    /// Job kind label from the descriptor.
    pub job_type: String,
    /// Owner the job belongs to.
    pub owner_id: String,
    /// Admission priority.
    pub priority: JobPriority,
    /// Current lifecycle state.
    pub status: JobStatus,
    /// Progress percent reported by the job's tracker.
    pub progress_percent: u8,
    /// Most recent stage label reported by the job's tracker.
    pub current_step: String,
    /// Processor runs so far.
    pub attempts: u32,
    /// When the job was accepted.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// When the job was admitted to a job slot.
    #[serde(with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    /// When the job reached a terminal state.
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    /// Per-file results recorded by the processor.
    pub results: Vec<FileResult>,
    /// Job-level and per-file error descriptions.
    pub errors: Vec<String>,
    /// Tracker created for this job at submission time.
    pub tracker_id: Uuid,
    /// True only for `completed`, `failed`, and `cancelled`.
    pub is_complete: bool,
}

/// Errors surfaced by the scheduler API.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Job id is unknown or has been purged.
    #[error("job {0} not found")]
    NotFound(Uuid),
    /// The pending queue is at capacity; backpressure for the caller.
    #[error("job queue is full ({depth} pending)")]
    QueueFull {
        /// Pending jobs at the time of rejection.
        depth: usize,
    },
}
