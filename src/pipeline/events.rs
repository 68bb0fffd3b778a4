//! Milestone events emitted while a batch moves through the pipeline.
//!
//! The streaming front door forwards these to the client one framed event per
//! milestone; the queued path discards them and relies on the progress
//! tracker instead.

use serde::Serialize;
use tokio::sync::mpsc;

/// Batch-level completion counters attached to every file milestone.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct BatchProgress {
    /// Files that reached a terminal milestone so far.
    pub completed: usize,
    /// Total files in the batch.
    pub total: usize,
    /// `completed / total`, rounded down, in percent.
    pub percentage: u8,
}

impl BatchProgress {
    /// Build progress counters for `completed` out of `total` files.
    pub fn new(completed: usize, total: usize) -> Self {
        let percentage = if total == 0 {
            100
        } else {
            ((completed * 100) / total) as u8
        };
        Self {
            completed,
            total,
            percentage,
        }
    }
}

/// Aggregate summary carried by the terminal `batch-completed` event.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    /// Total files in the batch.
    pub total: usize,
    /// Files that cleared the full pipeline.
    pub succeeded: usize,
    /// Files that failed at some stage.
    pub failed: usize,
    /// Chunks indexed across the whole batch.
    pub chunks_indexed: usize,
    /// Populated when the batch itself aborted before producing results.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One framed event on the push stream.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum BatchEvent {
    /// Emitted before the first file starts.
    #[serde(rename_all = "camelCase")]
    BatchStarted {
        /// Total files in the batch.
        total: usize,
    },
    /// A file entered the pipeline.
    #[serde(rename_all = "camelCase")]
    FileStarted {
        /// File the milestone belongs to.
        file_name: String,
        /// Batch-level completion counters.
        progress: BatchProgress,
    },
    /// Text extraction finished for a file.
    #[serde(rename_all = "camelCase")]
    FileExtracted {
        /// File the milestone belongs to.
        file_name: String,
        /// Wall-clock extraction time in milliseconds.
        extraction_ms: u128,
        /// Batch-level completion counters.
        progress: BatchProgress,
    },
    /// A file cleared the full pipeline.
    #[serde(rename_all = "camelCase")]
    FileCompleted {
        /// File the milestone belongs to.
        file_name: String,
        /// Chunks indexed for the file.
        chunk_count: usize,
        /// Batch-level completion counters.
        progress: BatchProgress,
    },
    /// A file failed at some stage; the batch continues.
    #[serde(rename_all = "camelCase")]
    FileFailed {
        /// File the milestone belongs to.
        file_name: String,
        /// Human-readable failure description.
        error: String,
        /// Batch-level completion counters.
        progress: BatchProgress,
    },
    /// Emitted after the last file with the aggregate summary.
    #[serde(rename_all = "camelCase")]
    BatchCompleted {
        /// Aggregate batch summary.
        summary: BatchSummary,
    },
    /// Terminal stream marker.
    End,
}

impl BatchEvent {
    /// Wire name of the event, used as the SSE `event:` field.
    pub fn name(&self) -> &'static str {
        match self {
            Self::BatchStarted { .. } => "batch-started",
            Self::FileStarted { .. } => "file-started",
            Self::FileExtracted { .. } => "file-extracted",
            Self::FileCompleted { .. } => "file-completed",
            Self::FileFailed { .. } => "file-failed",
            Self::BatchCompleted { .. } => "batch-completed",
            Self::End => "end",
        }
    }
}

/// Receives milestone events as the processor produces them.
pub trait EventSink: Send + Sync {
    /// Deliver one event. Implementations must not block.
    fn emit(&self, event: BatchEvent);
}

/// Sink for the queued path: events are dropped, the tracker carries progress.
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: BatchEvent) {}
}

/// Sink forwarding events into an unbounded channel for the streaming path.
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<BatchEvent>,
}

impl ChannelSink {
    /// Wrap a channel sender.
    pub fn new(sender: mpsc::UnboundedSender<BatchEvent>) -> Self {
        Self { sender }
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: BatchEvent) {
        // receiver dropping just means the client went away
        let _ = self.sender.send(event);
    }
}
