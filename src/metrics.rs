use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing scheduler and pipeline activity.
#[derive(Default)]
pub struct IngestMetrics {
    jobs_submitted: AtomicU64,
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    jobs_cancelled: AtomicU64,
    files_processed: AtomicU64,
    files_failed: AtomicU64,
    retries: AtomicU64,
    streamed_batches: AtomicU64,
}

impl IngestMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a job accepted by the scheduler.
    pub fn record_submission(&self) {
        self.jobs_submitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a job reaching the completed state.
    pub fn record_completion(&self) {
        self.jobs_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a job reaching the failed state.
    pub fn record_failure(&self) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a job reaching the cancelled state.
    pub fn record_cancellation(&self) {
        self.jobs_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    /// Record per-file outcomes for a finished batch.
    pub fn record_batch(&self, processed: u64, failed: u64) {
        self.files_processed.fetch_add(processed, Ordering::Relaxed);
        self.files_failed.fetch_add(failed, Ordering::Relaxed);
    }

    /// Record a retry attempt granted by the retry policy.
    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a batch served inline by the streaming front door.
    pub fn record_streamed_batch(&self) {
        self.streamed_batches.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_submitted: self.jobs_submitted.load(Ordering::Relaxed),
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            jobs_cancelled: self.jobs_cancelled.load(Ordering::Relaxed),
            files_processed: self.files_processed.load(Ordering::Relaxed),
            files_failed: self.files_failed.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            streamed_batches: self.streamed_batches.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of scheduler counters used for reporting.
#[derive(Debug, Clone, Copy, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    /// Jobs accepted by the scheduler since startup.
    pub jobs_submitted: u64,
    /// Jobs that reached the completed state.
    pub jobs_completed: u64,
    /// Jobs that reached the failed state.
    pub jobs_failed: u64,
    /// Jobs that reached the cancelled state.
    pub jobs_cancelled: u64,
    /// Files that finished the full pipeline.
    pub files_processed: u64,
    /// Files that failed somewhere in the pipeline.
    pub files_failed: u64,
    /// Retry attempts granted across all jobs.
    pub retries: u64,
    /// Batches served inline by the streaming front door.
    pub streamed_batches: u64,
}
