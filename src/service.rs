//! Service layer wiring the scheduler, slot pool, tracker registry, upload
//! queues, and batch processors behind one handle the HTTP surface talks to.

use crate::config::Config;
use crate::metrics::{IngestMetrics, MetricsSnapshot};
use crate::pipeline::batch::{
    BatchOutcome, BatchProcessor, BatchRunError, FileResult, FileSpec, PipelineContext,
};
use crate::pipeline::collaborators::{
    BasicValidator, FileValidator, FsTextExtractor, InMemoryVectorSink, TextExtractor, VectorSink,
};
use crate::pipeline::chunking;
use crate::pipeline::events::{BatchEvent, NullSink};
use crate::progress::{ProgressMetrics, TrackerRegistry};
use crate::queue::UploadQueueManager;
use crate::scheduler::job::{JobDescriptor, JobPriority, JobProcessor, JobSnapshot};
use crate::scheduler::retry::RetryPolicy;
use crate::scheduler::slots::SlotPool;
use crate::scheduler::{Scheduler, SchedulerConfig, SchedulerError};
use crate::stream::batch_event_stream;
use async_trait::async_trait;
use futures_core::Stream;
use futures_util::StreamExt;
use serde::Serialize;
use std::pin::Pin;
use std::sync::Arc;
use uuid::Uuid;

/// Queued jobs run as plain batch processors with events discarded; the
/// tracker registry carries their progress instead.
#[async_trait]
impl JobProcessor for BatchProcessor {
    async fn run(
        &self,
        files: &[FileSpec],
        ctx: &PipelineContext,
    ) -> Result<BatchOutcome, BatchRunError> {
        self.process_batch(files, ctx, &NullSink).await
    }
}

/// Tunables the service needs beyond the collaborator handles.
#[derive(Debug, Clone, Copy)]
pub struct ServiceOptions {
    /// Scheduler tunables.
    pub scheduler: SchedulerConfig,
    /// Capacity of the shared document slot pool.
    pub slot_capacity: usize,
    /// Batches with at most this many files are served inline as a stream.
    pub streaming_threshold: usize,
    /// Token budget per chunk.
    pub chunk_size: usize,
    /// Sliding token overlap between adjacent chunks.
    pub chunk_overlap: usize,
}

impl ServiceOptions {
    /// Derive service options from the loaded configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            scheduler: SchedulerConfig {
                max_concurrent_jobs: config.max_concurrent_jobs,
                max_queue_depth: config.max_queue_depth,
                retry: RetryPolicy::new(
                    config.max_attempts,
                    config.retry_base_delay,
                    config.retry_max_delay,
                ),
            },
            slot_capacity: config.slot_capacity,
            streaming_threshold: config.streaming_threshold,
            chunk_size: chunking::effective_chunk_size(config.chunk_size),
            chunk_overlap: config.chunk_overlap,
        }
    }
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            slot_capacity: 8,
            streaming_threshold: 3,
            chunk_size: chunking::effective_chunk_size(None),
            chunk_overlap: 0,
        }
    }
}

/// How a submitted batch was accepted.
pub enum BatchSubmission {
    /// Small batch served inline; drain the stream to completion.
    Streamed(Pin<Box<dyn Stream<Item = BatchEvent> + Send>>),
    /// Larger batch queued as a job; poll its status by id.
    Queued(Uuid),
}

/// Aggregate counters exposed by the reporting endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceMetrics {
    /// Scheduler and pipeline counters.
    pub ingest: MetricsSnapshot,
    /// Tracker registry aggregates.
    pub progress: ProgressMetrics,
    /// Jobs currently running.
    pub running_jobs: usize,
    /// Jobs waiting in the priority queue.
    pub pending_jobs: usize,
}

/// Owns every long-lived ingestion component. Cheap to clone behind the
/// router as shared state.
#[derive(Clone)]
pub struct IngestService {
    scheduler: Scheduler,
    slots: SlotPool,
    trackers: Arc<TrackerRegistry>,
    queues: Arc<UploadQueueManager>,
    metrics: Arc<IngestMetrics>,
    /// Sequential processor for the streaming path; events arrive in order.
    stream_processor: Arc<BatchProcessor>,
    /// Bounded-parallel processor backing queued jobs.
    job_processor: Arc<BatchProcessor>,
    streaming_threshold: usize,
}

impl IngestService {
    /// Build the service from the loaded configuration with the in-process
    /// default collaborators.
    pub fn new(config: &Config) -> Self {
        Self::with_collaborators(
            ServiceOptions::from_config(config),
            Arc::new(BasicValidator::new()),
            Arc::new(FsTextExtractor),
            Arc::new(InMemoryVectorSink::new(config.embedding_dimension)),
        )
    }

    /// Build the service over explicit collaborator handles.
    pub fn with_collaborators(
        options: ServiceOptions,
        validator: Arc<dyn FileValidator>,
        extractor: Arc<dyn TextExtractor>,
        sink: Arc<dyn VectorSink>,
    ) -> Self {
        let slots = SlotPool::new(options.slot_capacity);
        let trackers = Arc::new(TrackerRegistry::new());
        let metrics = Arc::new(IngestMetrics::new());

        let stream_processor = Arc::new(BatchProcessor::new(
            validator.clone(),
            extractor.clone(),
            sink.clone(),
            options.chunk_size,
            options.chunk_overlap,
            1,
            options.scheduler.retry,
        ));
        let job_processor = Arc::new(BatchProcessor::new(
            validator,
            extractor,
            sink,
            options.chunk_size,
            options.chunk_overlap,
            options.slot_capacity,
            options.scheduler.retry,
        ));

        let scheduler = Scheduler::new(
            options.scheduler,
            slots.clone(),
            trackers.clone(),
            metrics.clone(),
        );

        Self {
            scheduler,
            slots,
            trackers,
            queues: Arc::new(UploadQueueManager::new()),
            metrics,
            stream_processor,
            job_processor,
            streaming_threshold: options.streaming_threshold,
        }
    }

    /// Accept a batch, routing by size: at most `streaming_threshold` files
    /// are processed inline with milestone events pushed to the caller,
    /// anything larger is queued as a job.
    pub fn submit_batch(
        &self,
        owner_id: &str,
        priority: JobPriority,
        files: Vec<FileSpec>,
    ) -> Result<BatchSubmission, SchedulerError> {
        if files.len() <= self.streaming_threshold {
            return Ok(BatchSubmission::Streamed(self.stream_batch(owner_id, files)));
        }

        let id = self.scheduler.submit(
            JobDescriptor {
                job_type: "batch-ingest".to_string(),
                owner_id: owner_id.to_string(),
                priority,
                files,
            },
            self.job_processor.clone(),
        )?;
        Ok(BatchSubmission::Queued(id))
    }

    /// Serve a batch inline regardless of size.
    fn stream_batch(
        &self,
        owner_id: &str,
        files: Vec<FileSpec>,
    ) -> Pin<Box<dyn Stream<Item = BatchEvent> + Send>> {
        self.metrics.record_streamed_batch();
        let tracker_id = self.trackers.create(owner_id);
        let ctx = PipelineContext {
            owner_id: owner_id.to_string(),
            cancel: tokio_util::sync::CancellationToken::new(),
            trackers: self.trackers.clone(),
            tracker_id,
            slots: self.slots.clone(),
        };

        let metrics = self.metrics.clone();
        let stream = batch_event_stream(self.stream_processor.clone(), files, ctx).inspect(
            move |event| {
                if let BatchEvent::BatchCompleted { summary } = event {
                    metrics.record_batch(summary.succeeded as u64, summary.failed as u64);
                }
            },
        );
        Box::pin(stream)
    }

    /// Take the front pending item of an upload queue and run it through the
    /// pipeline, recording the terminal item status on the queue.
    ///
    /// Returns `Ok(None)` when the queue is paused or has nothing pending.
    pub async fn dispatch_next(
        &self,
        queue_id: Uuid,
    ) -> Result<Option<FileResult>, crate::queue::QueueError> {
        let Some(item) = self.queues.next_pending(queue_id)? else {
            return Ok(None);
        };
        let owner_id = self.queues.status(queue_id)?.owner_id;

        let tracker_id = self.trackers.create(&owner_id);
        let ctx = PipelineContext {
            owner_id,
            cancel: tokio_util::sync::CancellationToken::new(),
            trackers: self.trackers.clone(),
            tracker_id,
            slots: self.slots.clone(),
        };
        let file = FileSpec {
            file_name: item.file_name.clone(),
            path: item.path.clone(),
        };

        let result = match self
            .stream_processor
            .process_batch(std::slice::from_ref(&file), &ctx, &NullSink)
            .await
        {
            Ok(outcome) => outcome.results.into_iter().next().unwrap_or(FileResult {
                file_name: item.file_name.clone(),
                succeeded: false,
                chunk_count: 0,
                extraction_ms: None,
                error: Some("pipeline produced no result".to_string()),
            }),
            Err(error) => {
                tracing::warn!(queue = %queue_id, item = %item.id, %error, "Queue dispatch aborted");
                FileResult {
                    file_name: item.file_name.clone(),
                    succeeded: false,
                    chunk_count: 0,
                    extraction_ms: None,
                    error: Some(error.to_string()),
                }
            }
        };

        self.metrics
            .record_batch(result.succeeded as u64, (!result.succeeded) as u64);
        self.queues.finish_item(queue_id, item.id, result.succeeded)?;
        Ok(Some(result))
    }

    /// Snapshot a job's current state.
    pub fn job_status(&self, id: Uuid) -> Result<JobSnapshot, SchedulerError> {
        self.scheduler.status(id)
    }

    /// Request cooperative cancellation of a job.
    pub fn cancel_job(&self, id: Uuid) -> Result<(), SchedulerError> {
        self.scheduler.cancel(id)
    }

    /// Drop terminal jobs and finished trackers older than the retention
    /// window. Returns the number of jobs purged.
    pub fn purge_expired(&self, retention: std::time::Duration) -> usize {
        let purged = self.scheduler.purge_expired(retention);
        self.trackers.purge_expired(retention);
        purged
    }

    /// Upload queue registry.
    pub fn queues(&self) -> &UploadQueueManager {
        &self.queues
    }

    /// Progress tracker registry.
    pub fn trackers(&self) -> &TrackerRegistry {
        &self.trackers
    }

    /// Aggregate service counters for the reporting endpoint.
    pub fn metrics(&self) -> ServiceMetrics {
        ServiceMetrics {
            ingest: self.metrics.snapshot(),
            progress: self.trackers.metrics(),
            running_jobs: self.scheduler.running_count(),
            pending_jobs: self.scheduler.pending_count(),
        }
    }
}
