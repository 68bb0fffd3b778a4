//! Per-job batch processing: drives each file through
//! validate → extract → chunk → embed/store while holding a document slot,
//! records per-file outcomes, and reports milestones.
//!
//! A single file's failure never aborts the batch; the processor continues
//! with the remaining files and returns an aggregate outcome with one entry
//! per file. The batch itself only errors when it is cancelled, when the slot
//! pool shuts down underneath it, or when a retryable backend failure should
//! bubble up to the scheduler.

use crate::pipeline::chunking;
use crate::pipeline::collaborators::{
    DocumentMeta, FileValidator, StoreError, TextExtractor, VectorSink,
};
use crate::pipeline::events::{BatchEvent, BatchProgress, BatchSummary, EventSink};
use crate::progress::TrackerRegistry;
use crate::scheduler::retry::{Retryable, RetryDecision, RetryPolicy};
use crate::scheduler::slots::SlotPool;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// One file in a submitted batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSpec {
    /// File name shown to the user and carried on events.
    pub file_name: String,
    /// Path handed to the text extractor.
    pub path: String,
}

/// Terminal record for one file of a batch.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileResult {
    /// File the result belongs to.
    pub file_name: String,
    /// Whether the file cleared the full pipeline.
    pub succeeded: bool,
    /// Chunks indexed for the file.
    pub chunk_count: usize,
    /// Wall-clock extraction time, when extraction ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extraction_ms: Option<u128>,
    /// Failure description, when the file failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Per-file failure detail kept alongside the result list.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchError {
    /// File the failure belongs to.
    pub file_name: String,
    /// Pipeline stage that failed.
    pub stage: String,
    /// Failure description.
    pub message: String,
}

/// Aggregate outcome of a finished batch: one result per file plus the
/// collected failures.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutcome {
    /// One entry per file, in submission order.
    pub results: Vec<FileResult>,
    /// Failures recorded while the batch ran.
    pub errors: Vec<BatchError>,
}

impl BatchOutcome {
    /// Files that cleared the full pipeline.
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|result| result.succeeded).count()
    }

    /// Files that failed at some stage.
    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }

    /// Chunks indexed across the whole batch.
    pub fn chunks_indexed(&self) -> usize {
        self.results.iter().map(|result| result.chunk_count).sum()
    }

    /// Build the summary carried by the terminal batch event.
    pub fn summary(&self) -> BatchSummary {
        BatchSummary {
            total: self.results.len(),
            succeeded: self.succeeded(),
            failed: self.failed(),
            chunks_indexed: self.chunks_indexed(),
            error: None,
        }
    }
}

/// Errors that abort a whole batch run.
#[derive(Debug, Error)]
pub enum BatchRunError {
    /// Cancellation was observed at a checkpoint; a cooperative exit that
    /// carries the per-file results recorded before the checkpoint fired.
    #[error("batch cancelled")]
    Cancelled {
        /// Outcome of the files that finished before cancellation.
        partial: BatchOutcome,
    },
    /// A transient backend failure the scheduler may retry.
    #[error("embedding backend failed: {0}")]
    Embedding(String),
    /// The processor aborted before producing a result set.
    #[error("batch aborted: {0}")]
    Fatal(String),
}

impl Retryable for BatchRunError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Embedding(_))
    }
}

/// Shared state handed to a processor run: cancellation, progress reporting,
/// and the document slot pool.
#[derive(Clone)]
pub struct PipelineContext {
    /// Owner the batch belongs to; used as the vector namespace.
    pub owner_id: String,
    /// Cooperative cancellation flag, observed between stages.
    pub cancel: CancellationToken,
    /// Registry the batch reports progress into.
    pub trackers: Arc<TrackerRegistry>,
    /// Tracker created for this batch at submission time.
    pub tracker_id: Uuid,
    /// Pool bounding document-level concurrency.
    pub slots: SlotPool,
}

impl PipelineContext {
    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Checkpoint called between pipeline stages.
    ///
    /// Mid-file checkpoints carry no results; the batch loop re-wraps the
    /// error with everything accumulated so far.
    pub fn check_cancellation(&self) -> Result<(), BatchRunError> {
        if self.is_cancelled() {
            Err(BatchRunError::Cancelled {
                partial: BatchOutcome::default(),
            })
        } else {
            Ok(())
        }
    }
}

/// Serializes tracker updates so batch-level percent stays monotonic even
/// when files are processed in parallel. Each file contributes two units:
/// extraction and completion.
struct TrackerScope<'a> {
    ctx: &'a PipelineContext,
    total_units: usize,
    done_units: Mutex<usize>,
}

impl<'a> TrackerScope<'a> {
    fn new(ctx: &'a PipelineContext, file_count: usize) -> Self {
        Self {
            ctx,
            total_units: file_count.max(1) * 2,
            done_units: Mutex::new(0),
        }
    }

    /// Advance the tracker by `units` and record the stage label.
    fn advance(&self, units: usize, stage: &str) {
        let mut done = self.done_units.lock().expect("tracker scope lock poisoned");
        *done = (*done + units).min(self.total_units);
        let percent = (*done * 100 / self.total_units) as u8;
        if let Err(error) = self.ctx.trackers.update(self.ctx.tracker_id, percent, stage) {
            tracing::warn!(tracker = %self.ctx.tracker_id, %error, "Progress update dropped");
        }
    }

    /// Record a stage label without moving the percent.
    fn note(&self, stage: &str) {
        let done = self.done_units.lock().expect("tracker scope lock poisoned");
        let percent = (*done * 100 / self.total_units) as u8;
        if let Err(error) = self.ctx.trackers.update(self.ctx.tracker_id, percent, stage) {
            tracing::warn!(tracker = %self.ctx.tracker_id, %error, "Progress update dropped");
        }
    }
}

/// Drives batches of files through the ingestion pipeline.
///
/// Construct once with the collaborator handles and share through an `Arc`;
/// the same processor serves both the streaming front door and queued jobs.
pub struct BatchProcessor {
    validator: Arc<dyn FileValidator>,
    extractor: Arc<dyn TextExtractor>,
    sink: Arc<dyn VectorSink>,
    chunk_size: usize,
    chunk_overlap: usize,
    parallelism: usize,
    retry: RetryPolicy,
}

impl BatchProcessor {
    /// Build a processor over the given collaborators.
    pub fn new(
        validator: Arc<dyn FileValidator>,
        extractor: Arc<dyn TextExtractor>,
        sink: Arc<dyn VectorSink>,
        chunk_size: usize,
        chunk_overlap: usize,
        parallelism: usize,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            validator,
            extractor,
            sink,
            chunk_size,
            chunk_overlap,
            parallelism: parallelism.max(1),
            retry,
        }
    }

    /// Process every file of a batch and aggregate the per-file outcomes.
    ///
    /// Sequential when the processor was built with `parallelism == 1` (the
    /// streaming path); bounded-parallel otherwise. Cancellation is observed
    /// between files and between stages, never mid-stage-call.
    pub async fn process_batch(
        &self,
        files: &[FileSpec],
        ctx: &PipelineContext,
        events: &dyn EventSink,
    ) -> Result<BatchOutcome, BatchRunError> {
        let total = files.len();
        let scope = TrackerScope::new(ctx, total);
        let finished = AtomicUsize::new(0);

        let mut outcome = BatchOutcome::default();
        if self.parallelism == 1 {
            for file in files {
                if ctx.is_cancelled() {
                    return Err(BatchRunError::Cancelled { partial: outcome });
                }
                match self
                    .process_file(file, ctx, &scope, events, &finished, total)
                    .await
                {
                    Ok((result, error)) => {
                        outcome.results.push(result);
                        outcome.errors.extend(error);
                    }
                    Err(BatchRunError::Cancelled { .. }) => {
                        return Err(BatchRunError::Cancelled { partial: outcome });
                    }
                    Err(error) => return Err(error),
                }
            }
        } else {
            // the stream takes owned file specs so the future stays Send
            let mut cancelled = false;
            let mut stream = futures_util::stream::iter(files.to_vec())
                .map(|file| {
                    let finished = &finished;
                    let scope = &scope;
                    async move {
                        if ctx.is_cancelled() {
                            return None;
                        }
                        Some(
                            self.process_file(&file, ctx, scope, events, finished, total)
                                .await,
                        )
                    }
                })
                .buffered(self.parallelism);

            while let Some(item) = stream.next().await {
                match item {
                    Some(Ok((result, error))) => {
                        outcome.results.push(result);
                        outcome.errors.extend(error);
                    }
                    Some(Err(BatchRunError::Cancelled { .. })) | None => cancelled = true,
                    Some(Err(error)) => return Err(error),
                }
            }
            if cancelled || ctx.is_cancelled() {
                return Err(BatchRunError::Cancelled { partial: outcome });
            }
        }

        scope.advance(0, "batch:finished");
        Ok(outcome)
    }

    /// Run one file through the pipeline while holding a document slot.
    ///
    /// Returns the per-file result plus an optional failure record; only
    /// cancellation and pool shutdown escape as batch-level errors.
    async fn process_file(
        &self,
        file: &FileSpec,
        ctx: &PipelineContext,
        scope: &TrackerScope<'_>,
        events: &dyn EventSink,
        finished: &AtomicUsize,
        total: usize,
    ) -> Result<(FileResult, Option<BatchError>), BatchRunError> {
        let progress = BatchProgress::new(finished.load(Ordering::SeqCst), total);
        events.emit(BatchEvent::FileStarted {
            file_name: file.file_name.clone(),
            progress,
        });
        scope.note(&format!("{}:started", file.file_name));

        // held for validation through store; released on every exit path
        let _slot = ctx
            .slots
            .acquire()
            .await
            .map_err(|error| BatchRunError::Fatal(error.to_string()))?;

        let report = self.validator.validate(file).await;
        if !report.is_valid {
            let message = if report.errors.is_empty() {
                "file failed validation".to_string()
            } else {
                report.errors.join("; ")
            };
            return Ok(self.fail_file(file, "validation", message, None, 2, scope, events, finished, total));
        }
        for warning in &report.warnings {
            tracing::debug!(file = %file.file_name, warning, "Validation warning");
        }

        let extract_started = Instant::now();
        let text = match self.extractor.extract(&file.path).await {
            Ok(text) => text,
            Err(error) => {
                return Ok(self.fail_file(
                    file,
                    "extraction",
                    error.to_string(),
                    None,
                    2,
                    scope,
                    events,
                    finished,
                    total,
                ));
            }
        };
        let extraction_ms = extract_started.elapsed().as_millis();

        scope.advance(1, &format!("{}:extracted", file.file_name));
        events.emit(BatchEvent::FileExtracted {
            file_name: file.file_name.clone(),
            extraction_ms,
            progress: BatchProgress::new(finished.load(Ordering::SeqCst), total),
        });
        ctx.check_cancellation()?;

        let (chunks, skipped) =
            match chunking::chunk_document(&text, self.chunk_size, self.chunk_overlap) {
                Ok(chunked) => chunked,
                Err(error) => {
                    return Ok(self.fail_file(
                        file,
                        "chunking",
                        error.to_string(),
                        Some(extraction_ms),
                        1,
                        scope,
                        events,
                        finished,
                        total,
                    ));
                }
            };
        if skipped > 0 {
            tracing::debug!(file = %file.file_name, skipped, "Dropped duplicate chunks");
        }

        let meta = DocumentMeta {
            file_name: file.file_name.clone(),
            source_uri: file.path.clone(),
        };
        if let Err(error) = self.store_with_retry(&ctx.owner_id, &meta, &chunks).await {
            return Ok(self.fail_file(
                file,
                "store",
                error.to_string(),
                Some(extraction_ms),
                1,
                scope,
                events,
                finished,
                total,
            ));
        }

        finished.fetch_add(1, Ordering::SeqCst);
        scope.advance(1, &format!("{}:completed", file.file_name));
        events.emit(BatchEvent::FileCompleted {
            file_name: file.file_name.clone(),
            chunk_count: chunks.len(),
            progress: BatchProgress::new(finished.load(Ordering::SeqCst), total),
        });
        tracing::info!(
            file = %file.file_name,
            chunks = chunks.len(),
            extraction_ms,
            "File indexed"
        );

        Ok((
            FileResult {
                file_name: file.file_name.clone(),
                succeeded: true,
                chunk_count: chunks.len(),
                extraction_ms: Some(extraction_ms),
                error: None,
            },
            None,
        ))
    }

    /// Persist chunks, retrying transient embedding failures per the policy.
    async fn store_with_retry(
        &self,
        namespace: &str,
        meta: &DocumentMeta,
        chunks: &[chunking::Chunk],
    ) -> Result<Vec<String>, StoreError> {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match self.sink.store(namespace, meta, chunks).await {
                Ok(ids) => return Ok(ids),
                Err(error) => match self.retry.decide(&error, attempts) {
                    RetryDecision::Retry(delay) => {
                        tracing::warn!(
                            file = %meta.file_name,
                            attempts,
                            delay_ms = delay.as_millis() as u64,
                            %error,
                            "Transient store failure; retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    RetryDecision::GiveUp => return Err(error),
                },
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn fail_file(
        &self,
        file: &FileSpec,
        stage: &str,
        message: String,
        extraction_ms: Option<u128>,
        remaining_units: usize,
        scope: &TrackerScope<'_>,
        events: &dyn EventSink,
        finished: &AtomicUsize,
        total: usize,
    ) -> (FileResult, Option<BatchError>) {
        finished.fetch_add(1, Ordering::SeqCst);
        scope.advance(remaining_units, &format!("{}:failed", file.file_name));
        events.emit(BatchEvent::FileFailed {
            file_name: file.file_name.clone(),
            error: message.clone(),
            progress: BatchProgress::new(finished.load(Ordering::SeqCst), total),
        });
        tracing::warn!(file = %file.file_name, stage, error = %message, "File failed");

        (
            FileResult {
                file_name: file.file_name.clone(),
                succeeded: false,
                chunk_count: 0,
                extraction_ms,
                error: Some(message.clone()),
            },
            Some(BatchError {
                file_name: file.file_name.clone(),
                stage: stage.to_string(),
                message,
            }),
        )
    }
}

impl Retryable for StoreError {
    fn is_retryable(&self) -> bool {
        StoreError::is_retryable(self)
    }
}
