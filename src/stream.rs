//! Streaming front door: turns a small batch into a push stream of milestone
//! events, processed inline rather than queued.
//!
//! The stream opens with `batch-started`, forwards each file milestone as the
//! processor reaches it, then closes with `batch-completed` and `end`. The
//! terminal pair is emitted even when the batch aborts; the summary's `error`
//! field carries the abort reason in that case.

use crate::pipeline::batch::{BatchProcessor, BatchRunError, FileSpec, PipelineContext};
use crate::pipeline::events::{BatchEvent, BatchSummary, ChannelSink};
use async_stream::stream;
use futures_core::Stream;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Process `files` inline and yield one [`BatchEvent`] per milestone.
///
/// The processor runs on a spawned task so events flow to the client while
/// files are still being worked; the stream ends only after the terminal
/// `end` marker.
pub fn batch_event_stream(
    processor: Arc<BatchProcessor>,
    files: Vec<FileSpec>,
    ctx: PipelineContext,
) -> impl Stream<Item = BatchEvent> {
    stream! {
        let total = files.len();
        yield BatchEvent::BatchStarted { total };

        let (sender, mut receiver) = mpsc::unbounded_channel();
        let worker = {
            let processor = Arc::clone(&processor);
            let ctx = ctx.clone();
            tokio::spawn(async move {
                let sink = ChannelSink::new(sender);
                processor.process_batch(&files, &ctx, &sink).await
            })
        };

        while let Some(event) = receiver.recv().await {
            yield event;
        }

        let summary = match worker.await {
            Ok(Ok(outcome)) => outcome.summary(),
            Ok(Err(error)) => abort_summary(total, &error),
            Err(join_error) => {
                tracing::error!(%join_error, "Streaming batch worker panicked");
                BatchSummary {
                    total,
                    succeeded: 0,
                    failed: total,
                    chunks_indexed: 0,
                    error: Some("internal processing failure".to_string()),
                }
            }
        };
        yield BatchEvent::BatchCompleted { summary };
        yield BatchEvent::End;
    }
}

fn abort_summary(total: usize, error: &BatchRunError) -> BatchSummary {
    tracing::warn!(%error, "Streaming batch aborted");
    match error {
        BatchRunError::Cancelled { partial } => BatchSummary {
            total,
            succeeded: partial.succeeded(),
            failed: total - partial.succeeded(),
            chunks_indexed: partial.chunks_indexed(),
            error: Some(error.to_string()),
        },
        _ => BatchSummary {
            total,
            succeeded: 0,
            failed: total,
            chunks_indexed: 0,
            error: Some(error.to_string()),
        },
    }
}
