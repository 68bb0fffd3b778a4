//! Batch processing pipeline: collaborator contracts, chunking, milestone
//! events, and the per-file orchestration shared by the streaming and queued
//! paths.

/// Per-job batch orchestration.
pub mod batch;
/// Token-budget chunking helpers.
pub mod chunking;
/// External collaborator contracts and in-process defaults.
pub mod collaborators;
/// Milestone events and sinks.
pub mod events;

pub use batch::{
    BatchError, BatchOutcome, BatchProcessor, BatchRunError, FileResult, FileSpec, PipelineContext,
};
pub use chunking::{Chunk, ChunkingError};
pub use collaborators::{
    BasicValidator, DocumentMeta, ExtractionError, FileValidator, FsTextExtractor,
    InMemoryVectorSink, StoreError, TextExtractor, ValidationReport, VectorSink,
};
pub use events::{BatchEvent, BatchProgress, BatchSummary, ChannelSink, EventSink, NullSink};
