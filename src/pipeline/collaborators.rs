//! Contracts for the external collaborators consumed by the batch processor.
//!
//! Validation rules, the concrete text-extraction algorithm, and the vector
//! store live outside this crate; the processor talks to them through the
//! narrow traits below. In-process defaults are provided so the service runs
//! end to end without external backends, mirroring how a deterministic
//! fallback embedding client ships alongside the real providers.

use crate::pipeline::batch::FileSpec;
use crate::pipeline::chunking::Chunk;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

/// Errors raised while extracting text from an uploaded file.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// The file could not be read from disk.
    #[error("failed to read '{path}': {source}")]
    Unreadable {
        /// Path that was handed to the extractor.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The file was readable but its contents could not be decoded.
    #[error("corrupt or unsupported input: {0}")]
    Corrupt(String),
}

/// Errors raised while embedding and persisting chunks.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The embedding backend failed; treated as transient and retryable.
    #[error("embedding backend failed: {0}")]
    Embedding(String),
    /// The vector store rejected the write; not retryable.
    #[error("vector storage failed: {0}")]
    Storage(String),
}

impl StoreError {
    /// Whether a retry has a chance of succeeding.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Embedding(_))
    }
}

/// Outcome of validating a single file before it enters the pipeline.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ValidationReport {
    /// Whether the file may proceed through the pipeline.
    pub is_valid: bool,
    /// Hard validation failures, surfaced verbatim to the caller.
    pub errors: Vec<String>,
    /// Non-fatal observations about the file.
    pub warnings: Vec<String>,
    /// Basic facts gathered while inspecting the file.
    pub file_info: Option<FileInfo>,
}

/// Facts gathered about a file during validation.
#[derive(Debug, Clone, serde::Serialize)]
pub struct FileInfo {
    /// Lowercased file extension, when present.
    pub extension: Option<String>,
}

/// Metadata describing the document a set of chunks belongs to.
#[derive(Debug, Clone)]
pub struct DocumentMeta {
    /// Original file name supplied by the uploader.
    pub file_name: String,
    /// Path or URI the text was extracted from.
    pub source_uri: String,
}

/// Validates a file before any heavy pipeline stage runs.
#[async_trait]
pub trait FileValidator: Send + Sync {
    /// Inspect the file and report whether it may be processed.
    async fn validate(&self, file: &FileSpec) -> ValidationReport;
}

/// Extracts plain text from an uploaded file.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Produce the document text for the file at `path`.
    async fn extract(&self, path: &str) -> Result<String, ExtractionError>;
}

/// Embeds chunks and persists them under an owner namespace.
#[async_trait]
pub trait VectorSink: Send + Sync {
    /// Store every chunk and return one vector id per chunk.
    async fn store(
        &self,
        namespace: &str,
        meta: &DocumentMeta,
        chunks: &[Chunk],
    ) -> Result<Vec<String>, StoreError>;
}

/// Default validator: rejects empty names and flags unknown extensions.
pub struct BasicValidator {
    accepted: Vec<&'static str>,
}

impl BasicValidator {
    /// Construct a validator accepting the common text-bearing extensions.
    pub fn new() -> Self {
        Self {
            accepted: vec!["txt", "md", "markdown", "rst", "csv", "json", "html"],
        }
    }
}

impl Default for BasicValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FileValidator for BasicValidator {
    async fn validate(&self, file: &FileSpec) -> ValidationReport {
        let mut report = ValidationReport {
            is_valid: true,
            ..ValidationReport::default()
        };

        if file.file_name.trim().is_empty() {
            report.is_valid = false;
            report.errors.push("file name is empty".to_string());
        }

        let extension = Path::new(&file.file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_lowercase);

        match &extension {
            Some(ext) if self.accepted.contains(&ext.as_str()) => {}
            Some(ext) => report
                .warnings
                .push(format!("extension '{ext}' is not a known text format")),
            None => report.warnings.push("file has no extension".to_string()),
        }

        report.file_info = Some(FileInfo { extension });
        report
    }
}

/// Default extractor: reads the file from the local filesystem as UTF-8.
pub struct FsTextExtractor;

#[async_trait]
impl TextExtractor for FsTextExtractor {
    async fn extract(&self, path: &str) -> Result<String, ExtractionError> {
        match tokio::fs::read_to_string(path).await {
            Ok(text) => Ok(text),
            Err(err) if err.kind() == std::io::ErrorKind::InvalidData => {
                Err(ExtractionError::Corrupt(format!(
                    "'{path}' is not valid UTF-8"
                )))
            }
            Err(err) => Err(ExtractionError::Unreadable {
                path: path.to_string(),
                source: err,
            }),
        }
    }
}

/// Default sink: deterministic content-hash embeddings kept in memory.
///
/// Useful for development and tests; production deployments plug a real
/// vector-store client in through the [`VectorSink`] trait.
pub struct InMemoryVectorSink {
    dimension: usize,
    stored: Mutex<HashMap<String, StoredVector>>,
}

struct StoredVector {
    #[allow(dead_code)]
    namespace: String,
    #[allow(dead_code)]
    vector: Vec<f32>,
}

impl InMemoryVectorSink {
    /// Create a sink producing vectors of the given dimensionality.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            stored: Mutex::new(HashMap::new()),
        }
    }

    /// Number of vectors currently held.
    pub fn len(&self) -> usize {
        self.stored.lock().expect("sink lock poisoned").len()
    }

    /// Whether the sink holds no vectors.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn encode(text: &str, dimension: usize) -> Vec<f32> {
        let mut embedding = vec![0.0_f32; dimension];
        if text.is_empty() {
            return embedding;
        }

        for (idx, byte) in text.bytes().enumerate() {
            let position = idx % dimension;
            embedding[position] += f32::from(byte) / 255.0;
        }

        let norm = embedding
            .iter()
            .map(|value| value * value)
            .sum::<f32>()
            .sqrt();
        if norm > 0.0 {
            for value in &mut embedding {
                *value /= norm;
            }
        }

        embedding
    }
}

#[async_trait]
impl VectorSink for InMemoryVectorSink {
    async fn store(
        &self,
        namespace: &str,
        _meta: &DocumentMeta,
        chunks: &[Chunk],
    ) -> Result<Vec<String>, StoreError> {
        if self.dimension == 0 {
            return Err(StoreError::Embedding(
                "embedding dimension must be greater than zero".to_string(),
            ));
        }

        let mut guard = self
            .stored
            .lock()
            .map_err(|_| StoreError::Storage("sink lock poisoned".to_string()))?;

        let mut ids = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let id = uuid::Uuid::new_v4().to_string();
            guard.insert(
                id.clone(),
                StoredVector {
                    namespace: namespace.to_string(),
                    vector: Self::encode(&chunk.text, self.dimension),
                },
            );
            ids.push(id);
        }
        Ok(ids)
    }
}
