//! Token-budget chunking for extracted document text.
//!
//! Chunk boundaries come from semantic splitting against a token counter.
//! Token counting prefers the `cl100k_base` encoding and falls back to a
//! whitespace counter when the tokenizer cannot be constructed. Adjacent
//! chunks may share a sliding token overlap, and duplicate chunks within a
//! single document are dropped by content hash before embedding.

use anyhow::Error as TokenizerError;
use semchunk_rs::Chunker;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use thiserror::Error;
use tiktoken_rs::cl100k_base;

type TokenCounter = Arc<dyn Fn(&str) -> usize + Send + Sync>;

/// Default token budget per chunk when no override is configured.
pub const DEFAULT_CHUNK_SIZE: usize = 512;

/// Errors produced while turning raw text into chunks.
#[derive(Debug, Error)]
pub enum ChunkingError {
    /// Caller configured an impossible token budget.
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,
    /// Tokenizer resources were unavailable.
    #[error("failed to initialize tokenizer: {source}")]
    Tokenizer {
        /// Underlying error raised by the tokenizer library.
        #[source]
        source: TokenizerError,
    },
}

/// A chunk of document text ready for embedding.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Chunk contents.
    pub text: String,
    /// Hex-encoded SHA-256 of the contents, used for within-batch dedupe.
    pub chunk_hash: String,
}

/// Resolve the effective chunk size from an optional override.
pub fn effective_chunk_size(override_size: Option<usize>) -> usize {
    override_size.map_or(DEFAULT_CHUNK_SIZE, |size| size.max(1))
}

/// Chunk a document and dedupe repeated chunks by content hash.
///
/// Returns an empty vector when the input is all whitespace. The second
/// tuple element is the number of duplicate chunks dropped.
pub fn chunk_document(
    text: &str,
    chunk_size: usize,
    overlap: usize,
) -> Result<(Vec<Chunk>, usize), ChunkingError> {
    if chunk_size == 0 {
        return Err(ChunkingError::InvalidChunkSize);
    }
    if text.trim().is_empty() {
        return Ok((Vec::new(), 0));
    }

    let counter = token_counter();
    let pieces = split_text(text, chunk_size, overlap, &counter);

    let mut seen = std::collections::HashSet::new();
    let mut chunks = Vec::with_capacity(pieces.len());
    let mut skipped = 0usize;
    for piece in pieces {
        let chunk_hash = hash_chunk(&piece);
        if seen.insert(chunk_hash.clone()) {
            chunks.push(Chunk {
                text: piece,
                chunk_hash,
            });
        } else {
            skipped += 1;
        }
    }
    Ok((chunks, skipped))
}

fn hash_chunk(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

fn token_counter() -> TokenCounter {
    match cl100k_base() {
        Ok(encoding) => {
            let encoding = Arc::new(encoding);
            Arc::new(move |segment: &str| encoding.encode_ordinary(segment).len())
        }
        Err(error) => {
            tracing::warn!(
                error = %error,
                "Tokenizer unavailable; falling back to whitespace counting"
            );
            whitespace_counter()
        }
    }
}

fn whitespace_counter() -> TokenCounter {
    Arc::new(|segment: &str| {
        let tokens = segment.split_whitespace().count();
        if tokens == 0 && !segment.is_empty() {
            1
        } else {
            tokens
        }
    })
}

fn split_text(
    text: &str,
    chunk_size: usize,
    overlap: usize,
    counter: &TokenCounter,
) -> Vec<String> {
    let counter_for_chunker = counter.clone();
    let chunker = Chunker::new(
        chunk_size,
        Box::new(move |segment: &str| counter_for_chunker.as_ref()(segment)),
    );
    let base = chunker.chunk(text);
    apply_overlap(base, chunk_size, overlap, counter)
}

/// Prepend the tail of the previous chunk to each subsequent chunk.
///
/// The tail is the last `overlap` whitespace-delimited words of the previous
/// chunk. When the combined text would exceed the token budget the overlap is
/// skipped for that boundary; the budget always wins.
fn apply_overlap(
    chunks: Vec<String>,
    chunk_size: usize,
    overlap: usize,
    counter: &TokenCounter,
) -> Vec<String> {
    let effective = overlap.min(chunk_size.saturating_sub(1));
    if effective == 0 || chunks.len() < 2 {
        return chunks;
    }

    let mut result = Vec::with_capacity(chunks.len());
    let mut previous: Option<String> = None;
    for current in chunks {
        let combined = match &previous {
            Some(prev) => {
                let words: Vec<&str> = prev.split_whitespace().collect();
                let start = words.len().saturating_sub(effective);
                let tail = words[start..].join(" ");
                if tail.is_empty() {
                    current.clone()
                } else {
                    let candidate = format!("{tail} {current}");
                    if counter.as_ref()(&candidate) <= chunk_size {
                        candidate
                    } else {
                        current.clone()
                    }
                }
            }
            None => current.clone(),
        };
        result.push(combined);
        previous = Some(current);
    }
    result
}
