//! Annotator boundary: labeling and embedding chunks.
//!
//! Annotators can be remote and slow, so the interface stays small (two
//! operations) and caching is the annotator's own responsibility. The
//! built-in [`HashAnnotator`] is deterministic and fully offline: a
//! heuristic label composed from chunk metadata, and a token-hash embedding,
//! memoized per content hash. It lets the whole pipeline run without any
//! network backend; swap in a real model at construction time.

use async_trait::async_trait;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::tokenizer::tokenize;
use crate::types::{AnnotatedChunk, Chunk};

/// Embedding width of the built-in hash embedder.
pub const DEFAULT_EMBED_DIM: usize = 64;

/// Upper bound on description length, in words.
const MAX_DESCRIPTION_WORDS: usize = 30;

#[derive(Debug, Error)]
pub enum AnnotateError {
    #[error("annotation backend: {0}")]
    Backend(String),

    #[error("relevance backend: {0}")]
    Relevance(String),
}

/// Produces a short description and a dense embedding per chunk, plus query
/// embeddings at search time.
#[async_trait]
pub trait Annotator: Send + Sync {
    async fn label_and_embed(&self, chunk: &Chunk) -> Result<(String, Vec<f32>), AnnotateError>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, AnnotateError>;
}

/// Re-ranks search candidates; returns an ordered subset.
#[async_trait]
pub trait RelevanceFilter: Send + Sync {
    async fn rerank(
        &self,
        query: &str,
        candidates: Vec<AnnotatedChunk>,
    ) -> Result<Vec<AnnotatedChunk>, AnnotateError>;
}

// ---------------------------------------------------------------------------
// Offline default
// ---------------------------------------------------------------------------

/// Deterministic offline annotator: heuristic labels, token-hash embeddings,
/// results memoized by content hash.
#[derive(Default)]
pub struct HashAnnotator {
    cache: DashMap<String, (String, Vec<f32>)>,
}

impl HashAnnotator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compose a label from the chunk's name, filename, and line range.
    fn label(chunk: &Chunk) -> String {
        let filename =
            chunk.file_path.rsplit('/').next().unwrap_or(chunk.file_path.as_str());
        let label = match &chunk.name {
            Some(name) if !chunk.is_file() => format!(
                "{} {} in {} (lines {}-{})",
                chunk.chunk_type, name, filename, chunk.line, chunk.end_line
            ),
            _ if chunk.is_file() => {
                format!("{} file {} ({} lines)", chunk.language, filename, chunk.end_line)
            }
            _ => format!(
                "{} in {} (lines {}-{})",
                chunk.chunk_type, filename, chunk.line, chunk.end_line
            ),
        };
        let words: Vec<&str> = label.split_whitespace().take(MAX_DESCRIPTION_WORDS).collect();
        words.join(" ")
    }

    /// Hash every token and accumulate digest bytes into a fixed-width
    /// vector. The vector index normalizes rows, so no scaling here.
    fn embed_text(text: &str) -> Vec<f32> {
        let mut vec = vec![0.0f32; DEFAULT_EMBED_DIM];
        for token in tokenize(text) {
            let mut hasher = Sha256::new();
            hasher.update(token.as_bytes());
            for (i, byte) in hasher.finalize().iter().enumerate() {
                vec[i % DEFAULT_EMBED_DIM] += *byte as f32 / 255.0;
            }
        }
        vec
    }
}

#[async_trait]
impl Annotator for HashAnnotator {
    async fn label_and_embed(&self, chunk: &Chunk) -> Result<(String, Vec<f32>), AnnotateError> {
        if let Some(cached) = self.cache.get(&chunk.content_hash) {
            return Ok(cached.value().clone());
        }
        let annotation = (Self::label(chunk), Self::embed_text(&chunk.content));
        self.cache.insert(chunk.content_hash.clone(), annotation.clone());
        Ok(annotation)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, AnnotateError> {
        Ok(Self::embed_text(text))
    }
}
