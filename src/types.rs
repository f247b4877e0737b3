use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Default watcher polling interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(750);

/// Default top-K sizes for the lexical and dense retrieval legs.
pub const DEFAULT_BM25_K: usize = 10;
pub const DEFAULT_KNN_K: usize = 10;

// ---------------------------------------------------------------------------
// Chunks — the unit of retrieval and a graph node
// ---------------------------------------------------------------------------

/// Kind of an outgoing relation attached to a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    Contains,
    Defines,
    References,
}

/// An outgoing edge from one chunk to another, by id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkRelation {
    pub kind: RelationKind,
    pub target_id: String,
}

/// A contiguous span of source code with a stable content-derived id.
///
/// Every indexed file is represented by exactly one chunk of type `"file"`;
/// sub-file chunks (functions, classes, methods…) chain to it via
/// `parent_id`. Only parents carry outgoing `contains` relations.
#[derive(Debug, Clone, Serialize)]
pub struct Chunk {
    pub id: String,
    #[serde(rename = "filePath")]
    pub file_path: String,
    pub language: String,
    #[serde(rename = "type")]
    pub chunk_type: String,
    pub name: Option<String>,
    /// 1-based start line.
    pub line: usize,
    /// 1-based end line (inclusive).
    #[serde(rename = "endLine")]
    pub end_line: usize,
    pub content: String,
    #[serde(rename = "contentHash")]
    pub content_hash: String,
    #[serde(rename = "parentId")]
    pub parent_id: Option<String>,
    pub relations: Vec<ChunkRelation>,
}

/// Chunk type marker for whole-file chunks.
pub const FILE_CHUNK_TYPE: &str = "file";

impl Chunk {
    /// Is this the root chunk of its file?
    pub fn is_file(&self) -> bool {
        self.chunk_type == FILE_CHUNK_TYPE
    }
}

/// A chunk enriched with a short description and a dense embedding.
#[derive(Debug, Clone, Serialize)]
pub struct AnnotatedChunk {
    #[serde(flatten)]
    pub chunk: Chunk,
    pub description: String,
    #[serde(skip)]
    pub embedding: Vec<f32>,
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Caller-supplied path predicate: `(absolute, relative) -> keep?`.
pub type PathFilter = Arc<dyn Fn(&Path, &str) -> bool + Send + Sync>;

/// Runtime configuration for indexing and retrieval.
#[derive(Clone, Default)]
pub struct IndexConfig {
    /// Enabled language names. `None` enables every built-in language.
    pub languages: Option<Vec<String>>,
    /// Custom path filter, applied after the VCS skip and ignore rules.
    /// When set, it replaces the default dependency-directory skip.
    pub include: Option<PathFilter>,
    /// Watcher polling period. `None` means [`DEFAULT_POLL_INTERVAL`].
    pub poll_interval: Option<Duration>,
    /// Lexical top-K. `None` means [`DEFAULT_BM25_K`].
    pub bm25_k: Option<usize>,
    /// Dense top-K. `None` means [`DEFAULT_KNN_K`].
    pub knn_k: Option<usize>,
}

impl IndexConfig {
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval.unwrap_or(DEFAULT_POLL_INTERVAL)
    }

    pub fn bm25_k(&self) -> usize {
        self.bm25_k.unwrap_or(DEFAULT_BM25_K)
    }

    pub fn knn_k(&self) -> usize {
        self.knn_k.unwrap_or(DEFAULT_KNN_K)
    }

    /// Is the named language enabled under this config?
    pub fn language_enabled(&self, name: &str) -> bool {
        match &self.languages {
            Some(enabled) => enabled.iter().any(|l| l == name),
            None => true,
        }
    }
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// SHA-256 of arbitrary bytes, hex-encoded. Used for chunk ids, content
/// hashes, and Merkle leaves so that all fingerprints share one format.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Stable id for a sub-file chunk covering `[start_byte, end_byte)`.
pub fn chunk_id(file_path: &str, start_byte: usize, end_byte: usize) -> String {
    sha256_hex(format!("{file_path}:{start_byte}:{end_byte}").as_bytes())
}

/// Stable id for a whole-file chunk.
pub fn file_chunk_id(file_path: &str) -> String {
    sha256_hex(format!("{file_path}:file").as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_ids_are_stable_and_distinct() {
        let a = chunk_id("/repo/a.rs", 0, 10);
        let b = chunk_id("/repo/a.rs", 0, 10);
        let c = chunk_id("/repo/a.rs", 0, 11);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, file_chunk_id("/repo/a.rs"));
    }

    #[test]
    fn config_defaults() {
        let config = IndexConfig::default();
        assert_eq!(config.poll_interval(), DEFAULT_POLL_INTERVAL);
        assert_eq!(config.bm25_k(), 10);
        assert_eq!(config.knn_k(), 10);
        assert!(config.language_enabled("rust"));

        let config = IndexConfig { languages: Some(vec!["python".into()]), ..Default::default() };
        assert!(config.language_enabled("python"));
        assert!(!config.language_enabled("rust"));
    }
}
