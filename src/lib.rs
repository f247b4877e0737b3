//! chunkgraph — code-aware hybrid retrieval engine for source repositories.
//!
//! Splits code into language-aware chunks (tree-sitter backed, with a
//! file-only fallback on parse failure), maintains a BM25 inverted index
//! and an exact-cosine vector index over them, mirrors the chunk catalog
//! into an in-memory property graph queryable with a Cypher-like pattern
//! language, and keeps everything consistent with disk through a polling
//! watcher built on a Merkle tree of file content hashes.
//!
//! The [`Coordinator`] is the top-level entry point:
//!
//! ```no_run
//! # async fn demo() -> chunkgraph::Result<()> {
//! use chunkgraph::Coordinator;
//!
//! let mut coordinator = Coordinator::new("/path/to/repo");
//! coordinator.ingest().await?;
//!
//! let hits = coordinator.search_text("connection pool").await?;
//! let rows = coordinator.search_graph(
//!     "MATCH (f:File)-[:CONTAINS]->(c:Code) RETURN c.name AS name ORDER BY name",
//! )?;
//! # Ok(())
//! # }
//! ```
//!
//! Annotation (chunk descriptions and embeddings) and relevance re-ranking
//! are pluggable through the [`annotate::Annotator`] and
//! [`annotate::RelevanceFilter`] traits; the built-in defaults are
//! deterministic and fully offline.

pub mod annotate;
pub mod bm25;
pub mod chunker;
pub mod coordinator;
pub mod error;
pub mod graph;
pub mod lang;
pub mod merkle;
pub mod query;
pub mod search;
pub mod tokenizer;
pub mod types;
pub mod vector;

pub use annotate::{Annotator, HashAnnotator, RelevanceFilter};
pub use coordinator::{Coordinator, WatcherHandle};
pub use error::{Error, Result};
pub use graph::{rows_to_chunks, GraphSnapshot, GraphStore, Row};
pub use search::{SearchDb, SearchOptions};
pub use types::{AnnotatedChunk, Chunk, IndexConfig};
