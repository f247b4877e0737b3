//! Hybrid search database: catalog + BM25 + vector index.
//!
//! A chunk is either present in all three stores or in none of them; add,
//! update, and remove keep that invariant. Search takes the union of the
//! lexical and dense candidate sets (BM25 first), then hands the candidates
//! to the configured relevance filter, falling back to a token-overlap
//! heuristic when no filter is set or the filter fails.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::annotate::{AnnotateError, Annotator, HashAnnotator, RelevanceFilter};
use crate::bm25::Bm25Index;
use crate::tokenizer::unique_tokens;
use crate::types::{AnnotatedChunk, Chunk};
use crate::vector::VectorIndex;

/// Annotation fan-out within one `add_many` batch.
const ANNOTATE_BATCH: usize = 8;

/// Per-query top-K sizes for the two retrieval legs.
#[derive(Debug, Clone, Copy)]
pub struct SearchOptions {
    pub bm25_k: usize,
    pub knn_k: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self { bm25_k: crate::types::DEFAULT_BM25_K, knn_k: crate::types::DEFAULT_KNN_K }
    }
}

pub struct SearchDb {
    catalog: HashMap<String, AnnotatedChunk>,
    bm25: Bm25Index,
    vectors: VectorIndex,
    annotator: Arc<dyn Annotator>,
    relevance: Option<Arc<dyn RelevanceFilter>>,
}

impl Default for SearchDb {
    fn default() -> Self {
        Self::new()
    }
}

impl SearchDb {
    /// A self-contained database using the offline default annotator.
    pub fn new() -> Self {
        Self::with_annotator(Arc::new(HashAnnotator::new()))
    }

    pub fn with_annotator(annotator: Arc<dyn Annotator>) -> Self {
        SearchDb {
            catalog: HashMap::new(),
            bm25: Bm25Index::new(),
            vectors: VectorIndex::new(),
            annotator,
            relevance: None,
        }
    }

    pub fn set_relevance_filter(&mut self, filter: Arc<dyn RelevanceFilter>) {
        self.relevance = Some(filter);
    }

    pub fn annotator(&self) -> Arc<dyn Annotator> {
        Arc::clone(&self.annotator)
    }

    pub fn len(&self) -> usize {
        self.catalog.len()
    }

    pub fn is_empty(&self) -> bool {
        self.catalog.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&AnnotatedChunk> {
        self.catalog.get(id)
    }

    /// All annotated chunks, ordered by file path and position for
    /// deterministic iteration.
    pub fn list(&self) -> Vec<&AnnotatedChunk> {
        let mut chunks: Vec<&AnnotatedChunk> = self.catalog.values().collect();
        chunks.sort_by(|a, b| {
            (&a.chunk.file_path, a.chunk.line, &a.chunk.id)
                .cmp(&(&b.chunk.file_path, b.chunk.line, &b.chunk.id))
        });
        chunks
    }

    /// Annotate and index one chunk.
    pub async fn add(&mut self, chunk: Chunk) -> Result<(), AnnotateError> {
        let (description, embedding) = self.annotator.label_and_embed(&chunk).await?;
        self.insert_annotated(chunk, description, embedding);
        Ok(())
    }

    /// Annotate and index chunks in small parallel batches. A failing batch
    /// aborts the call; chunks indexed by earlier batches stay indexed.
    pub async fn add_many(&mut self, chunks: Vec<Chunk>) -> Result<(), AnnotateError> {
        let annotator = Arc::clone(&self.annotator);
        for batch in chunks.chunks(ANNOTATE_BATCH) {
            let annotations = futures::future::try_join_all(
                batch.iter().map(|chunk| annotator.label_and_embed(chunk)),
            )
            .await?;
            for (chunk, (description, embedding)) in batch.iter().zip(annotations) {
                self.insert_annotated(chunk.clone(), description, embedding);
            }
        }
        Ok(())
    }

    /// Replace a chunk wholesale.
    pub async fn update(&mut self, chunk: Chunk) -> Result<(), AnnotateError> {
        self.remove(&chunk.id.clone());
        self.add(chunk).await
    }

    /// Drop a chunk from all three stores. Idempotent on unknown ids.
    pub fn remove(&mut self, id: &str) {
        self.catalog.remove(id);
        self.bm25.remove(id);
        self.vectors.remove(id);
    }

    /// Drop every chunk, keeping the annotator and relevance filter.
    pub fn clear(&mut self) {
        self.catalog.clear();
        self.bm25 = Bm25Index::new();
        self.vectors = VectorIndex::new();
    }

    fn insert_annotated(&mut self, chunk: Chunk, description: String, embedding: Vec<f32>) {
        let id = chunk.id.clone();
        self.bm25.add(&id, &format!("{}\n{}", description, chunk.content));
        self.vectors.add(&id, &embedding);
        self.catalog.insert(id, AnnotatedChunk { chunk, description, embedding });
    }

    /// Hybrid retrieval: BM25 candidates, then KNN candidates, union in
    /// first-seen order, re-ranked by the relevance filter or the default
    /// token-overlap heuristic.
    pub async fn search(
        &self,
        query: &str,
        options: SearchOptions,
    ) -> Result<Vec<AnnotatedChunk>, AnnotateError> {
        let bm25_hits = self.bm25.top_k(query, options.bm25_k);

        let query_vec = self.annotator.embed(query).await?;
        let knn_hits = self.vectors.top_k(&query_vec, options.knn_k);

        let mut candidates: Vec<AnnotatedChunk> = Vec::new();
        for (id, _) in bm25_hits.iter().chain(knn_hits.iter()) {
            if candidates.iter().any(|c| &c.chunk.id == id) {
                continue;
            }
            if let Some(found) = self.catalog.get(id) {
                candidates.push(found.clone());
            }
        }
        debug!(
            query,
            bm25 = bm25_hits.len(),
            knn = knn_hits.len(),
            union = candidates.len(),
            "hybrid candidates"
        );

        if let Some(filter) = &self.relevance {
            match filter.rerank(query, candidates.clone()).await {
                Ok(ranked) => return Ok(ranked),
                Err(err) => {
                    warn!(error = %err, "relevance filter failed, using default heuristic");
                }
            }
        }

        Ok(default_relevance(query, candidates))
    }
}

/// Keep candidates whose name + content mentions any query token; when none
/// survive, return the whole union unfiltered.
fn default_relevance(query: &str, candidates: Vec<AnnotatedChunk>) -> Vec<AnnotatedChunk> {
    let tokens = unique_tokens(query);
    if tokens.is_empty() {
        return candidates;
    }
    let surviving: Vec<AnnotatedChunk> = candidates
        .iter()
        .filter(|c| {
            let haystack = format!(
                "{} {}",
                c.chunk.name.as_deref().unwrap_or_default(),
                c.chunk.content
            )
            .to_lowercase();
            tokens.iter().any(|t| haystack.contains(t.as_str()))
        })
        .cloned()
        .collect();
    if surviving.is_empty() {
        candidates
    } else {
        surviving
    }
}
