//! BM25 inverted index over chunk text.
//!
//! Postings support dynamic add/remove so the watcher can surgically update
//! single documents. Top-K retrieval keeps a bounded min-heap rather than
//! sorting the full candidate set.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use crate::tokenizer::{tokenize, unique_tokens};

/// Term-frequency saturation parameter.
const K1: f64 = 1.5;
/// Length-normalization parameter.
const B: f64 = 0.75;

/// A scored entry, ordered ascending by score so that wrapping it in a
/// `BinaryHeap<Reverse<_>>` yields a min-heap with the weakest hit on top.
#[derive(Debug, PartialEq)]
struct Scored<T> {
    score: f64,
    id: T,
}

impl<T: Ord + PartialEq> Eq for Scored<T> {}

impl<T: Ord> PartialOrd for Scored<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: Ord> Ord for Scored<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .partial_cmp(&other.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Select the `k` highest-scoring entries, sorted descending.
///
/// Shared by the BM25 and vector indexes; cost is `O(N log K)` and the only
/// allocations are for the `k` survivors.
pub(crate) fn top_k_by_score<T: Ord>(
    scores: impl Iterator<Item = (T, f64)>,
    k: usize,
) -> Vec<(T, f64)> {
    if k == 0 {
        return Vec::new();
    }
    let mut heap: BinaryHeap<std::cmp::Reverse<Scored<T>>> = BinaryHeap::with_capacity(k + 1);
    for (id, score) in scores {
        heap.push(std::cmp::Reverse(Scored { score, id }));
        if heap.len() > k {
            heap.pop();
        }
    }
    let mut out: Vec<(T, f64)> =
        heap.into_iter().map(|std::cmp::Reverse(s)| (s.id, s.score)).collect();
    out.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal).then_with(|| a.0.cmp(&b.0)));
    out
}

/// Inverted index with Okapi BM25 scoring.
#[derive(Default)]
pub struct Bm25Index {
    /// term -> (doc id -> term frequency)
    postings: HashMap<String, HashMap<String, usize>>,
    /// doc id -> token count
    doc_len: HashMap<String, usize>,
    /// Sum of all document lengths.
    total_len: usize,
}

impl Bm25Index {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of indexed documents.
    pub fn len(&self) -> usize {
        self.doc_len.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc_len.is_empty()
    }

    pub fn contains(&self, doc_id: &str) -> bool {
        self.doc_len.contains_key(doc_id)
    }

    /// Index a document. Empty text is ignored. Re-adding an existing id is
    /// undefined; callers must [`remove`](Self::remove) first.
    pub fn add(&mut self, doc_id: &str, text: &str) {
        let tokens = tokenize(text);
        if tokens.is_empty() {
            return;
        }
        let len = tokens.len();
        let mut freqs: HashMap<String, usize> = HashMap::new();
        for token in tokens {
            *freqs.entry(token).or_insert(0) += 1;
        }
        for (term, tf) in freqs {
            self.postings.entry(term).or_default().insert(doc_id.to_string(), tf);
        }
        self.doc_len.insert(doc_id.to_string(), len);
        self.total_len += len;
    }

    /// Drop a document from every posting list. Idempotent on unknown ids.
    pub fn remove(&mut self, doc_id: &str) {
        let Some(len) = self.doc_len.remove(doc_id) else {
            return;
        };
        self.total_len -= len;
        self.postings.retain(|_, docs| {
            docs.remove(doc_id);
            !docs.is_empty()
        });
    }

    /// Score `query` against the index and return the top `k` documents,
    /// sorted by descending score.
    pub fn top_k(&self, query: &str, k: usize) -> Vec<(String, f64)> {
        if k == 0 || self.doc_len.is_empty() {
            return Vec::new();
        }

        let n = self.doc_len.len().max(1) as f64;
        let avgdl = (self.total_len as f64 / n).max(f64::EPSILON);

        let mut scores: HashMap<&str, f64> = HashMap::new();
        for term in unique_tokens(query) {
            let Some(docs) = self.postings.get(&term) else {
                continue;
            };
            let df = docs.len() as f64;
            let idf = (1.0 + (n - df + 0.5) / (df + 0.5)).ln();
            for (doc_id, &tf) in docs {
                let tf = tf as f64;
                let dl = self.doc_len.get(doc_id).copied().unwrap_or(0) as f64;
                let contribution =
                    idf * (tf * (K1 + 1.0)) / (tf + K1 * (1.0 - B + B * dl / avgdl));
                *scores.entry(doc_id.as_str()).or_insert(0.0) += contribution;
            }
        }

        top_k_by_score(scores.into_iter(), k)
            .into_iter()
            .map(|(id, score)| (id.to_string(), score))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(docs: &[(&str, &str)]) -> Bm25Index {
        let mut idx = Bm25Index::new();
        for (id, text) in docs {
            idx.add(id, text);
        }
        idx
    }

    #[test]
    fn lexical_hit_ranks_matching_doc_first() {
        let idx = index(&[
            ("a", "database connection pool manager"),
            ("b", "image processing pipeline for photos"),
        ]);
        let hits = idx.top_k("connection pool", 2);
        assert!(!hits.is_empty());
        assert_eq!(hits[0].0, "a");
    }

    #[test]
    fn results_sorted_descending_and_bounded() {
        let idx = index(&[
            ("a", "alpha alpha alpha"),
            ("b", "alpha beta"),
            ("c", "alpha beta gamma delta"),
            ("d", "unrelated words entirely"),
        ]);
        let hits = idx.top_k("alpha", 2);
        assert_eq!(hits.len(), 2);
        assert!(hits[0].1 >= hits[1].1);

        let all = idx.top_k("alpha", 10);
        assert_eq!(all.len(), 3, "doc d matches nothing");
        for pair in all.windows(2) {
            assert!(pair[0].1 >= pair[1].1);
        }
    }

    #[test]
    fn remove_is_surgical_and_idempotent() {
        let mut idx = index(&[("a", "alpha beta"), ("b", "alpha gamma")]);
        assert_eq!(idx.len(), 2);

        idx.remove("a");
        assert_eq!(idx.len(), 1);
        assert!(!idx.contains("a"));
        let hits = idx.top_k("alpha", 10);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "b");

        // removing again is a no-op
        idx.remove("a");
        idx.remove("never-added");
        assert_eq!(idx.len(), 1);
    }

    #[test]
    fn empty_query_and_empty_index() {
        let idx = Bm25Index::new();
        assert!(idx.top_k("anything", 5).is_empty());

        let idx = index(&[("a", "alpha")]);
        assert!(idx.top_k("", 5).is_empty());
        assert!(idx.top_k("zzz", 5).is_empty());
        assert!(idx.top_k("alpha", 0).is_empty());
    }

    #[test]
    fn empty_text_documents_are_ignored() {
        let mut idx = Bm25Index::new();
        idx.add("a", "   \n\t ");
        assert!(idx.is_empty());
    }

    #[test]
    fn repeated_query_terms_count_once() {
        let idx = index(&[("a", "alpha beta"), ("b", "alpha gamma")]);
        let once = idx.top_k("alpha", 10);
        let thrice = idx.top_k("alpha alpha alpha", 10);
        assert_eq!(once, thrice);
    }
}
