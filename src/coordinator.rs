//! Incremental coordinator: owns the chunk catalog, both search indexes,
//! the graph store, and the Merkle tree, and keeps them consistent with the
//! repository on disk.
//!
//! Ingest walks the repository, chunks every supported file, feeds the
//! search database, rebuilds the graph from the full catalog, and records a
//! Merkle leaf per file. The watcher re-scans on a fixed interval and
//! applies surgical updates: all removals for a tick first, then changed
//! files, then one graph rebuild at the end of the tick.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

use crate::annotate::Annotator;
use crate::chunker;
use crate::error::Result;
use crate::graph::{rows_to_chunks, GraphError, GraphStore, Row};
use crate::merkle::{leaf_hash, MerkleTree};
use crate::search::{SearchDb, SearchOptions};
use crate::tokenizer::tokenize;
use crate::types::{AnnotatedChunk, Chunk, IndexConfig, RelationKind};

pub struct Coordinator {
    root: PathBuf,
    config: IndexConfig,
    search: SearchDb,
    graph: GraphStore,
    merkle: MerkleTree,
    /// file path -> chunk ids, for surgical removal on watcher ticks.
    file_chunks: HashMap<String, Vec<String>>,
}

impl Coordinator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_config(root, IndexConfig::default())
    }

    pub fn with_config(root: impl Into<PathBuf>, config: IndexConfig) -> Self {
        Coordinator {
            root: root.into(),
            config,
            search: SearchDb::new(),
            graph: GraphStore::new(),
            merkle: MerkleTree::new(),
            file_chunks: HashMap::new(),
        }
    }

    pub fn with_annotator(
        root: impl Into<PathBuf>,
        config: IndexConfig,
        annotator: Arc<dyn Annotator>,
    ) -> Self {
        Coordinator {
            root: root.into(),
            config,
            search: SearchDb::with_annotator(annotator),
            graph: GraphStore::new(),
            merkle: MerkleTree::new(),
            file_chunks: HashMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn search_db(&self) -> &SearchDb {
        &self.search
    }

    pub fn search_db_mut(&mut self) -> &mut SearchDb {
        &mut self.search
    }

    pub fn graph(&self) -> &GraphStore {
        &self.graph
    }

    /// Fingerprint of the indexed on-disk state.
    pub fn merkle_root(&self) -> String {
        self.merkle.root()
    }

    // -- ingest -------------------------------------------------------------

    /// Full (re-)index of the repository. Running ingest twice without file
    /// changes yields identical chunk ids and an identical Merkle root.
    pub async fn ingest(&mut self) -> Result<()> {
        let start = std::time::Instant::now();

        self.search.clear();
        self.merkle = MerkleTree::new();
        self.file_chunks.clear();

        let files = chunker::walk_repository(&self.root, &self.config);
        let mut all_chunks = Vec::new();
        for path in &files {
            let Some((file_path, leaf, chunks)) = self.load_file(path) else {
                continue;
            };
            self.merkle.upsert(&file_path, leaf);
            self.file_chunks
                .insert(file_path, chunks.iter().map(|c| c.id.clone()).collect());
            all_chunks.extend(chunks);
        }

        let chunk_count = all_chunks.len();
        self.search.add_many(all_chunks).await?;
        self.rebuild_graph()?;

        info!(
            files = files.len(),
            chunks = chunk_count,
            nodes = self.graph.node_count(),
            relationships = self.graph.relationship_count(),
            time_ms = start.elapsed().as_millis() as u64,
            "ingest complete"
        );
        Ok(())
    }

    /// Read and chunk one file. `None` when the file is unsupported or
    /// unreadable (per-file I/O is best-effort).
    fn load_file(&self, path: &Path) -> Option<(String, String, Vec<Chunk>)> {
        let lang = chunker::language_for(path, &self.config)?;
        let raw = match std::fs::read(path) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(file = %path.display(), error = %err, "read failed, skipping file");
                return None;
            }
        };
        let file_path = chunker::normalize_path(path);
        let leaf = leaf_hash(&raw);
        let chunks = chunker::chunk_bytes(path, &raw, lang);
        Some((file_path, leaf, chunks))
    }

    // -- queries ------------------------------------------------------------

    /// Hybrid lexical + semantic retrieval over the catalog.
    pub async fn search_text(&self, query: &str) -> Result<Vec<AnnotatedChunk>> {
        let options =
            SearchOptions { bm25_k: self.config.bm25_k(), knn_k: self.config.knn_k() };
        Ok(self.search.search(query, options).await?)
    }

    /// Run a pattern-language query against the graph. Failures are logged
    /// and surfaced; a failed statement performs no writes.
    pub fn search_graph(&mut self, query: &str) -> Result<Vec<Row>> {
        match self.graph.run(query) {
            Ok(rows) => Ok(rows),
            Err(err) => {
                warn!(error = %err, "graph query failed");
                Err(err.into())
            }
        }
    }

    /// Map graph result rows back to catalog chunks.
    pub fn graph_chunks(&self, rows: &[Row]) -> Vec<Chunk> {
        let catalog: Vec<Chunk> =
            self.search.list().into_iter().map(|a| a.chunk.clone()).collect();
        rows_to_chunks(rows, &catalog)
    }

    // -- watcher ------------------------------------------------------------

    /// One watcher tick: detect removed and changed files, apply removals
    /// first, re-chunk changes, then rebuild the graph once. Returns whether
    /// anything changed.
    pub async fn poll_once(&mut self) -> Result<bool> {
        let files = chunker::walk_repository(&self.root, &self.config);

        let mut seen: HashSet<String> = HashSet::new();
        let mut changed: Vec<(String, String, Vec<Chunk>)> = Vec::new();
        for path in &files {
            let Some(lang) = chunker::language_for(path, &self.config) else {
                continue;
            };
            let raw = match std::fs::read(path) {
                Ok(raw) => raw,
                Err(err) => {
                    warn!(file = %path.display(), error = %err, "read failed, skipping file");
                    continue;
                }
            };
            let file_path = chunker::normalize_path(path);
            let leaf = leaf_hash(&raw);
            seen.insert(file_path.clone());
            if self.merkle.leaf(&file_path) != Some(leaf.as_str()) {
                changed.push((file_path, leaf, chunker::chunk_bytes(path, &raw, lang)));
            }
        }

        let removed: Vec<String> =
            self.merkle.paths().filter(|p| !seen.contains(*p)).map(String::from).collect();

        if removed.is_empty() && changed.is_empty() {
            return Ok(false);
        }

        for path in &removed {
            self.drop_file_chunks(path);
            self.merkle.remove(path);
        }

        let mut changed_count = 0usize;
        for (file_path, leaf, chunks) in changed {
            self.drop_file_chunks(&file_path);
            let ids: Vec<String> = chunks.iter().map(|c| c.id.clone()).collect();
            self.search.add_many(chunks).await?;
            self.file_chunks.insert(file_path.clone(), ids);
            self.merkle.upsert(&file_path, leaf);
            changed_count += 1;
        }

        self.rebuild_graph()?;

        info!(changed = changed_count, removed = removed.len(), "watcher applied changes");
        Ok(true)
    }

    fn drop_file_chunks(&mut self, file_path: &str) {
        if let Some(ids) = self.file_chunks.remove(file_path) {
            for id in ids {
                self.search.remove(&id);
            }
        }
    }

    /// Spawn the polling watcher for a shared coordinator. The returned
    /// handle stops it; dropping the handle leaves the task running until
    /// the runtime shuts down.
    pub fn start_watcher(coordinator: Arc<Mutex<Coordinator>>) -> WatcherHandle {
        let shutdown = Arc::new(Notify::new());
        let signal = Arc::clone(&shutdown);
        let task = tokio::spawn(async move {
            let period = { coordinator.lock().await.config.poll_interval() };
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // the first tick completes immediately; the loop below starts
            // with a full period of quiet instead
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = signal.notified() => break,
                    _ = ticker.tick() => {
                        let mut guard = coordinator.lock().await;
                        if let Err(err) = guard.poll_once().await {
                            warn!(error = %err, "watcher poll failed");
                        }
                    }
                }
            }
            debug!("watcher stopped");
        });
        WatcherHandle { shutdown, task }
    }

    // -- graph rebuild ------------------------------------------------------

    /// Replace the graph with one rebuilt from the chunk catalog: a node per
    /// chunk, `CONTAINS` edges from the catalog relations, and best-effort
    /// `REFERENCES` edges between same-named symbols across files.
    fn rebuild_graph(&mut self) -> std::result::Result<(), GraphError> {
        let start = std::time::Instant::now();
        self.graph = GraphStore::new();

        let annotated = self.search.list();
        let chunks: Vec<&Chunk> = annotated.iter().map(|a| &a.chunk).collect();
        let Some(statement) = build_create_statement(&chunks) else {
            return Ok(());
        };
        self.graph.run(&statement)?;

        debug!(
            nodes = self.graph.node_count(),
            relationships = self.graph.relationship_count(),
            time_ms = start.elapsed().as_millis() as u64,
            "graph rebuilt"
        );
        Ok(())
    }
}

/// Handle for a running watcher task.
pub struct WatcherHandle {
    shutdown: Arc<Notify>,
    task: tokio::task::JoinHandle<()>,
}

impl WatcherHandle {
    /// Signal the watcher to stop after its current tick.
    pub fn stop(&self) {
        self.shutdown.notify_one();
    }

    /// Stop the watcher and wait for the task to finish.
    pub async fn shutdown(self) {
        self.stop();
        let _ = self.task.await;
    }
}

// ---------------------------------------------------------------------------
// CREATE statement builder
// ---------------------------------------------------------------------------

/// Escape a string for a single-quoted query literal.
fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out
}

/// Compose one multi-pattern `CREATE` covering every chunk node, the
/// catalog's `CONTAINS` edges, and computed `REFERENCES` edges. `None` for
/// an empty catalog.
fn build_create_statement(chunks: &[&Chunk]) -> Option<String> {
    if chunks.is_empty() {
        return None;
    }

    let mut parts: Vec<String> = Vec::with_capacity(chunks.len() * 2);
    let mut vars: HashMap<&str, String> = HashMap::with_capacity(chunks.len());

    for (i, chunk) in chunks.iter().enumerate() {
        let var = format!("c{i}");
        let labels = if chunk.is_file() { "File:Chunk" } else { "Code:Chunk" };
        let mut props = vec![
            format!("id: '{}'", escape(&chunk.id)),
            format!("filePath: '{}'", escape(&chunk.file_path)),
            format!("language: '{}'", escape(&chunk.language)),
            format!("type: '{}'", escape(&chunk.chunk_type)),
        ];
        if let Some(name) = &chunk.name {
            props.push(format!("name: '{}'", escape(name)));
        }
        props.push(format!("line: {}", chunk.line));
        props.push(format!("endLine: {}", chunk.end_line));
        props.push(format!("contentHash: '{}'", escape(&chunk.content_hash)));

        parts.push(format!("({var}:{labels} {{{}}})", props.join(", ")));
        vars.insert(chunk.id.as_str(), var);
    }

    for chunk in chunks {
        let Some(parent_var) = vars.get(chunk.id.as_str()) else {
            continue;
        };
        for relation in &chunk.relations {
            if relation.kind != RelationKind::Contains {
                continue;
            }
            if let Some(child_var) = vars.get(relation.target_id.as_str()) {
                parts.push(format!("({parent_var})-[:CONTAINS]->({child_var})"));
            }
        }
    }

    for (usage_id, definition_id) in reference_pairs(chunks) {
        if let (Some(usage_var), Some(def_var)) = (vars.get(usage_id), vars.get(definition_id)) {
            parts.push(format!("({usage_var})-[:REFERENCES]->({def_var})"));
        }
    }

    Some(format!("CREATE {}", parts.join(", ")))
}

/// Best-effort cross-file reference detection: for every named non-file
/// chunk, any non-file chunk in a different file whose content mentions the
/// name as a token counts as a usage. Names that also occur inside strings
/// or comments produce false positives; callers refine if they need better.
fn reference_pairs<'a>(chunks: &[&'a Chunk]) -> Vec<(&'a str, &'a str)> {
    let code_chunks: Vec<&&Chunk> = chunks.iter().filter(|c| !c.is_file()).collect();

    let token_sets: HashMap<&str, HashSet<String>> = code_chunks
        .iter()
        .map(|c| (c.id.as_str(), tokenize(&c.content).into_iter().collect()))
        .collect();

    // unique names -> defining chunks, in deterministic order
    let mut definitions: BTreeMap<&str, Vec<&Chunk>> = BTreeMap::new();
    for chunk in &code_chunks {
        if let Some(name) = &chunk.name {
            definitions.entry(name.as_str()).or_default().push(chunk);
        }
    }

    let mut pairs = Vec::new();
    for (name, defs) in &definitions {
        let tokens = tokenize(name);
        // names that don't tokenize to a single word can't be matched
        let [needle] = tokens.as_slice() else {
            continue;
        };
        for def in defs {
            for usage in &code_chunks {
                if usage.id == def.id || usage.file_path == def.file_path {
                    continue;
                }
                if token_sets
                    .get(usage.id.as_str())
                    .is_some_and(|set| set.contains(needle))
                {
                    pairs.push((usage.id.as_str(), def.id.as_str()));
                }
            }
        }
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::sha256_hex;

    fn chunk(id: &str, file: &str, chunk_type: &str, name: Option<&str>, content: &str) -> Chunk {
        Chunk {
            id: id.to_string(),
            file_path: file.to_string(),
            language: "typescript".to_string(),
            chunk_type: chunk_type.to_string(),
            name: name.map(String::from),
            line: 1,
            end_line: 2,
            content: content.to_string(),
            content_hash: sha256_hex(content.as_bytes()),
            parent_id: None,
            relations: Vec::new(),
        }
    }

    #[test]
    fn create_statement_builds_nodes_and_contains_edges() {
        let mut file = chunk("f1", "/r/a.ts", "file", Some("a.ts"), "export function go() {}");
        let func =
            chunk("c1", "/r/a.ts", "function_declaration", Some("go"), "function go() {}");
        file.relations.push(crate::types::ChunkRelation {
            kind: RelationKind::Contains,
            target_id: "c1".to_string(),
        });

        let statement = build_create_statement(&[&file, &func]).unwrap();
        assert!(statement.starts_with("CREATE "));
        assert!(statement.contains(":File:Chunk"));
        assert!(statement.contains(":Code:Chunk"));
        assert!(statement.contains("-[:CONTAINS]->"));

        // the statement must execute cleanly against a fresh store
        let mut store = GraphStore::new();
        store.run(&statement).unwrap();
        assert_eq!(store.node_count(), 2);
        assert_eq!(store.relationship_count(), 1);
    }

    #[test]
    fn create_statement_escapes_awkward_names() {
        let odd = chunk(
            "c1",
            "/r/it's\nodd.ts",
            "function_declaration",
            Some("we'ird\\name"),
            "function x() {}",
        );
        let statement = build_create_statement(&[&odd]).unwrap();

        let mut store = GraphStore::new();
        store.run(&statement).unwrap();
        let rows = store.run("MATCH (n:Code) RETURN n.name AS name, n.filePath AS p").unwrap();
        assert_eq!(rows[0]["name"], serde_json::Value::from("we'ird\\name"));
        assert_eq!(rows[0]["p"], serde_json::Value::from("/r/it's\nodd.ts"));
    }

    #[test]
    fn reference_pairs_link_usages_across_files() {
        let def = chunk(
            "def",
            "/r/util.ts",
            "function_declaration",
            Some("formatName"),
            "function formatName() {}",
        );
        let usage = chunk(
            "use",
            "/r/app.ts",
            "function_declaration",
            Some("main"),
            "function main() { return formatName(); }",
        );
        let unrelated = chunk(
            "other",
            "/r/misc.ts",
            "function_declaration",
            Some("misc"),
            "function misc() {}",
        );
        // same file as the definition: never a usage
        let sibling = chunk(
            "sib",
            "/r/util.ts",
            "function_declaration",
            Some("helper"),
            "function helper() { return formatName(); }",
        );

        let pairs = reference_pairs(&[&def, &usage, &unrelated, &sibling]);
        assert!(pairs.contains(&("use", "def")));
        assert!(!pairs.iter().any(|(u, _)| *u == "other"));
        assert!(!pairs.iter().any(|(u, d)| *u == "sib" && *d == "def"));

        // "main" is referenced by nobody
        assert!(!pairs.iter().any(|(_, d)| *d == "use"));
    }

    #[test]
    fn reference_pairs_ignore_multi_word_names() {
        let def = chunk("d", "/r/a.ts", "method_definition", Some("get name"), "get name() {}");
        let usage =
            chunk("u", "/r/b.ts", "function_declaration", Some("x"), "function x() { name; }");
        assert!(reference_pairs(&[&def, &usage]).is_empty());
    }

    #[test]
    fn empty_catalog_builds_no_statement() {
        assert!(build_create_statement(&[]).is_none());
    }
}
