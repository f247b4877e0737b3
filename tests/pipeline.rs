//! End-to-end pipeline tests: ingest, hybrid search, graph queries, and the
//! polling watcher against real temp-dir repositories.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chunkgraph::{Coordinator, IndexConfig};
use tokio::sync::Mutex;

fn init_logging() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

fn write_file(root: &Path, rel: &str, content: &str) -> PathBuf {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("mkdir");
    }
    std::fs::write(&path, content).expect("write");
    path
}

fn fixture_repo(root: &Path) {
    write_file(
        root,
        "src/util.ts",
        "export function formatName(name: string): string {\n    return name.trim();\n}\n",
    );
    write_file(
        root,
        "src/app.ts",
        "export function main(): string {\n    return formatName('demo');\n}\n",
    );
    write_file(
        root,
        "src/config.py",
        "class Config:\n    def load(self):\n        return {}\n",
    );
    write_file(root, "README.md", "# fixture\n");
}

#[tokio::test]
async fn ingest_builds_catalog_graph_and_merkle_root() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    fixture_repo(dir.path());

    let mut coordinator = Coordinator::new(dir.path());
    coordinator.ingest().await.unwrap();

    // three supported files -> three file chunks plus their code chunks
    let catalog = coordinator.search_db().list();
    let file_chunks: Vec<_> = catalog.iter().filter(|c| c.chunk.is_file()).collect();
    assert_eq!(file_chunks.len(), 3, "one file chunk per supported file");
    assert!(catalog.len() > 3, "code chunks extracted too");

    // every non-file chunk chains to a parent in the same file
    for annotated in &catalog {
        let chunk = &annotated.chunk;
        if chunk.is_file() {
            assert!(chunk.parent_id.is_none());
        } else {
            let parent_id = chunk.parent_id.as_deref().expect("code chunk has a parent");
            let parent = catalog
                .iter()
                .find(|c| c.chunk.id == parent_id)
                .expect("parent is in the catalog");
            assert_eq!(parent.chunk.file_path, chunk.file_path);
        }
    }

    // the graph mirrors the catalog
    let labels = coordinator.search_graph("CALL db.labels()").unwrap();
    let label_names: Vec<&str> =
        labels.iter().map(|row| row["label"].as_str().unwrap()).collect();
    assert_eq!(label_names, vec!["Chunk", "Code", "File"]);

    let rows = coordinator
        .search_graph("MATCH (f:File) RETURN count(*) AS c")
        .unwrap();
    assert_eq!(rows[0]["c"], serde_json::Value::from(3));

    let rows = coordinator
        .search_graph("MATCH (f:File)-[:CONTAINS]->(c:Code) RETURN count(*) AS c")
        .unwrap();
    assert!(rows[0]["c"].as_i64().unwrap() >= 3);

    assert!(!coordinator.merkle_root().is_empty());
}

#[tokio::test]
async fn ingest_twice_is_idempotent() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    fixture_repo(dir.path());

    let mut coordinator = Coordinator::new(dir.path());
    coordinator.ingest().await.unwrap();
    let ids_first: Vec<String> =
        coordinator.search_db().list().iter().map(|c| c.chunk.id.clone()).collect();
    let root_first = coordinator.merkle_root();

    coordinator.ingest().await.unwrap();
    let ids_second: Vec<String> =
        coordinator.search_db().list().iter().map(|c| c.chunk.id.clone()).collect();

    assert_eq!(ids_first, ids_second);
    assert_eq!(root_first, coordinator.merkle_root());
}

#[tokio::test]
async fn merkle_root_survives_read_only_operations() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    fixture_repo(dir.path());

    let mut coordinator = Coordinator::new(dir.path());
    coordinator.ingest().await.unwrap();
    let root = coordinator.merkle_root();

    coordinator.search_text("format name").await.unwrap();
    coordinator
        .search_graph("MATCH (c:Code) RETURN c.name AS name ORDER BY name")
        .unwrap();
    coordinator.poll_once().await.unwrap();

    assert_eq!(root, coordinator.merkle_root());
}

#[tokio::test]
async fn hybrid_search_finds_function_by_words() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    fixture_repo(dir.path());

    let mut coordinator = Coordinator::new(dir.path());
    coordinator.ingest().await.unwrap();

    let hits = coordinator.search_text("formatName").await.unwrap();
    assert!(!hits.is_empty());
    assert!(hits.iter().any(|c| c.chunk.file_path.ends_with("util.ts")));
}

#[tokio::test]
async fn graph_query_rows_map_back_to_chunks() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    fixture_repo(dir.path());

    let mut coordinator = Coordinator::new(dir.path());
    coordinator.ingest().await.unwrap();

    let rows = coordinator
        .search_graph(
            "MATCH (c:Code) WHERE c.filePath ENDS WITH 'util.ts' RETURN c",
        )
        .unwrap();
    let chunks = coordinator.graph_chunks(&rows);
    assert!(!chunks.is_empty());
    assert!(chunks.iter().all(|c| c.file_path.ends_with("util.ts")));
    assert!(chunks.iter().any(|c| c.name.as_deref() == Some("formatName")));
}

#[tokio::test]
async fn references_edges_link_usage_to_definition() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    fixture_repo(dir.path());

    let mut coordinator = Coordinator::new(dir.path());
    coordinator.ingest().await.unwrap();

    // app.ts's main() mentions formatName, defined in util.ts
    let rows = coordinator
        .search_graph(
            "MATCH (u:Code)-[:REFERENCES]->(d:Code {name: 'formatName'}) \
             RETURN u.filePath AS usage",
        )
        .unwrap();
    assert!(!rows.is_empty(), "expected a cross-file REFERENCES edge");
    assert!(rows.iter().all(|r| r["usage"].as_str().unwrap().ends_with("app.ts")));
}

#[tokio::test]
async fn bad_graph_query_is_surfaced_without_corrupting_state() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    fixture_repo(dir.path());

    let mut coordinator = Coordinator::new(dir.path());
    coordinator.ingest().await.unwrap();

    let before = coordinator
        .search_graph("MATCH (n:Chunk) RETURN count(*) AS c")
        .unwrap()[0]["c"]
        .clone();

    assert!(coordinator.search_graph("MATCH (n RETURN n").is_err());

    let after = coordinator
        .search_graph("MATCH (n:Chunk) RETURN count(*) AS c")
        .unwrap()[0]["c"]
        .clone();
    assert_eq!(before, after);
}

#[tokio::test]
async fn watcher_picks_up_changes_and_removals() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    write_file(dir.path(), "watch.ts", "export function v(){ return 'alpha' }\n");

    let config = IndexConfig {
        poll_interval: Some(Duration::from_millis(50)),
        ..Default::default()
    };
    let mut coordinator = Coordinator::with_config(dir.path(), config);
    coordinator.ingest().await.unwrap();
    let root_before = coordinator.merkle_root();

    let hits = coordinator.search_text("alpha").await.unwrap();
    assert!(!hits.is_empty());

    let shared = Arc::new(Mutex::new(coordinator));
    let watcher = Coordinator::start_watcher(Arc::clone(&shared));

    write_file(dir.path(), "watch.ts", "export function v(){ return 'beta' }\n");

    // wait out a couple of poll intervals (generously, for slow CI)
    let mut root_after = root_before.clone();
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        root_after = shared.lock().await.merkle_root();
        if root_after != root_before {
            break;
        }
    }
    assert_ne!(root_before, root_after, "merkle root tracks the file change");

    {
        let guard = shared.lock().await;
        let hits = guard.search_text("beta").await.unwrap();
        assert!(
            hits.iter().any(|c| c.chunk.file_path.ends_with("watch.ts")),
            "search finds the updated content"
        );
    }

    // removal drains the file's chunks and empties the root
    std::fs::remove_file(dir.path().join("watch.ts")).unwrap();
    let mut emptied = false;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let guard = shared.lock().await;
        if guard.search_db().is_empty() && guard.merkle_root().is_empty() {
            emptied = true;
            break;
        }
    }
    assert!(emptied, "removed file leaves no chunks and an empty root");

    watcher.shutdown().await;
}

#[tokio::test]
async fn poll_once_reports_quiet_ticks() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    fixture_repo(dir.path());

    let mut coordinator = Coordinator::new(dir.path());
    coordinator.ingest().await.unwrap();

    assert!(!coordinator.poll_once().await.unwrap(), "no changes, no work");

    write_file(dir.path(), "src/extra.ts", "export function extra(){ return 1 }\n");
    assert!(coordinator.poll_once().await.unwrap());

    let hits = coordinator.search_text("extra").await.unwrap();
    assert!(hits.iter().any(|c| c.chunk.file_path.ends_with("extra.ts")));

    let rows = coordinator
        .search_graph("MATCH (f:File) WHERE f.filePath ENDS WITH 'extra.ts' RETURN count(*) AS c")
        .unwrap();
    assert_eq!(rows[0]["c"], serde_json::Value::from(1));
}

#[tokio::test]
async fn language_filter_restricts_ingest() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    fixture_repo(dir.path());

    let config = IndexConfig {
        languages: Some(vec!["python".to_string()]),
        ..Default::default()
    };
    let mut coordinator = Coordinator::with_config(dir.path(), config);
    coordinator.ingest().await.unwrap();

    let catalog = coordinator.search_db().list();
    assert!(!catalog.is_empty());
    assert!(catalog.iter().all(|c| c.chunk.language == "python"));
}
