//! Syntactic chunker: reduces source files to trees of chunks.
//!
//! Every supported file yields at least its file chunk; when the language's
//! tree producer succeeds, chunk-worthy nodes (functions, classes, methods…)
//! become child chunks with `contains` edges recorded on their parent. A
//! parse failure never poisons a run — the file chunk alone is returned.

use rayon::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::lang::{node_text, Language, SyntaxNode};
use crate::types::{
    chunk_id, file_chunk_id, sha256_hex, Chunk, ChunkRelation, IndexConfig, RelationKind,
    FILE_CHUNK_TYPE,
};

/// Directory holding third-party dependencies, skipped by default when the
/// repository carries no ignore rules of its own.
const DEPENDENCY_DIR: &str = "node_modules";

/// Version-control metadata directory, always skipped.
const VCS_DIR: &str = ".git";

// ---------------------------------------------------------------------------
// Single-file chunking
// ---------------------------------------------------------------------------

/// Chunk one file. Returns `None` when no language claims the extension;
/// otherwise at least the file chunk.
pub fn chunk_file(path: &Path, config: &IndexConfig) -> std::io::Result<Option<Vec<Chunk>>> {
    let Some(lang) = language_for(path, config) else {
        return Ok(None);
    };
    let raw = std::fs::read(path)?;
    Ok(Some(chunk_bytes(path, &raw, lang)))
}

/// Resolve the language config for a path under the enabled-language filter.
pub(crate) fn language_for(path: &Path, config: &IndexConfig) -> Option<Language> {
    let ext = path.extension().and_then(|e| e.to_str())?;
    let lang = Language::from_extension(ext)?;
    config.language_enabled(lang.name()).then_some(lang)
}

/// Absolute, forward-slash form of a path; the canonical key for chunks,
/// Merkle leaves, and graph `filePath` properties.
pub(crate) fn normalize_path(path: &Path) -> String {
    let abs = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    abs.to_string_lossy().replace('\\', "/")
}

/// Chunk already-read file bytes. Used by the coordinator so a watcher tick
/// reads each file once for both its Merkle leaf and its chunks.
pub(crate) fn chunk_bytes(path: &Path, raw: &[u8], lang: Language) -> Vec<Chunk> {
    // Some parsers reject NUL bytes; strip them up front. Line numbers are
    // reported against the stripped content.
    let text = String::from_utf8_lossy(raw);
    let content: String =
        if text.contains('\0') { text.chars().filter(|&c| c != '\0').collect() } else { text.into_owned() };

    let file_path = normalize_path(path);

    let file_chunk = Chunk {
        id: file_chunk_id(&file_path),
        file_path: file_path.clone(),
        language: lang.name().to_string(),
        chunk_type: FILE_CHUNK_TYPE.to_string(),
        name: file_path.rsplit('/').next().map(String::from),
        line: 1,
        end_line: content.lines().count().max(1),
        content_hash: sha256_hex(content.as_bytes()),
        content: content.clone(),
        parent_id: None,
        relations: Vec::new(),
    };

    let mut chunks = vec![file_chunk];

    match lang.parse(&content) {
        Some(tree) => {
            let root = tree.root_node();
            for child in SyntaxNode::children(&root) {
                walk_node(&child, &content, lang, &file_path, 0, &mut chunks);
            }
        }
        None => {
            debug!(file = %file_path, "parse failed, keeping file chunk only");
        }
    }

    chunks
}

/// Depth-first walk emitting a chunk for every node whose kind is in the
/// language's `chunk_node_types`. `parent` indexes into `chunks` and tracks
/// the innermost enclosing chunk (the file chunk at the top).
fn walk_node<N: SyntaxNode>(
    node: &N,
    source: &str,
    lang: Language,
    file_path: &str,
    parent: usize,
    chunks: &mut Vec<Chunk>,
) {
    if lang.chunk_node_types().contains(&node.kind()) {
        let start = node.start_byte();
        let end = node.end_byte();
        let content = node_text(node, source);
        let id = chunk_id(file_path, start, end);

        let chunk = Chunk {
            id: id.clone(),
            file_path: file_path.to_string(),
            language: lang.name().to_string(),
            chunk_type: node.kind().to_string(),
            name: lang.extract_name(node, source),
            line: node.start_row() + 1,
            end_line: node.end_row() + 1,
            content: content.to_string(),
            content_hash: sha256_hex(content.as_bytes()),
            parent_id: Some(chunks[parent].id.clone()),
            relations: Vec::new(),
        };

        // The containment edge lives on the parent, never on the child.
        chunks[parent]
            .relations
            .push(ChunkRelation { kind: RelationKind::Contains, target_id: id });

        let my_index = chunks.len();
        chunks.push(chunk);
        for child in node.children() {
            walk_node(&child, source, lang, file_path, my_index, chunks);
        }
    } else {
        for child in node.children() {
            walk_node(&child, source, lang, file_path, parent, chunks);
        }
    }
}

// ---------------------------------------------------------------------------
// Repository walking
// ---------------------------------------------------------------------------

/// Does the tree carry ignore rules of its own? Scans directory entries
/// (skipping the VCS and dependency directories) for a `.gitignore` or
/// `.ignore` file anywhere, stopping at the first hit. `WalkBuilder` honors
/// nested ignore files wherever they live, so detection has to look past
/// the root too.
fn has_ignore_rules(root: &Path) -> bool {
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if entry.file_type().is_ok_and(|ft| ft.is_dir()) {
                if name != VCS_DIR && name != DEPENDENCY_DIR {
                    stack.push(entry.path());
                }
            } else if name == ".gitignore" || name == ".ignore" {
                return true;
            }
        }
    }
    false
}

/// Collect every chunkable file under `root`, honoring the skip rules:
/// the VCS directory is always skipped; ignore-file rules apply when
/// present; the dependency directory is default-skipped only when neither
/// ignore rules nor a custom filter take over; the caller's predicate runs
/// last. Unsupported extensions are dropped without reading the file.
pub fn walk_repository(root: &Path, config: &IndexConfig) -> Vec<PathBuf> {
    let skip_dependency_dir = config.include.is_none() && !has_ignore_rules(root);

    let mut files = Vec::new();
    let walker = ignore::WalkBuilder::new(root)
        .hidden(false)
        .git_ignore(true)
        .git_global(false)
        .git_exclude(false)
        .require_git(false)
        .follow_links(false)
        .filter_entry(move |entry| {
            if entry.file_type().is_some_and(|ft| ft.is_dir()) {
                let name = entry.file_name().to_string_lossy();
                if name == VCS_DIR {
                    return false;
                }
                if skip_dependency_dir && name == DEPENDENCY_DIR {
                    return false;
                }
            }
            true
        })
        .build();

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(err) => {
                warn!(error = %err, "walk error, skipping entry");
                continue;
            }
        };
        if !entry.file_type().is_some_and(|ft| ft.is_file()) {
            continue;
        }
        let path = entry.into_path();
        if language_for(&path, config).is_none() {
            continue;
        }
        if let Some(include) = &config.include {
            let rel = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace('\\', "/");
            if !include(&path, &rel) {
                continue;
            }
        }
        files.push(path);
    }

    files.sort();
    files
}

/// Chunk every supported file under `root` in parallel. Per-file I/O
/// failures are logged and skipped.
pub fn chunk_codebase(root: &Path, config: &IndexConfig) -> Vec<Chunk> {
    let start = std::time::Instant::now();
    let files = walk_repository(root, config);

    let per_file: Vec<Vec<Chunk>> = files
        .par_iter()
        .filter_map(|path| match chunk_file(path, config) {
            Ok(chunks) => chunks,
            Err(err) => {
                warn!(file = %path.display(), error = %err, "read failed, skipping file");
                None
            }
        })
        .collect();

    let chunks: Vec<Chunk> = per_file.into_iter().flatten().collect();
    debug!(
        files = files.len(),
        chunks = chunks.len(),
        time_ms = start.elapsed().as_millis() as u64,
        "codebase chunked"
    );
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(dir: &Path, rel: &str, content: &str) -> PathBuf {
        let path = dir.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn unsupported_extension_yields_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "notes.md", "# readme");
        let chunks = chunk_file(&path, &IndexConfig::default()).unwrap();
        assert!(chunks.is_none());
    }

    #[test]
    fn file_chunk_covers_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let src = "fn alpha() {}\n\nfn beta() {}\n";
        let path = write(dir.path(), "lib.rs", src);
        let chunks = chunk_file(&path, &IndexConfig::default()).unwrap().unwrap();

        let file = &chunks[0];
        assert!(file.is_file());
        assert_eq!(file.content, src);
        assert_eq!(file.line, 1);
        assert_eq!(file.end_line, 3);
        assert!(file.parent_id.is_none());
        assert_eq!(file.content_hash, sha256_hex(src.as_bytes()));
    }

    #[test]
    fn functions_become_child_chunks_with_contains_edges() {
        let dir = tempfile::tempdir().unwrap();
        let src = "fn alpha() { 1; }\n\nfn beta() { 2; }\n";
        let path = write(dir.path(), "lib.rs", src);
        let chunks = chunk_file(&path, &IndexConfig::default()).unwrap().unwrap();

        assert_eq!(chunks.len(), 3);
        let file = &chunks[0];
        let fns: Vec<&Chunk> = chunks[1..].iter().collect();
        assert_eq!(fns.len(), 2);

        for f in &fns {
            assert_eq!(f.chunk_type, "function_item");
            assert_eq!(f.parent_id.as_deref(), Some(file.id.as_str()));
            let edges: Vec<_> = file
                .relations
                .iter()
                .filter(|r| r.kind == RelationKind::Contains && r.target_id == f.id)
                .collect();
            assert_eq!(edges.len(), 1, "exactly one contains edge per child");
        }
        assert_eq!(fns[0].name.as_deref(), Some("alpha"));
        assert_eq!(fns[1].name.as_deref(), Some("beta"));
        assert_eq!(fns[0].line, 1);
        assert_eq!(fns[1].line, 3);
    }

    #[test]
    fn nested_chunks_chain_to_their_parent() {
        let dir = tempfile::tempdir().unwrap();
        let src = "impl Config {\n    fn new() -> Self { Config }\n}\n";
        let path = write(dir.path(), "config.rs", src);
        let chunks = chunk_file(&path, &IndexConfig::default()).unwrap().unwrap();

        let imp = chunks.iter().find(|c| c.chunk_type == "impl_item").unwrap();
        let method = chunks.iter().find(|c| c.chunk_type == "function_item").unwrap();
        assert_eq!(method.parent_id.as_deref(), Some(imp.id.as_str()));
        assert!(imp
            .relations
            .iter()
            .any(|r| r.kind == RelationKind::Contains && r.target_id == method.id));

        // parent chain terminates at the file chunk
        let file = &chunks[0];
        assert_eq!(imp.parent_id.as_deref(), Some(file.id.as_str()));
    }

    #[test]
    fn chunk_content_matches_byte_range() {
        let dir = tempfile::tempdir().unwrap();
        let src = "def greet(name):\n    return name\n\nclass Config:\n    pass\n";
        let path = write(dir.path(), "mod.py", src);
        let chunks = chunk_file(&path, &IndexConfig::default()).unwrap().unwrap();

        let class = chunks.iter().find(|c| c.chunk_type == "class_definition").unwrap();
        assert!(class.content.starts_with("class Config"));
        assert_eq!(class.name.as_deref(), Some("Config"));
        assert!(src.contains(&class.content));
    }

    #[test]
    fn nul_bytes_are_stripped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("odd.rs");
        fs::write(&path, b"fn a\0lpha() {}\n").unwrap();
        let chunks = chunk_file(&path, &IndexConfig::default()).unwrap().unwrap();
        assert!(!chunks[0].content.contains('\0'));
        assert_eq!(chunks[0].content, "fn alpha() {}\n");
    }

    #[test]
    fn garbage_input_still_yields_the_file_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "broken.ts", "%%%% ?? (( ~~ @@ ;; ]]]]");
        let chunks = chunk_file(&path, &IndexConfig::default()).unwrap().unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_type, FILE_CHUNK_TYPE);
    }

    #[test]
    fn language_filter_disables_extensions() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "lib.rs", "fn a() {}\n");
        let config =
            IndexConfig { languages: Some(vec!["python".into()]), ..Default::default() };
        assert!(chunk_file(&path, &config).unwrap().is_none());
    }

    #[test]
    fn walk_skips_vcs_and_dependency_dirs() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/main.rs", "fn main() {}\n");
        write(dir.path(), ".git/objects/blob.rs", "fn hidden() {}\n");
        write(dir.path(), "node_modules/pkg/index.js", "function x() {}\n");
        write(dir.path(), "README.md", "docs\n");

        let files = walk_repository(dir.path(), &IndexConfig::default());
        let names: Vec<String> = files
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_string_lossy().replace('\\', "/"))
            .collect();
        assert_eq!(names, vec!["src/main.rs"]);
    }

    #[test]
    fn custom_filter_replaces_dependency_skip() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/main.rs", "fn main() {}\n");
        write(dir.path(), "node_modules/pkg/index.js", "function x() {}\n");

        let config = IndexConfig {
            include: Some(std::sync::Arc::new(|_abs: &Path, _rel: &str| true)),
            ..Default::default()
        };
        let files = walk_repository(dir.path(), &config);
        assert_eq!(files.len(), 2, "custom filter re-admits the dependency dir");

        let config = IndexConfig {
            include: Some(std::sync::Arc::new(|_abs: &Path, rel: &str| !rel.contains("node_modules"))),
            ..Default::default()
        };
        let files = walk_repository(dir.path(), &config);
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn nested_ignore_rules_disable_dependency_skip() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/main.rs", "fn main() {}\n");
        write(dir.path(), "src/.gitignore", "generated/\n");
        write(dir.path(), "node_modules/pkg/index.js", "function x() {}\n");

        // a nested ignore file counts as repo-managed exclusions, so the
        // dependency directory is no longer default-skipped
        let files = walk_repository(dir.path(), &IndexConfig::default());
        assert_eq!(files.len(), 2);
        assert!(files.iter().any(|p| p.ends_with("node_modules/pkg/index.js")));
    }

    #[test]
    fn ignore_file_rules_apply_when_present() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "src/main.rs", "fn main() {}\n");
        write(dir.path(), "generated/out.rs", "fn gen() {}\n");
        write(dir.path(), ".gitignore", "generated/\n");

        let files = walk_repository(dir.path(), &IndexConfig::default());
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("src/main.rs"));
    }

    #[test]
    fn batch_chunking_survives_a_broken_file() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "good.ts", "export function v() { return 'alpha'; }\n");
        write(dir.path(), "bad.ts", ")))) %% ~~ @@ ;; ((((");

        let chunks = chunk_codebase(dir.path(), &IndexConfig::default());
        let good_fn = chunks
            .iter()
            .find(|c| c.chunk_type == "function_declaration" && c.name.as_deref() == Some("v"));
        assert!(good_fn.is_some(), "good file's function chunk survives");

        let bad_chunks: Vec<_> =
            chunks.iter().filter(|c| c.file_path.ends_with("bad.ts")).collect();
        assert_eq!(bad_chunks.len(), 1);
        assert!(bad_chunks[0].is_file());
    }
}
