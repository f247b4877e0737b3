//! Built-in language configurations and the generic syntax-tree interface.
//!
//! The chunker walks trees through the [`SyntaxNode`] trait so any tree
//! producer can drive it; the built-in producers are the tree-sitter
//! grammars for eight languages. Each [`Language`] enumerates the file
//! extensions it claims, the node kinds that become chunks, and a name
//! extractor for those nodes.

use tree_sitter::Parser;

// ---------------------------------------------------------------------------
// Generic tree-walk interface
// ---------------------------------------------------------------------------

/// Minimal view of a parsed syntax node, sufficient for chunk extraction.
pub trait SyntaxNode: Sized {
    fn kind(&self) -> &str;
    fn start_byte(&self) -> usize;
    fn end_byte(&self) -> usize;
    /// 0-based start row.
    fn start_row(&self) -> usize;
    /// 0-based end row.
    fn end_row(&self) -> usize;
    fn child_by_field(&self, field: &str) -> Option<Self>;
    fn children(&self) -> Vec<Self>;
}

impl<'t> SyntaxNode for tree_sitter::Node<'t> {
    fn kind(&self) -> &str {
        tree_sitter::Node::kind(self)
    }

    fn start_byte(&self) -> usize {
        tree_sitter::Node::start_byte(self)
    }

    fn end_byte(&self) -> usize {
        tree_sitter::Node::end_byte(self)
    }

    fn start_row(&self) -> usize {
        self.start_position().row
    }

    fn end_row(&self) -> usize {
        self.end_position().row
    }

    fn child_by_field(&self, field: &str) -> Option<Self> {
        self.child_by_field_name(field)
    }

    fn children(&self) -> Vec<Self> {
        let mut cursor = self.walk();
        tree_sitter::Node::children(self, &mut cursor).collect()
    }
}

/// Slice the source text covered by a node.
pub fn node_text<'s, N: SyntaxNode>(node: &N, source: &'s str) -> &'s str {
    source.get(node.start_byte()..node.end_byte()).unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Language configurations
// ---------------------------------------------------------------------------

/// Closed set of built-in languages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Rust,
    TypeScript,
    JavaScript,
    Python,
    Go,
    C,
    Cpp,
    Java,
}

impl Language {
    pub const ALL: [Language; 8] = [
        Language::Rust,
        Language::TypeScript,
        Language::JavaScript,
        Language::Python,
        Language::Go,
        Language::C,
        Language::Cpp,
        Language::Java,
    ];

    /// Config name, used in [`crate::types::IndexConfig::languages`] and
    /// recorded on every chunk.
    pub fn name(self) -> &'static str {
        match self {
            Language::Rust => "rust",
            Language::TypeScript => "typescript",
            Language::JavaScript => "javascript",
            Language::Python => "python",
            Language::Go => "go",
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::Java => "java",
        }
    }

    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            Language::Rust => &["rs"],
            Language::TypeScript => &["ts", "tsx"],
            Language::JavaScript => &["js", "jsx", "mjs", "cjs"],
            Language::Python => &["py", "pyi"],
            Language::Go => &["go"],
            Language::C => &["c", "h"],
            Language::Cpp => &["cpp", "cc", "cxx", "hpp", "hh", "hxx"],
            Language::Java => &["java"],
        }
    }

    /// Map a file extension to its language config.
    pub fn from_extension(ext: &str) -> Option<Self> {
        Language::ALL.into_iter().find(|lang| lang.extensions().contains(&ext))
    }

    /// Node kinds that become chunks when walking this language's tree.
    pub fn chunk_node_types(self) -> &'static [&'static str] {
        match self {
            Language::Rust => {
                &["function_item", "struct_item", "enum_item", "trait_item", "impl_item"]
            }
            Language::TypeScript => &[
                "function_declaration",
                "class_declaration",
                "method_definition",
                "interface_declaration",
                "enum_declaration",
            ],
            Language::JavaScript => {
                &["function_declaration", "class_declaration", "method_definition"]
            }
            Language::Python => &["function_definition", "class_definition"],
            Language::Go => &["function_declaration", "method_declaration", "type_spec"],
            Language::C => &["function_definition", "struct_specifier", "enum_specifier"],
            Language::Cpp => {
                &["function_definition", "class_specifier", "struct_specifier", "enum_specifier"]
            }
            Language::Java => &[
                "class_declaration",
                "method_declaration",
                "interface_declaration",
                "enum_declaration",
            ],
        }
    }

    fn grammar(self) -> tree_sitter::Language {
        match self {
            Language::Rust => tree_sitter_rust::LANGUAGE.into(),
            Language::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            Language::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
            Language::Python => tree_sitter_python::LANGUAGE.into(),
            Language::Go => tree_sitter_go::LANGUAGE.into(),
            Language::C => tree_sitter_c::LANGUAGE.into(),
            Language::Cpp => tree_sitter_cpp::LANGUAGE.into(),
            Language::Java => tree_sitter_java::LANGUAGE.into(),
        }
    }

    /// Parse `source` with this language's grammar. `None` on parser failure;
    /// the chunker then falls back to a file-only chunk.
    pub fn parse(self, source: &str) -> Option<tree_sitter::Tree> {
        let mut parser = Parser::new();
        parser.set_language(&self.grammar()).ok()?;
        parser.parse(source, None)
    }

    /// Extract a short identifier for a chunk node.
    ///
    /// Tries the grammar's `name` field first, then language-specific
    /// fallbacks (Rust impl target type, C declarator), then the first
    /// identifier-like descendant.
    pub fn extract_name<N: SyntaxNode>(self, node: &N, source: &str) -> Option<String> {
        if let Some(name_node) = node.child_by_field("name") {
            let text = node_text(&name_node, source).trim();
            if !text.is_empty() {
                return Some(text.to_string());
            }
        }

        // Rust: `impl Type` / `impl Trait for Type` names the target type.
        if self == Language::Rust && node.kind() == "impl_item" {
            if let Some(type_node) = node.child_by_field("type") {
                let text = node_text(&type_node, source).trim();
                if !text.is_empty() {
                    return Some(text.to_string());
                }
            }
        }

        // C/C++: the identifier hides inside nested declarators.
        if matches!(self, Language::C | Language::Cpp) && node.kind() == "function_definition" {
            if let Some(decl) = node.child_by_field("declarator") {
                let text = node_text(&decl, source).trim();
                let ident = text.split('(').next().unwrap_or(text).trim();
                if !ident.is_empty() {
                    return Some(ident.to_string());
                }
            }
        }

        first_identifier(node, source)
    }
}

/// Depth-first search for the first identifier-like descendant.
fn first_identifier<N: SyntaxNode>(node: &N, source: &str) -> Option<String> {
    for child in node.children() {
        let kind = child.kind();
        if kind == "identifier"
            || kind == "type_identifier"
            || kind == "field_identifier"
            || kind == "property_identifier"
        {
            let text = node_text(&child, source).trim();
            if !text.is_empty() {
                return Some(text.to_string());
            }
        }
        if let Some(found) = first_identifier(&child, source) {
            return Some(found);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_routing() {
        assert_eq!(Language::from_extension("rs"), Some(Language::Rust));
        assert_eq!(Language::from_extension("tsx"), Some(Language::TypeScript));
        assert_eq!(Language::from_extension("mjs"), Some(Language::JavaScript));
        assert_eq!(Language::from_extension("hpp"), Some(Language::Cpp));
        assert_eq!(Language::from_extension("md"), None);
        assert_eq!(Language::from_extension(""), None);
    }

    #[test]
    fn every_language_parses_trivial_input() {
        for lang in Language::ALL {
            assert!(lang.parse("").is_some(), "{} failed to parse", lang.name());
        }
    }

    #[test]
    fn rust_name_extraction() {
        let src = "impl Config { fn new() -> Self { Config } }";
        let tree = Language::Rust.parse(src).unwrap();
        let root = tree.root_node();
        let imp = SyntaxNode::children(&root)
            .into_iter()
            .find(|n| SyntaxNode::kind(n) == "impl_item")
            .unwrap();
        assert_eq!(Language::Rust.extract_name(&imp, src).as_deref(), Some("Config"));
    }

    #[test]
    fn typescript_name_extraction() {
        let src = "export function formatName(name: string): string { return name; }";
        let tree = Language::TypeScript.parse(src).unwrap();
        let root = tree.root_node();
        let mut found = None;
        fn visit(node: &tree_sitter::Node<'_>, src: &str, found: &mut Option<String>) {
            if SyntaxNode::kind(node) == "function_declaration" {
                *found = Language::TypeScript.extract_name(node, src);
                return;
            }
            for child in SyntaxNode::children(node) {
                visit(&child, src, found);
            }
        }
        visit(&root, src, &mut found);
        assert_eq!(found.as_deref(), Some("formatName"));
    }
}
