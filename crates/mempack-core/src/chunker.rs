//! Language-aware semantic chunking
//!
//! Splits ingested text into overlapping, symbol-annotated chunks sized
//! to a token budget. For recognized source languages the chunker maps
//! top-level declarations to chunks via tree-sitter; everything else goes
//! through a line-window splitter with token overlap.
//!
//! ## Supported Languages
//!
//! - Rust (.rs)
//! - Python (.py)
//! - JavaScript (.js, .mjs, .cjs)
//! - TypeScript (.ts, .tsx)
//! - Go (.go)

use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use tracing::debug;
use tree_sitter::{Language, Node, Parser};

use crate::tokenizer::Tokenizer;

/// Chunk sizing parameters.
#[derive(Debug, Clone, Copy)]
pub struct ChunkerConfig {
    /// Token budget per chunk.
    pub max_tokens: usize,
    /// Minimum token mass shared between consecutive window chunks.
    pub overlap_tokens: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_tokens: 400,
            overlap_tokens: 40,
        }
    }
}

/// One produced chunk. Line numbers are 1-based inclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticChunk {
    pub text: String,
    pub start_line: usize,
    pub end_line: usize,
    pub chunk_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol_kind: Option<String>,
}

/// Source languages the declaration walk understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChunkLanguage {
    Rust,
    Python,
    JavaScript,
    TypeScript,
    Tsx,
    Go,
}

impl ChunkLanguage {
    /// Get the tree-sitter Language for this language.
    pub fn tree_sitter_language(&self) -> Language {
        match self {
            ChunkLanguage::Rust => tree_sitter_rust::LANGUAGE.into(),
            ChunkLanguage::Python => tree_sitter_python::LANGUAGE.into(),
            ChunkLanguage::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
            ChunkLanguage::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            ChunkLanguage::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
            ChunkLanguage::Go => tree_sitter_go::LANGUAGE.into(),
        }
    }

    /// Detect language from file extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        extension_map().get(ext.to_lowercase().as_str()).copied()
    }

    /// Detect language from file path.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }
}

static EXTENSION_MAP: OnceLock<HashMap<&'static str, ChunkLanguage>> = OnceLock::new();

fn extension_map() -> &'static HashMap<&'static str, ChunkLanguage> {
    EXTENSION_MAP.get_or_init(|| {
        let mut map = HashMap::new();
        map.insert("rs", ChunkLanguage::Rust);
        map.insert("py", ChunkLanguage::Python);
        map.insert("js", ChunkLanguage::JavaScript);
        map.insert("mjs", ChunkLanguage::JavaScript);
        map.insert("cjs", ChunkLanguage::JavaScript);
        map.insert("ts", ChunkLanguage::TypeScript);
        map.insert("tsx", ChunkLanguage::Tsx);
        map.insert("go", ChunkLanguage::Go);
        map
    })
}

/// A top-level declaration found by the tree walk (0-based inclusive
/// line range).
struct Declaration {
    start: usize,
    end: usize,
    kind: &'static str,
    name: Option<String>,
}

/// Language-aware splitter producing [`SemanticChunk`]s.
pub struct SemanticChunker<'a> {
    tokenizer: &'a dyn Tokenizer,
    config: ChunkerConfig,
}

impl<'a> SemanticChunker<'a> {
    pub fn new(tokenizer: &'a dyn Tokenizer, config: ChunkerConfig) -> Self {
        Self { tokenizer, config }
    }

    /// Chunk a file's content. Empty content yields no chunks; parse
    /// failures fall back to the line-window splitter.
    pub fn chunk_file(&self, path: &Path, content: &[u8]) -> Vec<SemanticChunk> {
        let text = String::from_utf8_lossy(content).replace("\r\n", "\n");
        if text.trim().is_empty() {
            return Vec::new();
        }
        let lines: Vec<&str> = text.lines().collect();

        if let Some(lang) = ChunkLanguage::from_path(path) {
            match self.chunk_source(lang, &text, &lines) {
                Some(chunks) => return chunks,
                None => debug!("parse failed for {}, using line windows", path.display()),
            }
        }
        self.window_chunks(&lines, 1, "block", None, None)
    }

    /// Declaration-based chunking. Returns None when the parser cannot
    /// handle the input, so the caller falls back.
    fn chunk_source(
        &self,
        lang: ChunkLanguage,
        text: &str,
        lines: &[&str],
    ) -> Option<Vec<SemanticChunk>> {
        let mut parser = Parser::new();
        parser.set_language(&lang.tree_sitter_language()).ok()?;
        let tree = parser.parse(text, None)?;
        let root = tree.root_node();

        let mut decls = Vec::new();
        let mut cursor = root.walk();
        for child in root.named_children(&mut cursor) {
            if let Some(decl) = declaration_of(lang, child, text.as_bytes()) {
                if decl.end < decl.start {
                    continue;
                }
                decls.push(decl);
            }
        }
        decls.sort_by_key(|d| d.start);

        let mut chunks = Vec::new();
        let mut next_line = 0usize;
        for decl in &decls {
            if decl.start >= lines.len() {
                break;
            }
            let end = decl.end.min(lines.len() - 1);
            // Lines between declarations (imports, consts, comments)
            if decl.start > next_line {
                self.emit_gap(lines, next_line, decl.start - 1, &mut chunks);
            }
            self.emit_declaration(lines, decl.start, end, decl, &mut chunks);
            next_line = next_line.max(end + 1);
        }
        if next_line < lines.len() {
            self.emit_gap(lines, next_line, lines.len() - 1, &mut chunks);
        }
        Some(chunks)
    }

    /// Emit one declaration as a chunk, window-splitting it when it
    /// exceeds the token budget.
    fn emit_declaration(
        &self,
        lines: &[&str],
        start: usize,
        end: usize,
        decl: &Declaration,
        out: &mut Vec<SemanticChunk>,
    ) {
        let body = lines[start..=end].join("\n");
        let tokens = self.tokenizer.count(&body);
        if tokens <= self.config.max_tokens {
            out.push(SemanticChunk {
                text: body,
                start_line: start + 1,
                end_line: end + 1,
                chunk_type: decl.kind.to_string(),
                symbol_name: decl.name.clone(),
                symbol_kind: Some(decl.kind.to_string()),
            });
        } else {
            out.extend(self.window_chunks(
                &lines[start..=end],
                start + 1,
                "block",
                decl.name.clone(),
                Some(decl.kind.to_string()),
            ));
        }
    }

    /// Emit lines not claimed by any declaration. Whitespace-only gaps
    /// are dropped.
    fn emit_gap(&self, lines: &[&str], start: usize, end: usize, out: &mut Vec<SemanticChunk>) {
        if lines[start..=end].iter().all(|l| l.trim().is_empty()) {
            return;
        }
        out.extend(self.window_chunks(&lines[start..=end], start + 1, "block", None, None));
    }

    /// Line-window splitter: successive ranges whose summed per-line
    /// token counts stay within the budget, with trailing-line overlap
    /// between consecutive windows. A single line over the budget
    /// becomes a chunk of size one.
    fn window_chunks(
        &self,
        lines: &[&str],
        base_line: usize,
        chunk_type: &str,
        symbol_name: Option<String>,
        symbol_kind: Option<String>,
    ) -> Vec<SemanticChunk> {
        let costs: Vec<usize> = lines.iter().map(|l| self.tokenizer.count(l)).collect();
        let mut chunks = Vec::new();
        let mut start = 0usize;

        while start < lines.len() {
            let mut sum = 0usize;
            let mut end = start;
            while end < lines.len() && (end == start || sum + costs[end] <= self.config.max_tokens)
            {
                sum += costs[end];
                end += 1;
                if sum > self.config.max_tokens {
                    break;
                }
            }

            chunks.push(SemanticChunk {
                text: lines[start..end].join("\n"),
                start_line: base_line + start,
                end_line: base_line + end - 1,
                chunk_type: chunk_type.to_string(),
                symbol_name: symbol_name.clone(),
                symbol_kind: symbol_kind.clone(),
            });

            if end >= lines.len() {
                break;
            }

            // Roll back trailing lines until their token sum reaches the
            // configured overlap, keeping forward progress.
            let mut next = end;
            if self.config.overlap_tokens > 0 {
                let mut overlap_sum = 0usize;
                while next > start + 1 && overlap_sum < self.config.overlap_tokens {
                    next -= 1;
                    overlap_sum += costs[next];
                }
            }
            start = next.max(start + 1);
        }

        chunks
    }
}

/// Map a top-level node to a declaration, unwrapping language-specific
/// wrappers (decorators, export statements).
fn declaration_of(lang: ChunkLanguage, node: Node<'_>, src: &[u8]) -> Option<Declaration> {
    let kind = node.kind();
    let (decl_kind, name_node) = match lang {
        ChunkLanguage::Rust => match kind {
            "function_item" => ("function", node.child_by_field_name("name")),
            "struct_item" => ("struct", node.child_by_field_name("name")),
            "enum_item" => ("enum", node.child_by_field_name("name")),
            "trait_item" => ("interface", node.child_by_field_name("name")),
            "type_item" => ("type", node.child_by_field_name("name")),
            "impl_item" => ("class", node.child_by_field_name("type")),
            _ => return None,
        },
        ChunkLanguage::Python => match kind {
            "function_definition" => ("function", node.child_by_field_name("name")),
            "class_definition" => ("class", node.child_by_field_name("name")),
            "decorated_definition" => {
                let inner = node.child_by_field_name("definition")?;
                let mut decl = declaration_of(lang, inner, src)?;
                // Keep the decorator lines inside the chunk
                decl.start = node.start_position().row;
                return Some(decl);
            }
            _ => return None,
        },
        ChunkLanguage::JavaScript | ChunkLanguage::TypeScript | ChunkLanguage::Tsx => match kind {
            "function_declaration" | "generator_function_declaration" => {
                ("function", node.child_by_field_name("name"))
            }
            "class_declaration" | "abstract_class_declaration" => {
                ("class", node.child_by_field_name("name"))
            }
            "interface_declaration" => ("interface", node.child_by_field_name("name")),
            "enum_declaration" => ("enum", node.child_by_field_name("name")),
            "type_alias_declaration" => ("type", node.child_by_field_name("name")),
            "export_statement" => {
                let inner = node.child_by_field_name("declaration")?;
                let mut decl = declaration_of(lang, inner, src)?;
                decl.start = node.start_position().row;
                return Some(decl);
            }
            _ => return None,
        },
        ChunkLanguage::Go => match kind {
            "function_declaration" => ("function", node.child_by_field_name("name")),
            "method_declaration" => ("method", node.child_by_field_name("name")),
            "type_declaration" => {
                let spec = node
                    .named_children(&mut node.walk())
                    .find(|c| c.kind() == "type_spec")?;
                let type_kind = match spec.child_by_field_name("type").map(|t| t.kind()) {
                    Some("struct_type") => "struct",
                    Some("interface_type") => "interface",
                    _ => "type",
                };
                return Some(Declaration {
                    start: node.start_position().row,
                    end: node.end_position().row,
                    kind: type_kind,
                    name: spec
                        .child_by_field_name("name")
                        .and_then(|n| n.utf8_text(src).ok())
                        .map(|s| s.to_string()),
                });
            }
            _ => return None,
        },
    };

    Some(Declaration {
        start: node.start_position().row,
        end: node.end_position().row,
        kind: decl_kind,
        name: name_node
            .and_then(|n| n.utf8_text(src).ok())
            .map(|s| s.to_string()),
    })
}
