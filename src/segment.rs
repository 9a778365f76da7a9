//! Declaration segmenting for source files using tree-sitter.
//!
//! Each supported language has a grammar and a list of declaration node
//! kinds. The tree is walked depth first and the outermost declaration on
//! each path becomes a [`Segment`], so an `impl` block or a class is kept
//! whole rather than split into its methods. Declarations that fit on one
//! line stay inline.
//!
//! A file the grammar cannot parse cleanly is reported as a
//! [`SegmentError`] and the loader falls back to plain text.

use tree_sitter::{Node, Parser};

use crate::policy::Language;

/// Lines `[start, end)` of one declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub start: usize,
    pub end: usize,
    /// First line of the declaration itself (attributes excluded), trimmed.
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SegmentError {
    #[error("no grammar for {0}")]
    NoGrammar(&'static str),
    #[error("grammar rejected: {0}")]
    Grammar(String),
    #[error("tree-sitter returned no tree")]
    NoTree,
    #[error("syntax error at line {line}")]
    Syntax { line: usize },
}

/// The tree-sitter grammar for `language`, if one is bundled.
fn grammar(language: Language) -> Option<tree_sitter::Language> {
    let lang = match language {
        Language::Rust => tree_sitter_rust::LANGUAGE.into(),
        Language::Python => tree_sitter_python::LANGUAGE.into(),
        Language::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
        // The TSX grammar also accepts plain .ts sources.
        Language::TypeScript => tree_sitter_typescript::LANGUAGE_TSX.into(),
        Language::Go => tree_sitter_go::LANGUAGE.into(),
        Language::Java => tree_sitter_java::LANGUAGE.into(),
        Language::C => tree_sitter_c::LANGUAGE.into(),
        Language::Cpp => tree_sitter_cpp::LANGUAGE.into(),
        Language::CSharp => tree_sitter_c_sharp::LANGUAGE.into(),
        Language::Php => tree_sitter_php::LANGUAGE_PHP.into(),
        Language::Ruby => tree_sitter_ruby::LANGUAGE.into(),
        Language::Scala => tree_sitter_scala::LANGUAGE.into(),
        Language::Kotlin | Language::Swift | Language::Html => return None,
    };
    Some(lang)
}

/// Node kinds that count as a declaration.
fn declaration_kinds(language: Language) -> &'static [&'static str] {
    match language {
        Language::Rust => &[
            "function_item",
            "struct_item",
            "enum_item",
            "union_item",
            "trait_item",
            "impl_item",
            "mod_item",
            "macro_definition",
        ],
        Language::Python => &[
            "function_definition",
            "class_definition",
            "decorated_definition",
        ],
        Language::JavaScript => &[
            "function_declaration",
            "generator_function_declaration",
            "class_declaration",
            "export_statement",
            "lexical_declaration",
        ],
        Language::TypeScript => &[
            "function_declaration",
            "generator_function_declaration",
            "class_declaration",
            "abstract_class_declaration",
            "interface_declaration",
            "enum_declaration",
            "type_alias_declaration",
            "internal_module",
            "module",
            "export_statement",
            "lexical_declaration",
        ],
        Language::Go => &[
            "function_declaration",
            "method_declaration",
            "type_declaration",
        ],
        Language::Java => &[
            "class_declaration",
            "interface_declaration",
            "enum_declaration",
            "record_declaration",
            "annotation_type_declaration",
        ],
        Language::CSharp => &[
            "class_declaration",
            "interface_declaration",
            "enum_declaration",
            "struct_declaration",
            "record_declaration",
        ],
        Language::C => &[
            "function_definition",
            "struct_specifier",
            "union_specifier",
            "enum_specifier",
            "type_definition",
        ],
        Language::Cpp => &[
            "function_definition",
            "class_specifier",
            "struct_specifier",
            "union_specifier",
            "enum_specifier",
            "type_definition",
            "template_declaration",
        ],
        Language::Php => &[
            "function_definition",
            "class_declaration",
            "interface_declaration",
            "trait_declaration",
            "enum_declaration",
        ],
        Language::Ruby => &["method", "class", "module"],
        Language::Scala => &[
            "class_definition",
            "object_definition",
            "trait_definition",
            "function_definition",
            "enum_definition",
        ],
        Language::Kotlin | Language::Swift | Language::Html => &[],
    }
}

/// Sibling kinds pulled into the declaration that follows them.
fn attribute_kinds(language: Language) -> &'static [&'static str] {
    match language {
        Language::Rust => &["attribute_item"],
        _ => &[],
    }
}

/// Whether `language` has a declaration segmenter.
pub fn supports(language: Language) -> bool {
    grammar(language).is_some()
}

/// Find the declarations of a file.
///
/// Line numbers refer to `source.split_inclusive('\n')`.
pub fn segment(language: Language, source: &str) -> Result<Vec<Segment>, SegmentError> {
    let grammar = grammar(language).ok_or(SegmentError::NoGrammar(language.name()))?;
    let mut parser = Parser::new();
    parser
        .set_language(&grammar)
        .map_err(|e| SegmentError::Grammar(e.to_string()))?;
    let tree = parser.parse(source, None).ok_or(SegmentError::NoTree)?;
    let root = tree.root_node();

    if root.has_error() {
        return Err(SegmentError::Syntax {
            line: first_error_row(root) + 1,
        });
    }

    let lines: Vec<&str> = source.split_inclusive('\n').collect();
    let kinds = declaration_kinds(language);
    let attributes = attribute_kinds(language);
    let mut segments: Vec<Segment> = Vec::new();

    let mut cursor = root.walk();
    'walk: loop {
        let node = cursor.node();
        let is_declaration = node.is_named() && kinds.contains(&node.kind()) && spans_lines(node);

        if is_declaration {
            let decl_row = node.start_position().row;
            let floor = segments.last().map_or(0, |s| s.end);
            if decl_row >= floor {
                let start = attached_start(node, attributes).max(floor);
                let mut end = end_line(node).min(lines.len());
                while end > decl_row + 1 && lines[end - 1].trim().is_empty() {
                    end -= 1;
                }
                segments.push(Segment {
                    start,
                    end,
                    signature: signature(&lines, decl_row, end),
                });
            }
        } else if cursor.goto_first_child() {
            continue;
        }

        loop {
            if cursor.goto_next_sibling() {
                continue 'walk;
            }
            if !cursor.goto_parent() {
                break 'walk;
            }
        }
    }

    Ok(segments)
}

/// First line in `[row, end)` that is not a decorator or attribute.
fn signature(lines: &[&str], row: usize, end: usize) -> String {
    let decorated = |line: &str| {
        let t = line.trim_start();
        t.starts_with('@') || t.starts_with("#[")
    };
    let rows = lines.get(row..end).unwrap_or_default();
    rows.iter()
        .copied()
        .find(|&line| !decorated(line))
        .or_else(|| rows.first().copied())
        .map_or(String::new(), |line| line.trim().to_string())
}

fn spans_lines(node: Node) -> bool {
    end_line(node) > node.start_position().row + 1
}

/// Exclusive end line of `node`.
fn end_line(node: Node) -> usize {
    let end = node.end_position();
    if end.column == 0 && end.row > node.start_position().row {
        end.row
    } else {
        end.row + 1
    }
}

fn attached_start(node: Node, attributes: &[&str]) -> usize {
    let mut start = node.start_position().row;
    let mut prev = node.prev_named_sibling();
    while let Some(sibling) = prev {
        if !attributes.contains(&sibling.kind()) {
            break;
        }
        start = sibling.start_position().row;
        prev = sibling.prev_named_sibling();
    }
    start
}

fn first_error_row(root: Node) -> usize {
    let mut node = root;
    loop {
        if node.is_error() || node.is_missing() {
            return node.start_position().row;
        }
        let mut cursor = node.walk();
        let next = node.children(&mut cursor).find(|c| c.has_error());
        match next {
            Some(child) => node = child,
            None => return node.start_position().row,
        }
    }
}

/// The file with every segment replaced by a one-line `Code for:` stub.
pub fn simplify(language: Language, lines: &[&str], segments: &[Segment]) -> String {
    let prefix = language.comment_prefix();
    let suffix = if prefix == "<!--" { " -->" } else { "" };
    let mut out = String::new();
    let mut next = 0;

    for seg in segments {
        for line in &lines[next..seg.start] {
            out.push_str(line);
        }
        out.push_str(&format!("{} Code for: {}{}\n", prefix, seg.signature, suffix));
        next = seg.end;
    }
    for line in &lines[next..] {
        out.push_str(line);
    }
    out
}
