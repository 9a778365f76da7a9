//! Extension policy: which files are loaded, and how.
//!
//! A closed allow-list. Source files in a known language get the
//! declaration-aware parser; documentation, configuration, styling and
//! script files are read as plain text; everything else is skipped.
//!
//! The extension of a file is the suffix starting at its last `.`. A dotfile
//! with no other `.` (`.gitignore`, `.env`) uses its whole name. Matching is
//! case-sensitive, so `README.MD` is not loaded.

use std::collections::HashMap;

use crate::models::Classification;

/// Languages with a dedicated parser strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Python,
    JavaScript,
    TypeScript,
    Java,
    Cpp,
    C,
    CSharp,
    Php,
    Ruby,
    Go,
    Rust,
    Swift,
    Kotlin,
    Scala,
    Html,
}

impl Language {
    pub fn name(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::JavaScript => "js",
            Language::TypeScript => "ts",
            Language::Java => "java",
            Language::Cpp => "cpp",
            Language::C => "c",
            Language::CSharp => "csharp",
            Language::Php => "php",
            Language::Ruby => "ruby",
            Language::Go => "go",
            Language::Rust => "rust",
            Language::Swift => "swift",
            Language::Kotlin => "kotlin",
            Language::Scala => "scala",
            Language::Html => "html",
        }
    }

    /// Line-comment prefix used for the `Code for:` stubs in simplified
    /// documents.
    pub fn comment_prefix(&self) -> &'static str {
        match self {
            Language::Python | Language::Ruby => "#",
            Language::Html => "<!--",
            _ => "//",
        }
    }
}

/// What the loader does with a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Treatment {
    Language(Language),
    PlainText,
}

impl Treatment {
    pub fn classification(&self) -> Classification {
        match self {
            Treatment::Language(lang) => Classification::Language(lang.name().to_string()),
            Treatment::PlainText => Classification::PlainText,
        }
    }
}

const LANGUAGE_EXTENSIONS: &[(&str, Language)] = &[
    (".py", Language::Python),
    (".js", Language::JavaScript),
    (".jsx", Language::JavaScript),
    (".ts", Language::TypeScript),
    (".tsx", Language::TypeScript),
    (".java", Language::Java),
    (".cpp", Language::Cpp),
    (".c", Language::C),
    (".cs", Language::CSharp),
    (".php", Language::Php),
    (".rb", Language::Ruby),
    (".go", Language::Go),
    (".rs", Language::Rust),
    (".swift", Language::Swift),
    (".kt", Language::Kotlin),
    (".scala", Language::Scala),
    (".html", Language::Html),
];

const PLAIN_TEXT_EXTENSIONS: &[&str] = &[
    // Documentation
    ".md",
    ".txt",
    ".rst",
    ".adoc",
    // Configuration
    ".json",
    ".jsonc",
    ".json5",
    ".xml",
    ".yaml",
    ".yml",
    ".toml",
    ".ini",
    ".cfg",
    ".conf",
    // Styling
    ".css",
    ".scss",
    ".sass",
    ".less",
    ".sql",
    // Scripts
    ".sh",
    ".bash",
    ".zsh",
    ".fish",
    ".ps1",
    ".bat",
    ".cmd",
    // Build and tooling
    ".log",
    ".lock",
    ".gitignore",
    ".gitattributes",
    ".gitmodules",
    ".gitkeep",
    ".env",
    ".dockerfile",
    ".dockerignore",
    ".editorconfig",
    ".eslintrc",
    ".prettierrc",
    ".babelrc",
    ".browserslistrc",
    ".npmrc",
    ".yarnrc",
    ".pip",
    ".requirements",
    ".setup",
    ".pyproject",
];

/// Mapping from extension to [`Treatment`].
#[derive(Debug, Clone)]
pub struct ExtensionPolicy {
    entries: HashMap<String, Treatment>,
}

impl Default for ExtensionPolicy {
    fn default() -> Self {
        let mut entries = HashMap::new();
        for (ext, lang) in LANGUAGE_EXTENSIONS {
            entries.insert(ext.to_string(), Treatment::Language(*lang));
        }
        for ext in PLAIN_TEXT_EXTENSIONS {
            entries.insert(ext.to_string(), Treatment::PlainText);
        }
        Self { entries }
    }
}

impl ExtensionPolicy {
    /// An empty policy that loads nothing.
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn with(mut self, extension: &str, treatment: Treatment) -> Self {
        self.entries.insert(extension.to_string(), treatment);
        self
    }

    /// Treatment for a file name, or `None` when the file is excluded.
    pub fn treatment_for(&self, file_name: &str) -> Option<Treatment> {
        let key = extension_key(file_name)?;
        self.entries.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Extension key of a file name: `main.rs` → `.rs`, `.gitignore` →
/// `.gitignore`, `Makefile` → `None`.
pub fn extension_key(file_name: &str) -> Option<&str> {
    let idx = file_name.rfind('.')?;
    let key = &file_name[idx..];
    if key.len() == 1 {
        return None;
    }
    Some(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_key() {
        assert_eq!(extension_key("main.rs"), Some(".rs"));
        assert_eq!(extension_key("archive.tar.gz"), Some(".gz"));
        assert_eq!(extension_key(".gitignore"), Some(".gitignore"));
        assert_eq!(extension_key(".env"), Some(".env"));
        assert_eq!(extension_key("Makefile"), None);
        assert_eq!(extension_key("weird."), None);
    }

    #[test]
    fn test_language_files_get_parser() {
        let policy = ExtensionPolicy::default();
        assert_eq!(
            policy.treatment_for("app.py"),
            Some(Treatment::Language(Language::Python))
        );
        assert_eq!(
            policy.treatment_for("View.tsx"),
            Some(Treatment::Language(Language::TypeScript))
        );
        assert_eq!(
            policy.treatment_for("lib.rs"),
            Some(Treatment::Language(Language::Rust))
        );
    }

    #[test]
    fn test_plain_text_files() {
        let policy = ExtensionPolicy::default();
        for name in ["README.md", "Cargo.toml", ".gitignore", ".eslintrc", "style.scss"] {
            assert_eq!(
                policy.treatment_for(name),
                Some(Treatment::PlainText),
                "{} should be plain text",
                name
            );
        }
    }

    #[test]
    fn test_unknown_and_binary_excluded() {
        let policy = ExtensionPolicy::default();
        assert_eq!(policy.treatment_for("logo.png"), None);
        assert_eq!(policy.treatment_for("build.bin"), None);
        assert_eq!(policy.treatment_for("data.sqlite"), None);
        assert_eq!(policy.treatment_for("Makefile"), None);
    }

    #[test]
    fn test_case_sensitive() {
        let policy = ExtensionPolicy::default();
        assert_eq!(policy.treatment_for("README.MD"), None);
        assert_eq!(policy.treatment_for("Main.PY"), None);
    }

    #[test]
    fn test_custom_policy() {
        let policy = ExtensionPolicy::empty().with(".bin", Treatment::PlainText);
        assert_eq!(policy.len(), 1);
        assert_eq!(policy.treatment_for("x.bin"), Some(Treatment::PlainText));
        assert_eq!(policy.treatment_for("x.md"), None);
    }
}
