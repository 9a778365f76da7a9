//! Document loader.
//!
//! Walks the workspace in sorted order, consults the [`ExtensionPolicy`] for
//! every file, and turns each accepted file into one or more [`Document`]s
//! through a [`DocumentParser`] strategy:
//!
//! - [`LanguageParser`] splits large source files by top-level declaration
//!   and adds a simplified remainder document.
//! - [`PlainTextParser`] yields the whole file as one document. It is also
//!   the fallback when the language parser cannot make sense of a file.
//!
//! A single bad file never aborts the load: unreadable, oversized and
//! non-UTF-8 files are counted per extension in the [`LoadReport`].

use anyhow::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use walkdir::WalkDir;

use crate::config::LoaderConfig;
use crate::error::OracleError;
use crate::models::{Classification, Document, SegmentKind};
use crate::policy::{extension_key, ExtensionPolicy, Language, Treatment};
use crate::segment::{self, SegmentError};

/// Turns the text of one file into documents.
pub trait DocumentParser {
    fn parse(
        &self,
        relative_path: &str,
        absolute_path: &Path,
        text: &str,
    ) -> Result<Vec<Document>, SegmentError>;
}

pub struct PlainTextParser {
    classification: Classification,
}

impl PlainTextParser {
    pub fn new(classification: Classification) -> Self {
        Self { classification }
    }
}

impl DocumentParser for PlainTextParser {
    fn parse(
        &self,
        relative_path: &str,
        absolute_path: &Path,
        text: &str,
    ) -> Result<Vec<Document>, SegmentError> {
        Ok(vec![Document {
            text: text.to_string(),
            relative_path: relative_path.to_string(),
            absolute_path: absolute_path.to_path_buf(),
            classification: self.classification.clone(),
            segment: SegmentKind::WholeFile,
        }])
    }
}

pub struct LanguageParser {
    language: Language,
    /// Files with fewer lines than this are not segmented.
    threshold: usize,
}

impl LanguageParser {
    pub fn new(language: Language, threshold: usize) -> Self {
        Self {
            language,
            threshold,
        }
    }
}

impl DocumentParser for LanguageParser {
    fn parse(
        &self,
        relative_path: &str,
        absolute_path: &Path,
        text: &str,
    ) -> Result<Vec<Document>, SegmentError> {
        let classification = Classification::Language(self.language.name().to_string());
        let make = |text: String, segment: SegmentKind| Document {
            text,
            relative_path: relative_path.to_string(),
            absolute_path: absolute_path.to_path_buf(),
            classification: classification.clone(),
            segment,
        };

        let lines: Vec<&str> = text.split_inclusive('\n').collect();
        if lines.len() < self.threshold || !segment::supports(self.language) {
            return Ok(vec![make(text.to_string(), SegmentKind::WholeFile)]);
        }

        let segments = segment::segment(self.language, text)?;
        if segments.is_empty() {
            return Ok(vec![make(text.to_string(), SegmentKind::WholeFile)]);
        }

        let mut docs: Vec<Document> = segments
            .iter()
            .map(|s| make(lines[s.start..s.end].concat(), SegmentKind::Declaration))
            .collect();
        docs.push(make(
            segment::simplify(self.language, &lines, &segments),
            SegmentKind::Simplified,
        ));
        Ok(docs)
    }
}

/// Per-extension tallies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtensionCounts {
    pub files: usize,
    pub documents: usize,
    pub fallbacks: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub documents: usize,
    pub files_loaded: usize,
    /// Source files loaded as plain text after the language parser failed.
    pub fallbacks: usize,
    pub skipped_by_error: usize,
    /// Files whose extension is not in the policy.
    pub excluded: usize,
    pub per_extension: BTreeMap<String, ExtensionCounts>,
}

#[derive(Debug, Clone)]
pub struct LoadOutcome {
    pub documents: Vec<Document>,
    pub report: LoadReport,
}

pub struct DocumentLoader {
    policy: ExtensionPolicy,
    exclude: GlobSet,
    max_file_bytes: u64,
    parser_threshold: usize,
}

impl DocumentLoader {
    pub fn new(config: &LoaderConfig, policy: ExtensionPolicy) -> Result<Self> {
        Ok(Self {
            policy,
            exclude: build_globset(&config.exclude_globs)?,
            max_file_bytes: config.max_file_bytes,
            parser_threshold: config.parser_threshold,
        })
    }

    /// Load every supported file under `root`.
    ///
    /// Fails with [`OracleError::Load`] only when nothing was loaded.
    pub fn load(&self, root: &Path) -> Result<LoadOutcome, OracleError> {
        let mut documents = Vec::new();
        let mut report = LoadReport::default();

        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::debug!(error = %e, "unreadable directory entry");
                    report.skipped_by_error += 1;
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(path);
            let rel_str = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            if self.exclude.is_match(&rel_str) {
                continue;
            }

            let file_name = entry.file_name().to_string_lossy();
            let treatment = match self.policy.treatment_for(&file_name) {
                Some(t) => t,
                None => {
                    report.excluded += 1;
                    continue;
                }
            };
            let ext = extension_key(&file_name).unwrap_or_default().to_string();
            let counts = report.per_extension.entry(ext).or_default();

            let text = match self.read_text(path) {
                Ok(text) => text,
                Err(reason) => {
                    tracing::debug!(path = %rel_str, %reason, "skipping file");
                    counts.errors += 1;
                    report.skipped_by_error += 1;
                    continue;
                }
            };

            let (docs, fell_back) = self.parse_file(treatment, &rel_str, path, &text);
            counts.files += 1;
            counts.documents += docs.len();
            report.files_loaded += 1;
            report.documents += docs.len();
            if fell_back {
                counts.fallbacks += 1;
                report.fallbacks += 1;
            }
            documents.extend(docs);
        }

        tracing::info!(
            documents = report.documents,
            files = report.files_loaded,
            fallbacks = report.fallbacks,
            skipped_by_error = report.skipped_by_error,
            excluded = report.excluded,
            "documents loaded"
        );
        if report.skipped_by_error > 0 {
            tracing::warn!(
                count = report.skipped_by_error,
                "skipped files due to loading issues"
            );
        }

        if documents.is_empty() {
            return Err(OracleError::Load("no supported files found".to_string()));
        }

        Ok(LoadOutcome { documents, report })
    }

    fn read_text(&self, path: &Path) -> std::result::Result<String, String> {
        let meta = std::fs::metadata(path).map_err(|e| e.to_string())?;
        if meta.len() > self.max_file_bytes {
            return Err(format!(
                "file is {} bytes, limit is {}",
                meta.len(),
                self.max_file_bytes
            ));
        }
        let bytes = std::fs::read(path).map_err(|e| e.to_string())?;
        String::from_utf8(bytes).map_err(|_| "not valid UTF-8".to_string())
    }

    /// Parse one file, falling back to plain text when the language parser
    /// fails. The flag reports whether the fallback was taken.
    fn parse_file(
        &self,
        treatment: Treatment,
        rel_str: &str,
        path: &Path,
        text: &str,
    ) -> (Vec<Document>, bool) {
        let plain = PlainTextParser::new(treatment.classification());

        match treatment {
            Treatment::Language(lang) => {
                let parser = LanguageParser::new(lang, self.parser_threshold);
                match parser.parse(rel_str, path, text) {
                    Ok(docs) => (docs, false),
                    Err(e) => {
                        tracing::debug!(path = %rel_str, error = %e, "parser failed, loading as text");
                        (plain_docs(&plain, rel_str, path, text), true)
                    }
                }
            }
            Treatment::PlainText => (plain_docs(&plain, rel_str, path, text), false),
        }
    }
}

fn plain_docs(parser: &PlainTextParser, rel_str: &str, path: &Path, text: &str) -> Vec<Document> {
    parser.parse(rel_str, path, text).unwrap_or_default()
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
