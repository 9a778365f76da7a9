//! Recursive separator-aware text chunker.
//!
//! Splits document text into [`Chunk`]s of at most `max_chars` characters.
//! Each chunk ends at the latest paragraph break that fits, then the latest
//! line break, then the latest space, and only then at a hard cut.
//! Consecutive chunks of a document overlap by exactly `overlap_chars`
//! characters: the next chunk always starts `overlap_chars` before the
//! previous one ended.
//!
//! Lengths and offsets are counted in `char`s. Text is kept verbatim, so
//! stripping the overlaps and concatenating the chunks gives back the
//! document.
//!
//! Each chunk receives a random UUID plus a SHA-256 hash of its text.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::ChunkingConfig;
use crate::models::{Chunk, Document};

/// Break points, most preferred first. A hard cut is the last resort.
const SEPARATORS: &[&str] = &["\n\n", "\n", " "];

/// A span of a document produced by [`chunk_text`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextSpan {
    /// Offset of the first character, in chars.
    pub start: usize,
    pub text: String,
}

/// Split every document and attach source metadata.
///
/// Chunk indices restart at 0 for each document.
pub fn split(documents: &[Document], config: &ChunkingConfig) -> Vec<Chunk> {
    let mut chunks = Vec::new();

    for doc in documents {
        let spans = chunk_text(&doc.text, config.max_chars, config.overlap_chars);
        for (i, span) in spans.into_iter().enumerate() {
            chunks.push(make_chunk(doc, i as i64, span));
        }
    }

    tracing::info!(
        documents = documents.len(),
        chunks = chunks.len(),
        "created text chunks"
    );
    chunks
}

/// Split text into overlapping spans of at most `max_chars` characters.
///
/// Whitespace-only text yields no spans. `overlap_chars` must be smaller
/// than `max_chars`; larger values are clamped.
pub fn chunk_text(text: &str, max_chars: usize, overlap_chars: usize) -> Vec<TextSpan> {
    if text.trim().is_empty() || max_chars == 0 {
        return Vec::new();
    }
    let overlap = overlap_chars.min(max_chars - 1);

    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();
    let mut spans = Vec::new();
    let mut start = 0;

    loop {
        if len - start <= max_chars {
            spans.push(span(&chars, start, len));
            break;
        }

        // The end must leave the next start strictly after this one.
        let lo = start + overlap + 1;
        let hard = start + max_chars;
        let end = SEPARATORS
            .iter()
            .find_map(|sep| latest_break(&chars, lo, hard, sep))
            .unwrap_or(hard);

        spans.push(span(&chars, start, end));
        start = end - overlap;
    }

    spans
}

/// Latest position `p` in `[lo, hi]` such that `sep` ends right before `p`.
fn latest_break(chars: &[char], lo: usize, hi: usize, sep: &str) -> Option<usize> {
    let sep: Vec<char> = sep.chars().collect();
    (lo..=hi)
        .rev()
        .find(|&p| p >= sep.len() && chars[p - sep.len()..p] == sep[..])
}

fn span(chars: &[char], start: usize, end: usize) -> TextSpan {
    TextSpan {
        start,
        text: chars[start..end].iter().collect(),
    }
}

fn make_chunk(doc: &Document, index: i64, span: TextSpan) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(span.text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: Uuid::new_v4().to_string(),
        text: span.text,
        source: doc.relative_path.clone(),
        classification: doc.classification.clone(),
        chunk_index: index,
        start_offset: span.start,
        hash,
    }
}
