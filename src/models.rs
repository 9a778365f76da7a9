//! Core data models that flow through the ingestion and answering pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A local clone of the target repository.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub root: PathBuf,
    pub source_url: String,
    /// Incremented by each successful ingestion.
    pub generation: u64,
    pub acquired_at: DateTime<Utc>,
    /// Non-fatal problems hit while preparing the workspace.
    pub warnings: Vec<String>,
}

/// How a file's text is interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "language")]
pub enum Classification {
    Language(String),
    PlainText,
}

impl Classification {
    pub fn as_str(&self) -> &str {
        match self {
            Classification::Language(lang) => lang,
            Classification::PlainText => "text",
        }
    }

    pub fn from_label(label: &str) -> Self {
        match label {
            "text" => Classification::PlainText,
            other => Classification::Language(other.to_string()),
        }
    }
}

/// Which part of a source file a [`Document`] holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentKind {
    WholeFile,
    Declaration,
    /// The file with each extracted declaration replaced by a one-line stub.
    Simplified,
}

/// One logical unit of source text, produced by the loader.
#[derive(Debug, Clone)]
pub struct Document {
    pub text: String,
    /// Path relative to the workspace root, `/`-separated.
    pub relative_path: String,
    pub absolute_path: PathBuf,
    pub classification: Classification,
    pub segment: SegmentKind,
}

/// A bounded slice of a document, the unit of embedding and retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub text: String,
    pub source: String,
    pub classification: Classification,
    pub chunk_index: i64,
    /// Offset of the first character within the document, in chars.
    pub start_offset: usize,
    pub hash: String,
}

/// A chunk returned by a retrieval query.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedChunk {
    pub chunk: Chunk,
    /// Cosine similarity to the query.
    pub score: f32,
}

/// Bookkeeping stored next to the vectors of one index generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub generation: u64,
    pub source_url: String,
    pub chunk_count: usize,
    pub embedding_model: String,
    pub built_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

/// Ordered conversation turns plus a running compressed summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationState {
    pub turns: Vec<Turn>,
    pub summary: String,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty() && self.summary.is_empty()
    }

    /// Copy of this state with one question/answer exchange appended.
    pub fn with_exchange(&self, question: &str, answer: &str, summary: String) -> Self {
        let mut turns = self.turns.clone();
        turns.push(Turn {
            role: Role::User,
            content: question.to_string(),
        });
        turns.push(Turn {
            role: Role::Assistant,
            content: answer.to_string(),
        });
        Self { turns, summary }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_labels() {
        assert_eq!(Classification::PlainText.as_str(), "text");
        assert_eq!(Classification::Language("rust".into()).as_str(), "rust");
        assert_eq!(
            Classification::from_label("python"),
            Classification::Language("python".into())
        );
        assert_eq!(Classification::from_label("text"), Classification::PlainText);
    }

    #[test]
    fn test_with_exchange_leaves_original_untouched() {
        let state = ConversationState::new();
        let next = state.with_exchange("q", "a", "summary".into());
        assert!(state.is_empty());
        assert_eq!(next.turns.len(), 2);
        assert_eq!(next.turns[0].role, Role::User);
        assert_eq!(next.turns[1].content, "a");
        assert_eq!(next.summary, "summary");
    }
}
