//! Vector store abstraction.
//!
//! The [`VectorStore`] trait covers what the indexer and the answering
//! engine need from storage: replace everything with a new generation,
//! search by vector, and tear the storage down. Two backends:
//!
//! | Backend | Use |
//! |---------|-----|
//! | [`SqliteVectorStore`] | durable index at `[index].path` |
//! | [`InMemoryVectorStore`] | tests, and `[index].backend = "memory"` |

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Chunk, IndexMetadata};

pub use memory::InMemoryVectorStore;
pub use sqlite::SqliteVectorStore;

/// A stored chunk together with its vector and similarity to the query.
#[derive(Debug, Clone)]
pub struct VectorMatch {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
    pub score: f32,
}

/// Storage for the chunks and vectors of exactly one index generation.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`replace_all`](VectorStore::replace_all) | atomically swap in a new generation |
/// | [`search`](VectorStore::search) | nearest chunks by cosine similarity |
/// | [`metadata`](VectorStore::metadata) | bookkeeping of the current generation |
/// | [`count`](VectorStore::count) | number of stored chunks |
/// | [`sources`](VectorStore::sources) | distinct source paths |
/// | [`clear`](VectorStore::clear) | drop all rows, keep the storage |
/// | [`destroy`](VectorStore::destroy) | remove the storage itself |
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Delete every stored row, then insert `chunks` with `vectors` and
    /// `metadata`, as one unit. Readers never see a mix of generations.
    async fn replace_all(
        &self,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
        metadata: &IndexMetadata,
    ) -> Result<()>;

    /// Up to `limit` chunks, most similar first.
    async fn search(&self, query: &[f32], limit: usize) -> Result<Vec<VectorMatch>>;

    async fn metadata(&self) -> Result<Option<IndexMetadata>>;

    async fn count(&self) -> Result<usize>;

    async fn sources(&self) -> Result<Vec<String>>;

    async fn clear(&self) -> Result<()>;

    /// Remove the backing storage. The store may be used again afterwards
    /// and recreates its storage on demand.
    async fn destroy(&self) -> Result<()>;
}

/// Sort matches by descending score and keep the first `limit`.
pub(crate) fn rank(mut matches: Vec<VectorMatch>, limit: usize) -> Vec<VectorMatch> {
    matches.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    matches.truncate(limit);
    matches
}

pub(crate) fn check_lengths(chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<()> {
    if chunks.len() != vectors.len() {
        anyhow::bail!(
            "chunk/vector count mismatch: {} chunks, {} vectors",
            chunks.len(),
            vectors.len()
        );
    }
    Ok(())
}
