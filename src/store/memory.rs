//! In-memory [`VectorStore`] for tests and throwaway sessions.
//!
//! Everything lives behind one `std::sync::RwLock`. Search is brute-force
//! cosine similarity over all stored vectors.

use std::collections::BTreeSet;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::{Chunk, IndexMetadata};

use super::{check_lengths, rank, VectorMatch, VectorStore};

#[derive(Default)]
struct Contents {
    rows: Vec<(Chunk, Vec<f32>)>,
    metadata: Option<IndexMetadata>,
}

#[derive(Default)]
pub struct InMemoryVectorStore {
    inner: RwLock<Contents>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow::anyhow!("in-memory store lock poisoned")
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn replace_all(
        &self,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
        metadata: &IndexMetadata,
    ) -> Result<()> {
        check_lengths(chunks, vectors)?;
        let rows = chunks.iter().cloned().zip(vectors.iter().cloned()).collect();

        let mut inner = self.inner.write().map_err(poisoned)?;
        inner.rows = rows;
        inner.metadata = Some(metadata.clone());
        Ok(())
    }

    async fn search(&self, query: &[f32], limit: usize) -> Result<Vec<VectorMatch>> {
        let inner = self.inner.read().map_err(poisoned)?;
        let matches = inner
            .rows
            .iter()
            .map(|(chunk, vector)| VectorMatch {
                chunk: chunk.clone(),
                vector: vector.clone(),
                score: cosine_similarity(query, vector),
            })
            .collect();
        Ok(rank(matches, limit))
    }

    async fn metadata(&self) -> Result<Option<IndexMetadata>> {
        Ok(self.inner.read().map_err(poisoned)?.metadata.clone())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.inner.read().map_err(poisoned)?.rows.len())
    }

    async fn sources(&self) -> Result<Vec<String>> {
        let inner = self.inner.read().map_err(poisoned)?;
        let set: BTreeSet<String> = inner.rows.iter().map(|(c, _)| c.source.clone()).collect();
        Ok(set.into_iter().collect())
    }

    async fn clear(&self) -> Result<()> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        inner.rows.clear();
        inner.metadata = None;
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        self.clear().await
    }
}
