//! Index building and querying.
//!
//! [`Indexer::build`] embeds every chunk in batches and only then swaps the
//! whole set into the [`VectorStore`] with
//! [`replace_all`](VectorStore::replace_all). Every build is a full rebuild.
//! If anything fails the store is cleared, so no half-built index remains.
//!
//! [`Index::query`] embeds the question, takes the `fetch_k` nearest chunks
//! and narrows them to `k` with maximal marginal relevance.

use std::sync::Arc;

use anyhow::Result;

use crate::config::RetrievalConfig;
use crate::embedding::Embedder;
use crate::error::OracleError;
use crate::mmr;
use crate::models::{Chunk, IndexMetadata, RetrievedChunk};
use crate::progress::{PipelineEvent, ProgressReporter};
use crate::store::VectorStore;

pub struct Indexer {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    batch_size: usize,
    retrieval: RetrievalConfig,
}

impl Indexer {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        batch_size: usize,
        retrieval: RetrievalConfig,
    ) -> Self {
        Self {
            embedder,
            store,
            batch_size: batch_size.max(1),
            retrieval,
        }
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    /// Build the index for one workspace generation.
    pub async fn build(
        &self,
        generation: u64,
        source_url: &str,
        chunks: &[Chunk],
        progress: &dyn ProgressReporter,
    ) -> Result<Index, OracleError> {
        match self.try_build(generation, source_url, chunks, progress).await {
            Ok(metadata) => Ok(Index {
                store: self.store.clone(),
                embedder: self.embedder.clone(),
                retrieval: self.retrieval.clone(),
                metadata,
            }),
            Err(e) => {
                if let Err(clear_err) = self.store.clear().await {
                    tracing::warn!(error = %clear_err, "failed to clear index after failed build");
                }
                Err(OracleError::Indexing(format!("{:#}", e)))
            }
        }
    }

    async fn try_build(
        &self,
        generation: u64,
        source_url: &str,
        chunks: &[Chunk],
        progress: &dyn ProgressReporter,
    ) -> Result<IndexMetadata> {
        if chunks.is_empty() {
            anyhow::bail!("no chunks to index");
        }

        let total = chunks.len() as u64;
        let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(chunks.len());

        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let batch_vectors = self.embedder.embed(&texts).await?;
            if batch_vectors.len() != batch.len() {
                anyhow::bail!(
                    "embedder returned {} vectors for {} chunks",
                    batch_vectors.len(),
                    batch.len()
                );
            }
            vectors.extend(batch_vectors);
            progress.report(PipelineEvent::Embedding {
                n: vectors.len() as u64,
                total,
            });
        }

        let metadata = IndexMetadata {
            generation,
            source_url: source_url.to_string(),
            chunk_count: chunks.len(),
            embedding_model: self.embedder.model_name().to_string(),
            built_at: chrono::Utc::now(),
        };
        self.store.replace_all(chunks, &vectors, &metadata).await?;

        tracing::info!(
            generation,
            chunks = chunks.len(),
            model = %metadata.embedding_model,
            "index built"
        );
        Ok(metadata)
    }
}

/// A queryable index for one generation.
pub struct Index {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    retrieval: RetrievalConfig,
    metadata: IndexMetadata,
}

impl Index {
    pub fn metadata(&self) -> &IndexMetadata {
        &self.metadata
    }

    /// The `k` most relevant, mutually diverse chunks for `text`.
    pub async fn query(&self, text: &str, k: usize) -> Result<Vec<RetrievedChunk>> {
        let query_vec = self.embedder.embed_query(text).await?;
        let fetch_k = self.retrieval.fetch_k.max(k);
        let candidates = self.store.search(&query_vec, fetch_k).await?;

        let picked = mmr::select(&candidates, k, self.retrieval.lambda);
        Ok(picked
            .into_iter()
            .map(|i| RetrievedChunk {
                chunk: candidates[i].chunk.clone(),
                score: candidates[i].score,
            })
            .collect())
    }

    /// [`query`](Self::query) with the configured `k`.
    pub async fn retrieve(&self, text: &str) -> Result<Vec<RetrievedChunk>> {
        self.query(text, self.retrieval.k).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Classification;
    use crate::progress::NoProgress;
    use crate::store::InMemoryVectorStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Bag-of-letters vectors; fails on the call numbered `fail_on`.
    struct LetterEmbedder {
        calls: AtomicUsize,
        fail_on: Option<usize>,
    }

    impl LetterEmbedder {
        fn new(fail_on: Option<usize>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_on,
            }
        }
    }

    fn letters(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; 26];
        for c in text.to_lowercase().chars() {
            if c.is_ascii_lowercase() {
                v[(c as u8 - b'a') as usize] += 1.0;
            }
        }
        v
    }

    #[async_trait]
    impl Embedder for LetterEmbedder {
        fn model_name(&self) -> &str {
            "letters"
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if Some(n) == self.fail_on {
                anyhow::bail!("Gemini API error 429 Too Many Requests: quota exceeded");
            }
            Ok(texts.iter().map(|t| letters(t)).collect())
        }
    }

    fn chunk(id: &str, source: &str, text: &str) -> Chunk {
        Chunk {
            id: id.to_string(),
            text: text.to_string(),
            source: source.to_string(),
            classification: Classification::PlainText,
            chunk_index: 0,
            start_offset: 0,
            hash: id.to_string(),
        }
    }

    fn indexer(embedder: LetterEmbedder, store: Arc<InMemoryVectorStore>) -> Indexer {
        Indexer::new(Arc::new(embedder), store, 2, RetrievalConfig::default())
    }

    #[tokio::test]
    async fn test_build_and_query() {
        let store = Arc::new(InMemoryVectorStore::new());
        let idx = indexer(LetterEmbedder::new(None), store.clone());
        let chunks = vec![
            chunk("1", "zebra.md", "zzz zebra zone"),
            chunk("2", "apple.md", "apple pie"),
            chunk("3", "misc.md", "quick brown fox"),
        ];

        let index = idx
            .build(1, "https://example.com/z.git", &chunks, &NoProgress)
            .await
            .unwrap();
        assert_eq!(index.metadata().chunk_count, 3);
        assert_eq!(index.metadata().embedding_model, "letters");
        assert_eq!(store.count().await.unwrap(), 3);

        let hits = index.query("zebra zz", 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.source, "zebra.md");
    }

    #[tokio::test]
    async fn test_failed_build_leaves_store_empty() {
        let store = Arc::new(InMemoryVectorStore::new());

        let ok = indexer(LetterEmbedder::new(None), store.clone());
        ok.build(1, "u1", &[chunk("1", "old.md", "old")], &NoProgress)
            .await
            .unwrap();

        // Second batch of the next build fails.
        let failing = indexer(LetterEmbedder::new(Some(1)), store.clone());
        let chunks = vec![
            chunk("a", "a.md", "a"),
            chunk("b", "b.md", "b"),
            chunk("c", "c.md", "c"),
        ];
        let err = failing
            .build(2, "u2", &chunks, &NoProgress)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, OracleError::Indexing(_)));
        assert!(err.to_string().contains("quota"));
        assert_eq!(store.count().await.unwrap(), 0);
        assert!(store.metadata().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_chunks_rejected() {
        let store = Arc::new(InMemoryVectorStore::new());
        let idx = indexer(LetterEmbedder::new(None), store);
        let err = idx.build(1, "u", &[], &NoProgress).await.err().unwrap();
        assert!(matches!(err, OracleError::Indexing(_)));
    }

    #[tokio::test]
    async fn test_query_returns_at_most_k_distinct() {
        let store = Arc::new(InMemoryVectorStore::new());
        let idx = indexer(LetterEmbedder::new(None), store);
        let chunks: Vec<Chunk> = (0..12)
            .map(|i| chunk(&i.to_string(), &format!("f{}.md", i), &"ab".repeat(i + 1)))
            .collect();
        let index = idx.build(1, "u", &chunks, &NoProgress).await.unwrap();

        let hits = index.retrieve("abab").await.unwrap();
        assert_eq!(hits.len(), 8);
        let mut ids: Vec<&str> = hits.iter().map(|h| h.chunk.id.as_str()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 8);
    }
}
