//! SQLite-backed [`VectorStore`].
//!
//! One database file at `[index].path`, opened lazily in WAL mode. Vectors
//! are stored as little-endian `f32` BLOBs next to their chunk rows and
//! searched brute-force. [`destroy`](VectorStore::destroy) closes the pool
//! and deletes the database together with its `-wal` and `-shm` files; the
//! next write opens a fresh database.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::TimeZone;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::sync::Mutex;

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::models::{Chunk, Classification, IndexMetadata};

use super::{check_lengths, rank, VectorMatch, VectorStore};

pub struct SqliteVectorStore {
    path: PathBuf,
    pool: Mutex<Option<SqlitePool>>,
}

impl SqliteVectorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            pool: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The open pool, connecting and creating the schema on first use.
    async fn pool(&self) -> Result<SqlitePool> {
        let mut guard = self.pool.lock().await;
        if let Some(pool) = guard.as_ref() {
            return Ok(pool.clone());
        }
        let pool = connect(&self.path).await?;
        run_migrations(&pool).await?;
        *guard = Some(pool.clone());
        Ok(pool)
    }

    /// Pool only if the database already exists; never creates a file.
    async fn existing_pool(&self) -> Result<Option<SqlitePool>> {
        if self.pool.lock().await.is_none() && !self.path.exists() {
            return Ok(None);
        }
        self.pool().await.map(Some)
    }
}

async fn connect(path: &Path) -> Result<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create index directory: {}", parent.display())
            })?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}

async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            source TEXT NOT NULL,
            classification TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            start_offset INTEGER NOT NULL,
            text TEXT NOT NULL,
            hash TEXT NOT NULL,
            embedding BLOB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_meta (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            generation INTEGER NOT NULL,
            source_url TEXT NOT NULL,
            chunk_count INTEGER NOT NULL,
            embedding_model TEXT NOT NULL,
            built_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_source ON chunks(source)")
        .execute(pool)
        .await?;

    Ok(())
}

fn row_to_chunk(row: &sqlx::sqlite::SqliteRow) -> Chunk {
    let classification: String = row.get("classification");
    let chunk_index: i64 = row.get("chunk_index");
    let start_offset: i64 = row.get("start_offset");
    Chunk {
        id: row.get("id"),
        text: row.get("text"),
        source: row.get("source"),
        classification: Classification::from_label(&classification),
        chunk_index,
        start_offset: start_offset as usize,
        hash: row.get("hash"),
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn replace_all(
        &self,
        chunks: &[Chunk],
        vectors: &[Vec<f32>],
        metadata: &IndexMetadata,
    ) -> Result<()> {
        check_lengths(chunks, vectors)?;
        let pool = self.pool().await?;
        let mut tx = pool.begin().await?;

        sqlx::query("DELETE FROM chunks").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM index_meta").execute(&mut *tx).await?;

        for (chunk, vector) in chunks.iter().zip(vectors) {
            sqlx::query(
                r#"
                INSERT INTO chunks (id, source, classification, chunk_index, start_offset,
                                    text, hash, embedding)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.source)
            .bind(chunk.classification.as_str())
            .bind(chunk.chunk_index)
            .bind(chunk.start_offset as i64)
            .bind(&chunk.text)
            .bind(&chunk.hash)
            .bind(vec_to_blob(vector))
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO index_meta (id, generation, source_url, chunk_count, embedding_model, built_at)
            VALUES (1, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(metadata.generation as i64)
        .bind(&metadata.source_url)
        .bind(metadata.chunk_count as i64)
        .bind(&metadata.embedding_model)
        .bind(metadata.built_at.timestamp())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn search(&self, query: &[f32], limit: usize) -> Result<Vec<VectorMatch>> {
        let pool = match self.existing_pool().await? {
            Some(pool) => pool,
            None => return Ok(Vec::new()),
        };

        let rows = sqlx::query(
            r#"
            SELECT id, source, classification, chunk_index, start_offset, text, hash, embedding
            FROM chunks
            "#,
        )
        .fetch_all(&pool)
        .await?;

        let matches = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let vector = blob_to_vec(&blob);
                let score = cosine_similarity(query, &vector);
                VectorMatch {
                    chunk: row_to_chunk(row),
                    vector,
                    score,
                }
            })
            .collect();

        Ok(rank(matches, limit))
    }

    async fn metadata(&self) -> Result<Option<IndexMetadata>> {
        let pool = match self.existing_pool().await? {
            Some(pool) => pool,
            None => return Ok(None),
        };

        let row = sqlx::query(
            "SELECT generation, source_url, chunk_count, embedding_model, built_at FROM index_meta WHERE id = 1",
        )
        .fetch_optional(&pool)
        .await?;

        Ok(row.map(|row| {
            let generation: i64 = row.get("generation");
            let chunk_count: i64 = row.get("chunk_count");
            let built_at: i64 = row.get("built_at");
            IndexMetadata {
                generation: generation as u64,
                source_url: row.get("source_url"),
                chunk_count: chunk_count as usize,
                embedding_model: row.get("embedding_model"),
                built_at: chrono::Utc
                    .timestamp_opt(built_at, 0)
                    .single()
                    .unwrap_or_else(chrono::Utc::now),
            }
        }))
    }

    async fn count(&self) -> Result<usize> {
        let pool = match self.existing_pool().await? {
            Some(pool) => pool,
            None => return Ok(0),
        };
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&pool)
            .await?;
        Ok(n as usize)
    }

    async fn sources(&self) -> Result<Vec<String>> {
        let pool = match self.existing_pool().await? {
            Some(pool) => pool,
            None => return Ok(Vec::new()),
        };
        let sources: Vec<String> =
            sqlx::query_scalar("SELECT DISTINCT source FROM chunks ORDER BY source")
                .fetch_all(&pool)
                .await?;
        Ok(sources)
    }

    async fn clear(&self) -> Result<()> {
        let pool = match self.existing_pool().await? {
            Some(pool) => pool,
            None => return Ok(()),
        };
        let mut tx = pool.begin().await?;
        sqlx::query("DELETE FROM chunks").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM index_meta").execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        if let Some(pool) = self.pool.lock().await.take() {
            pool.close().await;
        }

        for suffix in ["", "-wal", "-shm"] {
            let mut name = self.path.as_os_str().to_owned();
            name.push(suffix);
            let file = PathBuf::from(name);
            match std::fs::remove_file(&file) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(anyhow::Error::new(e)
                        .context(format!("Failed to remove {}", file.display())))
                }
            }
        }

        // The index directory is created on open; drop it once it is empty.
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            let empty = match std::fs::read_dir(dir) {
                Ok(mut entries) => entries.next().is_none(),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
                Err(e) => {
                    return Err(anyhow::Error::new(e)
                        .context(format!("Failed to read {}", dir.display())))
                }
            };
            if empty {
                std::fs::remove_dir(dir)
                    .with_context(|| format!("Failed to remove {}", dir.display()))?;
            }
        }
        Ok(())
    }
}
