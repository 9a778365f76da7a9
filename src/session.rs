//! Session orchestrator.
//!
//! A [`Session`] owns the one managed workspace, the one index and the one
//! conversation. It moves between three states:
//!
//! ```text
//!            process_repository            ok
//!   Empty ─────────────────────▶ Processing ───▶ Ready
//!     ▲                              │             │
//!     └──────── failure / clear() ───┴─────────────┘
//! ```
//!
//! Processing runs acquire → load → chunk → build index → select model
//! sequentially. Any failure tears down both the workspace and the index
//! storage before returning, so a failed attempt never leaves a stale index
//! answering questions.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::answer::{AnswerOutcome, AnsweringEngine};
use crate::chunk;
use crate::config::Config;
use crate::embedding::{create_embedder, Embedder};
use crate::error::OracleError;
use crate::index::{Index, Indexer};
use crate::llm::{select_model, ChatModelFactory, HttpChatModelFactory};
use crate::loader::{DocumentLoader, LoadReport};
use crate::models::{ConversationState, Turn, Workspace};
use crate::policy::ExtensionPolicy;
use crate::progress::{PipelineEvent, ProgressReporter};
use crate::store::{InMemoryVectorStore, SqliteVectorStore, VectorStore};
use crate::workspace::{GitCli, SourceControl, WorkspaceManager};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Empty,
    Processing,
    Ready,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Empty => "empty",
            SessionState::Processing => "processing",
            SessionState::Ready => "ready",
        }
    }
}

/// Result of a successful `process_repository`.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub url: String,
    pub generation: u64,
    pub documents: usize,
    pub chunks: usize,
    pub model: String,
    pub embedding_model: String,
    pub load: LoadReport,
    /// Non-fatal problems, e.g. a previous workspace that could not be removed.
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub state: SessionState,
    pub repository: Option<String>,
    pub generation: u64,
    pub documents: usize,
    pub chunks: usize,
    pub model: Option<String>,
    pub turns: usize,
    pub api_key_present: bool,
    pub api_key_env: String,
    pub workspace_present: bool,
}

struct Mounted {
    workspace: Workspace,
    index: Index,
    engine: AnsweringEngine,
    report: IngestReport,
}

pub struct Session {
    config: Config,
    workspace: WorkspaceManager,
    loader: DocumentLoader,
    indexer: Indexer,
    factory: Arc<dyn ChatModelFactory>,
    progress: Box<dyn ProgressReporter>,
    state: SessionState,
    generation: u64,
    mounted: Option<Mounted>,
    conversation: ConversationState,
}

impl Session {
    pub fn new(
        config: Config,
        scm: Arc<dyn SourceControl>,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        factory: Arc<dyn ChatModelFactory>,
        progress: Box<dyn ProgressReporter>,
    ) -> Result<Self> {
        let workspace = WorkspaceManager::new(&config.workspace, scm);
        let loader = DocumentLoader::new(&config.loader, ExtensionPolicy::default())?;
        let indexer = Indexer::new(
            embedder,
            store,
            config.embedding.batch_size,
            config.retrieval.clone(),
        );

        Ok(Self {
            config,
            workspace,
            loader,
            indexer,
            factory,
            progress,
            state: SessionState::Empty,
            generation: 0,
            mounted: None,
            conversation: ConversationState::new(),
        })
    }

    /// Session with the `git` CLI, the configured providers and index backend.
    ///
    /// A missing credential does not fail construction; processing reports
    /// it when the first embedding request is made.
    pub fn from_config(config: Config, progress: Box<dyn ProgressReporter>) -> Result<Self> {
        let embedder: Arc<dyn Embedder> = match create_embedder(&config) {
            Ok(embedder) => Arc::from(embedder),
            Err(e) => {
                tracing::warn!(error = %e, "embedding provider unavailable");
                Arc::new(UnavailableEmbedder {
                    model: config.embedding.model.clone(),
                    reason: format!("{:#}", e),
                })
            }
        };

        let store: Arc<dyn VectorStore> = match config.index.backend.as_str() {
            "memory" => Arc::new(InMemoryVectorStore::new()),
            _ => Arc::new(SqliteVectorStore::new(config.index.path.clone())),
        };

        let factory = Arc::new(HttpChatModelFactory::new(&config)?);

        Self::new(config, Arc::new(GitCli), embedder, store, factory, progress)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn workspace_root(&self) -> &Path {
        self.workspace.root()
    }

    pub fn current_repository(&self) -> Option<&str> {
        self.mounted.as_ref().map(|m| m.workspace.source_url.as_str())
    }

    /// Clone, load, chunk and index `url`, then bind a generative model.
    pub async fn process_repository(&mut self, url: &str) -> Result<IngestReport, OracleError> {
        self.conversation = ConversationState::new();
        self.mounted = None;
        self.state = SessionState::Processing;

        let generation = self.generation + 1;
        match self.run_pipeline(url, generation).await {
            Ok(mounted) => {
                let report = mounted.report.clone();
                self.generation = generation;
                self.mounted = Some(mounted);
                self.state = SessionState::Ready;
                self.progress.report(PipelineEvent::Ready {
                    model: report.model.clone(),
                });
                tracing::info!(
                    url = %report.url,
                    generation,
                    documents = report.documents,
                    chunks = report.chunks,
                    model = %report.model,
                    "repository ready"
                );
                Ok(report)
            }
            Err(e) => {
                tracing::warn!(url, code = e.code(), error = %e, "processing failed, cleaning up");
                if let Err(cleanup) = self.teardown().await {
                    tracing::warn!(error = %cleanup, "cleanup after failed processing was incomplete");
                }
                self.state = SessionState::Empty;
                Err(e)
            }
        }
    }

    async fn run_pipeline(&self, url: &str, generation: u64) -> Result<Mounted, OracleError> {
        self.progress.report(PipelineEvent::Acquiring {
            url: url.trim().to_string(),
        });
        let workspace = self.workspace.acquire(url, generation).await?;

        self.progress.report(PipelineEvent::Loading);
        let loaded = self.loader.load(&workspace.root)?;
        self.progress.report(PipelineEvent::Loaded {
            documents: loaded.documents.len() as u64,
        });

        let chunks = chunk::split(&loaded.documents, &self.config.chunking);
        if chunks.is_empty() {
            return Err(OracleError::Load(
                "supported files contain no indexable text".to_string(),
            ));
        }
        self.progress.report(PipelineEvent::Chunked {
            chunks: chunks.len() as u64,
        });

        let index = self
            .indexer
            .build(generation, &workspace.source_url, &chunks, &*self.progress)
            .await?;

        self.progress.report(PipelineEvent::SelectingModel);
        let model = select_model(self.factory.as_ref(), &self.config.llm.candidate_models).await?;

        let report = IngestReport {
            url: workspace.source_url.clone(),
            generation,
            documents: loaded.documents.len(),
            chunks: chunks.len(),
            model: model.model_id().to_string(),
            embedding_model: index.metadata().embedding_model.clone(),
            load: loaded.report,
            warnings: workspace.warnings.clone(),
        };

        Ok(Mounted {
            workspace,
            index,
            engine: AnsweringEngine::new(model, self.config.retrieval.k),
            report,
        })
    }

    /// Answer `question` against the mounted repository.
    pub async fn ask_question(&mut self, question: &str) -> Result<AnswerOutcome, OracleError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(OracleError::InvalidInput(
                "question must not be empty".to_string(),
            ));
        }
        let mounted = match (&self.state, &self.mounted) {
            (SessionState::Ready, Some(mounted)) => mounted,
            _ => return Err(OracleError::NotReady),
        };

        let outcome = mounted
            .engine
            .answer(&mounted.index, &self.conversation, question)
            .await?;
        self.conversation = outcome.state.clone();
        Ok(outcome)
    }

    /// Remove workspace and index storage and forget the conversation.
    ///
    /// Always ends in `Empty`. Safe to call in any state, any number of times.
    pub async fn clear(&mut self) -> Result<()> {
        self.mounted = None;
        let result = self.teardown().await;
        self.state = SessionState::Empty;
        tracing::info!("session cleared");
        result
    }

    async fn teardown(&mut self) -> Result<()> {
        self.conversation = ConversationState::new();

        let workspace = self.workspace.release().await;
        if let Err(e) = &workspace {
            tracing::warn!(root = %self.workspace.root().display(), error = %e, "failed to remove workspace");
        }
        let index = self.indexer.store().destroy().await;
        if let Err(e) = &index {
            tracing::warn!(error = %e, "failed to remove index storage");
        }
        workspace.and(index)
    }

    pub fn status(&self) -> SessionStatus {
        let report = self.mounted.as_ref().map(|m| &m.report);
        SessionStatus {
            state: self.state,
            repository: report.map(|r| r.url.clone()),
            generation: self.generation,
            documents: report.map(|r| r.documents).unwrap_or(0),
            chunks: report.map(|r| r.chunks).unwrap_or(0),
            model: self.mounted.as_ref().map(|m| m.engine.model_id().to_string()),
            turns: self.conversation.turns.len(),
            api_key_present: self.config.has_api_key(),
            api_key_env: self.config.llm.api_key_env.clone(),
            workspace_present: self.workspace.is_present(),
        }
    }

    pub fn history(&self) -> &[Turn] {
        &self.conversation.turns
    }

    pub fn summary(&self) -> &str {
        &self.conversation.summary
    }
}

/// Stands in for a provider that could not be configured.
struct UnavailableEmbedder {
    model: String,
    reason: String,
}

#[async_trait]
impl Embedder for UnavailableEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        anyhow::bail!("embedding provider unavailable: {}", self.reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedFactory;
    use crate::progress::NoProgress;
    use tempfile::TempDir;

    struct OneFileScm;

    #[async_trait]
    impl SourceControl for OneFileScm {
        async fn clone_repo(&self, _url: &str, dest: &Path) -> Result<()> {
            std::fs::write(dest.join("README.md"), "# Hello\n\nA tiny project.\n")?;
            Ok(())
        }
    }

    struct ConstEmbedder;

    #[async_trait]
    impl Embedder for ConstEmbedder {
        fn model_name(&self) -> &str {
            "const"
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    fn session(tmp: &TempDir, embedder: Arc<dyn Embedder>, broken: &[&str]) -> Session {
        let mut config = Config::minimal();
        config.workspace.root = tmp.path().join("repo");
        config.workspace.remove_backoff_ms = 1;
        config.llm.candidate_models = vec!["m1".into(), "m2".into()];
        Session::new(
            config,
            Arc::new(OneFileScm),
            embedder,
            Arc::new(InMemoryVectorStore::new()),
            Arc::new(ScriptedFactory::new(broken)),
            Box::new(NoProgress),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_process_then_ask() {
        let tmp = TempDir::new().unwrap();
        let mut s = session(&tmp, Arc::new(ConstEmbedder), &["m1"]);

        let report = s.process_repository("https://example.com/a.git").await.unwrap();
        assert_eq!(report.generation, 1);
        assert_eq!(report.documents, 1);
        assert_eq!(report.model, "m2");
        assert_eq!(s.state(), SessionState::Ready);

        let outcome = s.ask_question("What is this?").await.unwrap();
        assert_eq!(outcome.sources, vec!["README.md".to_string()]);
        assert_eq!(s.history().len(), 2);
        assert_eq!(s.status().turns, 2);
    }

    #[tokio::test]
    async fn test_ask_before_processing() {
        let tmp = TempDir::new().unwrap();
        let mut s = session(&tmp, Arc::new(ConstEmbedder), &[]);
        assert!(matches!(
            s.ask_question("hi").await.err().unwrap(),
            OracleError::NotReady
        ));
        assert!(matches!(
            s.ask_question("   ").await.err().unwrap(),
            OracleError::InvalidInput(_)
        ));
    }

    #[tokio::test]
    async fn test_embedding_failure_cleans_up() {
        let tmp = TempDir::new().unwrap();
        let embedder = Arc::new(UnavailableEmbedder {
            model: "x".into(),
            reason: "GOOGLE_API_KEY environment variable not set".into(),
        });
        let mut s = session(&tmp, embedder, &[]);

        let err = s
            .process_repository("https://example.com/a.git")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, OracleError::Indexing(_)));
        assert!(err.to_string().contains("GOOGLE_API_KEY"));
        assert_eq!(s.state(), SessionState::Empty);
        assert!(!tmp.path().join("repo").exists());
        assert_eq!(s.status().generation, 0);
    }

    #[tokio::test]
    async fn test_reprocess_resets_conversation() {
        let tmp = TempDir::new().unwrap();
        let mut s = session(&tmp, Arc::new(ConstEmbedder), &[]);
        s.process_repository("https://example.com/a.git").await.unwrap();
        s.ask_question("q").await.unwrap();

        let report = s.process_repository("https://example.com/b.git").await.unwrap();
        assert_eq!(report.generation, 2);
        assert!(s.history().is_empty());
        assert!(s.summary().is_empty());
        assert_eq!(s.current_repository(), Some("https://example.com/b.git"));
    }

    #[tokio::test]
    async fn test_clear_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let mut s = session(&tmp, Arc::new(ConstEmbedder), &[]);
        s.process_repository("https://example.com/a.git").await.unwrap();

        s.clear().await.unwrap();
        assert_eq!(s.state(), SessionState::Empty);
        assert!(!tmp.path().join("repo").exists());
        s.clear().await.unwrap();
        assert_eq!(s.status().state, SessionState::Empty);
        assert!(s.status().repository.is_none());
    }
}
