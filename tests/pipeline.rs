//! End-to-end pipeline tests with fake collaborators.
//!
//! Source control, embeddings and the chat model are replaced by
//! deterministic fakes; everything else (workspace handling, loading,
//! chunking, storage, MMR retrieval, session state) is the real code.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tempfile::TempDir;

use code_oracle::config::Config;
use code_oracle::embedding::Embedder;
use code_oracle::error::OracleError;
use code_oracle::llm::{ChatModel, ChatModelFactory};
use code_oracle::progress::NoProgress;
use code_oracle::server::{router, AppState};
use code_oracle::session::{Session, SessionState};
use code_oracle::store::{InMemoryVectorStore, SqliteVectorStore, VectorStore};
use code_oracle::workspace::SourceControl;

// ============ Fakes ============

/// Writes a small repository whose contents depend on the URL.
struct FakeScm;

#[async_trait]
impl SourceControl for FakeScm {
    async fn clone_repo(&self, url: &str, dest: &Path) -> Result<()> {
        if url.contains("missing") {
            anyhow::bail!("git clone failed: repository not found");
        }
        std::fs::write(dest.join("build.bin"), [0u8, 159, 146, 150])?;
        if url.contains("binary-only") {
            return Ok(());
        }
        if url.contains("second") {
            std::fs::create_dir_all(dest.join("lib"))?;
            std::fs::write(
                dest.join("lib/parser.rb"),
                "class Parser\n  def parse(input)\n    input.split\n  end\nend\n",
            )?;
            return Ok(());
        }
        std::fs::write(
            dest.join("main.py"),
            "def fibonacci(n):\n    if n < 2:\n        return n\n    return fibonacci(n - 1) + fibonacci(n - 2)\n",
        )?;
        std::fs::write(
            dest.join("README.md"),
            "# Demo\n\nThis project computes fibonacci numbers.\n",
        )?;
        Ok(())
    }
}

/// Hashed bag-of-words vectors.
struct HashEmbedder;

fn hashed(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; 64];
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let mut h = DefaultHasher::new();
        word.to_lowercase().hash(&mut h);
        v[(h.finish() % 64) as usize] += 1.0;
    }
    v
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash-64"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| hashed(t)).collect())
    }
}

struct EchoModel {
    id: String,
    broken: bool,
}

#[async_trait]
impl ChatModel for EchoModel {
    fn model_id(&self) -> &str {
        &self.id
    }

    async fn invoke(&self, prompt: &str) -> Result<String> {
        if self.broken {
            anyhow::bail!("Gemini API error 404 Not Found: models/{} is not found", self.id);
        }
        if prompt.starts_with("Progressively summarize") {
            return Ok("The user is asking about fibonacci.".to_string());
        }
        Ok(format!("answer from {}", self.id))
    }
}

struct EchoFactory {
    broken: HashSet<String>,
}

impl EchoFactory {
    fn new(broken: &[&str]) -> Self {
        Self {
            broken: broken.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl ChatModelFactory for EchoFactory {
    fn create(&self, model_id: &str) -> Result<Arc<dyn ChatModel>> {
        Ok(Arc::new(EchoModel {
            id: model_id.to_string(),
            broken: self.broken.contains(model_id),
        }))
    }
}

fn config(tmp: &TempDir) -> Config {
    let mut config = Config::minimal();
    config.workspace.root = tmp.path().join("repo");
    config.workspace.remove_backoff_ms = 1;
    config.index.path = tmp.path().join("db").join("index.sqlite");
    config.llm.candidate_models = vec!["gemini-1.5-pro".into(), "gemini-1.5-flash".into()];
    config
}

fn session_with(
    tmp: &TempDir,
    store: Arc<dyn VectorStore>,
    broken: &[&str],
) -> Session {
    Session::new(
        config(tmp),
        Arc::new(FakeScm),
        Arc::new(HashEmbedder),
        store,
        Arc::new(EchoFactory::new(broken)),
        Box::new(NoProgress),
    )
    .unwrap()
}

// ============ Session pipeline ============

#[tokio::test]
async fn test_process_excludes_unsupported_files() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(InMemoryVectorStore::new());
    let mut session = session_with(&tmp, store.clone(), &[]);

    let report = session
        .process_repository("https://example.com/demo.git")
        .await
        .unwrap();

    assert_eq!(session.state(), SessionState::Ready);
    assert_eq!(report.documents, 2);
    assert_eq!(report.load.files_loaded, 2);
    assert_eq!(report.load.excluded, 1);
    assert_eq!(report.model, "gemini-1.5-pro");
    assert_eq!(report.embedding_model, "hash-64");
    assert_eq!(
        store.sources().await.unwrap(),
        vec!["README.md".to_string(), "main.py".to_string()]
    );
}

#[tokio::test]
async fn test_questions_accumulate_history() {
    let tmp = TempDir::new().unwrap();
    let mut session = session_with(&tmp, Arc::new(InMemoryVectorStore::new()), &["gemini-1.5-pro"]);
    session
        .process_repository("https://example.com/demo.git")
        .await
        .unwrap();

    let first = session.ask_question("How is fibonacci computed?").await.unwrap();
    assert_eq!(first.answer, "answer from gemini-1.5-flash");
    assert!(first.sources.contains(&"main.py".to_string()));
    assert_eq!(session.history().len(), 2);

    session.ask_question("And the README?").await.unwrap();
    assert_eq!(session.history().len(), 4);
    assert_eq!(session.summary(), "The user is asking about fibonacci.");
    assert_eq!(session.status().turns, 4);
}

#[tokio::test]
async fn test_no_model_available_returns_to_empty() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(InMemoryVectorStore::new());
    let mut session = session_with(&tmp, store.clone(), &["gemini-1.5-pro", "gemini-1.5-flash"]);

    let err = session
        .process_repository("https://example.com/demo.git")
        .await
        .err()
        .unwrap();

    match err {
        OracleError::NoModelAvailable { tried } => assert_eq!(tried.len(), 2),
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(session.state(), SessionState::Empty);
    assert!(!tmp.path().join("repo").exists());
    assert_eq!(store.count().await.unwrap(), 0);
    assert!(matches!(
        session.ask_question("anything?").await.err().unwrap(),
        OracleError::NotReady
    ));
}

#[tokio::test]
async fn test_no_supported_files_is_load_failure() {
    let tmp = TempDir::new().unwrap();
    let mut session = session_with(&tmp, Arc::new(InMemoryVectorStore::new()), &[]);

    let err = session
        .process_repository("https://example.com/binary-only.git")
        .await
        .err()
        .unwrap();

    assert_eq!(err.code(), "load_failure");
    assert_eq!(session.state(), SessionState::Empty);
    assert!(!tmp.path().join("repo").exists());
}

#[tokio::test]
async fn test_clone_failure_is_acquisition_failure() {
    let tmp = TempDir::new().unwrap();
    let mut session = session_with(&tmp, Arc::new(InMemoryVectorStore::new()), &[]);

    let err = session
        .process_repository("https://example.com/missing.git")
        .await
        .err()
        .unwrap();

    assert_eq!(err.code(), "acquisition_failure");
    assert!(err.user_message().contains("repository not found"));
    assert!(!tmp.path().join("repo").exists());
}

#[tokio::test]
async fn test_reprocessing_replaces_previous_index() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(SqliteVectorStore::new(tmp.path().join("db").join("index.sqlite")));
    let mut session = session_with(&tmp, store.clone(), &[]);

    session
        .process_repository("https://example.com/demo.git")
        .await
        .unwrap();
    session.ask_question("How is fibonacci computed?").await.unwrap();

    let report = session
        .process_repository("https://example.com/second.git")
        .await
        .unwrap();

    assert_eq!(report.generation, 2);
    assert!(session.history().is_empty());
    assert_eq!(store.sources().await.unwrap(), vec!["lib/parser.rb".to_string()]);
    assert!(!tmp.path().join("repo").join("main.py").exists());

    let meta = store.metadata().await.unwrap().unwrap();
    assert_eq!(meta.generation, 2);
    assert_eq!(meta.source_url, "https://example.com/second.git");
}

#[tokio::test]
async fn test_clear_removes_all_storage() {
    let tmp = TempDir::new().unwrap();
    let db_path = tmp.path().join("db").join("index.sqlite");
    let store = Arc::new(SqliteVectorStore::new(db_path.clone()));
    let mut session = session_with(&tmp, store, &[]);

    session
        .process_repository("https://example.com/demo.git")
        .await
        .unwrap();
    assert!(db_path.exists());

    session.clear().await.unwrap();
    assert_eq!(session.state(), SessionState::Empty);
    assert!(!db_path.exists());
    assert!(!tmp.path().join("db").exists());
    assert!(!tmp.path().join("repo").exists());
    assert!(session.history().is_empty());

    // Cleared sessions can process again.
    session
        .process_repository("https://example.com/demo.git")
        .await
        .unwrap();
    assert_eq!(session.status().generation, 2);
}

// ============ HTTP API ============

async fn spawn_server(session: Session) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(AppState::new(session));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn test_http_round_trip() {
    let tmp = TempDir::new().unwrap();
    let base = spawn_server(session_with(&tmp, Arc::new(InMemoryVectorStore::new()), &[])).await;
    let client = reqwest::Client::new();

    let health: serde_json::Value = client
        .get(format!("{}/health", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");

    let resp = client
        .post(format!("{}/ask", base))
        .json(&serde_json::json!({ "question": "hello?" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 409);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "not_ready");

    let report: serde_json::Value = client
        .post(format!("{}/repository", base))
        .json(&serde_json::json!({ "url": "https://example.com/demo.git" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(report["documents"], 2);

    let answer: serde_json::Value = client
        .post(format!("{}/ask", base))
        .json(&serde_json::json!({ "question": "How is fibonacci computed?" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(answer["answer"], "answer from gemini-1.5-pro");
    assert_eq!(answer["turns"], 2);

    let status: serde_json::Value = client
        .get(format!("{}/status", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["state"], "ready");
    assert_eq!(status["repository"], "https://example.com/demo.git");

    let cleared: serde_json::Value = client
        .post(format!("{}/clear", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(cleared["status"], "empty");
}

#[tokio::test]
async fn test_http_form_routes() {
    let tmp = TempDir::new().unwrap();
    let base = spawn_server(session_with(&tmp, Arc::new(InMemoryVectorStore::new()), &[])).await;
    let client = reqwest::Client::new();

    let text = client
        .post(format!("{}/chatbot", base))
        .form(&[("question", "https://example.com/demo.git")])
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(text, "Repository processed successfully! Found 2 files.");

    let text = client
        .post(format!("{}/get", base))
        .form(&[("msg", "What is this project?")])
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(text, "answer from gemini-1.5-pro");

    let history: serde_json::Value = client
        .get(format!("{}/history", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(history["turns"].as_array().unwrap().len(), 2);
    assert_eq!(history["turns"][0]["role"], "user");
}
