//! TOML configuration.
//!
//! Every section is optional. A missing config file yields
//! [`Config::minimal`], which matches the behaviour of running with no
//! configuration at all: clone into `./repo`, index into `./db`, Gemini for
//! both embeddings and chat.
//!
//! ```toml
//! [workspace]
//! root = "repo"
//!
//! [index]
//! path = "db/index.sqlite"
//!
//! [chunking]
//! max_chars = 2000
//! overlap_chars = 200
//!
//! [retrieval]
//! k = 8
//! fetch_k = 20
//! lambda = 0.5
//!
//! [embedding]
//! provider = "gemini"
//! model = "models/embedding-001"
//!
//! [llm]
//! provider = "gemini"
//! candidate_models = ["gemini-1.5-pro", "gemini-1.5-flash", "gemini-pro"]
//!
//! [server]
//! bind = "127.0.0.1:8080"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub loader: LoaderConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkspaceConfig {
    /// Managed directory the repository is cloned into.
    #[serde(default = "default_workspace_root")]
    pub root: PathBuf,
    #[serde(default = "default_remove_attempts")]
    pub remove_attempts: u32,
    #[serde(default = "default_remove_backoff_ms")]
    pub remove_backoff_ms: u64,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: default_workspace_root(),
            remove_attempts: default_remove_attempts(),
            remove_backoff_ms: default_remove_backoff_ms(),
        }
    }
}

fn default_workspace_root() -> PathBuf {
    PathBuf::from("repo")
}
fn default_remove_attempts() -> u32 {
    5
}
fn default_remove_backoff_ms() -> u64 {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// SQLite file holding the vector index.
    #[serde(default = "default_index_path")]
    pub path: PathBuf,
    /// `sqlite` (durable) or `memory`.
    #[serde(default = "default_index_backend")]
    pub backend: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: default_index_path(),
            backend: default_index_backend(),
        }
    }
}

fn default_index_path() -> PathBuf {
    PathBuf::from("db/index.sqlite")
}
fn default_index_backend() -> String {
    "sqlite".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            overlap_chars: default_overlap_chars(),
        }
    }
}

fn default_max_chars() -> usize {
    2000
}
fn default_overlap_chars() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoaderConfig {
    #[serde(default = "default_exclude_globs")]
    pub exclude_globs: Vec<String>,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    /// Minimum line count before a source file is split by declaration.
    #[serde(default = "default_parser_threshold")]
    pub parser_threshold: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            exclude_globs: default_exclude_globs(),
            max_file_bytes: default_max_file_bytes(),
            parser_threshold: default_parser_threshold(),
        }
    }
}

fn default_exclude_globs() -> Vec<String> {
    vec!["**/.git/**".to_string()]
}
fn default_max_file_bytes() -> u64 {
    1024 * 1024
}
fn default_parser_threshold() -> usize {
    500
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Number of chunks handed to the model per question.
    #[serde(default = "default_k")]
    pub k: usize,
    /// Nearest-neighbour candidates considered before MMR re-ranking.
    #[serde(default = "default_fetch_k")]
    pub fetch_k: usize,
    /// MMR trade-off: 1.0 is pure relevance, 0.0 is pure diversity.
    #[serde(default = "default_lambda")]
    pub lambda: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            fetch_k: default_fetch_k(),
            lambda: default_lambda(),
        }
    }
}

fn default_k() -> usize {
    8
}
fn default_fetch_k() -> usize {
    20
}
fn default_lambda() -> f32 {
    0.5
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `gemini`, `openai` or `ollama`.
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Base URL override (Ollama host, OpenAI-compatible gateway).
    #[serde(default)]
    pub url: Option<String>,
    /// Environment variable holding the API key. Defaults per provider.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            url: None,
            api_key_env: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embedding_provider() -> String {
    "gemini".to_string()
}
fn default_embedding_model() -> String {
    "models/embedding-001".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// `gemini`, `openai` or `ollama`.
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    /// Tried in order; the first one that answers a probe is bound.
    #[serde(default = "default_candidate_models")]
    pub candidate_models: Vec<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_llm_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            candidate_models: default_candidate_models(),
            api_key_env: default_api_key_env(),
            url: None,
            max_retries: default_llm_max_retries(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

fn default_llm_provider() -> String {
    "gemini".to_string()
}
fn default_candidate_models() -> Vec<String> {
    vec![
        "gemini-1.5-pro".to_string(),
        "gemini-1.5-flash".to_string(),
        "gemini-pro".to_string(),
    ]
}
fn default_api_key_env() -> String {
    "GOOGLE_API_KEY".to_string()
}
fn default_llm_max_retries() -> u32 {
    2
}
fn default_llm_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

impl Config {
    /// Built-in defaults, used when no config file is present.
    pub fn minimal() -> Self {
        Self::default()
    }

    /// Environment variable the embedding provider reads its key from.
    pub fn embedding_api_key_env(&self) -> Option<String> {
        if let Some(var) = &self.embedding.api_key_env {
            return Some(var.clone());
        }
        match self.embedding.provider.as_str() {
            "gemini" => Some(self.llm.api_key_env.clone()),
            "openai" => Some("OPENAI_API_KEY".to_string()),
            _ => None,
        }
    }

    /// True when the chat credential is present in the environment.
    pub fn has_api_key(&self) -> bool {
        match self.llm.provider.as_str() {
            "ollama" => true,
            _ => std::env::var(&self.llm.api_key_env)
                .map(|v| !v.trim().is_empty())
                .unwrap_or(false),
        }
    }
}

/// Load the config file, or fall back to [`Config::minimal`] when it does
/// not exist. Parse and validation errors are still reported.
pub fn load_or_default(path: &Path) -> Result<Config> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        let config = Config::minimal();
        validate(&config)?;
        return Ok(config);
    }
    load_config(path)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;

    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Validate chunking
    if config.chunking.max_chars == 0 {
        anyhow::bail!("chunking.max_chars must be > 0");
    }
    if config.chunking.overlap_chars >= config.chunking.max_chars {
        anyhow::bail!("chunking.overlap_chars must be < chunking.max_chars");
    }

    // Validate retrieval
    if config.retrieval.k < 1 {
        anyhow::bail!("retrieval.k must be >= 1");
    }
    if config.retrieval.fetch_k < config.retrieval.k {
        anyhow::bail!("retrieval.fetch_k must be >= retrieval.k");
    }
    if !(0.0..=1.0).contains(&config.retrieval.lambda) {
        anyhow::bail!("retrieval.lambda must be in [0.0, 1.0]");
    }

    // Validate workspace
    if config.workspace.remove_attempts == 0 {
        anyhow::bail!("workspace.remove_attempts must be >= 1");
    }
    if config.workspace.root.as_os_str().is_empty() {
        anyhow::bail!("workspace.root must not be empty");
    }

    match config.index.backend.as_str() {
        "sqlite" | "memory" => {}
        other => anyhow::bail!(
            "Unknown index backend: '{}'. Must be sqlite or memory.",
            other
        ),
    }

    // Validate embedding
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }
    match config.embedding.provider.as_str() {
        "gemini" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be gemini, openai, or ollama.",
            other
        ),
    }

    // Validate llm
    match config.llm.provider.as_str() {
        "gemini" | "openai" | "ollama" => {}
        other => anyhow::bail!(
            "Unknown llm provider: '{}'. Must be gemini, openai, or ollama.",
            other
        ),
    }
    if config.llm.candidate_models.is_empty() {
        anyhow::bail!("llm.candidate_models must list at least one model");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn test_minimal_defaults() {
        let cfg = Config::minimal();
        assert_eq!(cfg.workspace.root, PathBuf::from("repo"));
        assert_eq!(cfg.chunking.max_chars, 2000);
        assert_eq!(cfg.chunking.overlap_chars, 200);
        assert_eq!(cfg.retrieval.k, 8);
        assert_eq!(cfg.loader.parser_threshold, 500);
        assert_eq!(cfg.embedding.model, "models/embedding-001");
        assert_eq!(cfg.llm.candidate_models[0], "gemini-1.5-pro");
        assert_eq!(cfg.llm.api_key_env, "GOOGLE_API_KEY");
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let f = write_config("[chunking]\nmax_chars = 500\noverlap_chars = 50\n");
        let cfg = load_config(f.path()).unwrap();
        assert_eq!(cfg.chunking.max_chars, 500);
        assert_eq!(cfg.retrieval.fetch_k, 20);
        assert_eq!(cfg.server.bind, "127.0.0.1:8080");
    }

    #[test]
    fn test_rejects_overlap_not_below_max() {
        let f = write_config("[chunking]\nmax_chars = 100\noverlap_chars = 100\n");
        let err = load_config(f.path()).unwrap_err();
        assert!(err.to_string().contains("overlap_chars"));
    }

    #[test]
    fn test_rejects_bad_lambda() {
        let f = write_config("[retrieval]\nlambda = 1.5\n");
        assert!(load_config(f.path()).is_err());
    }

    #[test]
    fn test_rejects_fetch_k_below_k() {
        let f = write_config("[retrieval]\nk = 10\nfetch_k = 4\n");
        assert!(load_config(f.path()).is_err());
    }

    #[test]
    fn test_rejects_unknown_provider() {
        let f = write_config("[embedding]\nprovider = \"magic\"\n");
        let err = load_config(f.path()).unwrap_err();
        assert!(err.to_string().contains("Unknown embedding provider"));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let cfg = load_or_default(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(cfg.index.path, PathBuf::from("db/index.sqlite"));
    }

    #[test]
    fn test_embedding_key_follows_llm_key_for_gemini() {
        let mut cfg = Config::minimal();
        cfg.llm.api_key_env = "MY_KEY".to_string();
        assert_eq!(cfg.embedding_api_key_env().as_deref(), Some("MY_KEY"));
        cfg.embedding.provider = "ollama".to_string();
        assert_eq!(cfg.embedding_api_key_env(), None);
    }
}
