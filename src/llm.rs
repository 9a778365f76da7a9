//! Generative chat models.
//!
//! [`ChatModel`] is a single text-in, text-out invocation. A
//! [`ChatModelFactory`] builds a model handle for a model identifier without
//! contacting the provider; [`select_model`] then probes the configured
//! candidates in priority order and binds the first one that answers.
//!
//! | Provider | Endpoint |
//! |----------|----------|
//! | `gemini` | `POST {base}/models/{model}:generateContent` |
//! | `openai` | `POST {base}/v1/chat/completions` |
//! | `ollama` | `POST {base}/api/chat` |

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::config::{Config, LlmConfig};
use crate::error::OracleError;
use crate::http::RetryingClient;

const GEMINI_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const OPENAI_BASE: &str = "https://api.openai.com";
const OLLAMA_BASE: &str = "http://localhost:11434";

/// Prompt sent to each candidate before it is bound.
pub const PROBE_PROMPT: &str = "test";

#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_id(&self) -> &str;

    async fn invoke(&self, prompt: &str) -> Result<String>;
}

pub trait ChatModelFactory: Send + Sync {
    fn create(&self, model_id: &str) -> Result<Arc<dyn ChatModel>>;
}

/// Bind the first candidate that answers [`PROBE_PROMPT`].
pub async fn select_model(
    factory: &dyn ChatModelFactory,
    candidates: &[String],
) -> Result<Arc<dyn ChatModel>, OracleError> {
    for model_id in candidates {
        let model = match factory.create(model_id) {
            Ok(model) => model,
            Err(e) => {
                tracing::warn!(model = %model_id, error = %e, "model not available, trying next");
                continue;
            }
        };
        match model.invoke(PROBE_PROMPT).await {
            Ok(_) => {
                tracing::info!(model = %model_id, "using generative model");
                return Ok(model);
            }
            Err(e) => {
                tracing::warn!(model = %model_id, error = %e, "model not available, trying next");
            }
        }
    }
    Err(OracleError::NoModelAvailable {
        tried: candidates.to_vec(),
    })
}

// ============ Gemini ============

pub struct GeminiChat {
    model: String,
    api_key: String,
    base_url: String,
    http: Arc<RetryingClient>,
}

#[async_trait]
impl ChatModel for GeminiChat {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn invoke(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
        });
        let url = format!(
            "{}/models/{}:generateContent",
            self.base_url,
            self.model.trim_start_matches("models/")
        );
        let json = self
            .http
            .post_json(&url, &[("x-goog-api-key", self.api_key.clone())], &body)
            .await?;
        parse_gemini_response(&json)
    }
}

/// Concatenates `candidates[0].content.parts[].text`.
fn parse_gemini_response(json: &serde_json::Value) -> Result<String> {
    let candidate = json
        .get("candidates")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .ok_or_else(|| match json.get("promptFeedback") {
            Some(feedback) => anyhow::anyhow!("Gemini returned no candidates: {}", feedback),
            None => anyhow::anyhow!("Invalid Gemini response: missing candidates"),
        })?;

    let parts = candidate
        .pointer("/content/parts")
        .and_then(|p| p.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Gemini response: missing content parts"))?;

    Ok(parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect::<Vec<_>>()
        .join(""))
}

// ============ OpenAI ============

pub struct OpenAIChat {
    model: String,
    api_key: String,
    base_url: String,
    http: Arc<RetryingClient>,
}

#[async_trait]
impl ChatModel for OpenAIChat {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn invoke(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
        });
        let url = format!("{}/v1/chat/completions", self.base_url);
        let json = self
            .http
            .post_json(
                &url,
                &[("Authorization", format!("Bearer {}", self.api_key))],
                &body,
            )
            .await?;
        json.pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing message content"))
    }
}

// ============ Ollama ============

pub struct OllamaChat {
    model: String,
    base_url: String,
    http: Arc<RetryingClient>,
}

#[async_trait]
impl ChatModel for OllamaChat {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn invoke(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "stream": false,
        });
        let url = format!("{}/api/chat", self.base_url);
        let json = self.http.post_json(&url, &[], &body).await?;
        json.pointer("/message/content")
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing message content"))
    }
}

// ============ Factory ============

/// Builds HTTP-backed models for `[llm].provider`.
///
/// The API key is read once, when the factory is created. A missing key is
/// not an error here; the provider rejects the probe and selection reports
/// [`OracleError::NoModelAvailable`].
pub struct HttpChatModelFactory {
    provider: String,
    api_key: String,
    base_url: String,
    http: Arc<RetryingClient>,
}

impl HttpChatModelFactory {
    pub fn new(config: &Config) -> Result<Self> {
        let llm: &LlmConfig = &config.llm;
        let (label, default_base) = match llm.provider.as_str() {
            "gemini" => ("Gemini", GEMINI_BASE),
            "openai" => ("OpenAI", OPENAI_BASE),
            "ollama" => ("Ollama", OLLAMA_BASE),
            other => bail!("Unknown llm provider: {}", other),
        };

        Ok(Self {
            provider: llm.provider.clone(),
            api_key: std::env::var(&llm.api_key_env).unwrap_or_default(),
            base_url: llm.url.clone().unwrap_or_else(|| default_base.to_string()),
            http: Arc::new(RetryingClient::new(
                label,
                llm.timeout_secs,
                llm.max_retries,
            )?),
        })
    }
}

impl ChatModelFactory for HttpChatModelFactory {
    fn create(&self, model_id: &str) -> Result<Arc<dyn ChatModel>> {
        let model = model_id.trim();
        if model.is_empty() {
            bail!("empty model identifier");
        }
        let model = model.to_string();
        let base_url = self.base_url.clone();
        let http = self.http.clone();

        Ok(match self.provider.as_str() {
            "gemini" => Arc::new(GeminiChat {
                model,
                api_key: self.api_key.clone(),
                base_url,
                http,
            }),
            "openai" => Arc::new(OpenAIChat {
                model,
                api_key: self.api_key.clone(),
                base_url,
                http,
            }),
            _ => Arc::new(OllamaChat {
                model,
                base_url,
                http,
            }),
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted models shared by unit tests.

    use super::*;
    use std::collections::{HashSet, VecDeque};
    use std::sync::Mutex;

    /// Answers from a queue, then echoes the last line of the prompt.
    pub struct ScriptedModel {
        pub id: String,
        pub replies: Mutex<VecDeque<Result<String, String>>>,
        pub prompts: Mutex<Vec<String>>,
    }

    impl ScriptedModel {
        pub fn new(id: &str) -> Self {
            Self {
                id: id.to_string(),
                replies: Mutex::new(VecDeque::new()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub fn push_ok(&self, reply: &str) {
            self.replies.lock().unwrap().push_back(Ok(reply.to_string()));
        }

        pub fn push_err(&self, message: &str) {
            self.replies.lock().unwrap().push_back(Err(message.to_string()));
        }

        pub fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        fn model_id(&self) -> &str {
            &self.id
        }

        async fn invoke(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            match self.replies.lock().unwrap().pop_front() {
                Some(Ok(reply)) => Ok(reply),
                Some(Err(message)) => Err(anyhow::anyhow!(message)),
                None => Ok(format!("reply to: {}", prompt.lines().last().unwrap_or(""))),
            }
        }
    }

    /// Models in `broken` fail their probe with a 404.
    pub struct ScriptedFactory {
        pub broken: HashSet<String>,
        pub created: Mutex<Vec<String>>,
    }

    impl ScriptedFactory {
        pub fn new(broken: &[&str]) -> Self {
            Self {
                broken: broken.iter().map(|s| s.to_string()).collect(),
                created: Mutex::new(Vec::new()),
            }
        }
    }

    impl ChatModelFactory for ScriptedFactory {
        fn create(&self, model_id: &str) -> Result<Arc<dyn ChatModel>> {
            self.created.lock().unwrap().push(model_id.to_string());
            let model = ScriptedModel::new(model_id);
            if self.broken.contains(model_id) {
                model.push_err(&format!("Gemini API error 404 Not Found: models/{} is not found", model_id));
            }
            Ok(Arc::new(model))
        }
    }
}
