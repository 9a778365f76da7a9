//! User-facing failure taxonomy.
//!
//! Internal plumbing uses [`anyhow`] with `.context(...)`. Each pipeline stage
//! converts its failure into one [`OracleError`] variant at its boundary, so
//! callers (CLI, HTTP API) can report a categorized message without parsing
//! error strings themselves.
//!
//! | Variant | Raised by | Session effect |
//! |---------|-----------|----------------|
//! | [`OracleError::Acquisition`] | workspace clone | back to `Empty` |
//! | [`OracleError::Load`] | document loader | back to `Empty` |
//! | [`OracleError::Indexing`] | embedding / store | back to `Empty` |
//! | [`OracleError::NoModelAvailable`] | model selection | back to `Empty` |
//! | [`OracleError::Answer`] | a single question | stays `Ready` |
//! | [`OracleError::NotReady`] | asking without an index | unchanged |

use std::fmt;

/// Category of a failed question, derived from the provider's error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerFailureKind {
    ModelNotFound,
    QuotaExceeded,
    AuthInvalid,
    Generic,
}

impl AnswerFailureKind {
    /// Classify a provider error message by substring.
    ///
    /// Checked in order: model-not-found, quota, auth, generic. Quota is
    /// checked before auth because provider quota messages routinely mention
    /// the API by name.
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();

        if (lower.contains("404") && lower.contains("model")) || lower.contains("not found") {
            return AnswerFailureKind::ModelNotFound;
        }

        if lower.contains("quota")
            || lower.contains("rate limit")
            || lower.contains("limit")
            || lower.contains("429")
            || lower.contains("resource_exhausted")
        {
            return AnswerFailureKind::QuotaExceeded;
        }

        if lower.contains("api key")
            || lower.contains("key")
            || lower.contains("unauthenticated")
            || lower.contains("permission")
            || lower.contains("401")
            || lower.contains("403")
        {
            return AnswerFailureKind::AuthInvalid;
        }

        AnswerFailureKind::Generic
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AnswerFailureKind::ModelNotFound => "model_not_found",
            AnswerFailureKind::QuotaExceeded => "quota_exceeded",
            AnswerFailureKind::AuthInvalid => "auth_invalid",
            AnswerFailureKind::Generic => "generic",
        }
    }
}

impl fmt::Display for AnswerFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("could not acquire repository {url}: {reason}")]
    Acquisition { url: String, reason: String },

    #[error("could not load documents: {0}")]
    Load(String),

    #[error("could not build index: {0}")]
    Indexing(String),

    #[error("no generative model available (tried: {})", tried.join(", "))]
    NoModelAvailable { tried: Vec<String> },

    #[error("answer failed ({kind}): {message}")]
    Answer {
        kind: AnswerFailureKind,
        message: String,
    },

    #[error("no repository is ready; process a repository first")]
    NotReady,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl OracleError {
    /// Build an [`OracleError::Answer`] from a provider error, classifying it.
    pub fn answer(err: &anyhow::Error) -> Self {
        let message = format!("{:#}", err);
        OracleError::Answer {
            kind: AnswerFailureKind::classify(&message),
            message,
        }
    }

    /// Machine-readable code used by the HTTP API.
    pub fn code(&self) -> &'static str {
        match self {
            OracleError::Acquisition { .. } => "acquisition_failure",
            OracleError::Load(_) => "load_failure",
            OracleError::Indexing(_) => "indexing_failure",
            OracleError::NoModelAvailable { .. } => "no_model_available",
            OracleError::Answer { .. } => "answer_failure",
            OracleError::NotReady => "not_ready",
            OracleError::InvalidInput(_) => "bad_request",
            OracleError::Config(_) => "config_error",
        }
    }

    /// Categorized text shown to the person using the CLI or front-end.
    pub fn user_message(&self) -> String {
        match self {
            OracleError::Acquisition { url, reason } => {
                format!("Error cloning repository {}: {}", url, reason)
            }
            OracleError::Load(reason) => format!("Error loading documents: {}", reason),
            OracleError::Indexing(reason) => format!("Error creating index: {}", reason),
            OracleError::NoModelAvailable { .. } => {
                "No available generative models found. Please check your API key and model availability."
                    .to_string()
            }
            OracleError::Answer { kind, message } => match kind {
                AnswerFailureKind::ModelNotFound => {
                    "API Model Error: the configured generative model is not available. Please check your API key and try again."
                        .to_string()
                }
                AnswerFailureKind::AuthInvalid => {
                    "API Error: please check the API key in your environment.".to_string()
                }
                AnswerFailureKind::QuotaExceeded => {
                    "API Quota Error: you've reached your API usage limit. Please try again later."
                        .to_string()
                }
                AnswerFailureKind::Generic => format!("Error: {}", message),
            },
            OracleError::NotReady => "Please process a repository first!".to_string(),
            OracleError::InvalidInput(reason) => reason.clone(),
            OracleError::Config(reason) => format!("Configuration error: {}", reason),
        }
    }
}
