//! Repository processing progress.
//!
//! Reports observable progress during `oracle process` (and the first
//! question of `oracle chat --repo`) so users see which stage is running and
//! how far embedding has got. Progress is emitted on **stderr** so stdout
//! stays parseable for scripts.

use std::io::Write;

/// A single progress event of the processing pipeline.
#[derive(Clone, Debug, PartialEq)]
pub enum PipelineEvent {
    /// Cloning the repository into the workspace.
    Acquiring { url: String },
    /// Walking the workspace and parsing files.
    Loading,
    /// Loading finished.
    Loaded { documents: u64 },
    /// Chunking finished.
    Chunked { chunks: u64 },
    /// n chunks embedded out of total.
    Embedding { n: u64, total: u64 },
    /// Probing candidate generative models.
    SelectingModel,
    /// The repository is ready for questions.
    Ready { model: String },
}

impl PipelineEvent {
    pub fn stage(&self) -> &'static str {
        match self {
            PipelineEvent::Acquiring { .. } => "acquiring",
            PipelineEvent::Loading | PipelineEvent::Loaded { .. } => "loading",
            PipelineEvent::Chunked { .. } => "chunking",
            PipelineEvent::Embedding { .. } => "embedding",
            PipelineEvent::SelectingModel => "selecting_model",
            PipelineEvent::Ready { .. } => "ready",
        }
    }
}

/// Reports pipeline progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    /// Emit a progress event. Called from the session pipeline.
    fn report(&self, event: PipelineEvent);
}

/// Human-friendly progress on stderr: "embedding  1,234 / 5,000 chunks".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: PipelineEvent) {
        let line = match &event {
            PipelineEvent::Acquiring { url } => format!("cloning {}...\n", url),
            PipelineEvent::Loading => "loading documents...\n".to_string(),
            PipelineEvent::Loaded { documents } => {
                format!("loaded {} documents\n", format_number(*documents))
            }
            PipelineEvent::Chunked { chunks } => {
                format!("split into {} chunks\n", format_number(*chunks))
            }
            PipelineEvent::Embedding { n, total } => format!(
                "embedding  {} / {} chunks\n",
                format_number(*n),
                format_number(*total)
            ),
            PipelineEvent::SelectingModel => "selecting generative model...\n".to_string(),
            PipelineEvent::Ready { model } => format!("ready (model: {})\n", model),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: PipelineEvent) {
        let mut obj = serde_json::json!({
            "event": "progress",
            "stage": event.stage(),
        });
        match &event {
            PipelineEvent::Acquiring { url } => obj["url"] = serde_json::json!(url),
            PipelineEvent::Loaded { documents } => obj["documents"] = serde_json::json!(documents),
            PipelineEvent::Chunked { chunks } => obj["chunks"] = serde_json::json!(chunks),
            PipelineEvent::Embedding { n, total } => {
                obj["n"] = serde_json::json!(n);
                obj["total"] = serde_json::json!(total);
            }
            PipelineEvent::Ready { model } => obj["model"] = serde_json::json!(model),
            PipelineEvent::Loading | PipelineEvent::SelectingModel => {}
        }
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: PipelineEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
