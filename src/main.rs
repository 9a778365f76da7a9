//! # Code Oracle CLI (`oracle`)
//!
//! Clone a repository, index it, and ask questions about it.
//!
//! ## Usage
//!
//! ```bash
//! oracle --config ./oracle.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `oracle process <url>` | Clone and index a repository, print the ingest report |
//! | `oracle chat [--repo <url>]` | Interactive question/answer session |
//! | `oracle clear` | Remove the managed workspace and index storage |
//! | `oracle serve` | Start the HTTP API |
//!
//! ## Examples
//!
//! ```bash
//! export GOOGLE_API_KEY=...
//!
//! # One-shot ingest
//! oracle process https://github.com/tokio-rs/mini-redis
//!
//! # Ingest and chat
//! oracle chat --repo https://github.com/tokio-rs/mini-redis
//!
//! # Start the HTTP API for the web front-end
//! oracle serve --config ./oracle.toml
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use code_oracle::config::{self, Config};
use code_oracle::progress::ProgressMode;
use code_oracle::server;
use code_oracle::session::{IngestReport, Session, SessionStatus};

/// Code Oracle: ask questions about a Git repository, answered from its source.
#[derive(Parser)]
#[command(
    name = "oracle",
    about = "Code Oracle: ask questions about a Git repository, answered from its source",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./oracle.toml`. When the file does not exist, built-in
    /// defaults are used.
    #[arg(long, global = true, default_value = "./oracle.toml")]
    config: PathBuf,

    /// Emit progress as JSON lines on stderr instead of human-readable text.
    #[arg(long, global = true)]
    json_progress: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Clone and index a repository.
    ///
    /// Replaces any previously processed repository. Prints the ingest
    /// report as JSON on stdout.
    Process {
        /// Repository URL, e.g. `https://github.com/owner/repo`.
        url: String,
    },

    /// Interactive chat about the processed repository.
    ///
    /// Lines starting with `/` are commands: `/repo <url>`, `/clear`,
    /// `/status`, `/quit`. Anything else is a question.
    Chat {
        /// Process this repository before the first question.
        #[arg(long)]
        repo: Option<String>,
    },

    /// Remove the managed workspace and index storage.
    Clear,

    /// Start the HTTP API.
    ///
    /// Binds to `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_or_default(&cli.config)?;

    if !cfg.has_api_key() {
        tracing::warn!(
            var = %cfg.llm.api_key_env,
            "API key not set; processing and questions will fail until it is provided"
        );
    }

    let progress = if cli.json_progress {
        ProgressMode::Json
    } else {
        ProgressMode::default_for_tty()
    };

    match cli.command {
        Commands::Process { url } => {
            let mut session = Session::from_config(cfg, progress.reporter())?;
            match session.process_repository(&url).await {
                Ok(report) => println!("{}", serde_json::to_string_pretty(&report)?),
                Err(e) => anyhow::bail!(e.user_message()),
            }
        }
        Commands::Chat { repo } => {
            let session = Session::from_config(cfg, progress.reporter())?;
            run_chat(session, repo).await?;
        }
        Commands::Clear => {
            let mut session = Session::from_config(cfg, progress.reporter())?;
            session.clear().await?;
            println!("Workspace and index removed.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}

async fn run_chat(mut session: Session, repo: Option<String>) -> anyhow::Result<()> {
    if let Some(url) = repo {
        process_and_print(&mut session, &url).await;
    } else {
        println!("No repository loaded. Use /repo <url> to process one.");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print_prompt()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match parse_chat_line(line) {
            ChatLine::Quit => break,
            ChatLine::Repo(url) => process_and_print(&mut session, url).await,
            ChatLine::Clear => match session.clear().await {
                Ok(()) => println!("Cleared."),
                Err(e) => println!("Clear was incomplete: {:#}", e),
            },
            ChatLine::Status => print_status(&session.status(), session.config()),
            ChatLine::Unknown(cmd) => {
                println!("Unknown command {}. Try /repo <url>, /clear, /status or /quit.", cmd)
            }
            ChatLine::Question(q) => match session.ask_question(q).await {
                Ok(outcome) => {
                    println!("\n{}\n", outcome.answer);
                    if !outcome.sources.is_empty() {
                        println!("Sources: {}", outcome.sources.join(", "));
                    }
                }
                Err(e) => println!("{}", e.user_message()),
            },
        }
    }

    Ok(())
}

#[derive(Debug, PartialEq, Eq)]
enum ChatLine<'a> {
    Repo(&'a str),
    Clear,
    Status,
    Quit,
    Unknown(&'a str),
    Question(&'a str),
}

fn parse_chat_line(line: &str) -> ChatLine<'_> {
    if !line.starts_with('/') {
        return ChatLine::Question(line);
    }
    let (cmd, rest) = match line.split_once(char::is_whitespace) {
        Some((cmd, rest)) => (cmd, rest.trim()),
        None => (line, ""),
    };
    match cmd {
        "/repo" => ChatLine::Repo(rest),
        "/clear" => ChatLine::Clear,
        "/status" => ChatLine::Status,
        "/quit" | "/exit" => ChatLine::Quit,
        other => ChatLine::Unknown(other),
    }
}

fn print_prompt() -> std::io::Result<()> {
    use std::io::Write;
    print!("> ");
    std::io::stdout().flush()
}

async fn process_and_print(session: &mut Session, url: &str) {
    match session.process_repository(url).await {
        Ok(report) => print_report(&report),
        Err(e) => println!("{}", e.user_message()),
    }
}

fn print_report(report: &IngestReport) {
    println!(
        "Repository processed successfully! Found {} files.",
        report.load.files_loaded
    );
    println!(
        "  {} chunks, model {}, generation {}",
        report.chunks, report.model, report.generation
    );
    if report.load.fallbacks > 0 || report.load.skipped_by_error > 0 {
        println!(
            "  {} files loaded as plain text, {} skipped",
            report.load.fallbacks, report.load.skipped_by_error
        );
    }
    for warning in &report.warnings {
        println!("  warning: {}", warning);
    }
}

fn print_status(status: &SessionStatus, cfg: &Config) {
    println!("state:      {}", status.state.as_str());
    println!(
        "repository: {}",
        status.repository.as_deref().unwrap_or("(none)")
    );
    println!("generation: {}", status.generation);
    println!("documents:  {}", status.documents);
    println!("chunks:     {}", status.chunks);
    println!("model:      {}", status.model.as_deref().unwrap_or("(none)"));
    println!("turns:      {}", status.turns);
    println!("workspace:  {}", cfg.workspace.root.display());
    if !status.api_key_present {
        println!("warning:    {} is not set", status.api_key_env);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_chat_line() {
        assert_eq!(
            parse_chat_line("/repo https://example.com/a.git"),
            ChatLine::Repo("https://example.com/a.git")
        );
        assert_eq!(parse_chat_line("/clear"), ChatLine::Clear);
        assert_eq!(parse_chat_line("/status"), ChatLine::Status);
        assert_eq!(parse_chat_line("/quit"), ChatLine::Quit);
        assert_eq!(parse_chat_line("/nope x"), ChatLine::Unknown("/nope"));
        assert_eq!(
            parse_chat_line("what does main do?"),
            ChatLine::Question("what does main do?")
        );
    }
}
