//! # Code Oracle
//!
//! Ask natural-language questions about a Git repository and get answers
//! grounded in its source.
//!
//! A repository is cloned into a managed workspace, its files are loaded by
//! extension (with per-language declaration splitting for large source
//! files), chunked with overlap, embedded and stored in a vector index.
//! Questions are condensed against the running conversation summary,
//! answered from chunks selected by maximal marginal relevance, and folded
//! back into the summary.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────┐   ┌─────────┐   ┌───────────┐
//! │ Workspace │──▶│  Loader  │──▶│ Chunker │──▶│  Indexer  │
//! │ git clone │   │ policy + │   │ overlap │   │ embed +   │
//! └───────────┘   │ segments │   └─────────┘   │ SQLite    │
//!                 └──────────┘                 └─────┬─────┘
//!                                                    │ MMR
//!                      ┌──────────┐            ┌─────▼─────┐
//!                      │ Session  │◀──────────▶│ Answering │
//!                      └────┬─────┘            │  Engine   │
//!                ┌──────────┴─────────┐        └───────────┘
//!                ▼                    ▼
//!          ┌──────────┐         ┌──────────┐
//!          │   CLI    │         │   HTTP   │
//!          │ (oracle) │         │  (axum)  │
//!          └──────────┘         └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! export GOOGLE_API_KEY=...
//! oracle process https://github.com/owner/repo
//! oracle chat
//! oracle serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | User-facing failure taxonomy |
//! | [`workspace`] | Managed clone of the target repository |
//! | [`policy`] | Extension → language / plain-text mapping |
//! | [`segment`] | Declaration splitting for source files |
//! | [`loader`] | Workspace walk into documents |
//! | [`chunk`] | Overlapping text chunking |
//! | [`http`] | Retrying JSON client for providers |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`store`] | Vector storage (SQLite, in-memory) |
//! | [`mmr`] | Maximal marginal relevance selection |
//! | [`index`] | Index build and query |
//! | [`llm`] | Generative models and model selection |
//! | [`answer`] | Conversational answering |
//! | [`session`] | Orchestration and session state |
//! | [`progress`] | Pipeline progress reporting |
//! | [`server`] | HTTP API |

pub mod answer;
pub mod chunk;
pub mod config;
pub mod embedding;
pub mod error;
pub mod http;
pub mod index;
pub mod llm;
pub mod loader;
pub mod mmr;
pub mod models;
pub mod policy;
pub mod progress;
pub mod segment;
pub mod server;
pub mod session;
pub mod store;
pub mod workspace;
