//! HTTP API server.
//!
//! Exposes one [`Session`] over a JSON HTTP API. The session sits behind a
//! `tokio::sync::Mutex`, so processing, questions and clearing are
//! serialized: there is only ever one workspace and one index.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/repository` | `{ "url" }` → ingest report |
//! | `POST` | `/ask` | `{ "question" }` → `{ answer, sources, turns }` |
//! | `POST` | `/clear` | drop workspace, index and history |
//! | `GET`  | `/status` | session status |
//! | `GET`  | `/history` | conversation turns and summary |
//! | `GET`  | `/health` | health check (returns version) |
//! | `POST` | `/chatbot` | form `question=<url>`, plain-text reply |
//! | `POST` | `/get` | form `msg=<question>`, plain-text reply |
//!
//! # Error Contract
//!
//! JSON routes answer errors with
//!
//! ```json
//! { "error": { "code": "not_ready", "message": "Please process a repository first!" } }
//! ```
//!
//! | Code | Status |
//! |------|--------|
//! | `bad_request` | 400 |
//! | `not_ready` | 409 |
//! | `acquisition_failure`, `load_failure` | 422 |
//! | `indexing_failure`, `answer_failure` | 502 |
//! | `no_model_available` | 503 |
//! | `config_error` | 500 |
//!
//! The form routes reply with the same message as plain text.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so the browser front-end
//! can be served from a different origin.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::error::OracleError;
use crate::models::Turn;
use crate::progress::NoProgress;
use crate::session::{IngestReport, Session, SessionStatus};

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    session: Arc<Mutex<Session>>,
}

impl AppState {
    pub fn new(session: Session) -> Self {
        Self {
            session: Arc::new(Mutex::new(session)),
        }
    }
}

/// Starts the HTTP server on `[server].bind`.
///
/// Runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let session = Session::from_config(config.clone(), Box::new(NoProgress))?;

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    println!("Code oracle listening on http://{}", bind_addr);

    axum::serve(listener, router(AppState::new(session))).await?;
    Ok(())
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/repository", post(handle_repository))
        .route("/ask", post(handle_ask))
        .route("/clear", post(handle_clear))
        .route("/status", get(handle_status))
        .route("/history", get(handle_history))
        .route("/health", get(handle_health))
        .route("/chatbot", post(handle_chatbot_form))
        .route("/get", post(handle_get_form))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<OracleError> for AppError {
    fn from(err: OracleError) -> Self {
        AppError {
            status: status_for(&err),
            code: err.code().to_string(),
            message: err.user_message(),
        }
    }
}

fn status_for(err: &OracleError) -> StatusCode {
    match err {
        OracleError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        OracleError::NotReady => StatusCode::CONFLICT,
        OracleError::Acquisition { .. } | OracleError::Load(_) => StatusCode::UNPROCESSABLE_ENTITY,
        OracleError::Indexing(_) | OracleError::Answer { .. } => StatusCode::BAD_GATEWAY,
        OracleError::NoModelAvailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        OracleError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn internal(err: anyhow::Error) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: format!("{:#}", err),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /repository ============

#[derive(Deserialize)]
struct RepositoryRequest {
    url: String,
}

async fn handle_repository(
    State(state): State<AppState>,
    Json(req): Json<RepositoryRequest>,
) -> Result<Json<IngestReport>, AppError> {
    let mut session = state.session.lock().await;
    Ok(Json(session.process_repository(&req.url).await?))
}

// ============ POST /ask ============

#[derive(Deserialize)]
struct AskRequest {
    question: String,
}

#[derive(Serialize)]
struct AskResponse {
    answer: String,
    sources: Vec<String>,
    turns: usize,
}

async fn handle_ask(
    State(state): State<AppState>,
    Json(req): Json<AskRequest>,
) -> Result<Json<AskResponse>, AppError> {
    let mut session = state.session.lock().await;
    let outcome = session.ask_question(&req.question).await?;
    Ok(Json(AskResponse {
        answer: outcome.answer,
        sources: outcome.sources,
        turns: outcome.state.turns.len(),
    }))
}

// ============ POST /clear ============

async fn handle_clear(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let mut session = state.session.lock().await;
    session.clear().await.map_err(internal)?;
    Ok(Json(serde_json::json!({ "status": session.state().as_str() })))
}

// ============ GET /status, GET /history ============

async fn handle_status(State(state): State<AppState>) -> Json<SessionStatus> {
    Json(state.session.lock().await.status())
}

#[derive(Serialize)]
struct HistoryResponse {
    turns: Vec<Turn>,
    summary: String,
}

async fn handle_history(State(state): State<AppState>) -> Json<HistoryResponse> {
    let session = state.session.lock().await;
    Json(HistoryResponse {
        turns: session.history().to_vec(),
        summary: session.summary().to_string(),
    })
}

// ============ Form routes ============

#[derive(Deserialize)]
struct ChatbotForm {
    question: String,
}

/// `question` carries the repository URL.
async fn handle_chatbot_form(
    State(state): State<AppState>,
    Form(form): Form<ChatbotForm>,
) -> (StatusCode, String) {
    let mut session = state.session.lock().await;
    match session.process_repository(&form.question).await {
        Ok(report) => (
            StatusCode::OK,
            format!(
                "Repository processed successfully! Found {} files.",
                report.load.files_loaded
            ),
        ),
        Err(e) => (status_for(&e), e.user_message()),
    }
}

#[derive(Deserialize)]
struct GetForm {
    msg: String,
}

async fn handle_get_form(
    State(state): State<AppState>,
    Form(form): Form<GetForm>,
) -> (StatusCode, String) {
    let mut session = state.session.lock().await;
    match session.ask_question(&form.msg).await {
        Ok(outcome) => (StatusCode::OK, outcome.answer),
        Err(e) => (status_for(&e), e.user_message()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AnswerFailureKind;

    #[test]
    fn test_status_codes() {
        assert_eq!(status_for(&OracleError::NotReady), StatusCode::CONFLICT);
        assert_eq!(
            status_for(&OracleError::InvalidInput("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&OracleError::NoModelAvailable { tried: vec![] }),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(&OracleError::Answer {
                kind: AnswerFailureKind::QuotaExceeded,
                message: "429".into()
            }),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_app_error_carries_code_and_message() {
        let err: AppError = OracleError::NotReady.into();
        assert_eq!(err.code, "not_ready");
        assert_eq!(err.message, "Please process a repository first!");
        assert_eq!(err.status, StatusCode::CONFLICT);
    }
}
