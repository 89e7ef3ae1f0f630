//! HTTP server.
//!
//! Every route that takes course material accepts a multipart form with an
//! optional `file` field holding a zip archive. Without it the configured
//! `corpus.default_archive` is used. Each request runs in its own
//! [`WorkUnit`](crate::workspace::WorkUnit), released when the request is
//! finished with it.
//!
//! # Endpoints
//!
//! | Method | Path | Form fields | Response |
//! |--------|------|-------------|----------|
//! | `GET`  | `/` | | service banner |
//! | `GET`  | `/health` | | `{status, version}` |
//! | `POST` | `/process_zip` | `file` | `application/zip` package download |
//! | `POST` | `/ask_with_zip` | `file?`, `question` | `{question, answer, sources}` |
//! | `POST` | `/api/generate_question` | `file?`, `qtype`, `level` | `{question_content, hint, target_filename}` |
//! | `POST` | `/api/grade_submission` | `file?`, `question_text`, `student_answer`, `qtype` | grade report |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "no_supported_documents", "message": "..." } }
//! ```
//!
//! Client errors (bad archive, nothing to index, missing field) are `400`;
//! failures of the embedding or completion API are `502`; everything
//! else is `500`.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::{DefaultBodyLimit, Multipart, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::StreamExt;
use serde::Serialize;
use tokio_util::io::ReaderStream;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::completion::{create_completion, CompletionService};
use crate::config::Config;
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::error::RagError;
use crate::pipeline::{self, PreparedIndex};
use crate::tutor::{AskResponse, GeneratedQuestion, GradeReport, Tutor};
use crate::workspace::{ReleaseGuard, Workspace};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    workspace: Workspace,
    embedder: Arc<dyn EmbeddingProvider>,
    tutor: Tutor,
}

impl AppState {
    /// Open the workspace and wire the services together.
    pub fn new(
        config: Config,
        embedder: Arc<dyn EmbeddingProvider>,
        completion: Arc<dyn CompletionService>,
    ) -> Result<Self, RagError> {
        let workspace = Workspace::open(&config.workspace.root)?;
        let tutor = Tutor::new(&config, embedder.clone(), completion);
        Ok(Self {
            config: Arc::new(config),
            workspace,
            embedder,
            tutor,
        })
    }
}

/// Build the router with all routes and layers.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let upload_limit = state.config.server.max_upload_bytes;

    Router::new()
        .route("/", get(handle_home))
        .route("/health", get(handle_health))
        .route("/process_zip", post(handle_process_zip))
        .route("/ask_with_zip", post(handle_ask))
        .route("/api/generate_question", post(handle_generate_question))
        .route("/api/grade_submission", post(handle_grade_submission))
        .layer(DefaultBodyLimit::max(upload_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the server on `[server].bind` and run until the process exits.
///
/// Provider construction happens here, so a missing API key fails at
/// startup rather than on the first request.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let embedder = create_provider(&config.embedding)?;
    let completion = create_completion(&config.completion)?;
    tracing::info!(
        embedding_model = embedder.model_name(),
        completion_model = completion.model_name(),
        "configured model services"
    );
    let state = AppState::new(config.clone(), embedder, completion)?;

    let bind_addr = config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(
        addr = %bind_addr,
        workspace = %state.workspace.root().display(),
        "ragpack server listening"
    );
    axum::serve(listener, router(state)).await?;
    Ok(())
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

/// Converts a [`RagError`] into the JSON error contract.
pub struct AppError(RagError);

impl From<RagError> for AppError {
    fn from(err: RagError) -> Self {
        Self(err)
    }
}

impl AppError {
    fn status(&self) -> StatusCode {
        if self.0.is_client_error() {
            StatusCode::BAD_REQUEST
        } else if self.0.is_upstream_error() {
            StatusCode::BAD_GATEWAY
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = self.0.code(), error = %self.0, "request failed");
        } else {
            tracing::warn!(code = self.0.code(), error = %self.0, "request rejected");
        }
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.0.code().to_string(),
                message: self.0.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}

// ============ Multipart form ============

#[derive(Default)]
struct Form {
    file: Option<Bytes>,
    fields: HashMap<String, String>,
}

impl Form {
    async fn read(mut multipart: Multipart) -> Result<Self, RagError> {
        let mut form = Form::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| RagError::BadRequest(format!("failed to read multipart field: {}", e)))?
        {
            let name = field.name().unwrap_or("").to_string();
            if name == "file" {
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| RagError::BadRequest(format!("failed to read upload: {}", e)))?;
                // browsers send an empty part when no file was chosen
                if !data.is_empty() {
                    form.file = Some(data);
                }
            } else {
                let value = field
                    .text()
                    .await
                    .map_err(|e| RagError::BadRequest(format!("failed to read {}: {}", name, e)))?;
                form.fields.insert(name, value);
            }
        }
        Ok(form)
    }

    fn text(&self, name: &str) -> &str {
        self.fields.get(name).map(String::as_str).unwrap_or("")
    }

    /// Reject the request before any archive work if a field is blank.
    fn require(&self, names: &[&str]) -> Result<(), RagError> {
        match names.iter().find(|n| self.text(n).trim().is_empty()) {
            Some(missing) => Err(RagError::BadRequest(format!("{} is required", missing))),
            None => Ok(()),
        }
    }
}

/// Allocate a unit, stage the archive, and prepare its index.
///
/// The returned guard owns the unit; an error drops it here, which
/// releases the unit.
async fn prepare(
    state: &AppState,
    upload: Option<&[u8]>,
) -> Result<(ReleaseGuard, PreparedIndex), RagError> {
    let guard = ReleaseGuard::new(state.workspace.allocate());
    pipeline::stage_archive(&guard, upload, state.config.corpus.resolve_default()).await?;
    let prepared = pipeline::prepare_index(&guard, &state.config, state.embedder.clone()).await?;
    Ok((guard, prepared))
}

// ============ GET / and /health ============

#[derive(Serialize)]
struct HomeResponse {
    service: &'static str,
    version: &'static str,
    endpoints: Vec<&'static str>,
}

async fn handle_home() -> Json<HomeResponse> {
    Json(HomeResponse {
        service: "ragpack",
        version: env!("CARGO_PKG_VERSION"),
        endpoints: vec![
            "POST /process_zip",
            "POST /ask_with_zip",
            "POST /api/generate_question",
            "POST /api/grade_submission",
        ],
    })
}

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

// ============ POST /process_zip ============

/// Build an index from the uploaded archive and stream it back as a zip.
///
/// The work unit is released once the body has been fully sent or the
/// client goes away.
async fn handle_process_zip(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Response, AppError> {
    let form = Form::read(multipart).await?;
    let upload = form
        .file
        .as_deref()
        .ok_or_else(|| RagError::BadRequest("file is required".to_string()))?;

    let (guard, prepared) = prepare(&state, Some(upload)).await?;
    let (guard, package) = pipeline::package_index(guard, prepared.index).await?;

    let file = tokio::fs::File::open(&package)
        .await
        .map_err(RagError::from)?;
    let download_name = format!("rag_index_{}.zip", guard.short_id());
    let stream = ReaderStream::new(file).map(move |chunk| {
        let _unit = &guard;
        chunk
    });

    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", download_name),
            ),
        ],
        Body::from_stream(stream),
    )
        .into_response())
}

// ============ POST /ask_with_zip ============

async fn handle_ask(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<AskResponse>, AppError> {
    let form = Form::read(multipart).await?;
    form.require(&["question"])?;
    let (_guard, prepared) = prepare(&state, form.file.as_deref()).await?;
    let response = state
        .tutor
        .ask(&prepared.index, form.text("question"))
        .await?;
    Ok(Json(response))
}

// ============ POST /api/generate_question ============

async fn handle_generate_question(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<GeneratedQuestion>, AppError> {
    let form = Form::read(multipart).await?;
    form.require(&["qtype", "level"])?;
    let (_guard, prepared) = prepare(&state, form.file.as_deref()).await?;
    let question = state
        .tutor
        .generate_question(
            &prepared.index,
            form.text("qtype"),
            form.text("level"),
            &prepared.data_files,
        )
        .await?;
    Ok(Json(question))
}

// ============ POST /api/grade_submission ============

async fn handle_grade_submission(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<GradeReport>, AppError> {
    let form = Form::read(multipart).await?;
    form.require(&["question_text", "student_answer"])?;
    let (_guard, prepared) = prepare(&state, form.file.as_deref()).await?;
    let report = state
        .tutor
        .grade_submission(
            &prepared.index,
            form.text("question_text"),
            form.text("student_answer"),
            form.text("qtype"),
        )
        .await?;
    Ok(Json(report))
}
