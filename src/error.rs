//! Error taxonomy for the ingestion pipeline and the operations built on it.
//!
//! Every fallible library operation returns [`RagError`]. The HTTP layer maps
//! each variant to a status code via [`RagError::code`] and
//! [`RagError::is_client_error`]; per-file parse failures use the separate
//! [`LoadError`](crate::loader::LoadError) and never reach this type.

use thiserror::Error;

pub type Result<T, E = RagError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum RagError {
    /// Missing credential or invalid setting. Raised at startup; never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid archive: {0}")]
    InvalidArchive(String),

    #[error("archive contains no supported documents and is not a packaged index")]
    NoSupportedDocuments,

    #[error("no archive uploaded and no default corpus archive is available")]
    NoCorpusSource,

    #[error("packaged index is corrupt: {0}")]
    CorruptIndex(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("embedding service unavailable: {0}")]
    EmbeddingServiceUnavailable(String),

    #[error("completion service unavailable: {0}")]
    CompletionServiceUnavailable(String),

    #[error("malformed upstream response: {0}")]
    MalformedUpstreamResponse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl RagError {
    /// Machine-readable code used in the JSON error body.
    pub fn code(&self) -> &'static str {
        match self {
            RagError::Configuration(_) => "configuration_error",
            RagError::InvalidArchive(_) => "invalid_archive",
            RagError::NoSupportedDocuments => "no_supported_documents",
            RagError::NoCorpusSource => "no_corpus_source",
            RagError::CorruptIndex(_) => "corrupt_index",
            RagError::BadRequest(_) => "bad_request",
            RagError::EmbeddingServiceUnavailable(_) => "embedding_unavailable",
            RagError::CompletionServiceUnavailable(_) => "completion_unavailable",
            RagError::MalformedUpstreamResponse(_) => "malformed_upstream_response",
            RagError::Io(_) => "io_error",
            RagError::Internal(_) => "internal",
        }
    }

    /// True when the caller sent something we cannot work with.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            RagError::InvalidArchive(_)
                | RagError::NoSupportedDocuments
                | RagError::NoCorpusSource
                | RagError::CorruptIndex(_)
                | RagError::BadRequest(_)
        )
    }

    /// True when an upstream dependency (embedding or completion API) failed.
    pub fn is_upstream_error(&self) -> bool {
        matches!(
            self,
            RagError::EmbeddingServiceUnavailable(_)
                | RagError::CompletionServiceUnavailable(_)
                | RagError::MalformedUpstreamResponse(_)
        )
    }
}

impl From<tokio::task::JoinError> for RagError {
    fn from(err: tokio::task::JoinError) -> Self {
        RagError::Internal(format!("blocking task failed: {}", err))
    }
}
