//! Core data models shared by the loader, chunker, and index.
//!
//! These types represent the documents and chunks that flow through the
//! archive → text → chunk → vector pipeline.

use serde::{Deserialize, Serialize};

/// Where a piece of text came from, for citation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    /// File name without directories (e.g. `week3.pdf`).
    pub filename: String,
    /// Path relative to the corpus root, `/`-separated.
    pub source: String,
    /// 1-based page number for paginated formats.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    /// Document title, when the format carries one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Text extracted from one source unit (one file, or one PDF page).
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedDocument {
    pub text: String,
    pub provenance: Provenance,
}

/// A bounded slice of a document's text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Deterministic identifier derived from provenance, index, and text.
    pub id: String,
    /// Position of this chunk within its parent document.
    pub chunk_index: usize,
    pub text: String,
    pub provenance: Provenance,
}

/// A chunk returned from a similarity query.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}
