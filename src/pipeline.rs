//! Archive → retrieval index orchestration.
//!
//! Every request runs the same three steps inside its own [`WorkUnit`]:
//!
//! 1. [`stage_archive`]: put the uploaded bytes (or a copy of the default
//!    corpus archive) at the unit's upload path.
//! 2. [`prepare_index`]: unpack, run the ingestion mode detector, and
//!    either load the packaged index it found or extract, chunk and embed
//!    the raw material.
//! 3. Use the index: query it, or [`package_index`] it for download.
//!
//! Filesystem and parsing work runs on the blocking pool; only embedding
//! calls run on the async runtime.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::chunk::chunk_documents;
use crate::config::Config;
use crate::corpus;
use crate::detect::{self, IngestionMode};
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::index::RetrievalIndex;
use crate::models::Chunk;
use crate::workspace::{ReleaseGuard, WorkUnit};

/// A queryable index plus what was learned while preparing it.
#[derive(Debug)]
pub struct PreparedIndex {
    pub index: RetrievalIndex,
    pub mode: IngestionMode,
    /// Data files found in the archive, for question generation.
    pub data_files: Vec<String>,
}

/// Write the request's archive to `unit.upload_path()`.
///
/// Uses `upload` when present, otherwise copies `default_archive`. Fails
/// with [`RagError::NoCorpusSource`] when neither is available.
pub async fn stage_archive(
    unit: &WorkUnit,
    upload: Option<&[u8]>,
    default_archive: Option<&Path>,
) -> Result<()> {
    match (upload, default_archive) {
        (Some(bytes), _) => {
            tokio::fs::write(unit.upload_path(), bytes).await?;
            tracing::debug!(unit = %unit.id(), bytes = bytes.len(), "staged upload");
        }
        (None, Some(default)) => {
            tokio::fs::copy(default, unit.upload_path()).await?;
            tracing::debug!(unit = %unit.id(), source = %default.display(), "staged default archive");
        }
        (None, None) => return Err(RagError::NoCorpusSource),
    }
    Ok(())
}

enum Ingested {
    Loaded(RetrievalIndex),
    Chunked(Vec<Chunk>),
}

/// Unpack the staged archive and turn it into a [`RetrievalIndex`].
pub async fn prepare_index(
    unit: &WorkUnit,
    config: &Config,
    embedder: Arc<dyn EmbeddingProvider>,
) -> Result<PreparedIndex> {
    let archive = unit.upload_path().to_path_buf();
    let dest = unit.extract_dir().to_path_buf();
    let chunking = config.chunking.clone();
    let loader_embedder = embedder.clone();

    let (mode, data_files, ingested) = tokio::task::spawn_blocking(
        move || -> Result<(IngestionMode, Vec<String>, Ingested)> {
            corpus::unpack_archive(&archive, &dest)?;
            let mode = detect::detect(&dest)?;
            let data_files = corpus::list_data_files(&dest);

            let ingested = match &mode {
                IngestionMode::PreBuilt(dir) => {
                    Ingested::Loaded(RetrievalIndex::load(dir, loader_embedder.as_ref())?)
                }
                IngestionMode::Raw => {
                    let docs = corpus::load_corpus(&dest)?;
                    Ingested::Chunked(chunk_documents(&docs, &chunking))
                }
            };
            Ok((mode, data_files, ingested))
        },
    )
    .await??;

    tracing::info!(unit = %unit.id(), mode = mode.label(), "ingestion mode detected");

    let index = match ingested {
        Ingested::Loaded(index) => index,
        Ingested::Chunked(chunks) => {
            RetrievalIndex::build(chunks, embedder.as_ref(), config.embedding.batch_size).await?
        }
    };

    Ok(PreparedIndex {
        index,
        mode,
        data_files,
    })
}

/// Persist and zip `index` inside the guarded unit.
///
/// The guard comes back with the package path so the caller decides when
/// the unit is released. On failure the guard is dropped here, which
/// releases the unit.
pub async fn package_index(
    guard: ReleaseGuard,
    index: RetrievalIndex,
) -> Result<(ReleaseGuard, PathBuf)> {
    let (guard, result) = tokio::task::spawn_blocking(move || {
        let result = index.package(&guard);
        (guard, result)
    })
    .await?;
    let path = result?;
    tracing::info!(unit = %guard.id(), path = %path.display(), "packaged index");
    Ok((guard, path))
}
