//! In-memory retrieval index and its packaged on-disk form.
//!
//! A [`RetrievalIndex`] is a flat list of chunks with one embedding vector
//! each. Queries embed the question with the same provider and rank every
//! entry by cosine similarity; at course-material scale a brute-force scan
//! is fast enough and keeps the package format trivial.
//!
//! # Package layout
//!
//! ```text
//! index/
//!   index.vectors     little-endian f32, row-major, entries × dims
//!   index.meta.json   { format_version, model, dims, built_at, chunks[] }
//! ```
//!
//! The joint presence of these two files is what
//! [`detect`](crate::detect::detect) looks for.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::detect::{META_FILE, VECTORS_FILE};
use crate::embedding::{self, blob_to_vec, cosine_similarity, vec_to_blob, EmbeddingProvider};
use crate::error::{RagError, Result};
use crate::models::{Chunk, ScoredChunk};
use crate::workspace::WorkUnit;

/// Bumped whenever the package layout changes incompatibly.
pub const FORMAT_VERSION: u32 = 1;

/// Top-level folder inside a downloadable package.
pub const PACKAGE_DIR: &str = "index";

#[derive(Debug, Serialize, Deserialize)]
struct IndexMeta {
    format_version: u32,
    model: String,
    dims: usize,
    built_at: DateTime<Utc>,
    chunks: Vec<Chunk>,
}

#[derive(Debug, Clone)]
pub struct RetrievalIndex {
    model: String,
    dims: usize,
    chunks: Vec<Chunk>,
    vectors: Vec<Vec<f32>>,
}

impl RetrievalIndex {
    /// Embed every chunk and assemble an index.
    ///
    /// Fails with [`RagError::EmbeddingServiceUnavailable`] when the provider
    /// fails or returns vectors that do not line up with the chunks.
    pub async fn build(
        chunks: Vec<Chunk>,
        embedder: &dyn EmbeddingProvider,
        batch_size: usize,
    ) -> Result<Self> {
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = embedding::embed_batched(embedder, &texts, batch_size).await?;

        let dims = vectors
            .first()
            .map(|v| v.len())
            .unwrap_or_else(|| embedder.dims());
        if let Some(bad) = vectors.iter().position(|v| v.len() != dims) {
            return Err(RagError::EmbeddingServiceUnavailable(format!(
                "vector {} has {} dimensions, expected {}",
                bad,
                vectors[bad].len(),
                dims
            )));
        }

        tracing::info!(
            chunks = chunks.len(),
            dims,
            model = embedder.model_name(),
            "built retrieval index"
        );

        Ok(Self {
            model: embedder.model_name().to_string(),
            dims,
            chunks,
            vectors,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    /// Embed `text` and return the `k` most similar chunks.
    pub async fn query(
        &self,
        text: &str,
        embedder: &dyn EmbeddingProvider,
        k: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let query_vec = embedding::embed_query(embedder, text).await?;
        Ok(self.query_vector(&query_vec, k))
    }

    /// Rank entries by cosine similarity, highest first.
    ///
    /// Equal scores keep insertion order.
    pub fn query_vector(&self, query: &[f32], k: usize) -> Vec<ScoredChunk> {
        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (i, cosine_similarity(query, v)))
            .collect();

        // sort_by is stable
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        scored
            .into_iter()
            .map(|(i, score)| ScoredChunk {
                chunk: self.chunks[i].clone(),
                score,
            })
            .collect()
    }

    /// Write the two signature files into `dir`.
    pub fn persist(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;

        let mut blob = Vec::with_capacity(self.chunks.len() * self.dims * 4);
        for v in &self.vectors {
            blob.extend_from_slice(&vec_to_blob(v));
        }
        std::fs::write(dir.join(VECTORS_FILE), blob)?;

        let meta = IndexMeta {
            format_version: FORMAT_VERSION,
            model: self.model.clone(),
            dims: self.dims,
            built_at: Utc::now(),
            chunks: self.chunks.clone(),
        };
        let json = serde_json::to_vec_pretty(&meta)
            .map_err(|e| RagError::Internal(format!("serialize index metadata: {}", e)))?;
        std::fs::write(dir.join(META_FILE), json)?;

        tracing::debug!(dir = %dir.display(), entries = self.chunks.len(), "persisted index");
        Ok(())
    }

    /// Read a packaged index from a directory that carries the signature files.
    ///
    /// Fails with [`RagError::CorruptIndex`] when the files do not describe a
    /// consistent index, or when `embedder` reports a different dimensionality.
    /// A different model name only logs a warning.
    pub fn load(dir: &Path, embedder: &dyn EmbeddingProvider) -> Result<Self> {
        let index = Self::read(dir)?;

        let provider_dims = embedder.dims();
        if provider_dims != 0 && !index.is_empty() && provider_dims != index.dims {
            return Err(RagError::CorruptIndex(format!(
                "index has {} dims but the embedding provider produces {}",
                index.dims, provider_dims
            )));
        }
        if embedder.model_name() != index.model {
            tracing::warn!(
                index_model = %index.model,
                provider_model = embedder.model_name(),
                "packaged index was built with a different embedding model"
            );
        }
        Ok(index)
    }

    /// Read and structurally validate a packaged index without checking it
    /// against an embedding provider.
    pub fn read(dir: &Path) -> Result<Self> {
        let meta_bytes = std::fs::read(dir.join(META_FILE))?;
        let meta: IndexMeta = serde_json::from_slice(&meta_bytes)
            .map_err(|e| RagError::CorruptIndex(format!("{}: {}", META_FILE, e)))?;

        if meta.format_version != FORMAT_VERSION {
            return Err(RagError::CorruptIndex(format!(
                "unsupported format version {}",
                meta.format_version
            )));
        }
        if meta.dims == 0 && !meta.chunks.is_empty() {
            return Err(RagError::CorruptIndex("dims is 0".to_string()));
        }

        let row_bytes = meta.dims.checked_mul(4).ok_or_else(|| {
            RagError::CorruptIndex(format!("dims {} is out of range", meta.dims))
        })?;
        let expected = meta.chunks.len().checked_mul(row_bytes).ok_or_else(|| {
            RagError::CorruptIndex(format!(
                "{} entries of {} dims is out of range",
                meta.chunks.len(),
                meta.dims
            ))
        })?;

        let blob = std::fs::read(dir.join(VECTORS_FILE))?;
        if blob.len() != expected {
            return Err(RagError::CorruptIndex(format!(
                "{} is {} bytes, expected {} for {} entries of {} dims",
                VECTORS_FILE,
                blob.len(),
                expected,
                meta.chunks.len(),
                meta.dims
            )));
        }

        let vectors = if row_bytes == 0 {
            Vec::new()
        } else {
            blob.chunks_exact(row_bytes).map(blob_to_vec).collect()
        };

        tracing::info!(
            dir = %dir.display(),
            entries = meta.chunks.len(),
            built_at = %meta.built_at,
            "loaded packaged index"
        );

        Ok(Self {
            model: meta.model,
            dims: meta.dims,
            chunks: meta.chunks,
            vectors,
        })
    }

    /// Persist into the unit's output directory and zip it for download.
    pub fn package(&self, unit: &WorkUnit) -> Result<PathBuf> {
        self.persist(unit.index_dir())?;
        write_package_zip(unit.index_dir(), unit.package_path())?;
        Ok(unit.package_path().to_path_buf())
    }
}

/// Zip the signature files of `index_dir` under a top-level [`PACKAGE_DIR`].
fn write_package_zip(index_dir: &Path, zip_path: &Path) -> Result<()> {
    let zip_err = |e: zip::result::ZipError| RagError::Internal(format!("write package: {}", e));

    let file = File::create(zip_path)?;
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    for name in [VECTORS_FILE, META_FILE] {
        let bytes = std::fs::read(index_dir.join(name))?;
        zip.start_file(format!("{}/{}", PACKAGE_DIR, name), options)
            .map_err(zip_err)?;
        zip.write_all(&bytes)?;
    }
    zip.finish().map_err(zip_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingProvider;
    use crate::models::Provenance;
    use tempfile::TempDir;

    fn chunk(source: &str, text: &str) -> Chunk {
        Chunk {
            id: format!("{}#{}", source, text.len()),
            chunk_index: 0,
            text: text.to_string(),
            provenance: Provenance {
                filename: source.rsplit('/').next().unwrap_or(source).to_string(),
                source: source.to_string(),
                page: None,
                title: None,
            },
        }
    }

    fn corpus() -> Vec<Chunk> {
        vec![
            chunk("w1/raster.txt", "raster algebra and map overlay"),
            chunk("w2/kriging.txt", "kriging interpolation semivariogram"),
            chunk("w3/moran.txt", "moran spatial autocorrelation statistic"),
            chunk("w4/buffer.txt", "buffer distance vector overlay"),
        ]
    }

    #[tokio::test]
    async fn query_ranks_matching_chunk_first() {
        let p = HashingProvider::new(256);
        let index = RetrievalIndex::build(corpus(), &p, 2).await.unwrap();
        assert_eq!(index.len(), 4);
        assert_eq!(index.dims(), 256);

        let hits = index.query("semivariogram kriging", &p, 5).await.unwrap();
        assert_eq!(hits.len(), 4);
        assert_eq!(hits[0].chunk.provenance.filename, "kriging.txt");
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[tokio::test]
    async fn query_respects_k() {
        let p = HashingProvider::new(64);
        let index = RetrievalIndex::build(corpus(), &p, 8).await.unwrap();
        assert_eq!(index.query("overlay", &p, 2).await.unwrap().len(), 2);
    }

    #[test]
    fn equal_scores_keep_insertion_order() {
        let index = RetrievalIndex {
            model: "m".into(),
            dims: 2,
            chunks: vec![chunk("a", "a"), chunk("b", "b"), chunk("c", "c")],
            vectors: vec![vec![0.0, 1.0], vec![1.0, 0.0], vec![1.0, 0.0]],
        };
        let hits = index.query_vector(&[1.0, 0.0], 3);
        let order: Vec<&str> = hits.iter().map(|h| h.chunk.provenance.source.as_str()).collect();
        assert_eq!(order, vec!["b", "c", "a"]);
    }

    #[tokio::test]
    async fn persist_then_load_preserves_query_results() {
        let tmp = TempDir::new().unwrap();
        let p = HashingProvider::new(128);
        let built = RetrievalIndex::build(corpus(), &p, 3).await.unwrap();
        built.persist(tmp.path()).unwrap();

        let loaded = RetrievalIndex::load(tmp.path(), &p).unwrap();
        assert_eq!(loaded.model(), built.model());
        assert_eq!(loaded.chunks(), built.chunks());

        for q in ["overlay", "spatial statistic", "interpolation"] {
            let a: Vec<String> = built
                .query(q, &p, 5)
                .await
                .unwrap()
                .into_iter()
                .map(|h| h.chunk.id)
                .collect();
            let b: Vec<String> = loaded
                .query(q, &p, 5)
                .await
                .unwrap()
                .into_iter()
                .map(|h| h.chunk.id)
                .collect();
            assert_eq!(a, b, "query {:?}", q);
        }
    }

    #[tokio::test]
    async fn truncated_vectors_are_corrupt() {
        let tmp = TempDir::new().unwrap();
        let p = HashingProvider::new(16);
        let index = RetrievalIndex::build(corpus(), &p, 8).await.unwrap();
        index.persist(tmp.path()).unwrap();

        let path = tmp.path().join(VECTORS_FILE);
        let mut bytes = std::fs::read(&path).unwrap();
        bytes.truncate(bytes.len() - 3);
        std::fs::write(&path, bytes).unwrap();

        let err = RetrievalIndex::load(tmp.path(), &p).unwrap_err();
        assert!(matches!(err, RagError::CorruptIndex(_)));
    }

    #[tokio::test]
    async fn oversized_dims_are_corrupt() {
        let tmp = TempDir::new().unwrap();
        let p = HashingProvider::new(8);
        let index = RetrievalIndex::build(corpus(), &p, 8).await.unwrap();
        index.persist(tmp.path()).unwrap();

        let meta_path = tmp.path().join(META_FILE);
        let mut meta: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&meta_path).unwrap()).unwrap();
        for dims in [1u64 << 62, 1u64 << 60] {
            meta["dims"] = serde_json::json!(dims);
            std::fs::write(&meta_path, serde_json::to_vec(&meta).unwrap()).unwrap();
            std::fs::write(tmp.path().join(VECTORS_FILE), b"").unwrap();

            let err = RetrievalIndex::read(tmp.path()).unwrap_err();
            assert!(matches!(err, RagError::CorruptIndex(_)), "dims {}", dims);
            let err = RetrievalIndex::load(tmp.path(), &p).unwrap_err();
            assert!(matches!(err, RagError::CorruptIndex(_)), "dims {}", dims);
        }
    }

    #[test]
    fn unparseable_meta_is_corrupt() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join(VECTORS_FILE), b"").unwrap();
        std::fs::write(tmp.path().join(META_FILE), b"not json").unwrap();
        let err = RetrievalIndex::load(tmp.path(), &HashingProvider::new(8)).unwrap_err();
        assert!(matches!(err, RagError::CorruptIndex(_)));
    }

    #[tokio::test]
    async fn dimension_mismatch_is_corrupt() {
        let tmp = TempDir::new().unwrap();
        let index = RetrievalIndex::build(corpus(), &HashingProvider::new(32), 8)
            .await
            .unwrap();
        index.persist(tmp.path()).unwrap();
        let err = RetrievalIndex::load(tmp.path(), &HashingProvider::new(64)).unwrap_err();
        assert!(matches!(err, RagError::CorruptIndex(_)));
    }

    #[tokio::test]
    async fn package_zip_has_index_folder() {
        let tmp = TempDir::new().unwrap();
        let ws = crate::workspace::Workspace::open(tmp.path()).unwrap();
        let unit = ws.allocate();
        let index = RetrievalIndex::build(corpus(), &HashingProvider::new(16), 8)
            .await
            .unwrap();

        let zip_path = index.package(&unit).unwrap();
        let archive = zip::ZipArchive::new(File::open(&zip_path).unwrap()).unwrap();
        let mut names: Vec<&str> = archive.file_names().collect();
        names.sort();
        assert_eq!(names, vec!["index/index.meta.json", "index/index.vectors"]);

        let _ = unit.release();
    }
}
