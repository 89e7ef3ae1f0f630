//! Archive unpacking and corpus collection.
//!
//! [`unpack_archive`] validates and fully extracts a zip upload.
//! [`collect_documents`] then walks the extracted tree and runs the
//! [`loader`](crate::loader) on every supported file. The two are separate
//! so the ingestion mode detector can inspect the tree in between without
//! unpacking twice; [`extract_corpus`] chains them for callers that know
//! the archive holds raw material.

use std::fs::File;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::detect::{META_FILE, VECTORS_FILE};
use crate::error::{RagError, Result};
use crate::loader;
use crate::models::ExtractedDocument;

/// File types offered to question generation as exercise data.
const DATA_FILE_EXTENSIONS: &[&str] = &[
    "shp", "csv", "tif", "tiff", "geojson", "txt", "json", "kml",
];

/// Documents gathered from a tree plus the files that failed to parse.
#[derive(Debug, Default)]
pub struct CorpusScan {
    pub documents: Vec<ExtractedDocument>,
    pub skipped: Vec<(PathBuf, String)>,
    pub files_seen: usize,
}

impl CorpusScan {
    /// Emit one warning per skipped file.
    pub fn log_skipped(&self) {
        for (path, reason) in &self.skipped {
            tracing::warn!(path = %path.display(), %reason, "skipped file during extraction");
        }
    }
}

/// Extract every entry of a zip archive into `dest`.
///
/// Fails with [`RagError::InvalidArchive`] if `archive` is not a readable
/// zip. Entries whose names would escape `dest` are rejected by the zip
/// crate and surface as the same error.
pub fn unpack_archive(archive: &Path, dest: &Path) -> Result<usize> {
    let file = File::open(archive)?;
    let mut zip = zip::ZipArchive::new(file)
        .map_err(|e| RagError::InvalidArchive(e.to_string()))?;
    let entries = zip.len();

    std::fs::create_dir_all(dest)?;
    zip.extract(dest).map_err(|e| match e {
        zip::result::ZipError::Io(io) => RagError::Io(io),
        other => RagError::InvalidArchive(other.to_string()),
    })?;

    tracing::debug!(archive = %archive.display(), entries, "unpacked archive");
    Ok(entries)
}

/// Walk `root` (sorted by file name) and load every supported file.
pub fn collect_documents(root: &Path) -> Result<CorpusScan> {
    let mut scan = CorpusScan::default();

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| std::io::Error::other(e.to_string()))?;
        if !entry.file_type().is_file() || !loader::is_supported(entry.path()) {
            continue;
        }
        scan.files_seen += 1;

        match loader::try_load_file(entry.path(), root) {
            Ok(docs) => scan.documents.extend(docs),
            Err(e) => scan.skipped.push((entry.path().to_path_buf(), e.to_string())),
        }
    }

    Ok(scan)
}

/// Load the documents of an already unpacked tree, logging skipped files.
///
/// Fails with [`RagError::NoSupportedDocuments`] when nothing usable was found.
pub fn load_corpus(root: &Path) -> Result<Vec<ExtractedDocument>> {
    let scan = collect_documents(root)?;
    scan.log_skipped();
    tracing::info!(
        files = scan.files_seen,
        documents = scan.documents.len(),
        skipped = scan.skipped.len(),
        "extracted corpus"
    );
    if scan.documents.is_empty() {
        return Err(RagError::NoSupportedDocuments);
    }
    Ok(scan.documents)
}

/// Unpack `archive` into `dest` and load its documents.
pub fn extract_corpus(archive: &Path, dest: &Path) -> Result<Vec<ExtractedDocument>> {
    unpack_archive(archive, dest)?;
    load_corpus(dest)
}

/// Sorted, de-duplicated names of data files anywhere under `root`.
///
/// Index signature files are not exercise data and are left out.
pub fn list_data_files(root: &Path) -> Vec<String> {
    let mut names: Vec<String> = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.file_name() != META_FILE && e.file_name() != VECTORS_FILE)
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|x| x.to_str())
                .map(|x| DATA_FILE_EXTENSIONS.contains(&x.to_ascii_lowercase().as_str()))
                .unwrap_or(false)
        })
        .map(|e| e.file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names.dedup();
    names
}
