//! Ingestion mode detection.
//!
//! An unpacked upload is either raw course material or a packaged index
//! produced by an earlier build. A packaged index is recognised purely by
//! the joint presence of its two signature files ([`VECTORS_FILE`] and
//! [`META_FILE`]) in one directory, at any depth.
//!
//! The walk is depth-first with entries sorted by file name, so when an
//! archive holds several index directories the first one in that order is
//! chosen.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::Result;

/// Raw little-endian f32 vectors, row-major.
pub const VECTORS_FILE: &str = "index.vectors";
/// JSON metadata: model, dims, and chunk provenance.
pub const META_FILE: &str = "index.meta.json";

/// Result of inspecting an extraction root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestionMode {
    /// A packaged index lives in this directory; load it.
    PreBuilt(PathBuf),
    /// No packaged index anywhere; build one from the documents.
    Raw,
}

impl IngestionMode {
    pub fn label(&self) -> &'static str {
        match self {
            IngestionMode::PreBuilt(_) => "pre-built",
            IngestionMode::Raw => "raw",
        }
    }
}

/// True when `dir` holds both signature files as regular files.
pub fn has_index_signature(dir: &Path) -> bool {
    dir.join(VECTORS_FILE).is_file() && dir.join(META_FILE).is_file()
}

/// Walk `root` and report whether it contains a packaged index.
pub fn detect(root: &Path) -> Result<IngestionMode> {
    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name();

    for entry in walker {
        let entry = entry.map_err(|e| std::io::Error::other(e.to_string()))?;
        if entry.file_type().is_dir() && has_index_signature(entry.path()) {
            return Ok(IngestionMode::PreBuilt(entry.into_path()));
        }
    }
    Ok(IngestionMode::Raw)
}
