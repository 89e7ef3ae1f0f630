//! Per-file text extraction keyed on file extension.
//!
//! | Extension | Strategy |
//! |-----------|----------|
//! | `.pdf` | page-aware text via `pdf-extract`, one document per page |
//! | `.docx` | `<w:t>` runs from `word/document.xml` |
//! | `.txt .md .py .r .rmd` | plain text with encoding detection |
//! | `.html .htm` | markup stripped via `scraper` |
//!
//! Anything else yields no documents. Parse failures never escape
//! [`load_file`]: they are logged and reported as an empty result so one
//! bad file cannot sink the rest of a corpus. Callers that want the reason
//! use [`try_load_file`].

use std::io::Read;
use std::path::Path;

use encoding_rs::{Encoding, BIG5, GBK, SHIFT_JIS, UTF_8, WINDOWS_1252};
use thiserror::Error;

use crate::models::{ExtractedDocument, Provenance};

/// Maximum decompressed bytes to read from a single OOXML entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Extensions the loader knows how to read, lower-case, without the dot.
pub const SUPPORTED_EXTENSIONS: &[&str] =
    &["pdf", "docx", "txt", "md", "py", "r", "rmd", "html", "htm"];

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read file: {0}")]
    Io(#[from] std::io::Error),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("DOCX extraction failed: {0}")]
    Docx(String),
}

/// Extraction strategy selected from a file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderKind {
    Pdf,
    Docx,
    PlainText,
    Html,
}

impl LoaderKind {
    pub fn for_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(LoaderKind::Pdf),
            "docx" => Some(LoaderKind::Docx),
            "txt" | "md" | "py" | "r" | "rmd" => Some(LoaderKind::PlainText),
            "html" | "htm" => Some(LoaderKind::Html),
            _ => None,
        }
    }
}

pub fn is_supported(path: &Path) -> bool {
    LoaderKind::for_path(path).is_some()
}

/// Load a file, absorbing any failure into an empty result.
pub fn load_file(path: &Path, root: &Path) -> Vec<ExtractedDocument> {
    match try_load_file(path, root) {
        Ok(docs) => docs,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "skipping unreadable file");
            Vec::new()
        }
    }
}

/// Load a file, surfacing parse errors. Unsupported extensions are `Ok(vec![])`.
pub fn try_load_file(path: &Path, root: &Path) -> Result<Vec<ExtractedDocument>, LoadError> {
    let Some(kind) = LoaderKind::for_path(path) else {
        return Ok(Vec::new());
    };

    let bytes = std::fs::read(path)?;
    let base = base_provenance(path, root);

    let docs = match kind {
        LoaderKind::Pdf => page_documents(extract_pdf_pages(&bytes)?, &base),
        LoaderKind::Docx => vec![ExtractedDocument {
            text: extract_docx(&bytes)?,
            provenance: base,
        }],
        LoaderKind::PlainText => vec![ExtractedDocument {
            text: decode_text(&bytes),
            provenance: base,
        }],
        LoaderKind::Html => {
            let (title, text) = extract_html(&decode_text(&bytes));
            vec![ExtractedDocument {
                text,
                provenance: Provenance { title, ..base },
            }]
        }
    };

    Ok(docs
        .into_iter()
        .filter(|d| !d.text.trim().is_empty())
        .collect())
}

fn base_provenance(path: &Path, root: &Path) -> Provenance {
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let relative = path.strip_prefix(root).unwrap_or(path);
    let source = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    Provenance {
        filename,
        source,
        page: None,
        title: None,
    }
}

/// One document per page, numbered from 1. Blank pages are dropped but keep
/// their place in the numbering.
fn page_documents(pages: Vec<String>, base: &Provenance) -> Vec<ExtractedDocument> {
    pages
        .into_iter()
        .enumerate()
        .filter(|(_, text)| !text.trim().is_empty())
        .map(|(i, text)| ExtractedDocument {
            text,
            provenance: Provenance {
                page: Some(i as u32 + 1),
                ..base.clone()
            },
        })
        .collect()
}

fn extract_pdf_pages(bytes: &[u8]) -> Result<Vec<String>, LoadError> {
    // pdf-extract panics on some malformed fonts and streams.
    std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem_by_pages(bytes))
        .map_err(|_| LoadError::Pdf("parser panicked".to_string()))?
        .map_err(|e| LoadError::Pdf(e.to_string()))
}

fn extract_docx(bytes: &[u8]) -> Result<String, LoadError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| LoadError::Docx(e.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|e| LoadError::Docx(e.to_string()))?;
    let mut doc_xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut doc_xml)
        .map_err(|e| LoadError::Docx(e.to_string()))?;
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(LoadError::Docx(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }
    extract_w_t_elements(&doc_xml)
}

/// Concatenate `<w:t>` runs, one line per `<w:p>` paragraph.
fn extract_w_t_elements(xml: &[u8]) -> Result<String, LoadError> {
    use quick_xml::events::Event;

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                out.push_str(te.unescape().unwrap_or_default().as_ref());
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"tab" => out.push('\t'),
            Ok(Event::Eof) => break,
            Err(e) => return Err(LoadError::Docx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim_end().to_string())
}

/// Decode bytes as text, preferring UTF-8.
///
/// Order: BOM sniffing, strict UTF-8, strict legacy CJK encodings, and
/// finally windows-1252, which accepts any byte sequence.
pub fn decode_text(bytes: &[u8]) -> String {
    if let Some((encoding, bom_len)) = Encoding::for_bom(bytes) {
        let (text, _) = encoding.decode_without_bom_handling(&bytes[bom_len..]);
        return text.into_owned();
    }

    if let Some(text) = UTF_8.decode_without_bom_handling_and_without_replacement(bytes) {
        return text.into_owned();
    }

    // legacy encodings common in course material, tried in order
    for encoding in [BIG5, GBK, SHIFT_JIS] {
        if let Some(text) = encoding.decode_without_bom_handling_and_without_replacement(bytes) {
            tracing::debug!(encoding = encoding.name(), "decoded text with fallback encoding");
            return text.into_owned();
        }
    }

    let (text, _) = WINDOWS_1252.decode_without_bom_handling(bytes);
    text.into_owned()
}

/// Strip markup from an HTML page, returning its `<title>` and visible text.
fn extract_html(html: &str) -> (Option<String>, String) {
    use scraper::{Html, Node, Selector};

    let document = Html::parse_document(html);

    let title = Selector::parse("title").ok().and_then(|sel| {
        document
            .select(&sel)
            .next()
            .map(|t| t.text().collect::<String>().trim().to_string())
            .filter(|t| !t.is_empty())
    });

    let mut lines: Vec<String> = Vec::new();
    for node in document.tree.nodes() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let hidden = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .is_some_and(|e| matches!(e.name(), "script" | "style" | "noscript" | "head"))
        });
        if hidden {
            continue;
        }
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            lines.push(trimmed.to_string());
        }
    }

    (title, lines.join("\n"))
}
