//! Fixed-width overlapping text chunker.
//!
//! Splits each [`ExtractedDocument`] into [`Chunk`]s of at most
//! `chunk_chars` characters, where consecutive chunks of the same document
//! share exactly `overlap_chars` characters. Positions are counted in
//! Unicode scalar values, so multi-byte text never splits inside a character.
//!
//! For a document of `N` characters with length `L` and overlap `O`:
//!
//! ```text
//! N == 0      → 0 chunks
//! N <= L      → 1 chunk
//! otherwise   → ceil((N - O) / (L - O)) chunks, chunk i = [i·(L-O), min(i·(L-O)+L, N))
//! ```
//!
//! Each chunk receives a deterministic id: the SHA-256 of its source path,
//! page, index, and text.

use sha2::{Digest, Sha256};

use crate::config::ChunkingConfig;
use crate::models::{Chunk, ExtractedDocument};

/// Split every document independently, preserving input order.
pub fn chunk_documents(docs: &[ExtractedDocument], config: &ChunkingConfig) -> Vec<Chunk> {
    docs.iter()
        .flat_map(|doc| chunk_document(doc, config.chunk_chars, config.overlap_chars))
        .collect()
}

/// Split a single document. Requires `overlap < chunk_chars`.
pub fn chunk_document(doc: &ExtractedDocument, chunk_chars: usize, overlap: usize) -> Vec<Chunk> {
    chunk_spans(&doc.text, chunk_chars, overlap)
        .into_iter()
        .enumerate()
        .map(|(index, text)| make_chunk(doc, index, text))
        .collect()
}

/// Window `text` into overlapping slices by character position.
pub fn chunk_spans(text: &str, chunk_chars: usize, overlap: usize) -> Vec<&str> {
    assert!(
        overlap < chunk_chars,
        "overlap ({}) must be smaller than chunk length ({})",
        overlap,
        chunk_chars
    );

    // Byte offset of every char boundary, including the end of the string.
    let mut bounds: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    bounds.push(text.len());
    let n = bounds.len() - 1;

    let mut spans = Vec::new();
    if n == 0 {
        return spans;
    }

    let step = chunk_chars - overlap;
    let mut start = 0usize;
    loop {
        let end = (start + chunk_chars).min(n);
        spans.push(&text[bounds[start]..bounds[end]]);
        if end == n {
            break;
        }
        start += step;
    }
    spans
}

/// Expected number of chunks for a document of `n` characters.
pub fn expected_chunk_count(n: usize, chunk_chars: usize, overlap: usize) -> usize {
    match n {
        0 => 0,
        n if n <= chunk_chars => 1,
        n => (n - overlap).div_ceil(chunk_chars - overlap),
    }
}

fn make_chunk(doc: &ExtractedDocument, index: usize, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(doc.provenance.source.as_bytes());
    hasher.update(doc.provenance.page.unwrap_or(0).to_le_bytes());
    hasher.update((index as u64).to_le_bytes());
    hasher.update(text.as_bytes());
    let id = format!("{:x}", hasher.finalize());

    Chunk {
        id,
        chunk_index: index,
        text: text.to_string(),
        provenance: doc.provenance.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Provenance;

    fn doc(text: &str) -> ExtractedDocument {
        ExtractedDocument {
            text: text.to_string(),
            provenance: Provenance {
                filename: "a.txt".to_string(),
                source: "notes/a.txt".to_string(),
                page: None,
                title: None,
            },
        }
    }

    #[test]
    fn test_short_text_single_chunk() {
        let chunks = chunk_document(&doc("alpha beta gamma"), 1000, 200);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "alpha beta gamma");
        assert_eq!(chunks[0].chunk_index, 0);
    }

    #[test]
    fn test_empty_text_no_chunks() {
        assert!(chunk_document(&doc(""), 10, 2).is_empty());
    }

    #[test]
    fn test_exact_length_single_chunk() {
        let spans = chunk_spans("abcdefghij", 10, 3);
        assert_eq!(spans, vec!["abcdefghij"]);
    }

    #[test]
    fn test_fixed_fixture_boundaries() {
        // N=26, L=10, O=4 → step 6: [0,10) [6,16) [12,22) [18,26)
        let spans = chunk_spans("abcdefghijklmnopqrstuvwxyz", 10, 4);
        assert_eq!(
            spans,
            vec!["abcdefghij", "ghijklmnop", "mnopqrstuv", "stuvwxyz"]
        );
        assert_eq!(expected_chunk_count(26, 10, 4), 4);
    }

    #[test]
    fn test_one_past_length() {
        // N=11, L=10, O=2 → [0,10) [8,11)
        let spans = chunk_spans("abcdefghijk", 10, 2);
        assert_eq!(spans, vec!["abcdefghij", "ijk"]);
        assert_eq!(expected_chunk_count(11, 10, 2), 2);
    }

    #[test]
    fn test_count_matches_formula() {
        let text: String = (0..2345).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
        for (l, o) in [(1000, 200), (100, 0), (50, 49), (7, 3)] {
            let spans = chunk_spans(&text, l, o);
            assert_eq!(
                spans.len(),
                expected_chunk_count(2345, l, o),
                "L={} O={}",
                l,
                o
            );
        }
    }

    #[test]
    fn test_adjacent_chunks_share_exact_overlap() {
        let text: String = (0..537).map(|i| char::from(b'A' + (i % 23) as u8)).collect();
        let (l, o) = (100, 17);
        let spans = chunk_spans(&text, l, o);
        for pair in spans.windows(2) {
            let prev: Vec<char> = pair[0].chars().collect();
            let next: Vec<char> = pair[1].chars().collect();
            assert_eq!(prev.len(), l);
            let tail: String = prev[prev.len() - o..].iter().collect();
            let head: String = next[..o].iter().collect();
            assert_eq!(tail, head);
        }
        assert!(spans.last().unwrap().chars().count() <= l);
    }

    #[test]
    fn test_multibyte_boundaries() {
        let text = "空間分析是地理資訊系統的核心";
        let spans = chunk_spans(text, 5, 1);
        assert_eq!(spans[0], "空間分析是");
        assert_eq!(spans[1], "是地理資訊");
        assert_eq!(spans.concat().chars().count(), 14 + (spans.len() - 1));
    }

    #[test]
    fn test_provenance_copied_and_deterministic() {
        let d = doc(&"x".repeat(2500));
        let a = chunk_document(&d, 1000, 200);
        let b = chunk_document(&d, 1000, 200);
        assert_eq!(a, b);
        assert!(a.iter().all(|c| c.provenance == d.provenance));
        let ids: std::collections::HashSet<_> = a.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids.len(), a.len());
    }

    #[test]
    fn test_documents_split_independently() {
        let cfg = ChunkingConfig {
            chunk_chars: 4,
            overlap_chars: 1,
        };
        let chunks = chunk_documents(&[doc("abcdef"), doc("xy")], &cfg);
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["abcd", "def", "xy"]);
        assert_eq!(chunks[2].chunk_index, 0);
    }
}
