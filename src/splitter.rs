//! Recursive character splitter producing overlapping chunks.
//!
//! Text is split on the coarsest separator present (`"\n\n"`, then `"\n"`,
//! then `" "`, then individual characters). Pieces shorter than the chunk size
//! are greedily merged back together; oversized pieces are split again with
//! the finer separators. When a merged chunk is emitted, pieces are dropped
//! from its front until at most `chunk_overlap` characters carry over into the
//! next chunk. Separators stay attached to the start of the piece that
//! follows them, so merged chunks reproduce the source text exactly before
//! trimming. All lengths are in characters.

use crate::chunk::Chunk;
use crate::error::{DocQaError, Result};
use crate::ingest::PageRecord;

/// Default chunk length in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;
/// Default overlap between consecutive chunks in characters.
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

/// Splits page text into bounded, overlapping chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecursiveSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Default for RecursiveSplitter {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl RecursiveSplitter {
    /// Validates sizes: `chunk_size > 0` and `chunk_overlap <= chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(DocQaError::Input("chunk_size must be positive".into()));
        }
        if chunk_overlap > chunk_size {
            return Err(DocQaError::Input(format!(
                "chunk_overlap ({chunk_overlap}) exceeds chunk_size ({chunk_size})"
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    /// Configured chunk size.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Configured overlap.
    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Splits every page, copying the page's metadata onto each of its chunks.
    pub fn split_pages(&self, pages: &[PageRecord]) -> Vec<Chunk> {
        pages
            .iter()
            .flat_map(|page| {
                self.split_text(&page.content)
                    .into_iter()
                    .map(move |content| Chunk::new(content, page.metadata.clone()))
            })
            .collect()
    }

    /// Splits one text into trimmed, non-empty chunks.
    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, &SEPARATORS)
    }

    fn split_recursive(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let (separator, finer) = pick_separator(text, separators);
        let mut chunks = Vec::new();
        let mut good: Vec<&str> = Vec::new();

        for piece in split_keeping_separator(text, separator) {
            if char_len(piece) < self.chunk_size {
                good.push(piece);
                continue;
            }
            if !good.is_empty() {
                chunks.extend(self.merge(&good));
                good.clear();
            }
            if finer.is_empty() {
                let trimmed = piece.trim();
                if !trimmed.is_empty() {
                    chunks.push(trimmed.to_string());
                }
            } else {
                chunks.extend(self.split_recursive(piece, finer));
            }
        }
        if !good.is_empty() {
            chunks.extend(self.merge(&good));
        }
        chunks
    }

    fn merge(&self, pieces: &[&str]) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut window: Vec<(&str, usize)> = Vec::new();
        let mut total = 0usize;

        for &piece in pieces {
            let len = char_len(piece);
            if total + len > self.chunk_size && !window.is_empty() {
                push_joined(&mut chunks, &window);
                let mut drop = 0;
                while drop < window.len()
                    && (total > self.chunk_overlap || (total + len > self.chunk_size && total > 0))
                {
                    total -= window[drop].1;
                    drop += 1;
                }
                window.drain(..drop);
            }
            window.push((piece, len));
            total += len;
        }
        push_joined(&mut chunks, &window);
        chunks
    }
}

fn pick_separator<'s>(text: &str, separators: &'s [&'s str]) -> (&'s str, &'s [&'s str]) {
    for (position, separator) in separators.iter().enumerate() {
        if separator.is_empty() {
            return (separator, &[]);
        }
        if text.contains(separator) {
            return (separator, &separators[position + 1..]);
        }
    }
    ("", &[])
}

fn split_keeping_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(idx, ch)| &text[idx..idx + ch.len_utf8()])
            .collect();
    }
    let mut pieces = Vec::new();
    let mut start = 0;
    for (idx, _) in text.match_indices(separator) {
        if idx > start {
            pieces.push(&text[start..idx]);
        }
        start = idx;
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces
}

fn push_joined(chunks: &mut Vec<String>, window: &[(&str, usize)]) {
    let joined: String = window.iter().map(|(piece, _)| *piece).collect();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::ChunkMetadata;

    #[test]
    fn short_text_is_single_trimmed_chunk() {
        let splitter = RecursiveSplitter::default();
        assert_eq!(splitter.split_text("  hello world \n"), vec!["hello world"]);
        assert!(splitter.split_text(" \n\n ").is_empty());
    }

    #[test]
    fn words_merge_up_to_chunk_size() {
        let splitter = RecursiveSplitter::new(10, 0).expect("splitter");
        assert_eq!(
            splitter.split_text("aaaa bbbb cccc"),
            vec!["aaaa bbbb", "cccc"]
        );
    }

    #[test]
    fn overlap_carries_trailing_pieces() {
        let splitter = RecursiveSplitter::new(10, 5).expect("splitter");
        assert_eq!(
            splitter.split_text("aaaa bbbb cccc"),
            vec!["aaaa bbbb", "bbbb cccc"]
        );
    }

    #[test]
    fn paragraphs_are_preferred_boundaries() {
        let splitter = RecursiveSplitter::new(12, 0).expect("splitter");
        assert_eq!(
            splitter.split_text("para one.\n\npara two."),
            vec!["para one.", "para two."]
        );
    }

    #[test]
    fn unbroken_text_falls_back_to_characters() {
        let splitter = RecursiveSplitter::new(4, 0).expect("splitter");
        assert_eq!(splitter.split_text("abcdefghij"), vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn chunks_never_exceed_size_for_ordinary_text() {
        let text = "Lorem ipsum dolor sit amet, consectetur adipiscing elit.\n".repeat(40);
        let splitter = RecursiveSplitter::new(100, 20).expect("splitter");
        let chunks = splitter.split_text(&text);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.chars().count() <= 100));
        assert!(chunks.iter().all(|c| !c.trim().is_empty()));
    }

    #[test]
    fn rejects_invalid_sizes() {
        assert!(matches!(RecursiveSplitter::new(0, 0), Err(DocQaError::Input(_))));
        assert!(matches!(RecursiveSplitter::new(10, 11), Err(DocQaError::Input(_))));
        assert!(RecursiveSplitter::new(10, 10).is_ok());
    }

    #[test]
    fn pages_propagate_metadata_and_skip_blank_text() {
        let splitter = RecursiveSplitter::new(10, 0).expect("splitter");
        let pages = vec![
            PageRecord::new("aaaa bbbb cccc", ChunkMetadata::for_page("a.pdf", "/d/a.pdf", 0)),
            PageRecord::new("   ", ChunkMetadata::for_page("a.pdf", "/d/a.pdf", 1)),
            PageRecord::new("dddd", ChunkMetadata::for_page("a.pdf", "/d/a.pdf", 2)),
        ];
        let chunks = splitter.split_pages(&pages);
        let summary: Vec<(&str, Option<u32>)> = chunks
            .iter()
            .map(|c| (c.content.as_str(), c.metadata.page))
            .collect();
        assert_eq!(
            summary,
            vec![("aaaa bbbb", Some(0)), ("cccc", Some(0)), ("dddd", Some(2))]
        );
    }
}
