//! Overlapping character chunks for the vector index.

use serde::{Deserialize, Serialize};

use crate::core::config::settings::RetrievalSettings;

/// A text chunk with source information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextChunk {
    /// The text content
    pub text: String,
    /// Source identifier (file name, URL, ...)
    pub source: String,
    /// Character offset in original document
    pub start_offset: usize,
    /// Chunk index within the source
    pub chunk_index: usize,
}

#[derive(Debug, Clone)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl TextSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            chunk_overlap,
        }
    }

    pub fn from_settings(settings: &RetrievalSettings) -> Self {
        Self::new(settings.chunk_size, settings.chunk_overlap)
    }

    /// Splits `text` into windows of at most `chunk_size` characters, each
    /// starting `chunk_overlap` characters before the previous one ended.
    /// Windows are cut at a paragraph or sentence end when one falls in
    /// their last fifth.
    pub fn split(&self, text: &str, source: &str) -> Vec<TextChunk> {
        let chars: Vec<char> = text.chars().collect();
        let total_chars = chars.len();

        let mut chunks = Vec::new();
        let mut start = 0;

        while start < total_chars {
            let mut end = (start + self.chunk_size).min(total_chars);
            if end < total_chars {
                if let Some(cut) = find_boundary(&chars[start..end]) {
                    end = start + cut;
                }
            }

            let piece: String = chars[start..end].iter().collect();
            let trimmed = piece.trim();
            if !trimmed.is_empty() {
                chunks.push(TextChunk {
                    text: trimmed.to_string(),
                    source: source.to_string(),
                    start_offset: start,
                    chunk_index: chunks.len(),
                });
            }

            if end >= total_chars {
                break;
            }

            let next = end.saturating_sub(self.chunk_overlap);
            start = if next > start { next } else { end };
        }

        chunks
    }
}

/// Position just after the best break in the last fifth of `window`.
fn find_boundary(window: &[char]) -> Option<usize> {
    let search_start = (window.len() * 4) / 5;

    for i in (search_start.max(1)..window.len()).rev() {
        if window[i] == '\n' && window[i - 1] == '\n' {
            return Some(i + 1);
        }
    }

    for i in (search_start..window.len()).rev() {
        let c = window[i];
        if matches!(c, '\n' | '。' | '！' | '？' | '；') {
            return Some(i + 1);
        }
        let followed_by_space = window.get(i + 1).is_some_and(|next| next.is_whitespace());
        if matches!(c, '.' | '!' | '?') && followed_by_space {
            return Some(i + 1);
        }
    }

    None
}
