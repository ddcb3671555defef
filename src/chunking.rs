use crate::error::{RagError, Result};

pub const DEFAULT_CHUNK_SIZE: usize = 2000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 250;

/// Represents a text chunk with metadata
#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    /// Exact slice of the source text
    pub text: String,
    /// Zero-based position of this chunk within its document
    pub index: usize,
    /// Byte offset of `text` in the source text
    pub start_position: usize,
    /// Estimated token count for this chunk
    pub token_count: usize,
}

/// Chunk sizing, measured in characters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub max_size: usize,
    pub overlap: usize,
}

impl ChunkingConfig {
    pub fn new(max_size: usize, overlap: usize) -> Result<Self> {
        if max_size == 0 {
            return Err(RagError::Configuration(
                "chunk size must be greater than zero".to_string(),
            ));
        }
        if overlap >= max_size {
            return Err(RagError::Configuration(format!(
                "chunk overlap ({}) must be smaller than chunk size ({})",
                overlap, max_size
            )));
        }
        Ok(ChunkingConfig { max_size, overlap })
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        ChunkingConfig {
            max_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

/// Split text into overlapping chunks and return only their contents
pub fn chunk(text: &str, max_size: usize, overlap: usize) -> Vec<String> {
    let config = ChunkingConfig { max_size, overlap };
    split_into_chunks(text, &config)
        .into_iter()
        .map(|c| c.text)
        .collect()
}

/// Split text into sentence-bounded chunks of at most `max_size` characters.
///
/// Consecutive chunks share up to `overlap` characters, cut at a word start. A sentence
/// longer than `max_size` becomes a chunk of its own instead of being truncated.
pub fn split_into_chunks(text: &str, config: &ChunkingConfig) -> Vec<TextChunk> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let chars: Vec<char> = text.chars().collect();
    // byte offset of every char index, plus the end of the text
    let byte_offsets: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let boundaries = sentence_boundaries(&chars);
    let total = chars.len();
    let max_size = config.max_size.max(1);

    let mut chunks = Vec::new();
    let mut start = 0;
    let mut prev_end = 0;

    loop {
        let end = match furthest_fit(&boundaries, start, max_size).filter(|&e| e > prev_end) {
            Some(end) => end,
            None => {
                // The overlap left no room for another sentence
                start = prev_end;
                furthest_fit(&boundaries, start, max_size)
                    .unwrap_or_else(|| next_boundary(&boundaries, start))
            }
        };

        let slice = &text[byte_offsets[start]..byte_offsets[end]];
        chunks.push(TextChunk {
            text: slice.to_string(),
            index: chunks.len(),
            start_position: byte_offsets[start],
            token_count: estimate_token_count(slice),
        });

        if end >= total {
            break;
        }
        start = overlap_start(&chars, start, end, config.overlap);
        prev_end = end;
    }

    chunks
}

/// Char indices where a new sentence begins, always ending with the text length.
/// Whitespace after a sentence belongs to that sentence, so the spans tile the text.
fn sentence_boundaries(chars: &[char]) -> Vec<usize> {
    let total = chars.len();
    let mut boundaries = Vec::new();
    let mut i = 0;

    while i < total {
        let c = chars[i];
        let terminator = matches!(c, '.' | '!' | '?');
        let paragraph = c == '\n' && chars.get(i + 1) == Some(&'\n');

        if terminator || paragraph {
            let mut j = i + 1;
            if terminator {
                while j < total && matches!(chars[j], '"' | '\'' | ')' | ']' | '”' | '’') {
                    j += 1;
                }
            }
            if j < total && (paragraph || chars[j].is_whitespace()) {
                while j < total && chars[j].is_whitespace() {
                    j += 1;
                }
                if j < total {
                    boundaries.push(j);
                }
                i = j;
                continue;
            }
        }
        i += 1;
    }

    boundaries.push(total);
    boundaries
}

/// Furthest boundary after `start` that keeps the chunk within `max_size` chars
fn furthest_fit(boundaries: &[usize], start: usize, max_size: usize) -> Option<usize> {
    let idx = boundaries.partition_point(|&b| b <= start + max_size);
    match idx.checked_sub(1).map(|i| boundaries[i]) {
        Some(end) if end > start => Some(end),
        _ => None,
    }
}

fn next_boundary(boundaries: &[usize], start: usize) -> usize {
    let idx = boundaries.partition_point(|&b| b <= start);
    boundaries[idx.min(boundaries.len() - 1)]
}

/// Start of the next chunk: `overlap` chars back from `end`, moved forward to a word start
fn overlap_start(chars: &[char], chunk_start: usize, end: usize, overlap: usize) -> usize {
    let mut pos = end.saturating_sub(overlap).max(chunk_start);
    while pos < end && pos > 0 && !chars[pos - 1].is_whitespace() {
        pos += 1;
    }
    while pos < end && chars[pos].is_whitespace() {
        pos += 1;
    }
    pos
}

/// Calculate approximate token count for a text
/// This is a very simple estimation - words plus punctuation
pub fn estimate_token_count(text: &str) -> usize {
    let words = text.split_whitespace().count();
    let punctuation = text.chars().filter(|c| c.is_ascii_punctuation()).count();
    words + punctuation
}
