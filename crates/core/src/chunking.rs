use crate::error::RagError;
use crate::models::TextChunk;
use serde::{Deserialize, Serialize};

pub const DEFAULT_CHUNK_MAX_CHARS: usize = 1_000;
pub const DEFAULT_CHUNK_OVERLAP_CHARS: usize = 200;

const RECURSIVE_SEPARATORS: [&str; 3] = ["\n\n", "\n", " "];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitStrategy {
    /// Fixed-stride character windows. Lossless: dropping each chunk's leading
    /// overlap and concatenating yields the input.
    #[default]
    Window,
    /// Prefers paragraph, line and word boundaries; whitespace at the cut points is
    /// not preserved.
    Recursive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    pub overlap_chars: usize,
    pub strategy: SplitStrategy,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: DEFAULT_CHUNK_MAX_CHARS,
            overlap_chars: DEFAULT_CHUNK_OVERLAP_CHARS,
            strategy: SplitStrategy::Window,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), RagError> {
        if self.max_chars == 0 {
            return Err(RagError::Validation(
                "chunk size must be greater than zero".to_string(),
            ));
        }
        if self.overlap_chars >= self.max_chars {
            return Err(RagError::Validation(format!(
                "chunk overlap {} must be smaller than chunk size {}",
                self.overlap_chars, self.max_chars
            )));
        }
        Ok(())
    }
}

/// Splits `text` into numbered chunks using the configured strategy.
pub fn split_text(text: &str, config: ChunkingConfig) -> Result<Vec<TextChunk>, RagError> {
    config.validate()?;

    let pieces = match config.strategy {
        SplitStrategy::Window => chunk_by_window(text, config.max_chars, config.overlap_chars),
        SplitStrategy::Recursive => {
            chunk_recursively(text, config.max_chars, config.overlap_chars)
        }
    };

    Ok(pieces
        .into_iter()
        .enumerate()
        .map(|(index, text)| TextChunk {
            id: index as u64,
            text,
        })
        .collect())
}

pub fn chunk_by_window(text: &str, max_chars: usize, overlap_chars: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut chunks = Vec::new();
    if chars.is_empty() || max_chars == 0 {
        return chunks;
    }

    let stride = max_chars.saturating_sub(overlap_chars).max(1);
    let mut start = 0;
    while start < chars.len() {
        let end = (start + max_chars).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start = start.saturating_add(stride);
    }

    chunks
}

/// Rebuilds the source text from window chunks produced with `overlap_chars`.
pub fn join_chunks(chunks: &[TextChunk], overlap_chars: usize) -> String {
    let mut joined = String::new();
    for (index, chunk) in chunks.iter().enumerate() {
        if index == 0 {
            joined.push_str(&chunk.text);
        } else {
            joined.extend(chunk.text.chars().skip(overlap_chars));
        }
    }
    joined
}

pub fn chunk_recursively(text: &str, max_chars: usize, overlap_chars: usize) -> Vec<String> {
    split_on_separators(text, &RECURSIVE_SEPARATORS, max_chars, overlap_chars)
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

fn split_on_separators(
    text: &str,
    separators: &[&str],
    max_chars: usize,
    overlap_chars: usize,
) -> Vec<String> {
    let position = separators
        .iter()
        .position(|separator| text.contains(separator));

    let (separator, remaining) = match position {
        Some(index) => (separators[index], &separators[index + 1..]),
        None => ("", &separators[separators.len()..]),
    };

    let splits: Vec<String> = if separator.is_empty() {
        text.chars().map(String::from).collect()
    } else {
        text.split(separator)
            .filter(|piece| !piece.is_empty())
            .map(str::to_string)
            .collect()
    };

    let mut chunks = Vec::new();
    let mut pending = Vec::new();

    for split in splits {
        if char_len(&split) <= max_chars {
            pending.push(split);
            continue;
        }

        if !pending.is_empty() {
            chunks.extend(merge_splits(&pending, separator, max_chars, overlap_chars));
            pending.clear();
        }

        if remaining.is_empty() {
            chunks.extend(chunk_by_window(&split, max_chars, overlap_chars));
        } else {
            chunks.extend(split_on_separators(
                &split,
                remaining,
                max_chars,
                overlap_chars,
            ));
        }
    }

    if !pending.is_empty() {
        chunks.extend(merge_splits(&pending, separator, max_chars, overlap_chars));
    }

    chunks
}

/// Greedily packs splits into chunks of at most `max_chars`, carrying a tail of up to
/// `overlap_chars` from each emitted chunk into the next.
fn merge_splits(
    splits: &[String],
    separator: &str,
    max_chars: usize,
    overlap_chars: usize,
) -> Vec<String> {
    let separator_len = char_len(separator);
    let mut chunks = Vec::new();
    let mut window: Vec<&str> = Vec::new();
    let mut total = 0usize;

    for split in splits {
        let split_len = char_len(split);
        let joined_len = if window.is_empty() { 0 } else { separator_len };

        if total + split_len + joined_len > max_chars && !window.is_empty() {
            push_joined(&mut chunks, &window, separator);

            while total > overlap_chars
                || (total + split_len + if window.is_empty() { 0 } else { separator_len }
                    > max_chars
                    && total > 0)
            {
                let removed = window.remove(0);
                total -= char_len(removed);
                if !window.is_empty() {
                    total -= separator_len;
                }
            }
        }

        if !window.is_empty() {
            total += separator_len;
        }
        total += split_len;
        window.push(split);
    }

    push_joined(&mut chunks, &window, separator);
    chunks
}

fn push_joined(chunks: &mut Vec<String>, window: &[&str], separator: &str) {
    let joined = window.join(separator);
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        chunks.push(trimmed.to_string());
    }
}
