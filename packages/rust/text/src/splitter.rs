//! Recursive character text splitter.
//!
//! Text is cut on the coarsest separator present (`\n\n`, then `\n`, then
//! ` `, then individual characters). Pieces that are still too long are cut
//! again with the next separator. Neighbouring pieces are then merged into
//! segments of at most `chunk_size` characters, each new segment starting with
//! up to `chunk_overlap` characters carried over from the previous one.
//!
//! Lengths are counted in `char`s, so multi-byte text never splits inside a
//! code point.

use std::collections::VecDeque;

use corpus_shared::{ChunkingConfig, Result};

/// Separators tried in order, coarsest first. The empty separator means
/// "split into characters" and always applies.
const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

/// Splits text into overlapping, bounded-length segments.
#[derive(Debug, Clone)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl TextSplitter {
    /// Build a splitter from validated chunking settings.
    pub fn new(config: &ChunkingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            chunk_size: config.chunk_size,
            chunk_overlap: config.chunk_overlap,
        })
    }

    /// Split `text` into segments. Blank text yields no segments.
    pub fn split(&self, text: &str) -> Vec<String> {
        self.split_with(text, &SEPARATORS)
    }

    fn split_with(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let mut chunks = Vec::new();

        let (separator, finer) = pick_separator(text, separators);
        let mut short: Vec<&str> = Vec::new();

        for piece in split_keeping_separator(text, separator) {
            if char_len(piece) < self.chunk_size {
                short.push(piece);
                continue;
            }

            if !short.is_empty() {
                chunks.extend(self.merge(&short));
                short.clear();
            }
            if finer.is_empty() {
                chunks.push(piece.to_string());
            } else {
                chunks.extend(self.split_with(piece, finer));
            }
        }

        if !short.is_empty() {
            chunks.extend(self.merge(&short));
        }
        chunks
    }

    /// Greedily pack short pieces into segments, carrying an overlap tail.
    fn merge(&self, pieces: &[&str]) -> Vec<String> {
        let mut segments = Vec::new();
        let mut window: VecDeque<&str> = VecDeque::new();
        let mut total = 0;

        for &piece in pieces {
            let len = char_len(piece);

            if total + len > self.chunk_size && !window.is_empty() {
                if let Some(segment) = join_trimmed(&window) {
                    segments.push(segment);
                }
                while total > self.chunk_overlap || (total + len > self.chunk_size && total > 0) {
                    let Some(front) = window.pop_front() else {
                        break;
                    };
                    total -= char_len(front);
                }
            }

            window.push_back(piece);
            total += len;
        }

        if let Some(segment) = join_trimmed(&window) {
            segments.push(segment);
        }
        segments
    }
}

/// First separator present in `text`, plus the finer ones left to try.
fn pick_separator<'s>(text: &str, separators: &'s [&'s str]) -> (&'s str, &'s [&'s str]) {
    for (i, &sep) in separators.iter().enumerate() {
        if sep.is_empty() {
            return (sep, &[]);
        }
        if text.contains(sep) {
            return (sep, &separators[i + 1..]);
        }
    }
    (separators.last().copied().unwrap_or(""), &[])
}

/// Split on `separator`, keeping it at the start of the following piece.
/// Empty pieces are dropped.
fn split_keeping_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(i, c)| &text[i..i + c.len_utf8()])
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

fn join_trimmed(window: &VecDeque<&str>) -> Option<String> {
    let joined: String = window.iter().copied().collect();
    let trimmed = joined.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}
