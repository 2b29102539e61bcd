use crate::error::IngestError;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Letter runs, short digit runs and punctuation runs, each carrying its
/// leading whitespace, plus bare whitespace at the end of the text. Every
/// character of the input lands in exactly one piece.
const PRETOKENIZE_PATTERN: &str = r"\s*[\p{L}\p{M}']+|\s*\p{N}{1,3}|\s*[^\s\p{L}\p{M}\p{N}]+|\s+";

pub const DEFAULT_CHUNK_TOKENS: usize = 100;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub target_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_tokens: DEFAULT_CHUNK_TOKENS,
        }
    }
}

pub trait Tokenizer: Send + Sync {
    /// Splits `text` into token pieces whose concatenation is `text`.
    fn pieces<'a>(&self, text: &'a str) -> Vec<&'a str>;

    fn count(&self, text: &str) -> usize {
        self.pieces(text).len()
    }
}

#[derive(Debug, Clone)]
pub struct RegexTokenizer {
    pattern: Regex,
}

impl RegexTokenizer {
    pub fn new() -> Result<Self, IngestError> {
        Self::with_pattern(PRETOKENIZE_PATTERN)
    }

    pub fn with_pattern(pattern: &str) -> Result<Self, IngestError> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
        })
    }
}

impl Tokenizer for RegexTokenizer {
    fn pieces<'a>(&self, text: &'a str) -> Vec<&'a str> {
        let mut pieces = Vec::new();
        let mut last = 0;

        for found in self.pattern.find_iter(text) {
            if found.start() > last {
                pieces.push(&text[last..found.start()]);
            }
            pieces.push(found.as_str());
            last = found.end();
        }

        if last < text.len() {
            pieces.push(&text[last..]);
        }

        pieces
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Boundary {
    Word,
    Sentence,
    Line,
    Paragraph,
}

fn boundary_before(previous: &str, next: &str) -> Option<Boundary> {
    let leading = &next[..next.len() - next.trim_start().len()];
    if leading.is_empty() {
        return None;
    }
    if leading.contains("\n\n") || leading.contains("\r\n\r\n") {
        return Some(Boundary::Paragraph);
    }
    if leading.contains('\n') {
        return Some(Boundary::Line);
    }

    let closed = previous
        .trim_end()
        .trim_end_matches(['"', '\'', '\u{201d}', '\u{2019}', ')']);
    if closed.ends_with(['.', '!', '?']) {
        return Some(Boundary::Sentence);
    }

    Some(Boundary::Word)
}

/// Best place to end a chunk, as the offset of the piece that opens the next
/// one. `candidates` holds the pieces of the chunk plus the first piece past
/// the budget. Only the back half is searched so chunks stay near the target.
fn best_cut(candidates: &[&str]) -> Option<usize> {
    let floor = ((candidates.len() - 1) / 2).max(1);
    let mut best: Option<(Boundary, usize)> = None;

    for offset in floor..candidates.len() {
        if let Some(boundary) = boundary_before(candidates[offset - 1], candidates[offset]) {
            if best.map_or(true, |(current, _)| boundary >= current) {
                best = Some((boundary, offset));
            }
        }
    }

    best.map(|(_, offset)| offset)
}

/// Splits `text` into non-overlapping passages of at most
/// `config.target_tokens` tokens, preferring paragraph, line, sentence and
/// word boundaries in that order.
pub fn chunk_text(
    text: &str,
    config: &ChunkingConfig,
    tokenizer: &dyn Tokenizer,
) -> Result<Vec<String>, IngestError> {
    if config.target_tokens == 0 {
        return Err(IngestError::InvalidChunkConfig(
            "target_tokens must be at least 1".to_string(),
        ));
    }

    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    let pieces = tokenizer.pieces(text);
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < pieces.len() {
        let end = (start + config.target_tokens).min(pieces.len());
        let cut = if end == pieces.len() {
            end
        } else {
            best_cut(&pieces[start..=end]).map_or(end, |offset| start + offset)
        };

        let chunk = pieces[start..cut].concat();
        let trimmed = chunk.trim();
        if !trimmed.is_empty() {
            chunks.push(trimmed.to_string());
        }
        start = cut;
    }

    Ok(chunks)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChunkingStats {
    pub count: usize,
    pub avg_chars: usize,
}

pub fn chunking_stats(chunks: &[String]) -> ChunkingStats {
    let total: usize = chunks.iter().map(|chunk| chunk.chars().count()).sum();
    ChunkingStats {
        count: chunks.len(),
        avg_chars: if chunks.is_empty() {
            0
        } else {
            total / chunks.len()
        },
    }
}
