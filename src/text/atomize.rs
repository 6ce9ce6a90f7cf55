//! Content-aware chunking of cleansed text into atoms.
//!
//! Two strategies:
//!
//! - **Code**: line-based accumulation that flushes at top-level lines once a
//!   soft size is reached, or before a line that would cross a hard size. This
//!   is a heuristic for function/class boundaries, not a parser; a line is
//!   top-level when it starts with a non-whitespace character and is not just
//!   closing brackets.
//! - **Prose**: blank-line paragraphs; paragraphs over the soft size are
//!   re-packed sentence by sentence.
//!
//! Sizes are counted in characters. They are targets: a single line (code) or
//! sentence (prose) longer than the limit becomes one oversized atom rather
//! than being cut mid-way.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Code chunk size above which a top-level line starts a new atom.
pub const CODE_SOFT_LIMIT: usize = 500;
/// Code chunk size that a new line may never push a chunk past.
pub const CODE_HARD_LIMIT: usize = 2000;
/// Prose paragraph size above which sentence packing kicks in.
pub const PROSE_SOFT_LIMIT: usize = 800;

static PARAGRAPH_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\n\s*\n").expect("valid paragraph regex"));

/// Chunking strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Code,
    Prose,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Prose => "prose",
        }
    }
}

impl std::str::FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "code" => Ok(Self::Code),
            "prose" => Ok(Self::Prose),
            _ => Err(format!("unknown strategy: {s}")),
        }
    }
}

/// Split `content` into ordered atoms using `strategy`.
///
/// Atoms are trimmed; whitespace-only spans are dropped. Concatenating the
/// result preserves every non-whitespace character of the input in order.
pub fn atomize(content: &str, strategy: Strategy) -> Vec<String> {
    match strategy {
        Strategy::Code => split_code(content),
        Strategy::Prose => split_prose(content),
    }
}

fn split_code(content: &str) -> Vec<String> {
    let mut atoms = Vec::new();
    let mut chunk = String::new();
    let mut chunk_chars = 0usize;

    for line in content.split_inclusive('\n') {
        let line_chars = line.chars().count();

        if !chunk.trim().is_empty() {
            let soft_break = chunk_chars > CODE_SOFT_LIMIT && is_top_level(line);
            let hard_break = chunk_chars + line_chars > CODE_HARD_LIMIT;
            if soft_break || hard_break {
                flush(&mut atoms, &mut chunk);
                chunk_chars = 0;
            }
        }

        chunk.push_str(line);
        chunk_chars += line_chars;
    }

    flush(&mut atoms, &mut chunk);
    atoms
}

/// Top-level: starts at column zero and is not purely a block closer (`}`, `});`, `],` ...).
fn is_top_level(line: &str) -> bool {
    let starts_flush = line.chars().next().is_some_and(|c| !c.is_whitespace());
    if !starts_flush {
        return false;
    }
    let body = line.trim_end().trim_end_matches([';', ',']);
    !body.chars().all(|c| matches!(c, '}' | ']' | ')'))
}

fn split_prose(content: &str) -> Vec<String> {
    let mut atoms = Vec::new();

    for paragraph in PARAGRAPH_BREAK.split(content) {
        let paragraph = paragraph.trim();
        if paragraph.is_empty() {
            continue;
        }
        if paragraph.chars().count() <= PROSE_SOFT_LIMIT {
            atoms.push(paragraph.to_string());
            continue;
        }

        let mut chunk = String::new();
        let mut chunk_chars = 0usize;
        for sentence in split_sentences(paragraph) {
            let sentence_chars = sentence.chars().count();
            if !chunk.trim().is_empty() && chunk_chars + sentence_chars > PROSE_SOFT_LIMIT {
                flush(&mut atoms, &mut chunk);
                chunk_chars = 0;
            }
            chunk.push_str(sentence);
            chunk_chars += sentence_chars;
        }
        flush(&mut atoms, &mut chunk);
    }

    atoms
}

/// Split at runs of `.`, `!` or `?` that are followed by whitespace.
///
/// The whitespace stays with the preceding sentence; a tail without terminal
/// punctuation is returned as the last sentence. The returned slices cover
/// `text` exactly.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0usize;
    let mut chars = text.char_indices().peekable();

    while let Some((_, c)) = chars.next() {
        if !is_terminal(c) {
            continue;
        }
        while chars.next_if(|&(_, n)| is_terminal(n)).is_some() {}

        if chars.peek().is_some_and(|&(_, n)| n.is_whitespace()) {
            let mut end = text.len();
            while let Some(&(j, n)) = chars.peek() {
                if !n.is_whitespace() {
                    end = j;
                    break;
                }
                chars.next();
            }
            sentences.push(&text[start..end]);
            start = end;
        }
    }

    if start < text.len() {
        sentences.push(&text[start..]);
    }
    sentences
}

fn is_terminal(c: char) -> bool {
    matches!(c, '.' | '!' | '?')
}

fn flush(atoms: &mut Vec<String>, chunk: &mut String) {
    let trimmed = chunk.trim();
    if !trimmed.is_empty() {
        atoms.push(trimmed.to_string());
    }
    chunk.clear();
}
