//! Core record definitions and their store-boundary translation.
//!
//! Defines [`ContentType`] (drives the chunking strategy), [`Provenance`]
//! (trust class, used as a ranking multiplier), [`Atom`], [`Source`] and
//! [`Engram`]. Rows are translated into these structs right at the query
//! site using the fixed column orders below; nothing untyped leaves the
//! store layer.

use rusqlite::Row;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::text::Strategy;

/// Column order of the `atoms` relation.
pub const ATOM_COLUMNS: &[&str] = &[
    "id",
    "content",
    "source",
    "source_id",
    "sequence",
    "type",
    "fingerprint",
    "provenance",
    "epochs",
    "embedding",
    "created_at",
];

/// Column order of the `sources` relation.
pub const SOURCE_COLUMNS: &[&str] = &["path", "hash", "total_atoms", "last_ingest"];

/// Column order of the `engrams` relation.
pub const ENGRAM_COLUMNS: &[&str] = &["key", "value", "updated_at"];

/// `SELECT` list matching [`ATOM_COLUMNS`], for use with [`Atom::from_row`].
pub const ATOM_SELECT: &str =
    "id, content, source, source_id, sequence, type, fingerprint, provenance, epochs, embedding, created_at";

/// Content classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    /// Source code, chunked on top-level lines.
    Code,
    /// Documents and notes, chunked on paragraphs and sentences.
    Prose,
    /// Chat transcripts, chunked like prose.
    Transcript,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Prose => "prose",
            Self::Transcript => "transcript",
        }
    }

    /// Chunking strategy for this content type.
    pub fn strategy(&self) -> Strategy {
        match self {
            Self::Code => Strategy::Code,
            Self::Prose | Self::Transcript => Strategy::Prose,
        }
    }

    /// Guess the content type from a file extension. `None` for unsupported files.
    pub fn from_path(path: &std::path::Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "rs" | "py" | "js" | "ts" | "tsx" | "jsx" | "go" | "c" | "h" | "cpp" | "hpp" | "cc"
            | "java" | "kt" | "rb" | "sh" | "sql" | "toml" | "yaml" | "yml" | "lua" | "cs"
            | "swift" => Some(Self::Code),
            "md" | "markdown" | "txt" | "rst" | "org" | "adoc" => Some(Self::Prose),
            "log" | "chat" | "jsonl" => Some(Self::Transcript),
            _ => None,
        }
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ContentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "code" => Ok(Self::Code),
            "prose" => Ok(Self::Prose),
            "transcript" => Ok(Self::Transcript),
            _ => Err(format!("unknown content type: {s}")),
        }
    }
}

/// Trust classification of an atom's origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Authored by the owner of the memory store.
    Sovereign,
    /// Scraped or imported from elsewhere.
    External,
    /// Held back: stored, tagged, never retrieved.
    Quarantine,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sovereign => "sovereign",
            Self::External => "external",
            Self::Quarantine => "quarantine",
        }
    }

    /// Trust level: sovereign 2, external 1, quarantine 0. An atom only
    /// absorbs duplicates from sources at or below its own level.
    pub fn trust(&self) -> u8 {
        match self {
            Self::Sovereign => 2,
            Self::External => 1,
            Self::Quarantine => 0,
        }
    }
}

/// SQL expression mapping the `provenance` column to [`Provenance::trust`].
pub const TRUST_SQL: &str =
    "CASE provenance WHEN 'sovereign' THEN 2 WHEN 'external' THEN 1 ELSE 0 END";

impl std::fmt::Display for Provenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Provenance {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sovereign" => Ok(Self::Sovereign),
            "external" => Ok(Self::External),
            "quarantine" => Ok(Self::Quarantine),
            _ => Err(format!("unknown provenance: {s}")),
        }
    }
}

/// An atom record, matching the `atoms` table plus its tag and bucket sets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Atom {
    /// UUID v7 primary key, never reused.
    pub id: String,
    /// Immutable text payload.
    pub content: String,
    /// Path (or other identifier) of the originating source.
    pub source: String,
    /// Ingestion run that created this atom.
    pub source_id: String,
    /// Position within the source; `(source, sequence)` is unique.
    pub sequence: i64,
    #[serde(rename = "type")]
    pub content_type: ContentType,
    /// 64-bit SimHash of `content`.
    pub fingerprint: u64,
    pub provenance: Provenance,
    /// Time markers this atom has been seen in.
    pub epochs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub created_at: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub buckets: BTreeSet<String>,
}

impl Atom {
    /// Build an atom from a row selected with [`ATOM_SELECT`]. Tags and buckets
    /// are left empty; callers hydrate them separately.
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let content_type: String = row.get(5)?;
        let provenance: String = row.get(7)?;
        let epochs: String = row.get(8)?;
        let embedding: Option<Vec<u8>> = row.get(9)?;
        Ok(Self {
            id: row.get(0)?,
            content: row.get(1)?,
            source: row.get(2)?,
            source_id: row.get(3)?,
            sequence: row.get(4)?,
            content_type: content_type
                .parse()
                .map_err(|e: String| conversion_error(5, e))?,
            fingerprint: fingerprint_from_sql(row.get(6)?),
            provenance: provenance
                .parse()
                .map_err(|e: String| conversion_error(7, e))?,
            epochs: serde_json::from_str(&epochs).unwrap_or_default(),
            embedding: embedding.and_then(|b| embedding_from_bytes(&b)),
            created_at: row.get(10)?,
            tags: BTreeSet::new(),
            buckets: BTreeSet::new(),
        })
    }

    /// Character count of the content, the unit retrieval budgets are measured in.
    pub fn char_len(&self) -> usize {
        self.content.chars().count()
    }
}

/// One ingested document or feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub path: String,
    /// Hex SimHash of the whole cleansed source.
    pub hash: String,
    pub total_atoms: u64,
    pub last_ingest: String,
}

impl Source {
    /// Build from a row selected in [`SOURCE_COLUMNS`] order.
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let total: i64 = row.get(2)?;
        Ok(Self {
            path: row.get(0)?,
            hash: row.get(1)?,
            total_atoms: total.max(0) as u64,
            last_ingest: row.get(3)?,
        })
    }
}

/// A durable key/value record for auxiliary state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Engram {
    pub key: String,
    pub value: serde_json::Value,
    pub updated_at: String,
}

/// Store a u64 fingerprint in SQLite's signed 64-bit integer, bit for bit.
pub fn fingerprint_to_sql(fp: u64) -> i64 {
    fp as i64
}

pub fn fingerprint_from_sql(v: i64) -> u64 {
    v as u64
}

/// Little-endian f32 encoding of an embedding. Empty vectors encode to `None`.
pub fn embedding_to_bytes(embedding: &[f32]) -> Option<Vec<u8>> {
    if embedding.is_empty() {
        return None;
    }
    Some(embedding.iter().flat_map(|x| x.to_le_bytes()).collect())
}

/// Decode an embedding blob. Empty, misaligned, or all-zero blobs decode to `None`.
pub fn embedding_from_bytes(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.is_empty() || bytes.len() % 4 != 0 {
        return None;
    }
    let v: Vec<f32> = bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    if v.iter().all(|x| *x == 0.0) {
        None
    } else {
        Some(v)
    }
}

pub(crate) fn conversion_error(column: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        rusqlite::types::Type::Text,
        message.into(),
    )
}
