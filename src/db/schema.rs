//! SQL DDL for all strata tables.
//!
//! Defines `sources`, `atoms`, `atoms_fts` (FTS5, porter-stemmed),
//! `atom_tags`, `atom_buckets`, `engrams`, and `schema_meta`. All DDL uses
//! `IF NOT EXISTS` for idempotent initialization.

use rusqlite::Connection;

const SCHEMA_SQL: &str = r#"
-- One row per ingested document or feed
CREATE TABLE IF NOT EXISTS sources (
    path TEXT PRIMARY KEY,
    hash TEXT NOT NULL,
    total_atoms INTEGER NOT NULL DEFAULT 0,
    last_ingest TEXT NOT NULL
);

-- Atoms: the unit of memory
CREATE TABLE IF NOT EXISTS atoms (
    id TEXT PRIMARY KEY,
    content TEXT NOT NULL,
    source TEXT NOT NULL,
    source_id TEXT NOT NULL,
    sequence INTEGER NOT NULL,
    type TEXT NOT NULL CHECK(type IN ('code','prose','transcript')),
    fingerprint INTEGER NOT NULL,
    provenance TEXT NOT NULL DEFAULT 'sovereign' CHECK(provenance IN ('sovereign','external','quarantine')),
    epochs TEXT NOT NULL DEFAULT '[]',
    embedding BLOB,
    created_at TEXT NOT NULL,
    UNIQUE(source, sequence)
);

CREATE INDEX IF NOT EXISTS idx_atoms_fingerprint ON atoms(fingerprint);
CREATE INDEX IF NOT EXISTS idx_atoms_source_id ON atoms(source_id);
CREATE INDEX IF NOT EXISTS idx_atoms_provenance ON atoms(provenance);

-- Content is immutable once committed; corrections are new atoms
CREATE TRIGGER IF NOT EXISTS atoms_content_immutable
BEFORE UPDATE OF content ON atoms
BEGIN
    SELECT RAISE(ABORT, 'atom content is immutable');
END;

-- Lexical anchor index (stemmed)
CREATE VIRTUAL TABLE IF NOT EXISTS atoms_fts USING fts5(
    content,
    id UNINDEXED,
    content='atoms',
    content_rowid='rowid',
    tokenize='porter unicode61'
);

-- Labels used by the associative walk
CREATE TABLE IF NOT EXISTS atom_tags (
    atom_id TEXT NOT NULL REFERENCES atoms(id) ON DELETE CASCADE,
    tag TEXT NOT NULL COLLATE NOCASE,
    PRIMARY KEY (atom_id, tag)
);

CREATE INDEX IF NOT EXISTS idx_atom_tags_tag ON atom_tags(tag);

CREATE TABLE IF NOT EXISTS atom_buckets (
    atom_id TEXT NOT NULL REFERENCES atoms(id) ON DELETE CASCADE,
    bucket TEXT NOT NULL,
    PRIMARY KEY (atom_id, bucket)
);

CREATE INDEX IF NOT EXISTS idx_atom_buckets_bucket ON atom_buckets(bucket);

-- Auxiliary durable key/value state
CREATE TABLE IF NOT EXISTS engrams (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Schema metadata
CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Initialize all schema tables. Idempotent (uses IF NOT EXISTS).
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', '1')",
        [],
    )?;

    Ok(())
}
