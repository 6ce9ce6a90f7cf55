//! Local-first memory substrate for a personal knowledge engine.
//!
//! strata turns ingested text (chat transcripts, documents, source code) into
//! deduplicated, tagged, independently retrievable **atoms**, and answers
//! queries by combining exact lexical search with an associative walk over
//! shared tags and buckets.
//!
//! # Pipeline
//!
//! | Stage | Module | What it does |
//! |-------|--------|--------------|
//! | Cleanse | [`text::cleanse`] | Undo transport escapes (`\n`, `\"`, `\\`) in one pass |
//! | Atomize | [`text::atomize`] | Split code on top-level lines, prose on paragraphs and sentences |
//! | Fingerprint | [`text::fingerprint`] | 64-bit SimHash; near-duplicates differ in few bits |
//! | Ingest | [`memory::ingest`] | Dedup, write each atom, read it back before acknowledging |
//! | Retrieve | [`memory::retrieve`] | FTS5 anchors (70 % of budget), then a tag/bucket walk (30 %) |
//! | Infect | [`memory::infect`] | Discover tags with a model, apply them everywhere deterministically |
//!
//! # Architecture
//!
//! - **Storage**: SQLite with FTS5 (porter-stemmed) for anchors; tags and
//!   buckets in their own indexed relations for the walk
//! - **Reasoning**: any OpenAI-compatible chat endpoint, optional
//! - **Transport**: MCP over stdio, plus a CLI
//!
//! # Modules
//!
//! - [`config`]: Configuration loading from TOML files and environment variables
//! - [`db`]: SQLite initialization, schema, migrations, health checks, backup records
//! - [`text`]: Pure text processing: cleanse, atomize, fingerprint
//! - [`memory`]: Ingestion, retrieval, tag infection, engrams, statistics
//! - [`reasoning`]: Reasoning collaborator clients and tag discovery

pub mod cancel;
pub mod config;
pub mod db;
pub mod error;
pub mod memory;
pub mod reasoning;
pub mod text;

pub use cancel::CancellationToken;
