//! Write path: cleanse, atomize, fingerprint, dedup, write-then-verify.
//!
//! [`ingest`] does the work; [`ingest_text`] and [`ingest_file`] wrap it. Input is validated and chunked before
//! anything touches the store. Each surviving atom is then written in its own
//! transaction (atom row, FTS row, buckets) and read back before it counts as
//! created. A failure on one atom is retried, then recorded, and the run moves
//! on; atoms already committed stay committed.

use anyhow::{anyhow, bail, Context, Result};
use rusqlite::{named_params, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::Path;

use crate::cancel::CancellationToken;
use crate::config::IngestConfig;
use crate::error::IngestError;
use crate::memory::retry::RetryPolicy;
use crate::memory::types::{
    conversion_error, fingerprint_from_sql, fingerprint_to_sql, ContentType, Provenance,
    TRUST_SQL,
};
use crate::text::{atomize, cleanse, distance, fingerprint};

/// What to ingest.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    /// Raw text, possibly still transport-escaped.
    pub content: String,
    /// Source path or identifier.
    pub source: String,
    /// `"code"`, `"prose"` or `"transcript"`.
    pub content_type: String,
    pub provenance: Option<Provenance>,
    /// Extra buckets for every atom of this run, on top of the configured defaults.
    pub buckets: Vec<String>,
    /// Time marker for this run. Defaults to today's date.
    pub epoch: Option<String>,
}

impl IngestRequest {
    pub fn new(content: impl Into<String>, source: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            source: source.into(),
            content_type: content_type.into(),
            provenance: None,
            buckets: Vec::new(),
            epoch: None,
        }
    }
}

/// Pipeline knobs, usually built from [`IngestConfig`].
#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub dedup_distance: u32,
    pub default_provenance: Provenance,
    pub default_buckets: Vec<String>,
    pub retry: RetryPolicy,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self::from(&IngestConfig::default())
    }
}

impl From<&IngestConfig> for IngestOptions {
    fn from(config: &IngestConfig) -> Self {
        let default_provenance = config.default_provenance.parse().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "invalid default provenance, using sovereign");
            Provenance::Sovereign
        });
        Self {
            dedup_distance: config.dedup_distance,
            default_provenance,
            default_buckets: config.default_buckets.clone(),
            retry: RetryPolicy::new(config.max_write_retries, config.retry_backoff_ms),
        }
    }
}

/// An atom that could not be persisted after all retries.
#[derive(Debug, Clone, Serialize)]
pub struct FailedAtom {
    pub sequence: i64,
    pub error: String,
}

/// A duplicate whose existing atom could not be extended with this run's
/// epoch and buckets. Re-ingesting the source retries the merge.
#[derive(Debug, Clone, Serialize)]
pub struct FailedMerge {
    pub atom_id: String,
    pub error: String,
}

/// Outcome of one ingestion run.
#[derive(Debug, Clone, Serialize)]
pub struct IngestResult {
    pub source: String,
    /// UUID of this ingestion run.
    pub source_id: String,
    pub atoms_created: usize,
    pub atoms_deduped: usize,
    pub failed: Vec<FailedAtom>,
    pub merge_failed: Vec<FailedMerge>,
    /// Atoms stored for this source after the run.
    pub total_atoms: u64,
    /// `false` when the cleansed source hashes the same as last time.
    pub source_changed: bool,
    pub cancelled: bool,
}

/// An atom already stored for the session's source.
#[derive(Debug, Clone)]
struct SeenAtom {
    fingerprint: u64,
    id: String,
    sequence: i64,
    provenance: Provenance,
}

/// Per-source ingestion state: the sequence counter and the fingerprints
/// already present for the source. One session per run, passed explicitly.
///
/// Sequences left unused by failed writes are gaps. A later atom that follows
/// the atom right before a gap fills it, so recovered atoms keep their place
/// in source order.
#[derive(Debug)]
pub struct SourceSession {
    path: String,
    previous_hash: Option<String>,
    next_sequence: i64,
    used: BTreeSet<i64>,
    seen: Vec<SeenAtom>,
}

impl SourceSession {
    /// Load the source's previous hash, its highest sequence and its stored fingerprints.
    pub fn open(conn: &Connection, path: &str) -> Result<Self> {
        let previous_hash: Option<String> = conn
            .query_row(
                "SELECT hash FROM sources WHERE path = :path",
                named_params! { ":path": path },
                |row| row.get(0),
            )
            .optional()?;

        let max_sequence: Option<i64> = conn.query_row(
            "SELECT MAX(sequence) FROM atoms WHERE source = :path",
            named_params! { ":path": path },
            |row| row.get(0),
        )?;

        let mut stmt = conn.prepare(
            "SELECT fingerprint, id, sequence, provenance FROM atoms WHERE source = :path ORDER BY sequence",
        )?;
        let seen = stmt
            .query_map(named_params! { ":path": path }, |row| {
                let provenance: String = row.get(3)?;
                Ok(SeenAtom {
                    fingerprint: fingerprint_from_sql(row.get(0)?),
                    id: row.get(1)?,
                    sequence: row.get(2)?,
                    provenance: provenance
                        .parse()
                        .map_err(|e: String| conversion_error(3, e))?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            path: path.to_string(),
            previous_hash,
            next_sequence: max_sequence.map_or(0, |s| s + 1),
            used: seen.iter().map(|a| a.sequence).collect(),
            seen,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn previous_hash(&self) -> Option<&str> {
        self.previous_hash.as_deref()
    }

    /// The sequence the next created atom will get.
    pub fn peek_sequence(&self) -> i64 {
        self.next_sequence
    }

    /// Next sequence for an atom placed after `after`: the gap right behind
    /// it when one exists, otherwise the end of the source.
    fn take_sequence(&mut self, after: Option<i64>) -> i64 {
        let gap = after
            .map(|prev| prev + 1)
            .filter(|seq| *seq < self.next_sequence && !self.used.contains(seq));
        let seq = gap.unwrap_or_else(|| {
            let seq = self.next_sequence;
            self.next_sequence += 1;
            seq
        });
        self.used.insert(seq);
        seq
    }

    /// Closest atom already seen for this source within `max_distance`, among
    /// atoms at least as trusted as `provenance`.
    fn near_duplicate(&self, fp: u64, max_distance: u32, provenance: Provenance) -> Option<&SeenAtom> {
        self.seen
            .iter()
            .filter(|a| a.provenance.trust() >= provenance.trust())
            .map(|a| (distance(a.fingerprint, fp), a))
            .filter(|(d, _)| *d <= max_distance)
            .min_by_key(|(d, _)| *d)
            .map(|(_, a)| a)
    }

    fn record(&mut self, fp: u64, id: String, sequence: i64, provenance: Provenance) {
        self.seen.push(SeenAtom {
            fingerprint: fp,
            id,
            sequence,
            provenance,
        });
    }
}

/// Ingest text with default options and no cancellation.
pub fn ingest_text(
    conn: &mut Connection,
    raw_text: &str,
    source_path: &str,
    content_type: &str,
    opts: &IngestOptions,
) -> Result<IngestResult, IngestError> {
    let request = IngestRequest::new(raw_text, source_path, content_type);
    ingest(conn, &request, opts, &CancellationToken::new())
}

/// Read a file and ingest it with `request`'s metadata; the file path becomes
/// the source path. Missing files and non-UTF-8 content fail as `Unreadable`
/// before anything is written.
pub fn ingest_file(
    conn: &mut Connection,
    path: &Path,
    mut request: IngestRequest,
    opts: &IngestOptions,
    cancel: &CancellationToken,
) -> Result<IngestResult, IngestError> {
    let source = path.to_string_lossy().into_owned();
    let unreadable = |reason: String| IngestError::Unreadable {
        path: source.clone(),
        reason,
    };

    let bytes = std::fs::read(path).map_err(|e| unreadable(e.to_string()))?;
    request.content = String::from_utf8(bytes).map_err(|e| unreadable(format!("not UTF-8: {e}")))?;
    request.source = source;
    ingest(conn, &request, opts, cancel)
}

/// Full ingestion of one source.
pub fn ingest(
    conn: &mut Connection,
    request: &IngestRequest,
    opts: &IngestOptions,
    cancel: &CancellationToken,
) -> Result<IngestResult, IngestError> {
    // 1. Validate before any write
    let content_type: ContentType = request
        .content_type
        .parse()
        .map_err(|_| IngestError::UnsupportedContentType(request.content_type.clone()))?;
    let text = cleanse(&request.content);
    if text.trim().is_empty() {
        return Err(IngestError::EmptySource(request.source.clone()));
    }

    // 2. Chunk and fingerprint (pure)
    let atoms: Vec<(String, u64)> = atomize(&text, content_type.strategy())
        .into_iter()
        .map(|a| {
            let fp = fingerprint(&a);
            (a, fp)
        })
        .collect();
    let source_hash = format!("{:016x}", fingerprint(&text));

    let storage = |error: anyhow::Error| IngestError::Storage {
        path: request.source.clone(),
        error,
    };

    // 3. Source session
    let mut session = SourceSession::open(conn, &request.source).map_err(storage)?;
    let source_changed = session.previous_hash() != Some(source_hash.as_str());

    let run = RunContext {
        source_id: uuid::Uuid::now_v7().to_string(),
        content_type,
        provenance: request.provenance.unwrap_or(opts.default_provenance),
        epoch: request
            .epoch
            .clone()
            .unwrap_or_else(|| chrono::Utc::now().format("%Y-%m-%d").to_string()),
        buckets: opts
            .default_buckets
            .iter()
            .chain(request.buckets.iter())
            .map(|b| b.trim())
            .filter(|b| !b.is_empty())
            .map(str::to_string)
            .collect(),
    };

    tracing::info!(
        source = %request.source,
        source_id = %run.source_id,
        content_type = %content_type,
        atoms = atoms.len(),
        source_changed,
        "ingesting source"
    );

    let mut atoms_created = 0usize;
    let mut atoms_deduped = 0usize;
    let mut failed = Vec::new();
    let mut merge_failed = Vec::new();
    let mut cancelled = false;
    // Sequence of the previous atom of this run within the source, if known
    let mut previous: Option<i64> = None;

    // 4. Per-atom dedup and write-then-verify
    for (content, fp) in atoms {
        if cancel.is_cancelled() {
            tracing::info!(source = %request.source, atoms_created, "ingestion cancelled");
            cancelled = true;
            break;
        }

        let existing = match session.near_duplicate(fp, opts.dedup_distance, run.provenance) {
            Some(seen) => Some((seen.id.clone(), Some(seen.sequence))),
            None => find_exact_fingerprint(conn, fp, run.provenance)
                .map_err(storage)?
                .map(|id| (id, None)),
        };

        if let Some((existing_id, existing_sequence)) = existing {
            previous = existing_sequence;
            let merged = opts
                .retry
                .run("dedup merge", || merge_into_existing(conn, &existing_id, &run));
            match merged {
                Ok(()) => {
                    tracing::debug!(atom = %existing_id, "atom deduplicated");
                    atoms_deduped += 1;
                }
                Err(e) => {
                    tracing::error!(atom = %existing_id, error = %e, "failed to extend deduplicated atom");
                    merge_failed.push(FailedMerge {
                        atom_id: existing_id,
                        error: format!("{e:#}"),
                    });
                }
            }
            continue;
        }

        let sequence = session.take_sequence(previous);
        previous = Some(sequence);
        let id = uuid::Uuid::now_v7().to_string();
        let written = opts.retry.run("atom write", || {
            write_atom(conn, &id, &request.source, sequence, &content, fp, &run)?;
            verify_atom(conn, &id, &content, fp)
        });

        match written {
            Ok(()) => {
                session.record(fp, id, sequence, run.provenance);
                atoms_created += 1;
            }
            Err(e) => {
                tracing::error!(source = %request.source, sequence, error = %e, "atom write failed");
                failed.push(FailedAtom {
                    sequence,
                    error: format!("{e:#}"),
                });
            }
        }
    }

    // 5. Source record
    let total_atoms = opts
        .retry
        .run("source upsert", || upsert_source(conn, &request.source, &source_hash))
        .map_err(storage)?;

    tracing::info!(
        source = %request.source,
        atoms_created,
        atoms_deduped,
        failed = failed.len(),
        merge_failed = merge_failed.len(),
        total_atoms,
        "ingestion finished"
    );

    Ok(IngestResult {
        source: request.source.clone(),
        source_id: run.source_id,
        atoms_created,
        atoms_deduped,
        failed,
        merge_failed,
        total_atoms,
        source_changed,
        cancelled,
    })
}

/// Values shared by every atom of one run.
struct RunContext {
    source_id: String,
    content_type: ContentType,
    provenance: Provenance,
    epoch: String,
    buckets: BTreeSet<String>,
}

/// Oldest atom in any source with exactly this fingerprint, among atoms at
/// least as trusted as `provenance`.
fn find_exact_fingerprint(conn: &Connection, fp: u64, provenance: Provenance) -> Result<Option<String>> {
    let id = conn
        .query_row(
            &format!(
                "SELECT id FROM atoms WHERE fingerprint = :fp AND {TRUST_SQL} >= :trust \
                 ORDER BY created_at, id LIMIT 1"
            ),
            named_params! { ":fp": fingerprint_to_sql(fp), ":trust": provenance.trust() },
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

/// Insert atom, FTS row and buckets in one transaction.
fn write_atom(
    conn: &mut Connection,
    id: &str,
    source: &str,
    sequence: i64,
    content: &str,
    fp: u64,
    run: &RunContext,
) -> Result<()> {
    let now = chrono::Utc::now().to_rfc3339();
    let epochs = serde_json::to_string(&[&run.epoch])?;

    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO atoms (id, content, source, source_id, sequence, type, fingerprint, provenance, epochs, embedding, created_at) \
         VALUES (:id, :content, :source, :source_id, :sequence, :type, :fingerprint, :provenance, :epochs, NULL, :now)",
        named_params! {
            ":id": id,
            ":content": content,
            ":source": source,
            ":source_id": run.source_id,
            ":sequence": sequence,
            ":type": run.content_type.as_str(),
            ":fingerprint": fingerprint_to_sql(fp),
            ":provenance": run.provenance.as_str(),
            ":epochs": epochs,
            ":now": now,
        },
    )?;
    let rowid = tx.last_insert_rowid();

    // Keep the FTS index on the same rowid as the atom
    tx.execute(
        "INSERT INTO atoms_fts (rowid, content, id) VALUES (:rowid, :content, :id)",
        named_params! { ":rowid": rowid, ":content": content, ":id": id },
    )?;

    for bucket in &run.buckets {
        tx.execute(
            "INSERT OR IGNORE INTO atom_buckets (atom_id, bucket) VALUES (:id, :bucket)",
            named_params! { ":id": id, ":bucket": bucket },
        )?;
    }
    tx.commit()?;
    Ok(())
}

/// Read the atom back and confirm it matches what was written.
fn verify_atom(conn: &Connection, id: &str, content: &str, fp: u64) -> Result<()> {
    let stored: Option<(String, i64)> = conn
        .query_row(
            "SELECT content, fingerprint FROM atoms WHERE id = :id",
            named_params! { ":id": id },
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    match stored {
        None => Err(anyhow!("atom {id} not found after commit")),
        Some((c, f)) if c != content || fingerprint_from_sql(f) != fp => {
            bail!("atom {id} read back differently than written")
        }
        Some(_) => Ok(()),
    }
}

/// Extend a deduplicated atom with this run's epoch and buckets.
fn merge_into_existing(conn: &mut Connection, id: &str, run: &RunContext) -> Result<()> {
    let tx = conn.transaction()?;
    let epochs: String = tx
        .query_row(
            "SELECT epochs FROM atoms WHERE id = :id",
            named_params! { ":id": id },
            |row| row.get(0),
        )
        .with_context(|| format!("dedup target {id} vanished"))?;

    let mut epochs: Vec<String> = serde_json::from_str(&epochs).unwrap_or_default();
    if !epochs.contains(&run.epoch) {
        epochs.push(run.epoch.clone());
        tx.execute(
            "UPDATE atoms SET epochs = :epochs WHERE id = :id",
            named_params! { ":epochs": serde_json::to_string(&epochs)?, ":id": id },
        )?;
    }

    for bucket in &run.buckets {
        tx.execute(
            "INSERT OR IGNORE INTO atom_buckets (atom_id, bucket) VALUES (:id, :bucket)",
            named_params! { ":id": id, ":bucket": bucket },
        )?;
    }
    tx.commit()?;
    Ok(())
}

/// Create or update the source row. Returns the recounted `total_atoms`.
fn upsert_source(conn: &Connection, path: &str, hash: &str) -> Result<u64> {
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO sources (path, hash, total_atoms, last_ingest) \
         VALUES (:path, :hash, (SELECT COUNT(*) FROM atoms WHERE source = :path), :now) \
         ON CONFLICT(path) DO UPDATE SET hash = excluded.hash, \
         total_atoms = excluded.total_atoms, last_ingest = excluded.last_ingest",
        named_params! { ":path": path, ":hash": hash, ":now": now },
    )?;
    let total: i64 = conn.query_row(
        "SELECT total_atoms FROM sources WHERE path = :path",
        named_params! { ":path": path },
        |row| row.get(0),
    )?;
    Ok(total.max(0) as u64)
}
