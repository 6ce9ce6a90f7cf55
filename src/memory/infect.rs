//! Tag infection: weak supervision for the tag graph.
//!
//! Discovery asks a reasoning collaborator to propose high-specificity tags
//! from a random sample of atoms. Infection then scans every atom with a
//! cheap deterministic matcher and appends the tags that occur in it. The
//! service moves `Idle → Discovery → Infection → Idle`; [`TagInfectionService::replay`]
//! skips Discovery and reuses the stored master list.
//!
//! Tags are only ever added (`INSERT OR IGNORE`), so running infection twice
//! over the same master list changes nothing the second time.

use anyhow::{anyhow, bail, Result};
use rusqlite::{named_params, Connection};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::cancel::CancellationToken;
use crate::config::InfectionConfig;
use crate::memory::engram;
use crate::memory::retry::RetryPolicy;
use crate::reasoning::TagDiscoverer;

/// Engram holding the normalized master tag list.
pub const MASTER_TAGS_KEY: &str = "infection.master_tags";
/// Engram holding the most recent [`InfectionReport`].
pub const LAST_REPORT_KEY: &str = "infection.last_report";
/// Upper bound on the discovery sample, whatever the config says.
pub const MAX_SAMPLE_SIZE: usize = 100;

const MIN_TAG_CHARS: usize = 2;
const MAX_TAG_CHARS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InfectionState {
    Idle,
    Discovery,
    Infection,
}

#[derive(Debug, Clone)]
pub struct InfectionOptions {
    pub sample_size: usize,
    pub batch_size: usize,
    pub retry: RetryPolicy,
}

impl Default for InfectionOptions {
    fn default() -> Self {
        Self::from(&InfectionConfig::default())
    }
}

impl From<&InfectionConfig> for InfectionOptions {
    fn from(config: &InfectionConfig) -> Self {
        Self {
            sample_size: config.sample_size.min(MAX_SAMPLE_SIZE),
            batch_size: config.batch_size.max(1),
            retry: RetryPolicy::new(config.max_write_retries, config.retry_backoff_ms),
        }
    }
}

/// A batch whose tag writes still failed after all retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedBatch {
    pub first_rowid: i64,
    pub last_rowid: i64,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InfectionReport {
    pub tags_in_master: usize,
    pub atoms_scanned: usize,
    /// Atoms that received at least one new tag.
    pub atoms_infected: usize,
    /// New `(atom, tag)` pairs written.
    pub tags_applied: usize,
    pub batches_committed: usize,
    pub failed_batches: Vec<FailedBatch>,
    pub duration_ms: u64,
    pub cancelled: bool,
}

// ── Master list ───────────────────────────────────────────────────────────────

/// Trim, drop too short or too long entries, dedupe case-insensitively keeping
/// the first spelling.
pub fn normalize_master_list<I, S>(raw: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    raw.into_iter()
        .filter_map(|tag| {
            let tag = tag.as_ref().trim();
            let len = tag.chars().count();
            if !(MIN_TAG_CHARS..=MAX_TAG_CHARS).contains(&len) {
                return None;
            }
            seen.insert(tag.to_lowercase()).then(|| tag.to_string())
        })
        .collect()
}

/// The stored master tag list, empty if none was discovered yet.
pub fn load_master_tags(conn: &Connection) -> Result<Vec<String>> {
    let Some(engram) = engram::get(conn, MASTER_TAGS_KEY)? else {
        return Ok(Vec::new());
    };
    Ok(serde_json::from_value(engram.value)?)
}

pub fn save_master_tags(conn: &Connection, tags: &[String]) -> Result<()> {
    engram::put(conn, MASTER_TAGS_KEY, &serde_json::to_value(tags)?)
}

/// The report of the last completed run, if any.
pub fn last_report(conn: &Connection) -> Result<Option<InfectionReport>> {
    engram::get(conn, LAST_REPORT_KEY)?
        .map(|e| serde_json::from_value(e.value).map_err(Into::into))
        .transpose()
}

/// Random sample of atom contents for discovery. Quarantined atoms are left out.
pub fn sample_atoms(conn: &Connection, size: usize) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT content FROM atoms WHERE provenance != 'quarantine' ORDER BY random() LIMIT :n",
    )?;
    let sample = stmt
        .query_map(named_params! { ":n": size.min(MAX_SAMPLE_SIZE) as i64 }, |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(sample)
}

// ── Matcher ───────────────────────────────────────────────────────────────────

struct TagPattern {
    tag: String,
    needle: String,
    check_start: bool,
    check_end: bool,
}

/// Case-insensitive tag matcher. A substring hit is only a candidate; it
/// counts when it sits on a token boundary. Boundaries are checked only on
/// sides where the tag itself starts or ends with a word character, so
/// `C++` matches in `C++17` and `rust` does not match in `trusted`.
pub struct TagMatcher {
    patterns: Vec<TagPattern>,
}

impl TagMatcher {
    pub fn new(tags: &[String]) -> Self {
        let patterns = tags
            .iter()
            .filter(|t| !t.is_empty())
            .map(|tag| {
                let needle = tag.to_lowercase();
                TagPattern {
                    check_start: needle.chars().next().is_some_and(is_word_char),
                    check_end: needle.chars().next_back().is_some_and(is_word_char),
                    tag: tag.clone(),
                    needle,
                }
            })
            .collect();
        Self { patterns }
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Tags that occur in `content` at a token boundary, in master-list order.
    pub fn matches(&self, content: &str) -> Vec<&str> {
        let haystack = content.to_lowercase();
        self.patterns
            .iter()
            .filter(|p| haystack.contains(&p.needle))
            .filter(|p| confirm_boundary(&haystack, p))
            .map(|p| p.tag.as_str())
            .collect()
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn confirm_boundary(haystack: &str, pattern: &TagPattern) -> bool {
    let mut from = 0;
    while let Some(offset) = haystack[from..].find(&pattern.needle) {
        let start = from + offset;
        let end = start + pattern.needle.len();
        let start_ok = !pattern.check_start
            || !haystack[..start].chars().next_back().is_some_and(is_word_char);
        let end_ok =
            !pattern.check_end || !haystack[end..].chars().next().is_some_and(is_word_char);
        if start_ok && end_ok {
            return true;
        }
        // Step one char so overlapping hits are still considered
        from = start + haystack[start..].chars().next().map_or(1, char::len_utf8);
    }
    false
}

// ── Infection ─────────────────────────────────────────────────────────────────

/// Scan every atom in keyset batches and append matching tags.
///
/// The lock is taken per batch, so other readers and writers can interleave.
/// Checks `cancel` between batches; committed batches stay committed.
pub fn infect_all(
    db: &Mutex<Connection>,
    tags: &[String],
    options: &InfectionOptions,
    cancel: &CancellationToken,
) -> Result<InfectionReport> {
    let started = Instant::now();
    let matcher = TagMatcher::new(tags);
    let mut report = InfectionReport {
        tags_in_master: tags.len(),
        ..InfectionReport::default()
    };

    if matcher.is_empty() {
        tracing::info!("master tag list is empty, nothing to infect");
        return Ok(report);
    }

    let mut after_rowid = 0i64;
    loop {
        if cancel.is_cancelled() {
            tracing::info!(atoms_scanned = report.atoms_scanned, "infection cancelled");
            report.cancelled = true;
            break;
        }

        let batch = {
            let conn = db.lock().map_err(|e| anyhow!("db lock poisoned: {e}"))?;
            read_batch(&conn, after_rowid, options.batch_size)?
        };
        let (Some(first), Some(last)) = (batch.first(), batch.last()) else {
            break;
        };
        let (first_rowid, last_rowid) = (first.0, last.0);
        after_rowid = last_rowid;
        report.atoms_scanned += batch.len();

        let hits: Vec<(String, Vec<&str>)> = batch
            .iter()
            .map(|(_, id, content)| (id.clone(), matcher.matches(content)))
            .filter(|(_, tags)| !tags.is_empty())
            .collect();

        let applied = options.retry.run("infection batch", || {
            let mut conn = db.lock().map_err(|e| anyhow!("db lock poisoned: {e}"))?;
            apply_batch(&mut conn, &hits)
        });

        match applied {
            Ok((atoms, pairs)) => {
                report.atoms_infected += atoms;
                report.tags_applied += pairs;
                report.batches_committed += 1;
            }
            Err(e) => {
                tracing::error!(first_rowid, last_rowid, error = %e, "infection batch failed");
                report.failed_batches.push(FailedBatch {
                    first_rowid,
                    last_rowid,
                    error: format!("{e:#}"),
                });
            }
        }
    }

    report.duration_ms = started.elapsed().as_millis() as u64;
    tracing::info!(
        atoms_scanned = report.atoms_scanned,
        atoms_infected = report.atoms_infected,
        tags_applied = report.tags_applied,
        failed_batches = report.failed_batches.len(),
        "infection finished"
    );
    Ok(report)
}

fn read_batch(conn: &Connection, after_rowid: i64, size: usize) -> Result<Vec<(i64, String, String)>> {
    let mut stmt = conn.prepare(
        "SELECT rowid, id, content FROM atoms WHERE rowid > :after ORDER BY rowid LIMIT :n",
    )?;
    let rows = stmt
        .query_map(
            named_params! { ":after": after_rowid, ":n": size as i64 },
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Write one batch of tag hits in a transaction. Returns `(atoms, pairs)` newly tagged.
fn apply_batch(conn: &mut Connection, hits: &[(String, Vec<&str>)]) -> Result<(usize, usize)> {
    let tx = conn.transaction()?;
    let mut atoms = 0usize;
    let mut pairs = 0usize;
    {
        let mut stmt = tx.prepare("INSERT OR IGNORE INTO atom_tags (atom_id, tag) VALUES (:id, :tag)")?;
        for (id, tags) in hits {
            let mut added = 0usize;
            for tag in tags {
                added += stmt.execute(named_params! { ":id": id, ":tag": tag })?;
            }
            if added > 0 {
                atoms += 1;
                pairs += added;
            }
        }
    }
    tx.commit()?;
    Ok((atoms, pairs))
}

// ── Service ───────────────────────────────────────────────────────────────────

/// Runs discovery and infection against a shared connection.
pub struct TagInfectionService {
    db: Arc<Mutex<Connection>>,
    discoverer: Arc<dyn TagDiscoverer>,
    options: InfectionOptions,
    state: Mutex<InfectionState>,
}

/// Returns the service to `Idle` however the run ends.
struct IdleOnDrop<'a>(&'a Mutex<InfectionState>);

impl Drop for IdleOnDrop<'_> {
    fn drop(&mut self) {
        if let Ok(mut state) = self.0.lock() {
            *state = InfectionState::Idle;
        }
    }
}

impl TagInfectionService {
    pub fn new(db: Arc<Mutex<Connection>>, discoverer: Arc<dyn TagDiscoverer>, options: InfectionOptions) -> Self {
        Self {
            db,
            discoverer,
            options,
            state: Mutex::new(InfectionState::Idle),
        }
    }

    pub fn state(&self) -> InfectionState {
        self.state.lock().map(|s| *s).unwrap_or(InfectionState::Idle)
    }

    fn enter(&self, next: InfectionState) -> Result<()> {
        let mut state = self.state.lock().map_err(|e| anyhow!("state lock poisoned: {e}"))?;
        let allowed = matches!(
            (*state, next),
            (InfectionState::Idle, InfectionState::Discovery)
                | (InfectionState::Idle, InfectionState::Infection)
                | (InfectionState::Discovery, InfectionState::Infection)
        );
        if !allowed {
            bail!("tag infection already running ({:?})", *state);
        }
        tracing::debug!(from = ?*state, to = ?next, "infection state change");
        *state = next;
        Ok(())
    }

    /// Discovery, then infection over the merged master list.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<InfectionReport> {
        self.run_with_seeds(Vec::new(), cancel).await
    }

    /// Like [`run`](Self::run), with extra tags merged into the master list
    /// ahead of whatever Discovery proposes.
    pub async fn run_with_seeds(&self, seeds: Vec<String>, cancel: &CancellationToken) -> Result<InfectionReport> {
        self.enter(InfectionState::Discovery)?;
        let _idle = IdleOnDrop(&self.state);

        let db = Arc::clone(&self.db);
        let size = self.options.sample_size;
        let (stored, sample) = tokio::task::spawn_blocking(move || -> Result<_> {
            let conn = db.lock().map_err(|e| anyhow!("db lock poisoned: {e}"))?;
            Ok((load_master_tags(&conn)?, sample_atoms(&conn, size)?))
        })
        .await??;

        let discovered = self.discoverer.discover(&sample).await;
        tracing::info!(sampled = sample.len(), discovered = discovered.len(), "discovery finished");

        let master = normalize_master_list(stored.iter().chain(seeds.iter()).chain(discovered.iter()));
        {
            let conn = self.db.lock().map_err(|e| anyhow!("db lock poisoned: {e}"))?;
            save_master_tags(&conn, &master)?;
        }

        self.enter(InfectionState::Infection)?;
        self.infect(master, cancel).await
    }

    /// Infection over the stored master list, without Discovery.
    pub async fn replay(&self, cancel: &CancellationToken) -> Result<InfectionReport> {
        self.enter(InfectionState::Infection)?;
        let _idle = IdleOnDrop(&self.state);

        let master = {
            let conn = self.db.lock().map_err(|e| anyhow!("db lock poisoned: {e}"))?;
            load_master_tags(&conn)?
        };
        self.infect(master, cancel).await
    }

    async fn infect(&self, master: Vec<String>, cancel: &CancellationToken) -> Result<InfectionReport> {
        let db = Arc::clone(&self.db);
        let options = self.options.clone();
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || -> Result<InfectionReport> {
            let report = infect_all(&db, &master, &options, &cancel)?;
            let conn = db.lock().map_err(|e| anyhow!("db lock poisoned: {e}"))?;
            engram::put(&conn, LAST_REPORT_KEY, &serde_json::to_value(&report)?)?;
            Ok(report)
        })
        .await?
    }
}
