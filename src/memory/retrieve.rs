//! Tag-Walker retrieval: lexical anchors, then an associative walk over
//! shared tags and buckets, inside a fixed character budget.
//!
//! The budget is split once: `anchor_ratio` of it goes to Phase 1 (FTS5
//! matches, or the regex fallback when FTS finds nothing) and the rest to
//! Phase 2 (walk). Walk results always come after every anchor. Within a phase
//! atoms are ranked by score, then by `(source, sequence, id)`, so the same
//! query over the same store returns the same list.

use anyhow::{Context, Result};
use regex::RegexBuilder;
use rusqlite::types::ToSql;
use rusqlite::{named_params, Connection};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use crate::config::RetrievalConfig;
use crate::memory::types::{Atom, Provenance, ATOM_SELECT};

// ── Public types ──────────────────────────────────────────────────────────────

/// Which phase produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Anchor,
    Fallback,
    Walk,
}

/// Retrieval knobs, usually built from [`RetrievalConfig`].
#[derive(Debug, Clone)]
pub struct RetrieveConfig {
    /// Total budget in characters of atom content.
    pub budget: usize,
    pub anchor_ratio: f64,
    pub sovereign_weight: f64,
    pub external_weight: f64,
    /// Max candidates pulled per phase.
    pub candidate_limit: usize,
    /// Max atoms the regex fallback reads.
    pub fallback_scan_limit: usize,
}

impl Default for RetrieveConfig {
    fn default() -> Self {
        Self::from(&RetrievalConfig::default())
    }
}

impl From<&RetrievalConfig> for RetrieveConfig {
    fn from(config: &RetrievalConfig) -> Self {
        Self {
            budget: config.context_budget,
            anchor_ratio: config.anchor_ratio,
            sovereign_weight: config.sovereign_weight,
            external_weight: config.external_weight,
            candidate_limit: config.candidate_limit,
            fallback_scan_limit: config.fallback_scan_limit,
        }
    }
}

impl RetrieveConfig {
    /// Characters reserved for Phase 1.
    pub fn anchor_allocation(&self) -> usize {
        let ratio = self.anchor_ratio.clamp(0.0, 1.0);
        ((self.budget as f64) * ratio).round() as usize
    }

    /// Characters reserved for Phase 2.
    pub fn walk_allocation(&self) -> usize {
        self.budget.saturating_sub(self.anchor_allocation())
    }

    fn weight(&self, provenance: Provenance) -> f64 {
        match provenance {
            Provenance::Sovereign => self.sovereign_weight,
            Provenance::External => self.external_weight,
            Provenance::Quarantine => 0.0,
        }
    }
}

/// One ranked result.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedAtom {
    #[serde(flatten)]
    pub atom: Atom,
    pub phase: Phase,
    pub score: f64,
}

#[derive(Debug, Serialize)]
pub struct RetrieveResponse {
    pub query: String,
    pub results: Vec<RetrievedAtom>,
    /// Phase 1 results (anchors or fallback hits).
    pub anchors: usize,
    pub walked: usize,
    pub fallback_used: bool,
    pub budget: usize,
    pub chars_used: usize,
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Two-phase retrieval. Read-only.
pub fn retrieve(conn: &Connection, query: &str, config: &RetrieveConfig) -> Result<RetrieveResponse> {
    let terms = query_terms(query);
    let mut response = RetrieveResponse {
        query: query.to_string(),
        results: Vec::new(),
        anchors: 0,
        walked: 0,
        fallback_used: false,
        budget: config.budget,
        chars_used: 0,
    };
    if terms.is_empty() {
        return Ok(response);
    }

    // 1. Anchors via FTS5, falling back to a regex scan
    let mut candidates = match fts_candidates(conn, &terms, config) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(error = %e, "FTS anchor search failed, using fallback");
            Vec::new()
        }
    };
    let mut phase = Phase::Anchor;
    if candidates.is_empty() {
        candidates = fallback_candidates(conn, &terms, config)?;
        phase = Phase::Fallback;
        response.fallback_used = true;
    }
    candidates.sort_by(rank_order);

    let (anchors, anchor_chars) = fill_budget(candidates, config.anchor_allocation(), true);

    // 2. Walk from the selected anchors
    let mut walk = walk_candidates(conn, &anchors, config)?;
    walk.sort_by(rank_order);
    let (walked, walk_chars) = fill_budget(walk, config.walk_allocation(), false);

    response.anchors = anchors.len();
    response.walked = walked.len();
    response.chars_used = anchor_chars + walk_chars;
    response.results = anchors
        .into_iter()
        .map(|(atom, score)| RetrievedAtom { atom, phase, score })
        .chain(walked.into_iter().map(|(atom, score)| RetrievedAtom {
            atom,
            phase: Phase::Walk,
            score,
        }))
        .collect();

    tracing::debug!(
        query,
        anchors = response.anchors,
        walked = response.walked,
        fallback = response.fallback_used,
        chars_used = response.chars_used,
        "retrieval complete"
    );
    Ok(response)
}

/// Batch-fetch atoms by id, with tags and buckets.
pub fn fetch_atoms(conn: &Connection, ids: &[&str]) -> Result<HashMap<String, Atom>> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }

    let placeholders = numbered(1, ids.len());
    let params: Vec<&dyn ToSql> = ids.iter().map(|id| id as &dyn ToSql).collect();

    let sql = format!("SELECT {ATOM_SELECT} FROM atoms WHERE id IN ({placeholders})");
    let mut stmt = conn.prepare(&sql)?;
    let mut atoms: HashMap<String, Atom> = stmt
        .query_map(params.as_slice(), Atom::from_row)?
        .map(|r| r.map(|a| (a.id.clone(), a)))
        .collect::<Result<_, _>>()?;

    let sql = format!("SELECT atom_id, tag FROM atom_tags WHERE atom_id IN ({placeholders})");
    let mut stmt = conn.prepare(&sql)?;
    let tags = stmt
        .query_map(params.as_slice(), |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    for (id, tag) in tags {
        if let Some(atom) = atoms.get_mut(&id) {
            atom.tags.insert(tag);
        }
    }

    let sql = format!("SELECT atom_id, bucket FROM atom_buckets WHERE atom_id IN ({placeholders})");
    let mut stmt = conn.prepare(&sql)?;
    let buckets = stmt
        .query_map(params.as_slice(), |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    for (id, bucket) in buckets {
        if let Some(atom) = atoms.get_mut(&id) {
            atom.buckets.insert(bucket);
        }
    }

    Ok(atoms)
}

// ── Internal helpers ──────────────────────────────────────────────────────────

type Candidate = (Atom, f64);

/// Whitespace-delimited query terms with edge punctuation and quotes removed.
fn query_terms(query: &str) -> Vec<String> {
    query
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| c.is_ascii_punctuation()).replace('"', ""))
        .filter(|w| !w.is_empty())
        .collect()
}

/// Quote each term and OR them so any term can anchor.
fn escape_fts_query(terms: &[String]) -> String {
    terms
        .iter()
        .map(|t| format!("\"{t}\""))
        .collect::<Vec<_>>()
        .join(" OR ")
}

/// FTS5 BM25 anchors. Rank is negative (more negative = better), so strength is `-rank`.
/// The candidate cut is taken on the provenance-weighted rank.
fn fts_candidates(conn: &Connection, terms: &[String], config: &RetrieveConfig) -> Result<Vec<Candidate>> {
    let mut stmt = conn.prepare(
        "SELECT a.id, atoms_fts.rank FROM atoms_fts \
         JOIN atoms a ON a.rowid = atoms_fts.rowid \
         WHERE atoms_fts MATCH :query AND a.provenance != 'quarantine' \
         ORDER BY atoms_fts.rank * CASE a.provenance WHEN 'sovereign' THEN :sovereign ELSE :external END, \
         a.rowid \
         LIMIT :limit",
    )?;
    let hits = stmt
        .query_map(
            named_params! {
                ":query": escape_fts_query(terms),
                ":sovereign": config.sovereign_weight,
                ":external": config.external_weight,
                ":limit": config.candidate_limit as i64,
            },
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?)),
        )?
        .collect::<Result<Vec<_>, _>>()?;

    let ids: Vec<&str> = hits.iter().map(|(id, _)| id.as_str()).collect();
    let mut atoms = fetch_atoms(conn, &ids)?;
    Ok(hits
        .iter()
        .filter_map(|(id, rank)| {
            let atom = atoms.remove(id)?;
            let score = -rank * config.weight(atom.provenance);
            Some((atom, score))
        })
        .collect())
}

/// Case-insensitive regex scan used when FTS yields nothing. Score is hit count.
fn fallback_candidates(conn: &Connection, terms: &[String], config: &RetrieveConfig) -> Result<Vec<Candidate>> {
    let pattern = terms
        .iter()
        .map(|t| regex::escape(t))
        .collect::<Vec<_>>()
        .join("|");
    let re = RegexBuilder::new(&pattern)
        .case_insensitive(true)
        .build()
        .context("failed to build fallback pattern")?;

    let mut stmt = conn.prepare(&format!(
        "SELECT {ATOM_SELECT} FROM atoms WHERE provenance != 'quarantine' ORDER BY rowid LIMIT :limit"
    ))?;
    let scanned = stmt
        .query_map(
            named_params! { ":limit": config.fallback_scan_limit as i64 },
            Atom::from_row,
        )?
        .collect::<Result<Vec<_>, _>>()?;

    let hits: Vec<(String, usize)> = scanned
        .iter()
        .map(|a| (a.id.clone(), re.find_iter(&a.content).count()))
        .filter(|(_, n)| *n > 0)
        .collect();
    tracing::debug!(scanned = scanned.len(), hits = hits.len(), "fallback scan");

    let ids: Vec<&str> = hits.iter().map(|(id, _)| id.as_str()).collect();
    let mut atoms = fetch_atoms(conn, &ids)?;
    Ok(hits
        .iter()
        .filter_map(|(id, n)| {
            let atom = atoms.remove(id)?;
            let score = *n as f64 * config.weight(atom.provenance);
            Some((atom, score))
        })
        .collect())
}

/// Atoms sharing a tag or bucket with the anchors. Score is shared label count.
fn walk_candidates(conn: &Connection, anchors: &[Candidate], config: &RetrieveConfig) -> Result<Vec<Candidate>> {
    let selected: HashSet<&str> = anchors.iter().map(|(a, _)| a.id.as_str()).collect();
    let tags: Vec<String> = anchors
        .iter()
        .flat_map(|(a, _)| a.tags.iter().map(|t| t.to_lowercase()))
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    let buckets: Vec<String> = anchors
        .iter()
        .flat_map(|(a, _)| a.buckets.iter().cloned())
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    if tags.is_empty() && buckets.is_empty() {
        return Ok(Vec::new());
    }

    let mut parts = Vec::new();
    if !tags.is_empty() {
        parts.push(format!(
            "SELECT atom_id, 'tag:' || lower(tag) AS label FROM atom_tags WHERE tag IN ({})",
            numbered(1, tags.len())
        ));
    }
    if !buckets.is_empty() {
        parts.push(format!(
            "SELECT atom_id, 'bucket:' || bucket AS label FROM atom_buckets WHERE bucket IN ({})",
            numbered(tags.len() + 1, buckets.len())
        ));
    }
    let sql = format!(
        "SELECT a.id, a.provenance, COUNT(*) FROM ({}) l \
         JOIN atoms a ON a.id = l.atom_id \
         WHERE a.provenance != 'quarantine' GROUP BY a.id",
        parts.join(" UNION ")
    );

    let params: Vec<&dyn ToSql> = tags
        .iter()
        .chain(buckets.iter())
        .map(|v| v as &dyn ToSql)
        .collect();
    let mut stmt = conn.prepare(&sql)?;
    let mut neighbours = stmt
        .query_map(params.as_slice(), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .filter(|(id, _, _)| !selected.contains(id.as_str()))
        .map(|(id, provenance, shared)| {
            let weight = provenance
                .parse()
                .map(|p| config.weight(p))
                .unwrap_or(0.0);
            (id, shared as f64 * weight)
        })
        .collect::<Vec<_>>();

    // Keep the strongest neighbours; full ordering happens after hydration
    neighbours.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal).then_with(|| a.0.cmp(&b.0)));
    neighbours.truncate(config.candidate_limit);

    let ids: Vec<&str> = neighbours.iter().map(|(id, _)| id.as_str()).collect();
    let mut atoms = fetch_atoms(conn, &ids)?;
    Ok(neighbours
        .iter()
        .filter_map(|(id, score)| atoms.remove(id).map(|a| (a, *score)))
        .collect())
}

/// Score descending, then source, sequence and id ascending.
fn rank_order(a: &Candidate, b: &Candidate) -> Ordering {
    b.1.partial_cmp(&a.1)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.0.source.cmp(&b.0.source))
        .then_with(|| a.0.sequence.cmp(&b.0.sequence))
        .then_with(|| a.0.id.cmp(&b.0.id))
}

/// Take ranked candidates until the next one does not fit. With `admit_first`,
/// the first candidate is taken even when it alone exceeds the allocation.
fn fill_budget(candidates: Vec<Candidate>, allocation: usize, admit_first: bool) -> (Vec<Candidate>, usize) {
    let mut used = 0usize;
    let mut selected = Vec::new();
    for candidate in candidates {
        let len = candidate.0.char_len();
        if used + len > allocation && !(admit_first && selected.is_empty()) {
            break;
        }
        used += len;
        selected.push(candidate);
    }
    (selected, used)
}

/// `?start, ?start+1, …` for `count` parameters.
fn numbered(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::memory::ingest::{ingest, IngestOptions, IngestRequest};
    use crate::cancel::CancellationToken;

    fn test_db() -> Connection {
        db::open_memory_database().unwrap()
    }

    fn add(conn: &mut Connection, content: &str, source: &str, provenance: Provenance, buckets: &[&str]) {
        let request = IngestRequest {
            provenance: Some(provenance),
            buckets: buckets.iter().map(|b| b.to_string()).collect(),
            ..IngestRequest::new(content, source, "prose")
        };
        let result = ingest(conn, &request, &IngestOptions::default(), &CancellationToken::new()).unwrap();
        assert_eq!(result.atoms_created, 1, "{content}");
    }

    fn tag(conn: &Connection, content_prefix: &str, tag: &str) {
        conn.execute(
            "INSERT INTO atom_tags (atom_id, tag) SELECT id, ?2 FROM atoms WHERE content LIKE ?1 || '%'",
            rusqlite::params![content_prefix, tag],
        )
        .unwrap();
    }

    fn contents(response: &RetrieveResponse) -> Vec<&str> {
        response.results.iter().map(|r| r.atom.content.as_str()).collect()
    }

    #[test]
    fn allocation_splits_budget() {
        let config = RetrieveConfig::default();
        assert_eq!(config.anchor_allocation(), 5600);
        assert_eq!(config.walk_allocation(), 2400);

        let odd = RetrieveConfig { budget: 15, ..RetrieveConfig::default() };
        assert_eq!(odd.anchor_allocation(), 11);
        assert_eq!(odd.walk_allocation(), 4);
    }

    #[test]
    fn query_is_quoted_and_ored() {
        let terms = query_terms("  rust, \"async\" -- ");
        assert_eq!(terms, vec!["rust", "async"]);
        assert_eq!(escape_fts_query(&terms), "\"rust\" OR \"async\"");
    }

    #[test]
    fn empty_query_returns_nothing() {
        let conn = test_db();
        let response = retrieve(&conn, " ?! ", &RetrieveConfig::default()).unwrap();
        assert!(response.results.is_empty());
        assert!(!response.fallback_used);
    }

    #[test]
    fn sovereign_outranks_external() {
        let mut conn = test_db();
        add(&mut conn, "Borrow checker rules explained at length for newcomers", "web.md", Provenance::External, &[]);
        add(&mut conn, "Borrow checker rules", "notes.md", Provenance::Sovereign, &[]);

        let response = retrieve(&conn, "borrow", &RetrieveConfig::default()).unwrap();
        assert_eq!(response.anchors, 2);
        assert_eq!(response.results[0].atom.source, "notes.md");
        assert!(response.results.iter().all(|r| r.phase == Phase::Anchor));
    }

    #[test]
    fn candidate_cap_applies_after_provenance_weight() {
        let mut conn = test_db();
        let fillers = [
            "Kettle boils water for tea",
            "Bicycle chain needs fresh oil",
            "Garden hose leaks near tap",
            "Printer jammed twice this morning",
            "Harbour ferry leaves at noon",
            "Violin strings were replaced today",
        ];
        for (i, text) in fillers.iter().enumerate() {
            add(&mut conn, text, &format!("filler{i}.md"), Provenance::External, &[]);
        }
        // Short external hits outrank the longer sovereign note on raw bm25
        add(&mut conn, "zebra stripes look sharp", "web1.md", Provenance::External, &[]);
        add(&mut conn, "zebra herds graze daily", "web2.md", Provenance::External, &[]);
        add(&mut conn, "zebra foals run fast", "web3.md", Provenance::External, &[]);
        add(&mut conn, "my own zebra crossing notes from the walk", "notes.md", Provenance::Sovereign, &[]);

        let uncapped = retrieve(&conn, "zebra", &RetrieveConfig::default()).unwrap();
        assert_eq!(uncapped.anchors, 4);
        assert_eq!(uncapped.results[0].atom.source, "notes.md");

        let capped = RetrieveConfig {
            candidate_limit: 2,
            ..RetrieveConfig::default()
        };
        let response = retrieve(&conn, "zebra", &capped).unwrap();
        assert_eq!(response.anchors, 2);
        assert_eq!(response.results[0].atom.source, "notes.md");
        assert_eq!(response.results[0].score, uncapped.results[0].score);
    }

    #[test]
    fn stemming_matches_word_forms() {
        let mut conn = test_db();
        add(&mut conn, "We were running the migrations overnight", "ops.md", Provenance::Sovereign, &[]);
        let response = retrieve(&conn, "runs migration", &RetrieveConfig::default()).unwrap();
        assert_eq!(response.anchors, 1);
        assert!(!response.fallback_used);
    }

    #[test]
    fn quarantine_is_never_returned() {
        let mut conn = test_db();
        add(&mut conn, "Suspicious payload about tokens", "x.md", Provenance::Quarantine, &["shared"]);
        add(&mut conn, "Legit note about tokens", "y.md", Provenance::Sovereign, &["shared"]);

        let response = retrieve(&conn, "tokens", &RetrieveConfig::default()).unwrap();
        assert_eq!(contents(&response), vec!["Legit note about tokens"]);
    }

    #[test]
    fn walk_follows_shared_tags_after_anchors() {
        let mut conn = test_db();
        add(&mut conn, "Kubernetes ingress configuration notes", "a.md", Provenance::Sovereign, &[]);
        add(&mut conn, "Certificate renewal happens every ninety days", "b.md", Provenance::Sovereign, &[]);
        add(&mut conn, "Unrelated grocery list", "c.md", Provenance::Sovereign, &[]);
        tag(&conn, "Kubernetes", "Cluster");
        tag(&conn, "Certificate", "cluster");

        let response = retrieve(&conn, "ingress", &RetrieveConfig::default()).unwrap();
        assert_eq!(
            contents(&response),
            vec![
                "Kubernetes ingress configuration notes",
                "Certificate renewal happens every ninety days"
            ]
        );
        assert_eq!(response.results[0].phase, Phase::Anchor);
        assert_eq!(response.results[1].phase, Phase::Walk);
        assert_eq!(response.walked, 1);
    }

    #[test]
    fn walk_follows_shared_buckets() {
        let mut conn = test_db();
        add(&mut conn, "Quarterly revenue summary", "a.md", Provenance::Sovereign, &["finance"]);
        add(&mut conn, "Budget spreadsheet owners", "b.md", Provenance::External, &["finance"]);

        let response = retrieve(&conn, "revenue", &RetrieveConfig::default()).unwrap();
        assert_eq!(response.anchors, 1);
        assert_eq!(response.walked, 1);
        assert_eq!(response.results[1].score, 1.0);
    }

    #[test]
    fn fallback_scans_when_fts_has_no_match() {
        let mut conn = test_db();
        add(&mut conn, "call config_loader_v2 at boot", "code.md", Provenance::Sovereign, &[]);

        let response = retrieve(&conn, "FIG_LOA", &RetrieveConfig::default()).unwrap();
        assert!(response.fallback_used);
        assert_eq!(response.anchors, 1);
        assert_eq!(response.results[0].phase, Phase::Fallback);
        assert_eq!(response.results[0].score, 3.0);
    }

    #[test]
    fn first_anchor_admitted_and_walk_strictly_bounded() {
        let mut conn = test_db();
        add(&mut conn, "Lighthouse keeper journal entry one", "a.md", Provenance::Sovereign, &["sea"]);
        add(&mut conn, "Waves and tides were calm today", "b.md", Provenance::Sovereign, &["sea"]);

        let tiny = RetrieveConfig { budget: 10, ..RetrieveConfig::default() };
        let response = retrieve(&conn, "lighthouse", &tiny).unwrap();
        assert_eq!(response.anchors, 1);
        assert_eq!(response.walked, 0);
        assert!(response.chars_used > tiny.budget);
    }

    #[test]
    fn repeated_queries_are_identical() {
        let mut conn = test_db();
        for (i, topic) in ["alpha", "beta", "gamma", "delta"].iter().enumerate() {
            add(
                &mut conn,
                &format!("Shared keyword with {topic} detail number {i}"),
                &format!("{topic}.md"),
                Provenance::Sovereign,
                &["common"],
            );
        }
        let first = retrieve(&conn, "keyword", &RetrieveConfig::default()).unwrap();
        let second = retrieve(&conn, "keyword", &RetrieveConfig::default()).unwrap();
        let ids = |r: &RetrieveResponse| r.results.iter().map(|x| x.atom.id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&first), ids(&second));
        assert_eq!(first.anchors, 4);
    }

    #[test]
    fn ties_break_on_source_then_sequence() {
        let a = |source: &str, seq: i64, id: &str| -> Candidate {
            let mut atom = sample_atom();
            atom.source = source.into();
            atom.sequence = seq;
            atom.id = id.into();
            (atom, 1.0)
        };
        let mut list = vec![a("b", 0, "1"), a("a", 2, "2"), a("a", 1, "4"), a("a", 1, "3")];
        list.sort_by(rank_order);
        let order: Vec<&str> = list.iter().map(|(x, _)| x.id.as_str()).collect();
        assert_eq!(order, vec!["3", "4", "2", "1"]);
    }

    fn sample_atom() -> Atom {
        Atom {
            id: String::new(),
            content: "x".into(),
            source: String::new(),
            source_id: "run".into(),
            sequence: 0,
            content_type: crate::memory::types::ContentType::Prose,
            fingerprint: 0,
            provenance: Provenance::Sovereign,
            epochs: Vec::new(),
            embedding: None,
            created_at: String::new(),
            tags: Default::default(),
            buckets: Default::default(),
        }
    }
}
