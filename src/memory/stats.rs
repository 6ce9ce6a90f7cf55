use anyhow::Result;
use rusqlite::{named_params, Connection};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::memory::infect::{self, InfectionReport};

/// Response from memory_stats.
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub total_atoms: u64,
    pub by_type: BTreeMap<String, u64>,
    pub by_provenance: BTreeMap<String, u64>,
    pub sources: u64,
    pub distinct_tags: u64,
    pub tagged_atoms: u64,
    pub distinct_buckets: u64,
    pub master_tags: usize,
    pub db_size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_atom: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub newest_atom: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_infection: Option<InfectionReport>,
}

/// Compute store statistics.
///
/// If `source` is provided, atom counts are restricted to that source path.
/// `db_path` is used for file size calculation; pass None for in-memory databases.
pub fn memory_stats(conn: &Connection, source: Option<&str>, db_path: Option<&Path>) -> Result<StatsResponse> {
    let by_type = count_by(conn, "type", &["code", "prose", "transcript"], source)?;
    let by_provenance = count_by(conn, "provenance", &["sovereign", "external", "quarantine"], source)?;
    let total_atoms = by_type.values().sum();

    let sources = scalar(conn, "SELECT COUNT(*) FROM sources WHERE :source IS NULL OR path = :source", source)?;
    let distinct_tags = scalar(
        conn,
        "SELECT COUNT(DISTINCT t.tag) FROM atom_tags t JOIN atoms a ON a.id = t.atom_id \
         WHERE :source IS NULL OR a.source = :source",
        source,
    )?;
    let tagged_atoms = scalar(
        conn,
        "SELECT COUNT(DISTINCT t.atom_id) FROM atom_tags t JOIN atoms a ON a.id = t.atom_id \
         WHERE :source IS NULL OR a.source = :source",
        source,
    )?;
    let distinct_buckets = scalar(
        conn,
        "SELECT COUNT(DISTINCT b.bucket) FROM atom_buckets b JOIN atoms a ON a.id = b.atom_id \
         WHERE :source IS NULL OR a.source = :source",
        source,
    )?;

    let (oldest_atom, newest_atom) = conn.query_row(
        "SELECT MIN(created_at), MAX(created_at) FROM atoms WHERE :source IS NULL OR source = :source",
        named_params! { ":source": source },
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;

    let db_size_bytes = db_path
        .and_then(|p| std::fs::metadata(p).ok())
        .map(|m| m.len())
        .unwrap_or(0);

    Ok(StatsResponse {
        total_atoms,
        by_type,
        by_provenance,
        sources,
        distinct_tags,
        tagged_atoms,
        distinct_buckets,
        master_tags: infect::load_master_tags(conn)?.len(),
        db_size_bytes,
        oldest_atom,
        newest_atom,
        last_infection: infect::last_report(conn)?,
    })
}

/// Count atoms grouped by `column`, with every known value present (zero if absent).
fn count_by(conn: &Connection, column: &str, known: &[&str], source: Option<&str>) -> Result<BTreeMap<String, u64>> {
    let mut map: BTreeMap<String, u64> = known.iter().map(|k| (k.to_string(), 0)).collect();

    let sql = format!(
        "SELECT {column}, COUNT(*) FROM atoms WHERE :source IS NULL OR source = :source GROUP BY {column}"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(named_params! { ":source": source }, |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    for (value, count) in rows {
        map.insert(value, count as u64);
    }
    Ok(map)
}

fn scalar(conn: &Connection, sql: &str, source: Option<&str>) -> Result<u64> {
    let n: i64 = conn.query_row(sql, named_params! { ":source": source }, |row| row.get(0))?;
    Ok(n as u64)
}
