//! Ordered record streams for backup and restore.
//!
//! Every persisted relation can be exported as a sequence of rows, each row a
//! JSON array in the relation's fixed column order. An external tool needs no
//! schema knowledge beyond that order to round-trip the data. Imports skip
//! rows whose key already exists and rebuild the FTS index afterwards.

use anyhow::{bail, Context, Result};
use rusqlite::types::{Value, ValueRef};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::memory::types::{ATOM_COLUMNS, ENGRAM_COLUMNS, SOURCE_COLUMNS};

/// A persisted relation, in dependency order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    Sources,
    Atoms,
    AtomTags,
    AtomBuckets,
    Engrams,
}

impl Relation {
    /// All relations, ordered so that imports satisfy foreign keys.
    pub const ALL: [Relation; 5] = [
        Relation::Sources,
        Relation::Atoms,
        Relation::AtomTags,
        Relation::AtomBuckets,
        Relation::Engrams,
    ];

    pub fn table(&self) -> &'static str {
        match self {
            Self::Sources => "sources",
            Self::Atoms => "atoms",
            Self::AtomTags => "atom_tags",
            Self::AtomBuckets => "atom_buckets",
            Self::Engrams => "engrams",
        }
    }

    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            Self::Sources => SOURCE_COLUMNS,
            Self::Atoms => ATOM_COLUMNS,
            Self::AtomTags => &["atom_id", "tag"],
            Self::AtomBuckets => &["atom_id", "bucket"],
            Self::Engrams => ENGRAM_COLUMNS,
        }
    }

    fn order_by(&self) -> &'static str {
        match self {
            Self::Sources => "path",
            Self::Atoms => "source, sequence",
            Self::AtomTags => "atom_id, tag",
            Self::AtomBuckets => "atom_id, bucket",
            Self::Engrams => "key",
        }
    }
}

impl std::fmt::Display for Relation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.table())
    }
}

impl std::str::FromStr for Relation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Relation::ALL
            .into_iter()
            .find(|r| r.table() == s)
            .ok_or_else(|| format!("unknown relation: {s}"))
    }
}

/// One exported row, tagged with its relation. This is the JSON-lines unit
/// written by `strata export`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub relation: Relation,
    pub row: Vec<serde_json::Value>,
}

/// Export every row of `relation` in column order.
pub fn export_relation(conn: &Connection, relation: Relation) -> Result<Vec<Vec<serde_json::Value>>> {
    let columns = relation.columns();
    let sql = format!(
        "SELECT {} FROM {} ORDER BY {}",
        columns.join(", "),
        relation.table(),
        relation.order_by()
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], |row| {
            (0..columns.len())
                .map(|i| row.get_ref(i).map(value_to_json))
                .collect::<rusqlite::Result<Vec<_>>>()
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Import rows into `relation`. Returns `(inserted, skipped)`.
///
/// Rows must be in the relation's column order. Atom imports rebuild the FTS index.
pub fn import_relation(
    conn: &mut Connection,
    relation: Relation,
    rows: &[Vec<serde_json::Value>],
) -> Result<(usize, usize)> {
    let columns = relation.columns();
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "INSERT OR IGNORE INTO {} ({}) VALUES ({})",
        relation.table(),
        columns.join(", "),
        placeholders.join(", ")
    );

    let tx = conn.transaction()?;
    let mut inserted = 0usize;
    {
        let mut stmt = tx.prepare(&sql)?;
        for (i, row) in rows.iter().enumerate() {
            if row.len() != columns.len() {
                bail!(
                    "{relation} row {i} has {} values, expected {}",
                    row.len(),
                    columns.len()
                );
            }
            let values: Vec<Value> = row
                .iter()
                .map(json_to_value)
                .collect::<Result<_>>()
                .with_context(|| format!("{relation} row {i}"))?;
            inserted += stmt.execute(rusqlite::params_from_iter(values.iter()))?;
        }
    }
    if relation == Relation::Atoms && inserted > 0 {
        tx.execute("INSERT INTO atoms_fts(atoms_fts) VALUES ('rebuild')", [])?;
    }
    tx.commit()?;

    tracing::info!(relation = %relation, inserted, skipped = rows.len() - inserted, "relation imported");
    Ok((inserted, rows.len() - inserted))
}

fn value_to_json(value: ValueRef<'_>) -> serde_json::Value {
    match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::from(i),
        ValueRef::Real(f) => serde_json::Value::from(f),
        ValueRef::Text(t) => serde_json::Value::from(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => serde_json::Value::from(b.to_vec()),
    }
}

fn json_to_value(value: &serde_json::Value) -> Result<Value> {
    Ok(match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Integer(i64::from(*b)),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Integer(i),
            None => Value::Real(n.as_f64().context("number out of range")?),
        },
        serde_json::Value::String(s) => Value::Text(s.clone()),
        serde_json::Value::Array(items) => {
            let bytes = items
                .iter()
                .map(|v| {
                    v.as_u64()
                        .and_then(|b| u8::try_from(b).ok())
                        .context("blob arrays must hold bytes")
                })
                .collect::<Result<Vec<u8>>>()?;
            Value::Blob(bytes)
        }
        serde_json::Value::Object(_) => bail!("objects are not valid column values"),
    })
}
