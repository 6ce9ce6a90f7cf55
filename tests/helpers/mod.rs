#![allow(dead_code)]

use rusqlite::Connection;
use strata::db;
use strata::memory::ingest::{ingest, IngestOptions, IngestRequest, IngestResult};
use strata::memory::retry::RetryPolicy;
use strata::CancellationToken;

/// Open a fresh in-memory database with schema and migrations applied.
pub fn test_db() -> Connection {
    db::open_memory_database().unwrap()
}

/// Ingest options without retry backoff, so failure tests stay fast.
pub fn fast_opts() -> IngestOptions {
    IngestOptions {
        retry: RetryPolicy::new(1, 0),
        ..IngestOptions::default()
    }
}

/// Ingest `content` as prose under `source` and return the result.
pub fn ingest_prose(conn: &mut Connection, content: &str, source: &str) -> IngestResult {
    let request = IngestRequest::new(content, source, "prose");
    ingest(conn, &request, &fast_opts(), &CancellationToken::new()).unwrap()
}

/// Atom contents of `source`, in sequence order.
pub fn atom_contents(conn: &Connection, source: &str) -> Vec<String> {
    conn.prepare("SELECT content FROM atoms WHERE source = ?1 ORDER BY sequence")
        .unwrap()
        .query_map([source], |row| row.get(0))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap()
}

/// Sequence numbers of `source`, ascending.
pub fn sequences(conn: &Connection, source: &str) -> Vec<i64> {
    conn.prepare("SELECT sequence FROM atoms WHERE source = ?1 ORDER BY sequence")
        .unwrap()
        .query_map([source], |row| row.get(0))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap()
}

pub fn count(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
        .unwrap()
}
