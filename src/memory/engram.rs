//! Engrams: small durable key/value records for auxiliary state such as the
//! discovered master tag list and the last infection report.

use anyhow::{Context, Result};
use rusqlite::{named_params, Connection, OptionalExtension};

use crate::memory::types::Engram;

/// Read an engram by key.
pub fn get(conn: &Connection, key: &str) -> Result<Option<Engram>> {
    let row = conn
        .query_row(
            "SELECT key, value, updated_at FROM engrams WHERE key = :key",
            named_params! { ":key": key },
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            },
        )
        .optional()?;

    row.map(|(key, value, updated_at)| {
        let value = serde_json::from_str(&value)
            .with_context(|| format!("engram {key} holds invalid JSON"))?;
        Ok(Engram {
            key,
            value,
            updated_at,
        })
    })
    .transpose()
}

/// Create or replace an engram.
pub fn put(conn: &Connection, key: &str, value: &serde_json::Value) -> Result<()> {
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO engrams (key, value, updated_at) VALUES (:key, :value, :now) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        named_params! { ":key": key, ":value": value.to_string(), ":now": now },
    )?;
    tracing::debug!(key, "engram written");
    Ok(())
}

/// Delete an engram. Returns whether it existed.
pub fn delete(conn: &Connection, key: &str) -> Result<bool> {
    let n = conn.execute(
        "DELETE FROM engrams WHERE key = :key",
        named_params! { ":key": key },
    )?;
    Ok(n > 0)
}

/// All engram keys, sorted.
pub fn list_keys(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT key FROM engrams ORDER BY key")?;
    let keys = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(keys)
}
