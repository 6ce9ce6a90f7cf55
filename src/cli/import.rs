use anyhow::{Context, Result};
use std::collections::HashMap;
use std::io::BufRead;
use std::path::Path;

use strata::config::StrataConfig;
use strata::db::records::{self, Record, Relation};

/// Import a JSON-lines export produced by `strata export`.
///
/// Rows whose key already exists are skipped. Relations are applied in
/// dependency order regardless of their order in the file.
pub fn import(config: &StrataConfig, file: &Path) -> Result<()> {
    let reader = std::io::BufReader::new(
        std::fs::File::open(file)
            .with_context(|| format!("failed to read import file: {}", file.display()))?,
    );

    let mut grouped: HashMap<Relation, Vec<Vec<serde_json::Value>>> = HashMap::new();
    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: Record = serde_json::from_str(&line)
            .with_context(|| format!("line {}: not a valid export record", n + 1))?;
        grouped.entry(record.relation).or_default().push(record.row);
    }

    let db_path = config.resolved_db_path();
    let mut conn = strata::db::open_database(&db_path)?;

    println!("Import complete:");
    for relation in Relation::ALL {
        let Some(rows) = grouped.get(&relation) else {
            continue;
        };
        let (inserted, skipped) = records::import_relation(&mut conn, relation, rows)?;
        println!("  {:<14} {inserted} imported, {skipped} skipped (already exist)", relation.to_string());
    }

    Ok(())
}
