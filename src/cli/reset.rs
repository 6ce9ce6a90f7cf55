//! CLI `reset` command: delete all stored data after user confirmation.

use anyhow::{bail, Result};
use std::io::Write;

use strata::config::StrataConfig;

/// Delete all atoms, sources, tags, buckets and engrams after user confirmation.
pub fn reset(config: &StrataConfig) -> Result<()> {
    let db_path = config.resolved_db_path();

    println!("WARNING: This will permanently delete ALL atoms, sources, tags and engrams.");
    println!("Database: {}", db_path.display());
    print!("\nType YES to confirm: ");
    std::io::stdout().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;

    if input.trim() != "YES" {
        bail!("reset cancelled");
    }

    let conn = strata::db::open_database(&db_path)?;

    // Children before parents for FK constraints
    conn.execute_batch(
        "BEGIN;
         DELETE FROM atom_tags;
         DELETE FROM atom_buckets;
         DELETE FROM atoms;
         INSERT INTO atoms_fts(atoms_fts) VALUES ('delete-all');
         DELETE FROM sources;
         DELETE FROM engrams;
         COMMIT;",
    )?;

    println!("All data deleted. Database reset complete.");
    Ok(())
}
