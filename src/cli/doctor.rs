//! CLI `doctor` command: run database diagnostics and print a health report.

use anyhow::{Context, Result};

use strata::config::StrataConfig;
use strata::db;
use strata::text::fingerprint::FINGERPRINT_SCHEME;

/// Run database diagnostics and print a health report.
pub fn doctor(config: &StrataConfig) -> Result<()> {
    let db_path = config.resolved_db_path();

    if !db_path.exists() {
        println!("Database: not found at {}", db_path.display());
        println!("Run `strata serve` or `strata ingest <path>` to initialize.");
        return Ok(());
    }

    let file_size = std::fs::metadata(&db_path)
        .map(|m| m.len())
        .unwrap_or(0);

    let conn = db::open_database(&db_path)
        .context("failed to open database (may be corrupt)")?;

    let report = db::check_database_health(&conn)
        .context("failed to run health check")?;

    println!("strata Health Report");
    println!("====================");
    println!();
    println!("Database:          {}", db_path.display());
    println!("File size:         {}", format_bytes(file_size));
    println!("Schema version:    {}", report.schema_version);
    println!();
    println!("Fingerprint scheme:");
    println!("  Stored:          {}", report.fingerprint_scheme.as_deref().unwrap_or("(not set)"));
    println!("  Current:         {FINGERPRINT_SCHEME}");
    if let Some(ref stored) = report.fingerprint_scheme {
        if stored != FINGERPRINT_SCHEME {
            println!("  WARNING: scheme mismatch! Near-duplicate detection against stored atoms is unreliable.");
        } else {
            println!("  Status:          OK (match)");
        }
    }
    println!();
    println!("Reasoning provider: {}", config.reasoning.provider);
    if config.reasoning.provider != "none" {
        println!("  Endpoint:        {}", config.reasoning.endpoint);
        println!("  Model:           {}", config.reasoning.model);
    }
    println!();
    println!("Row counts:");
    println!("  Atoms:           {}", report.atom_count);
    println!("  Sources:         {}", report.source_count);
    println!("  Engrams:         {}", report.engram_count);
    println!();
    if report.integrity_ok {
        println!("Integrity check:   PASSED");
    } else {
        println!("Integrity check:   FAILED ({})", report.integrity_details);
    }
    if report.fts_ok {
        println!("FTS index:         PASSED");
    } else {
        println!("FTS index:         FAILED (rebuild with `strata export` + `strata reset` + `strata import`)");
    }

    if !report.integrity_ok {
        println!();
        println!("Recovery steps:");
        println!("  1. Restore from a backup: cp backup.db ~/.strata/strata.db");
        println!("  2. Or export from a good copy and reimport:");
        println!("     strata export > backup.jsonl");
        println!("     strata reset && strata import backup.jsonl");
    }

    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
