use anyhow::Result;

use strata::config::StrataConfig;

/// Display memory statistics in the terminal.
pub fn stats(config: &StrataConfig, source: Option<&str>) -> Result<()> {
    let db_path = config.resolved_db_path();
    let conn = strata::db::open_database(&db_path)?;

    let response = strata::memory::stats::memory_stats(&conn, source, Some(&db_path))?;

    println!("Memory Statistics");
    println!("{}", "=".repeat(40));
    if let Some(source) = source {
        println!("  Source:              {source}");
    }
    println!("  Total atoms:         {}", response.total_atoms);
    println!("  Sources:             {}", response.sources);
    println!();

    println!("By Type:");
    for (t, count) in &response.by_type {
        println!("  {:<12} {}", t, count);
    }
    println!();

    println!("By Provenance:");
    for (p, count) in &response.by_provenance {
        println!("  {:<12} {}", p, count);
    }
    println!();

    println!("Distinct tags:         {}", response.distinct_tags);
    println!("Tagged atoms:          {}", response.tagged_atoms);
    println!("Distinct buckets:      {}", response.distinct_buckets);
    println!("Master tag list:       {}", response.master_tags);
    println!("Database size:         {} bytes", response.db_size_bytes);

    if let Some(ref oldest) = response.oldest_atom {
        println!("Oldest atom:           {oldest}");
    }
    if let Some(ref newest) = response.newest_atom {
        println!("Newest atom:           {newest}");
    }
    if let Some(ref last) = response.last_infection {
        println!(
            "Last infection:        {} new links over {} atoms{}",
            last.tags_applied,
            last.atoms_scanned,
            if last.cancelled { " (cancelled)" } else { "" }
        );
    }

    Ok(())
}
