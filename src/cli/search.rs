use anyhow::{ensure, Result};

use strata::config::StrataConfig;
use strata::memory::retrieve::{Phase, RetrieveConfig};

/// Run a two-phase retrieval from the terminal.
pub fn search(config: &StrataConfig, query: &str, budget: Option<usize>) -> Result<()> {
    let db_path = config.resolved_db_path();
    let conn = strata::db::open_database(&db_path)?;

    let mut retrieve_config = RetrieveConfig::from(&config.retrieval);
    if let Some(budget) = budget {
        ensure!(budget > 0, "budget must be greater than 0");
        retrieve_config.budget = budget;
    }

    let response = strata::memory::retrieve::retrieve(&conn, query, &retrieve_config)?;

    if response.results.is_empty() {
        println!("No results found.");
        return Ok(());
    }

    println!(
        "Found {} anchor(s) and {} walked atom(s) ({} of {} chars{})\n",
        response.anchors,
        response.walked,
        response.chars_used,
        response.budget,
        if response.fallback_used { ", regex fallback" } else { "" },
    );

    for (i, result) in response.results.iter().enumerate() {
        let atom = &result.atom;
        let preview: String = atom.content.chars().take(120).collect();
        let ellipsis = if atom.char_len() > 120 { "..." } else { "" };
        let phase = match result.phase {
            Phase::Anchor => "anchor",
            Phase::Fallback => "fallback",
            Phase::Walk => "walk",
        };

        println!(
            "  {}. [{phase}] {}#{} ({}, {}, score: {:.3})",
            i + 1,
            atom.source,
            atom.sequence,
            atom.content_type,
            atom.provenance,
            result.score,
        );
        if !atom.tags.is_empty() {
            let tags: Vec<&str> = atom.tags.iter().map(String::as_str).collect();
            println!("     tags: {}", tags.join(", "));
        }
        println!("     {preview}{ellipsis}");
        println!();
    }

    Ok(())
}
