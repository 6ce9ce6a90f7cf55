//! CLI `infect` command: discovery plus infection, or a replay of the stored tag list.

use anyhow::Result;
use std::sync::{Arc, Mutex};

use strata::config::StrataConfig;
use strata::memory::infect::{InfectionOptions, InfectionReport, TagInfectionService};
use strata::CancellationToken;

pub async fn infect(config: &StrataConfig, seeds: Vec<String>, replay: bool) -> Result<()> {
    let db_path = config.resolved_db_path();
    let conn = strata::db::open_database(&db_path)?;
    let db = Arc::new(Mutex::new(conn));

    let discoverer = strata::reasoning::create_discoverer(&config.reasoning)?;
    let service = TagInfectionService::new(db, discoverer, InfectionOptions::from(&config.infection));

    // Ctrl-C stops between batches; committed batches stay committed
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let report = if replay {
        println!("Replaying stored tag list...");
        service.replay(&cancel).await?
    } else {
        if config.reasoning.provider == "none" && seeds.is_empty() {
            println!("No reasoning provider configured; infecting with the stored tag list only.");
        }
        service.run_with_seeds(seeds, &cancel).await?
    };

    print_report(&report);
    Ok(())
}

fn print_report(report: &InfectionReport) {
    println!("Tag Infection");
    println!("{}", "=".repeat(40));
    println!("  Tags in master list: {}", report.tags_in_master);
    println!("  Atoms scanned:       {}", report.atoms_scanned);
    println!("  Atoms infected:      {}", report.atoms_infected);
    println!("  New tag links:       {}", report.tags_applied);
    println!("  Batches committed:   {}", report.batches_committed);
    println!("  Duration:            {} ms", report.duration_ms);
    if !report.failed_batches.is_empty() {
        println!();
        println!("Failed batches (re-run `strata infect --replay` to retry):");
        for batch in &report.failed_batches {
            println!("  rows {}..={}: {}", batch.first_rowid, batch.last_rowid, batch.error);
        }
    }
    if report.cancelled {
        println!();
        println!("Cancelled before completion.");
    }
}
