use anyhow::Result;
use std::io::{BufWriter, Write};

use strata::config::StrataConfig;
use strata::db::records::{self, Record, Relation};

/// Export every relation as JSON lines (one [`Record`] per line) to stdout.
pub fn export(config: &StrataConfig) -> Result<()> {
    let db_path = config.resolved_db_path();
    let conn = strata::db::open_database(&db_path)?;

    let stdout = std::io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let mut counts = Vec::with_capacity(Relation::ALL.len());

    for relation in Relation::ALL {
        let rows = records::export_relation(&conn, relation)?;
        counts.push((relation, rows.len()));
        for row in rows {
            serde_json::to_writer(&mut out, &Record { relation, row })?;
            out.write_all(b"\n")?;
        }
    }
    out.flush()?;

    let summary: Vec<String> = counts.iter().map(|(r, n)| format!("{n} {r}")).collect();
    eprintln!("Exported {}.", summary.join(", "));
    Ok(())
}
