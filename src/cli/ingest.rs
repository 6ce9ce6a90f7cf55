//! CLI `ingest` command: walk a file or directory and ingest every supported file.

use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use rusqlite::Connection;
use std::path::{Path, PathBuf};

use strata::config::StrataConfig;
use strata::error::IngestError;
use strata::memory::ingest::{IngestOptions, IngestRequest};
use strata::memory::types::{ContentType, Provenance};
use strata::CancellationToken;

/// Flags shared by every file in one `strata ingest` run.
pub struct IngestArgs {
    pub content_type: Option<ContentType>,
    pub provenance: Option<Provenance>,
    pub buckets: Vec<String>,
    pub epoch: Option<String>,
}

/// Totals over one `strata ingest` run.
#[derive(Debug, Default, PartialEq, Eq)]
struct Summary {
    files: usize,
    created: usize,
    deduped: usize,
    failed: usize,
    merge_failed: usize,
    unchanged: usize,
    cancelled: bool,
}

/// Ingest `path` (a file, or every supported file under a directory).
///
/// Files whose extension has no known content type are skipped unless
/// `--type` forces one. Ctrl-C stops between atoms; committed atoms stay.
pub fn ingest(config: &StrataConfig, path: &Path, args: &IngestArgs) -> Result<()> {
    let files = collect_files(path, args.content_type)?;
    if files.is_empty() {
        bail!("no ingestible files under {}", path.display());
    }

    let db_path = config.resolved_db_path();
    let mut conn = strata::db::open_database(&db_path)?;
    let opts = IngestOptions::from(&config.ingest);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("  {bar:40.cyan/blue} {pos}/{len} {wide_msg}")
            .context("invalid progress template")?
            .progress_chars("##-"),
    );

    let summary = ingest_files(&mut conn, &files, args, &opts, &cancel, &pb)?;
    pb.finish_and_clear();

    println!("Ingested {} of {} file(s):", summary.files, files.len());
    println!("  Atoms created:   {}", summary.created);
    println!("  Deduplicated:    {}", summary.deduped);
    println!("  Unchanged files: {}", summary.unchanged);
    if summary.failed > 0 {
        println!("  Failed atoms:    {} (re-run ingest to retry)", summary.failed);
    }
    if summary.merge_failed > 0 {
        println!("  Failed merges:   {} (re-run ingest to retry)", summary.merge_failed);
    }
    if summary.cancelled {
        println!();
        println!("Cancelled before completion.");
    }
    Ok(())
}

fn ingest_files(
    conn: &mut Connection,
    files: &[(PathBuf, ContentType)],
    args: &IngestArgs,
    opts: &IngestOptions,
    cancel: &CancellationToken,
    pb: &ProgressBar,
) -> Result<Summary> {
    let mut summary = Summary::default();
    for (file, content_type) in files {
        if cancel.is_cancelled() {
            summary.cancelled = true;
            break;
        }
        pb.set_message(file.display().to_string());

        let mut request = IngestRequest::new(String::new(), String::new(), content_type.as_str());
        request.provenance = args.provenance;
        request.buckets = args.buckets.clone();
        request.epoch = args.epoch.clone();

        let result = match strata::memory::ingest::ingest_file(conn, file, request, opts, cancel) {
            Ok(r) => r,
            Err(e @ (IngestError::Unreadable { .. } | IngestError::EmptySource(_))) => {
                pb.suspend(|| eprintln!("Skipping: {e}"));
                pb.inc(1);
                continue;
            }
            Err(e) => return Err(e).with_context(|| format!("failed to ingest {}", file.display())),
        };

        summary.files += 1;
        summary.created += result.atoms_created;
        summary.deduped += result.atoms_deduped;
        summary.failed += result.failed.len();
        summary.merge_failed += result.merge_failed.len();
        if !result.source_changed {
            summary.unchanged += 1;
        }
        pb.inc(1);
        if result.cancelled {
            summary.cancelled = true;
            break;
        }
    }
    Ok(summary)
}

fn collect_files(path: &Path, forced: Option<ContentType>) -> Result<Vec<(PathBuf, ContentType)>> {
    if !path.exists() {
        bail!("path not found: {}", path.display());
    }

    let files: Vec<(PathBuf, ContentType)> = walkdir::WalkDir::new(path)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable entry");
                eprintln!("Skipping: {e}");
                None
            }
        })
        .filter(|e| e.file_type().is_file())
        .filter(|e| !is_hidden(e.path(), path))
        .filter_map(|e| {
            let content_type = forced.or_else(|| ContentType::from_path(e.path()))?;
            Some((e.into_path(), content_type))
        })
        .collect();
    Ok(files)
}

/// Dot-prefixed components below `root` (`.git`, `.venv`, ...).
fn is_hidden(path: &Path, root: &Path) -> bool {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .any(|c| c.as_os_str().to_string_lossy().starts_with('.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_supported_files_and_skips_hidden() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.md"), "hello").unwrap();
        std::fs::write(dir.path().join("main.rs"), "fn main() {}").unwrap();
        std::fs::write(dir.path().join("image.png"), [0u8; 4]).unwrap();
        std::fs::create_dir(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join(".git").join("HEAD.md"), "ref").unwrap();

        let files = collect_files(dir.path(), None).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|(p, t)| (p.file_name().unwrap().to_string_lossy().into_owned(), *t))
            .collect();
        assert_eq!(
            names,
            vec![
                ("main.rs".to_string(), ContentType::Code),
                ("notes.md".to_string(), ContentType::Prose),
            ]
        );
    }

    #[test]
    fn forced_type_includes_unknown_extensions() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("session.out"), "user: hi").unwrap();
        let files = collect_files(dir.path(), Some(ContentType::Transcript)).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].1, ContentType::Transcript);
    }

    #[test]
    fn cancellation_stops_before_the_next_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.md"), "First file paragraph.").unwrap();
        std::fs::write(dir.path().join("b.md"), "Second file paragraph.").unwrap();
        let files = collect_files(dir.path(), None).unwrap();
        let args = IngestArgs {
            content_type: None,
            provenance: None,
            buckets: Vec::new(),
            epoch: None,
        };
        let mut conn = strata::db::open_memory_database().unwrap();
        let pb = ProgressBar::hidden();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let summary = ingest_files(&mut conn, &files, &args, &IngestOptions::default(), &cancel, &pb).unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.files, 0);

        let summary =
            ingest_files(&mut conn, &files, &args, &IngestOptions::default(), &CancellationToken::new(), &pb)
                .unwrap();
        assert_eq!(
            summary,
            Summary {
                files: 2,
                created: 2,
                ..Summary::default()
            }
        );
    }

    #[test]
    fn single_file_path_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, "text").unwrap();
        let files = collect_files(&file, None).unwrap();
        assert_eq!(files, vec![(file, ContentType::Prose)]);
    }
}
