mod helpers;

use std::collections::BTreeSet;

use strata::memory::ingest::{ingest, IngestOptions, IngestRequest};
use strata::memory::retrieve::{fetch_atoms, retrieve, Phase, RetrieveConfig};
use strata::memory::types::Provenance;
use strata::text::atomize::CODE_HARD_LIMIT;
use strata::CancellationToken;

const WORDS: [&str; 24] = [
    "alpha", "beta", "gamma", "delta", "epsilon", "zeta", "eta", "theta", "iota", "kappa", "lambda", "mu",
    "nu", "xi", "omicron", "pi", "rho", "sigma", "tau", "upsilon", "phi", "chi", "psi", "omega",
];

/// A function body whose lines share little vocabulary, so its chunks do not
/// fingerprint as near-duplicates of each other.
fn varied_function(name: &str, lines: usize) -> String {
    let mut f = format!("fn {name}() {{\n");
    for i in 0..lines {
        let a = WORDS[i % WORDS.len()];
        let b = WORDS[(i * 7 + 3) % WORDS.len()];
        f.push_str(&format!(
            "    let {a}_{i} = {b}_table.lookup({}).unwrap_or({a}_default);\n",
            i * 13
        ));
    }
    f.push_str("}\n");
    f
}

const BASE: &str = "Weekly sync covered the database migration plan and the rollout schedule for the new billing service";

#[test]
fn prose_near_duplicate_paragraph_is_skipped() {
    let mut conn = helpers::test_db();
    let text = "The ingestion pipeline fingerprints every atom before writing it.\n\n\
                The ingestion pipeline fingerprints every atom before writing it\n\n\
                Retrieval starts from lexical anchors and then walks shared tags.";

    let result = helpers::ingest_prose(&mut conn, text, "notes.md");

    assert_eq!(result.atoms_created, 2);
    assert_eq!(result.atoms_deduped, 1);
    assert_eq!(result.total_atoms, 2);
    assert!(result.failed.is_empty());
    assert!(result.source_changed);
    assert_eq!(helpers::sequences(&conn, "notes.md"), vec![0, 1]);
    assert_eq!(
        helpers::atom_contents(&conn, "notes.md"),
        vec![
            "The ingestion pipeline fingerprints every atom before writing it.",
            "Retrieval starts from lexical anchors and then walks shared tags.",
        ]
    );
}

#[test]
fn paragraphs_equal_up_to_trailing_whitespace_store_once() {
    let mut conn = helpers::test_db();
    let text = "Backups are verified every Sunday night.   \n\n\
                Backups are verified every Sunday night.\n\n\
                Restores are rehearsed once per quarter.";

    let result = helpers::ingest_prose(&mut conn, text, "backup.md");

    assert_eq!(result.atoms_created, 2);
    assert_eq!(result.total_atoms, 2);
}

#[test]
fn code_with_oversized_function_splits_on_lines() {
    let mut conn = helpers::test_db();
    let code = format!("fn short() {{\n    let x = 1;\n}}\n\n{}", varied_function("long", 40));
    assert!(code.len() > CODE_HARD_LIMIT);

    let request = IngestRequest::new(code.clone(), "src/lib.rs", "code");
    let result = ingest(&mut conn, &request, &helpers::fast_opts(), &CancellationToken::new()).unwrap();

    assert_eq!(result.atoms_created, 2);
    assert_eq!(result.total_atoms, 2);

    let atoms = helpers::atom_contents(&conn, "src/lib.rs");
    assert!(atoms[0].starts_with("fn short()"));
    let first_len = atoms[0].chars().count();
    assert!(first_len <= CODE_HARD_LIMIT);
    assert!(first_len > CODE_HARD_LIMIT - 100, "split should land near the hard limit");
    assert!(atoms[1].starts_with("let "));
    assert!(atoms[1].ends_with('}'));

    let ty: String = conn
        .query_row("SELECT DISTINCT type FROM atoms", [], |row| row.get(0))
        .unwrap();
    assert_eq!(ty, "code");
}

#[test]
fn unchanged_source_creates_nothing() {
    let mut conn = helpers::test_db();
    let text = "First stable paragraph about backups.\n\nSecond stable paragraph about restores.";

    let first = helpers::ingest_prose(&mut conn, text, "ops.md");
    let second = helpers::ingest_prose(&mut conn, text, "ops.md");

    assert_eq!(first.atoms_created, 2);
    assert!(!second.source_changed);
    assert_eq!(second.atoms_created, 0);
    assert_eq!(second.atoms_deduped, 2);
    assert_eq!(second.total_atoms, 2);
    assert_ne!(first.source_id, second.source_id);
}

#[test]
fn appended_text_continues_the_sequence() {
    let mut conn = helpers::test_db();
    let text = "The ingestion pipeline fingerprints every atom before writing it.\n\n\
                Retrieval starts from lexical anchors and then walks shared tags.";
    helpers::ingest_prose(&mut conn, text, "log.md");

    let appended = format!("{text}\n\nA brand new closing paragraph about cache eviction policies.");
    let result = helpers::ingest_prose(&mut conn, &appended, "log.md");

    assert!(result.source_changed);
    assert_eq!(result.atoms_created, 1);
    assert_eq!(result.atoms_deduped, 2);
    assert_eq!(result.total_atoms, 3);
    assert_eq!(helpers::sequences(&conn, "log.md"), vec![0, 1, 2]);
}

#[test]
fn near_duplicates_only_merge_within_a_source() {
    let mut conn = helpers::test_db();
    let near = format!("{BASE} today");

    // Same source: within distance, merged
    let same = helpers::ingest_prose(&mut conn, &format!("{BASE}\n\n{near}"), "same.md");
    assert_eq!(same.atoms_created, 1);
    assert_eq!(same.atoms_deduped, 1);

    // Other sources: only an exact fingerprint merges
    let other = helpers::ingest_prose(&mut conn, &near, "other.md");
    assert_eq!(other.atoms_created, 1);
    let exact = helpers::ingest_prose(&mut conn, &format!("{BASE}."), "exact.md");
    assert_eq!(exact.atoms_created, 0);
    assert_eq!(exact.atoms_deduped, 1);
    assert_eq!(exact.total_atoms, 0);
}

#[test]
fn zero_distance_disables_near_duplicate_merging() {
    let mut conn = helpers::test_db();
    let opts = IngestOptions {
        dedup_distance: 0,
        ..helpers::fast_opts()
    };
    let request = IngestRequest::new(format!("{BASE}\n\n{BASE} today"), "strict.md", "prose");
    let result = ingest(&mut conn, &request, &opts, &CancellationToken::new()).unwrap();
    assert_eq!(result.atoms_created, 2);
}

#[test]
fn cross_source_duplicate_extends_epochs_and_buckets() {
    let mut conn = helpers::test_db();
    let text = "Shared boilerplate paragraph about the license terms.";
    let token = CancellationToken::new();

    let first = IngestRequest {
        buckets: vec!["legal".into()],
        epoch: Some("2024-q1".into()),
        ..IngestRequest::new(text, "a.md", "prose")
    };
    ingest(&mut conn, &first, &helpers::fast_opts(), &token).unwrap();

    let second = IngestRequest {
        buckets: vec!["archive".into()],
        epoch: Some("2024-q2".into()),
        ..IngestRequest::new(text, "b.md", "prose")
    };
    let result = ingest(&mut conn, &second, &helpers::fast_opts(), &token).unwrap();
    assert_eq!(result.atoms_deduped, 1);
    assert_eq!(helpers::count(&conn, "atoms"), 1);

    let id: String = conn.query_row("SELECT id FROM atoms", [], |row| row.get(0)).unwrap();
    let atoms = fetch_atoms(&conn, &[id.as_str()]).unwrap();
    let atom = &atoms[&id];
    assert_eq!(atom.source, "a.md");
    assert_eq!(atom.epochs, vec!["2024-q1".to_string(), "2024-q2".to_string()]);
    assert_eq!(
        atom.buckets,
        BTreeSet::from(["archive".to_string(), "legal".to_string()])
    );
}

#[test]
fn failed_atoms_are_reported_and_recovered_on_reingest() {
    let mut conn = helpers::test_db();
    conn.execute_batch(
        "CREATE TRIGGER reject_poison BEFORE INSERT ON atoms \
         WHEN NEW.content LIKE '%poisoned%' \
         BEGIN SELECT RAISE(ABORT, 'poisoned atom'); END;",
    )
    .unwrap();

    let text = "First healthy paragraph about release notes.\n\n\
                This paragraph is poisoned and will be rejected.\n\n\
                Last healthy paragraph about the changelog format.";

    let result = helpers::ingest_prose(&mut conn, text, "release.md");
    assert_eq!(result.atoms_created, 2);
    assert_eq!(result.failed.len(), 1);
    assert_eq!(result.failed[0].sequence, 1);
    assert!(result.failed[0].error.contains("poisoned atom"));
    assert_eq!(result.total_atoms, 2);
    assert_eq!(helpers::count(&conn, "atoms_fts"), 2);

    conn.execute_batch("DROP TRIGGER reject_poison;").unwrap();
    let retry = helpers::ingest_prose(&mut conn, text, "release.md");
    assert!(!retry.source_changed);
    assert_eq!(retry.atoms_created, 1);
    assert_eq!(retry.atoms_deduped, 2);
    assert_eq!(retry.total_atoms, 3);
    // The recovered paragraph takes the slot its failed write left behind
    assert_eq!(helpers::sequences(&conn, "release.md"), vec![0, 1, 2]);
    assert_eq!(
        helpers::atom_contents(&conn, "release.md"),
        vec![
            "First healthy paragraph about release notes.",
            "This paragraph is poisoned and will be rejected.",
            "Last healthy paragraph about the changelog format.",
        ]
    );
}

#[test]
fn transport_escapes_are_cleansed() {
    let mut conn = helpers::test_db();
    let escaped = r#"User said \"ship it\".\n\nAssistant replied with a path: C:\\temp"#;
    helpers::ingest_prose(&mut conn, escaped, "chat.log");
    assert_eq!(
        helpers::atom_contents(&conn, "chat.log"),
        vec![
            "User said \"ship it\".",
            "Assistant replied with a path: C:\\temp",
        ]
    );
}

#[test]
fn quarantined_copy_does_not_hide_sovereign_text() {
    let mut conn = helpers::test_db();
    let text = "Payroll exports run on the last Friday of every month.";
    let token = CancellationToken::new();

    let scraped = IngestRequest {
        provenance: Some(Provenance::Quarantine),
        ..IngestRequest::new(text, "scrape.html.md", "prose")
    };
    ingest(&mut conn, &scraped, &helpers::fast_opts(), &token).unwrap();
    assert!(retrieve(&conn, "payroll", &RetrieveConfig::default()).unwrap().results.is_empty());

    let own = IngestRequest::new(text, "mine.md", "prose");
    let result = ingest(&mut conn, &own, &helpers::fast_opts(), &token).unwrap();
    assert_eq!(result.atoms_created, 1);
    assert_eq!(result.total_atoms, 1);

    let response = retrieve(&conn, "payroll", &RetrieveConfig::default()).unwrap();
    assert!(!response.fallback_used);
    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].atom.source, "mine.md");
    assert_eq!(response.results[0].atom.provenance, Provenance::Sovereign);
    assert_eq!(response.results[0].phase, Phase::Anchor);
}

#[test]
fn failed_merge_is_reported_and_retried_on_reingest() {
    let mut conn = helpers::test_db();
    let text = "Shared boilerplate paragraph about the license terms.";
    let token = CancellationToken::new();
    helpers::ingest_prose(&mut conn, text, "a.md");

    conn.execute_batch(
        "CREATE TRIGGER reject_bucket BEFORE INSERT ON atom_buckets \
         BEGIN SELECT RAISE(ABORT, 'bucket rejected'); END;",
    )
    .unwrap();
    let request = IngestRequest {
        buckets: vec!["legal".into()],
        epoch: Some("2030-01-01".into()),
        ..IngestRequest::new(text, "b.md", "prose")
    };
    let result = ingest(&mut conn, &request, &helpers::fast_opts(), &token).unwrap();
    assert_eq!(result.atoms_deduped, 0);
    assert_eq!(result.merge_failed.len(), 1);
    assert!(result.merge_failed[0].error.contains("bucket rejected"));

    conn.execute_batch("DROP TRIGGER reject_bucket;").unwrap();
    let retry = ingest(&mut conn, &request, &helpers::fast_opts(), &token).unwrap();
    assert_eq!(retry.atoms_deduped, 1);
    assert!(retry.merge_failed.is_empty());

    let id = result.merge_failed[0].atom_id.clone();
    let atoms = fetch_atoms(&conn, &[id.as_str()]).unwrap();
    assert!(atoms[&id].epochs.contains(&"2030-01-01".to_string()));
    assert!(atoms[&id].buckets.contains("legal"));
}
