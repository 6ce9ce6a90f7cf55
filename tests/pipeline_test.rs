//! End-to-end: ingest sources, grow tags by infection, retrieve through the walk.

mod helpers;

use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use strata::memory::infect::{self, InfectionOptions, InfectionState, TagInfectionService};
use strata::memory::retrieve::{retrieve, Phase, RetrieveConfig};
use strata::memory::stats::memory_stats;
use strata::reasoning::{LlmTagDiscoverer, MockClient, NullDiscoverer};
use strata::CancellationToken;

fn corpus() -> Arc<Mutex<Connection>> {
    let mut conn = helpers::test_db();
    helpers::ingest_prose(&mut conn, "Consumer lag spiked after the Kafka upgrade.", "incidents.md");
    helpers::ingest_prose(&mut conn, "Kafka retention is set to seven days on staging.", "config.md");
    helpers::ingest_prose(&mut conn, "The garden needs watering twice a week.", "home.md");
    Arc::new(Mutex::new(conn))
}

fn sources(response: &strata::memory::retrieve::RetrieveResponse) -> Vec<(&str, Phase)> {
    response
        .results
        .iter()
        .map(|r| (r.atom.source.as_str(), r.phase))
        .collect()
}

#[tokio::test]
async fn walk_is_empty_until_infection_links_atoms() {
    let db = corpus();

    {
        let conn = db.lock().unwrap();
        let before = retrieve(&conn, "lag", &RetrieveConfig::default()).unwrap();
        assert_eq!(sources(&before), vec![("incidents.md", Phase::Anchor)]);
    }

    let service = TagInfectionService::new(
        Arc::clone(&db),
        Arc::new(NullDiscoverer),
        InfectionOptions::default(),
    );
    let report = service
        .run_with_seeds(vec!["Kafka".into()], &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.tags_in_master, 1);
    assert_eq!(report.atoms_scanned, 3);
    assert_eq!(report.atoms_infected, 2);
    assert_eq!(report.tags_applied, 2);
    assert_eq!(service.state(), InfectionState::Idle);

    let conn = db.lock().unwrap();
    let after = retrieve(&conn, "lag", &RetrieveConfig::default()).unwrap();
    assert_eq!(
        sources(&after),
        vec![("incidents.md", Phase::Anchor), ("config.md", Phase::Walk)]
    );
    assert_eq!(after.results[1].score, 3.0);
    assert!(after.results[1].atom.tags.contains("Kafka"));
}

#[tokio::test]
async fn discovered_tags_are_persisted_and_replay_is_idempotent() {
    let db = corpus();
    let discoverer = LlmTagDiscoverer::new(
        Arc::new(MockClient::answering(r#"Here you go: ["Kafka", "staging", "x"]"#)),
        10_000,
    );
    let service = TagInfectionService::new(Arc::clone(&db), Arc::new(discoverer), InfectionOptions::default());

    let first = service.run(&CancellationToken::new()).await.unwrap();
    // "x" is too short for the master list
    assert_eq!(first.tags_in_master, 2);
    assert_eq!(first.tags_applied, 3);

    let replay = service.replay(&CancellationToken::new()).await.unwrap();
    assert_eq!(replay.tags_applied, 0);
    assert_eq!(replay.atoms_scanned, 3);

    let conn = db.lock().unwrap();
    assert_eq!(infect::load_master_tags(&conn).unwrap(), vec!["Kafka", "staging"]);

    let stats = memory_stats(&conn, None, None).unwrap();
    assert_eq!(stats.distinct_tags, 2);
    assert_eq!(stats.tagged_atoms, 2);
    assert_eq!(stats.master_tags, 2);
    assert_eq!(stats.last_infection.map(|r| r.tags_applied), Some(0));
}

#[tokio::test]
async fn failed_discovery_still_replays_the_stored_list() {
    let db = corpus();
    {
        let conn = db.lock().unwrap();
        infect::save_master_tags(&conn, &["garden".to_string()]).unwrap();
    }

    let discoverer = LlmTagDiscoverer::new(Arc::new(MockClient::failing("connection refused")), 10_000);
    let service = TagInfectionService::new(Arc::clone(&db), Arc::new(discoverer), InfectionOptions::default());
    let report = service.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.tags_in_master, 1);
    assert_eq!(report.tags_applied, 1);
}

#[test]
fn retrieval_output_is_deterministic_across_connections() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("strata.db");
    {
        let mut conn = strata::db::open_database(&path).unwrap();
        for (i, topic) in ["storage", "network", "compute", "billing"].iter().enumerate() {
            let text = format!("Incident review {i}: the {topic} team found the root cause in the scheduler.");
            helpers::ingest_prose(&mut conn, &text, &format!("{topic}.md"));
        }
    }

    let run = || {
        let conn = strata::db::open_database(&path).unwrap();
        let response = retrieve(&conn, "scheduler root cause", &RetrieveConfig::default()).unwrap();
        response
            .results
            .into_iter()
            .map(|r| (r.atom.id, r.phase))
            .collect::<Vec<_>>()
    };
    let first = run();
    assert_eq!(first.len(), 4);
    assert_eq!(first, run());
}
