mod helpers;

use strata::db;
use strata::db::migrations::{
    get_fingerprint_scheme, get_schema_version, run_migrations, set_fingerprint_scheme,
    CURRENT_SCHEMA_VERSION,
};
use strata::text::fingerprint::FINGERPRINT_SCHEME;

#[test]
fn fresh_db_migrates_to_current_version() {
    let conn = helpers::test_db();
    assert_eq!(get_schema_version(&conn).unwrap(), CURRENT_SCHEMA_VERSION);
}

#[test]
fn migration_records_fingerprint_scheme() {
    let conn = helpers::test_db();
    assert_eq!(
        get_fingerprint_scheme(&conn).unwrap(),
        Some(FINGERPRINT_SCHEME.to_string())
    );
}

#[test]
fn migrations_are_idempotent() {
    let conn = helpers::test_db();
    // Running again should be a no-op
    run_migrations(&conn).unwrap();
    assert_eq!(get_schema_version(&conn).unwrap(), CURRENT_SCHEMA_VERSION);
}

#[test]
fn unmigrated_db_has_no_scheme_until_upgraded() {
    let conn = rusqlite::Connection::open_in_memory().unwrap();
    conn.pragma_update(None, "foreign_keys", "ON").unwrap();
    db::schema::init_schema(&conn).unwrap();
    assert_eq!(get_schema_version(&conn).unwrap(), 1);
    assert!(get_fingerprint_scheme(&conn).unwrap().is_none());

    run_migrations(&conn).unwrap();
    assert_eq!(get_schema_version(&conn).unwrap(), CURRENT_SCHEMA_VERSION);
    assert_eq!(get_fingerprint_scheme(&conn).unwrap().as_deref(), Some(FINGERPRINT_SCHEME));
}

#[test]
fn stale_scheme_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("strata.db");
    {
        let conn = db::open_database(&path).unwrap();
        set_fingerprint_scheme(&conn, "simhash64-legacy").unwrap();
    }

    // Reopening must not overwrite the recorded scheme; doctor compares it
    let conn = db::open_database(&path).unwrap();
    assert_eq!(
        get_fingerprint_scheme(&conn).unwrap().as_deref(),
        Some("simhash64-legacy")
    );
    assert_ne!(FINGERPRINT_SCHEME, "simhash64-legacy");
}
