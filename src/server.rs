//! MCP server initialization for the stdio transport.
//!
//! [`serve_stdio`] wires the database, the tag infection service and the MCP
//! tool handler into a running server.

use anyhow::Result;
use rmcp::ServiceExt;
use std::sync::{Arc, Mutex};

use strata::config::StrataConfig;
use strata::db;
use strata::memory::infect::{InfectionOptions, TagInfectionService};
use strata::reasoning;
use strata::text::fingerprint::FINGERPRINT_SCHEME;

use crate::tools::StrataTools;

/// Shared setup: open DB, check the fingerprint scheme, build the infection service.
fn setup_shared_state(
    config: StrataConfig,
) -> Result<(
    Arc<Mutex<rusqlite::Connection>>,
    Arc<TagInfectionService>,
    Arc<StrataConfig>,
)> {
    let db_path = config.resolved_db_path();
    let conn = db::open_database(&db_path)?;
    tracing::info!(db = %db_path.display(), "database ready");

    if let Ok(Some(stored)) = db::migrations::get_fingerprint_scheme(&conn) {
        if stored != FINGERPRINT_SCHEME {
            tracing::warn!(
                stored = %stored,
                current = FINGERPRINT_SCHEME,
                "fingerprint scheme changed; dedup against existing atoms is unreliable until re-ingest"
            );
        }
    }

    let db = Arc::new(Mutex::new(conn));

    let discoverer = reasoning::create_discoverer(&config.reasoning)?;
    tracing::info!(provider = %config.reasoning.provider, "reasoning provider ready");

    let infection = Arc::new(TagInfectionService::new(
        Arc::clone(&db),
        discoverer,
        InfectionOptions::from(&config.infection),
    ));

    Ok((db, infection, Arc::new(config)))
}

/// Start the MCP server over stdio transport.
pub async fn serve_stdio(config: StrataConfig) -> Result<()> {
    tracing::info!("starting strata MCP server on stdio");

    let (db, infection, config) = setup_shared_state(config)?;

    let tools = StrataTools::new(db, infection, config);
    let transport = rmcp::transport::stdio();

    let server = tools.serve(transport).await?;
    tracing::info!("MCP server running, waiting for client");

    server.waiting().await?;
    tracing::info!("MCP server shut down");

    Ok(())
}
