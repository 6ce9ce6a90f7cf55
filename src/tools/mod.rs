pub mod infect_tags;
pub mod ingest_text;
pub mod memory_stats;
pub mod retrieve_context;

use infect_tags::InfectTagsParams;
use ingest_text::IngestTextParams;
use memory_stats::MemoryStatsParams;
use retrieve_context::RetrieveContextParams;
use rmcp::handler::server::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::{tool, tool_handler, tool_router, ServerHandler};
use rusqlite::Connection;
use std::sync::{Arc, Mutex};

use strata::config::StrataConfig;
use strata::memory::infect::TagInfectionService;
use strata::memory::ingest::{IngestOptions, IngestRequest};
use strata::memory::retrieve::RetrieveConfig;
use strata::memory::types::Provenance;
use strata::CancellationToken;

/// The strata MCP tool handler. Holds shared state (db connection, infection
/// service, config) and exposes all MCP tools via the `#[tool_router]` macro.
#[derive(Clone)]
pub struct StrataTools {
    tool_router: ToolRouter<Self>,
    db: Arc<Mutex<Connection>>,
    infection: Arc<TagInfectionService>,
    config: Arc<StrataConfig>,
}

#[tool_router]
impl StrataTools {
    pub fn new(
        db: Arc<Mutex<Connection>>,
        infection: Arc<TagInfectionService>,
        config: Arc<StrataConfig>,
    ) -> Self {
        Self {
            tool_router: Self::tool_router(),
            db,
            infection,
            config,
        }
    }

    /// Ingest a document, transcript or source file into memory.
    #[tool(description = "Ingest text into memory. It is split into atoms (code by top-level blocks, prose by paragraphs), near-duplicates are skipped, and every stored atom is verified by reading it back.")]
    async fn ingest_text(
        &self,
        Parameters(params): Parameters<IngestTextParams>,
    ) -> Result<String, String> {
        // 1. Validate inputs
        let provenance = params
            .provenance
            .as_deref()
            .map(str::parse::<Provenance>)
            .transpose()?;

        tracing::info!(
            source = %params.source,
            content_len = params.content.len(),
            content_type = %params.r#type,
            "ingest_text called"
        );

        let request = IngestRequest {
            content: params.content,
            source: params.source,
            content_type: params.r#type,
            provenance,
            buckets: params.buckets.unwrap_or_default(),
            epoch: params.epoch,
        };
        let opts = IngestOptions::from(&self.config.ingest);

        // 2. Run the write path (sync DB ops → spawn_blocking)
        let db = Arc::clone(&self.db);
        let result = tokio::task::spawn_blocking(move || {
            let mut conn = db
                .lock()
                .map_err(|e| format!("db lock poisoned: {e}"))?;
            strata::memory::ingest::ingest(&mut conn, &request, &opts, &CancellationToken::new())
                .map_err(|e| format!("ingest failed: {e}"))
        })
        .await
        .map_err(|e| format!("db task failed: {e}"))??;

        tracing::info!(
            source = %result.source,
            created = result.atoms_created,
            deduped = result.atoms_deduped,
            failed = result.failed.len(),
            merge_failed = result.merge_failed.len(),
            "source ingested"
        );

        serde_json::to_string(&result).map_err(|e| format!("serialization failed: {e}"))
    }

    /// Retrieve context for a query within a character budget.
    #[tool(description = "Retrieve memory context for a query. Returns exact keyword matches first (anchors, ~70% of the budget), then atoms sharing tags or buckets with them (walk, ~30%).")]
    async fn retrieve_context(
        &self,
        Parameters(params): Parameters<RetrieveContextParams>,
    ) -> Result<String, String> {
        tracing::info!(query = %params.query, "retrieve_context called");

        let mut config = RetrieveConfig::from(&self.config.retrieval);
        if let Some(budget) = params.budget {
            if budget == 0 {
                return Err("budget must be greater than 0".into());
            }
            config.budget = budget;
        }

        let db = Arc::clone(&self.db);
        let query = params.query;
        let response = tokio::task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|e| anyhow::anyhow!("db lock poisoned: {e}"))?;
            strata::memory::retrieve::retrieve(&conn, &query, &config)
        })
        .await
        .map_err(|e| format!("db task failed: {e}"))?
        .map_err(|e| format!("retrieval failed: {e}"))?;

        serde_json::to_string(&response).map_err(|e| format!("serialization failed: {e}"))
    }

    /// Discover tags and propagate them across all atoms.
    #[tool(description = "Run tag infection: discover specific tags from a sample of atoms with the reasoning model, then apply them to every atom that mentions them. Use replay=true to re-apply the stored tag list without discovery.")]
    async fn infect_tags(
        &self,
        Parameters(params): Parameters<InfectTagsParams>,
    ) -> Result<String, String> {
        let replay = params.replay.unwrap_or(false);
        tracing::info!(replay, "infect_tags called");

        let cancel = CancellationToken::new();
        let report = if replay {
            self.infection.replay(&cancel).await
        } else {
            self.infection
                .run_with_seeds(params.tags.unwrap_or_default(), &cancel)
                .await
        }
        .map_err(|e| format!("infection failed: {e}"))?;

        serde_json::to_string(&report).map_err(|e| format!("serialization failed: {e}"))
    }

    /// Get statistics about the memory store.
    #[tool(description = "Get memory store statistics: atom counts by type and provenance, sources, tags, buckets, last infection run.")]
    async fn memory_stats(
        &self,
        Parameters(params): Parameters<MemoryStatsParams>,
    ) -> Result<String, String> {
        tracing::info!(source = ?params.source, "memory_stats called");

        let db = Arc::clone(&self.db);
        let db_path = self.config.resolved_db_path();
        let stats = tokio::task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|e| anyhow::anyhow!("db lock poisoned: {e}"))?;
            strata::memory::stats::memory_stats(&conn, params.source.as_deref(), Some(&db_path))
        })
        .await
        .map_err(|e| format!("db task failed: {e}"))?
        .map_err(|e| format!("stats failed: {e}"))?;

        serde_json::to_string(&stats).map_err(|e| format!("serialization failed: {e}"))
    }
}

#[tool_handler]
impl ServerHandler for StrataTools {
    fn get_info(&self) -> rmcp::model::ServerInfo {
        rmcp::model::ServerInfo {
            instructions: Some(
                "strata is a local memory substrate. Use ingest_text to store documents, \
                 retrieve_context to pull budgeted context for a query, and infect_tags \
                 to grow the tag graph that links related atoms."
                    .into(),
            ),
            capabilities: rmcp::model::ServerCapabilities::builder()
                .enable_tools()
                .build(),
            ..Default::default()
        }
    }
}
