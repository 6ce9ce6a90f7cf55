use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct IngestTextParams {
    #[schemars(description = "Raw text to ingest. Transport escapes like \\n and \\\" are undone first.")]
    pub content: String,

    #[schemars(description = "Source path or identifier. Re-ingesting the same source continues its sequence and skips duplicates.")]
    pub source: String,

    #[schemars(description = "Content type: 'code', 'prose' or 'transcript'")]
    pub r#type: String,

    #[schemars(description = "Trust class: 'sovereign' (your own writing), 'external' (imported) or 'quarantine' (stored, never retrieved). Defaults to the configured provenance.")]
    pub provenance: Option<String>,

    #[schemars(description = "Coarse topical groupings to attach to every atom of this source")]
    pub buckets: Option<Vec<String>>,

    #[schemars(description = "Time marker for this ingestion, e.g. '2026-10-18'. Defaults to today.")]
    pub epoch: Option<String>,
}
