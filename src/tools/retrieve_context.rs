//! MCP `retrieve_context` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `retrieve_context` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct RetrieveContextParams {
    /// Keywords to anchor on.
    #[schemars(description = "Query text. Terms are matched with stemming; any term can anchor a result.")]
    pub query: String,

    /// Character budget for the returned atoms.
    #[schemars(description = "Context budget in characters of atom content. Defaults to the configured budget (8000).")]
    pub budget: Option<usize>,
}
