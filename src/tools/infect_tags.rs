//! MCP `infect_tags` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `infect_tags` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct InfectTagsParams {
    #[schemars(description = "If true, skip discovery and re-apply the stored master tag list")]
    pub replay: Option<bool>,

    #[schemars(description = "Extra tags to merge into the master list before infection")]
    pub tags: Option<Vec<String>>,
}
