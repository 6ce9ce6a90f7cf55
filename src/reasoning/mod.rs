//! Reasoning collaborator: a text-in/text-out model used for tag discovery.
//!
//! [`ReasoningClient`] abstracts over how the model is reached (HTTP, mock).
//! [`TagDiscoverer`] is the capability tag infection depends on; it never
//! fails, a broken or absent collaborator just discovers nothing.
//!
//! Implementations:
//! - `HttpReasoningClient`: OpenAI-compatible chat-completions endpoint
//! - `MockClient`: returns a preconfigured response (testing)
//! - `LlmTagDiscoverer`: prompts a client and parses its answer fail-soft
//! - `NullDiscoverer`: always empty

pub mod http;

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::ReasoningConfig;
use crate::error::ReasoningError;

pub use http::HttpReasoningClient;

/// Instruction sent with every discovery sample.
pub const DISCOVERY_INSTRUCTION: &str = "You label a personal knowledge base. \
Read the text samples and list the specific named entities, projects, tools, \
people, places and technical terms that recur in them. Prefer high-specificity \
strings that would identify related notes; skip generic words. \
Answer with a JSON array of strings and nothing else.";

/// Text-in/text-out model access.
#[async_trait]
pub trait ReasoningClient: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<String, ReasoningError>;
}

/// Proposes candidate tags for a sample of atom contents.
#[async_trait]
pub trait TagDiscoverer: Send + Sync {
    async fn discover(&self, sample: &[String]) -> Vec<String>;
}

/// Discoverer that finds nothing. Used when no collaborator is configured.
pub struct NullDiscoverer;

#[async_trait]
impl TagDiscoverer for NullDiscoverer {
    async fn discover(&self, _sample: &[String]) -> Vec<String> {
        Vec::new()
    }
}

/// Discoverer backed by a [`ReasoningClient`].
pub struct LlmTagDiscoverer {
    client: Arc<dyn ReasoningClient>,
    max_sample_chars: usize,
}

impl LlmTagDiscoverer {
    pub fn new(client: Arc<dyn ReasoningClient>, max_sample_chars: usize) -> Self {
        Self {
            client,
            max_sample_chars,
        }
    }

    /// Join sample texts into one payload, stopping before `max_sample_chars`.
    fn payload(&self, sample: &[String]) -> String {
        let mut out = String::new();
        let mut used = 0usize;
        for (i, text) in sample.iter().enumerate() {
            let len = text.chars().count();
            if i > 0 && used + len > self.max_sample_chars {
                break;
            }
            out.push_str(&format!("--- sample {} ---\n{}\n\n", i + 1, text));
            used += len;
        }
        out
    }
}

#[async_trait]
impl TagDiscoverer for LlmTagDiscoverer {
    async fn discover(&self, sample: &[String]) -> Vec<String> {
        if sample.is_empty() {
            return Vec::new();
        }
        match self.client.complete(DISCOVERY_INSTRUCTION, &self.payload(sample)).await {
            Ok(answer) => {
                let tags = parse_tag_list(&answer);
                tracing::info!(samples = sample.len(), tags = tags.len(), "tag discovery answered");
                tags
            }
            Err(e) => {
                tracing::warn!(error = %e, "tag discovery failed, continuing with no tags");
                Vec::new()
            }
        }
    }
}

/// Extract a list of strings from a model answer.
///
/// Accepts a JSON array, an object with a `tags` array, or the first
/// bracketed array embedded in prose (e.g. inside a code fence). Non-string
/// entries are skipped. Valid JSON of any other shape, and anything else,
/// gives an empty list.
pub fn parse_tag_list(answer: &str) -> Vec<String> {
    let trimmed = answer.trim();
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        return strings_from_json(value).unwrap_or_default();
    }

    // First `[` through the last `]` after it
    if let (Some(start), Some(end)) = (trimmed.find('['), trimmed.rfind(']')) {
        if start < end {
            if let Ok(value) = serde_json::from_str(&trimmed[start..=end]) {
                return strings_from_json(value).unwrap_or_default();
            }
        }
    }

    tracing::warn!(chars = answer.len(), "unparseable tag discovery answer");
    Vec::new()
}

fn strings_from_json(value: serde_json::Value) -> Option<Vec<String>> {
    let items = match value {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(mut map) => match map.remove("tags") {
            Some(serde_json::Value::Array(items)) => items,
            _ => return None,
        },
        _ => return None,
    };
    Some(
        items
            .into_iter()
            .filter_map(|v| match v {
                serde_json::Value::String(s) => Some(s),
                _ => None,
            })
            .collect(),
    )
}

/// Build the discoverer the config asks for.
pub fn create_discoverer(config: &ReasoningConfig) -> anyhow::Result<Arc<dyn TagDiscoverer>> {
    match config.provider.as_str() {
        "none" => Ok(Arc::new(NullDiscoverer)),
        "http" => {
            let client = HttpReasoningClient::from_config(config)?;
            Ok(Arc::new(LlmTagDiscoverer::new(
                Arc::new(client),
                config.max_sample_chars,
            )))
        }
        other => anyhow::bail!("unknown reasoning provider: {other}"),
    }
}

/// Mock client for testing: returns one preconfigured answer or error.
pub struct MockClient {
    answer: Result<String, String>,
}

impl MockClient {
    pub fn answering(answer: impl Into<String>) -> Self {
        Self {
            answer: Ok(answer.into()),
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            answer: Err(message.into()),
        }
    }
}

#[async_trait]
impl ReasoningClient for MockClient {
    async fn complete(&self, _system: &str, _user: &str) -> Result<String, ReasoningError> {
        match &self.answer {
            Ok(answer) => Ok(answer.clone()),
            Err(message) => Err(ReasoningError::Http(message.clone())),
        }
    }
}
