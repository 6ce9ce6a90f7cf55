//! Typed errors for the ingestion and reasoning boundaries.
//!
//! Everything else in the crate uses `anyhow::Result` with context; these
//! enums exist where callers need to tell input errors apart from storage
//! failures (ingestion) or where a collaborator failure must be absorbed
//! (reasoning).

/// Errors that reject a whole source ingestion.
///
/// Input errors are raised before any write. Per-atom storage failures do not
/// appear here; they are collected in [`crate::memory::ingest::IngestResult::failed`].
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("unsupported content type: {0}")]
    UnsupportedContentType(String),

    #[error("source is empty: {0}")]
    EmptySource(String),

    #[error("source is unreadable: {path}: {reason}")]
    Unreadable { path: String, reason: String },

    #[error("storage error while ingesting {path}: {error}")]
    Storage {
        path: String,
        #[source]
        error: anyhow::Error,
    },
}

/// Errors from the reasoning collaborator.
///
/// Tag discovery swallows all of these and returns an empty tag list.
#[derive(Debug, thiserror::Error)]
pub enum ReasoningError {
    #[error("reasoning collaborator not configured")]
    Unavailable,

    #[error("request failed: {0}")]
    Http(String),

    #[error("collaborator returned HTTP {0}")]
    Status(u16),

    #[error("malformed response: {0}")]
    MalformedResponse(String),
}
