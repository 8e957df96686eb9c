//! Error taxonomy for ingestion and dispatch.

use serde::Serialize;
use thiserror::Error;

/// Why a single raw row could not become an `Alert`.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MappingError {
    #[error("alert has no url")]
    MissingUrl,

    #[error("row is not a JSON object")]
    NotAnObject,

    #[error("unknown provider kind '{0}'")]
    UnknownProvider(String),
}

/// Failures that reject a whole ingestion request before any side effect.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("unrecognized schema (headers: {headers:?})")]
    UnrecognizedSchema { headers: Vec<String> },

    #[error("store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

impl From<MappingError> for IngestError {
    fn from(e: MappingError) -> Self {
        IngestError::Validation(e.to_string())
    }
}

/// Failures of a dispatch run as a whole. Per-alert send failures are not
/// errors: they end up in the summary with `send_error = true`.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("missing project or batch: {0}")]
    MissingProjectOrBatch(String),

    #[error("destination channel '{0}' not found")]
    ChannelNotFound(String),

    /// Soft no-op; callers report success with an explanatory message.
    #[error("project '{0}' is not configured for automatic dispatch")]
    NotInAutomaticMode(String),

    #[error("alert '{0}' not found")]
    AlertNotFound(String),

    /// Only unsent records can be reset for a manual re-send.
    #[error("alert '{0}' was already delivered")]
    AlreadySent(String),

    #[error("store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

/// Outcome of one gateway call. Every variant is retried by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("gateway transport error: {0}")]
    Transport(String),

    #[error("gateway call timed out after {0} ms")]
    Timeout(u64),

    #[error("gateway rejected message (status {status}): {body}")]
    Rejected { status: u16, body: String },
}
