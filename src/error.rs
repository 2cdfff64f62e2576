//! Error taxonomy for the scoring core.
//!
//! Scoring and explanation are independent pipelines: attribution failures
//! are carried inside [`crate::explain::Attribution::Unavailable`] and never
//! surface through this type, so a valid probability is always returned even
//! when the explanation is not.

use thiserror::Error;

/// Errors raised by the scoring core.
#[derive(Debug, Error)]
pub enum ScoreError {
    /// No model artifact has been loaded. Fatal for the whole service, not
    /// recoverable per-request; callers surface a degraded-service state.
    #[error("no model artifact loaded")]
    ModelUnavailable,

    /// Vector length disagrees with the schema length. Indicates a bug in an
    /// alignment code path, never user input.
    #[error("dimension mismatch: expected {expected} features, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A single-company payload is structurally invalid (non-numeric value
    /// on a known feature). Reported per-request.
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// The input table is unreadable or structurally invalid. Aborts that
    /// batch only; the service stays up.
    #[error("malformed batch input: {0}")]
    MalformedBatchInput(String),

    /// The artifact bundle fails validation (mismatched array lengths,
    /// duplicate feature names, zero scale). Rejected at load time.
    #[error("degenerate artifact: {0}")]
    DegenerateArtifact(String),

    #[error("artifact io: {0}")]
    Io(#[from] std::io::Error),

    #[error("artifact parse: {0}")]
    Json(#[from] serde_json::Error),
}
