//! Error types for Visage operations

use crate::types::{EmbeddingId, TenantKey};
use thiserror::Error;

/// Cache layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    /// A nil embedding id was passed where a real id is required. This is a
    /// caller contract violation, distinct from "not found".
    #[error("Invalid embedding id")]
    InvalidEmbeddingId,

    #[error("Embedding {id} not found for tenant {tenant}")]
    EmbeddingNotFound { tenant: TenantKey, id: EmbeddingId },

    #[error("Loading embeddings for tenant {tenant} failed: {reason}")]
    LoaderFailed { tenant: TenantKey, reason: String },

    #[error("Cache lock poisoned")]
    LockPoisoned,
}

/// Similarity engine errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum MatchError {
    /// The external face service reported fewer than two calibration
    /// coefficients. Fatal for the request, never retried internally.
    #[error("Similarity coefficients unavailable: {reason}")]
    CoefficientsUnavailable { reason: String },

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

/// Cross-instance coherence errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoherenceError {
    /// A remote event that cannot be decoded or validated. Logged and
    /// dropped by the receiver, never surfaced to the transport.
    #[error("Malformed cache notification: {reason}")]
    MalformedEvent { reason: String },

    #[error("Publishing cache notification failed: {reason}")]
    PublishFailed { reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all Visage errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum VisageError {
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Match error: {0}")]
    Match(#[from] MatchError),

    #[error("Coherence error: {0}")]
    Coherence(#[from] CoherenceError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for Visage operations.
pub type VisageResult<T> = Result<T, VisageError>;

// =============================================================================
// TESTS
// =============================================================================
