//! Identity types shared across the Visage crates.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier of one embedding vector.
///
/// Globally unique by contract: the same id never belongs to two subjects,
/// and never to two tenants.
pub type EmbeddingId = Uuid;

/// Label grouping the embeddings that belong to one person.
pub type SubjectName = String;

/// Opaque tenant ("domain") key partitioning all cached data.
///
/// The key is never interpreted; it only has to be non-blank. Everything a
/// tenant owns - cached collections, mutation events, similarity queries -
/// is scoped by this value, so two tenants can never observe each other's
/// embeddings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantKey(String);

impl TenantKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Blank keys are rejected at the coherence boundary: a remote event
    /// without a usable tenant key is dropped, never applied.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for TenantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TenantKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for TenantKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// One persisted embedding row, as produced by the loader collaborator.
///
/// Vectors are carried exactly as supplied by the face service; the matcher
/// normalizes to unit length at comparison time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub id: EmbeddingId,
    pub subject: SubjectName,
    pub vector: Vec<f64>,
}

impl EmbeddingRecord {
    pub fn new(id: EmbeddingId, subject: impl Into<SubjectName>, vector: Vec<f64>) -> Self {
        Self {
            id,
            subject: subject.into(),
            vector,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tenant_key_display_roundtrip() {
        let key = TenantKey::from("tenant-a");
        assert_eq!(key.as_str(), "tenant-a");
        assert_eq!(key.to_string(), "tenant-a");
    }

    #[test]
    fn test_tenant_key_blank_detection() {
        assert!(TenantKey::from("").is_blank());
        assert!(TenantKey::from("   ").is_blank());
        assert!(!TenantKey::from("k1").is_blank());
    }

    #[test]
    fn test_tenant_key_serde_transparent() {
        let key = TenantKey::from("k1");
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"k1\"");
        let back: TenantKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }

    #[test]
    fn test_embedding_record_new() {
        let id = Uuid::new_v4();
        let record = EmbeddingRecord::new(id, "alice", vec![1.0, 2.0]);
        assert_eq!(record.id, id);
        assert_eq!(record.subject, "alice");
        assert_eq!(record.vector, vec![1.0, 2.0]);
    }
}
