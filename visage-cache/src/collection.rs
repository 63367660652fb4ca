//! One tenant's in-memory embedding index.

use std::collections::BTreeMap;
use visage_core::{CacheError, EmbeddingId, EmbeddingRecord, SubjectName};

/// Mutable per-tenant index: subject name -> embedding id -> raw vector.
///
/// Invariants, upheld by every mutation:
/// - an embedding id lives under exactly one subject at a time
/// - a subject with zero embeddings is removed from the outer map
///
/// Vectors are stored exactly as supplied; normalization happens at
/// comparison time in the matcher. Iteration order is deterministic
/// (both maps are ordered), which gives the similarity engine a stable
/// tie-break for equal scores.
///
/// The collection itself is not synchronized; [`crate::CacheStore`] wraps
/// each instance in a reader/writer lock and serializes writers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmbeddingCollection {
    subjects: BTreeMap<SubjectName, BTreeMap<EmbeddingId, Vec<f64>>>,
}

impl EmbeddingCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a collection from the loader's full-tenant stream.
    pub fn from_records(records: impl IntoIterator<Item = EmbeddingRecord>) -> Self {
        let mut collection = Self::new();
        for record in records {
            collection.add_embedding(&record.subject, record.id, record.vector);
        }
        collection
    }

    /// Insert one embedding under `subject`.
    ///
    /// Ids are globally unique by contract, so an id that already exists
    /// (under any subject) is unexpected; the previous entry is overwritten
    /// and the collision is logged. This keeps duplicate or replayed remote
    /// add events harmless.
    pub fn add_embedding(&mut self, subject: &str, id: EmbeddingId, vector: Vec<f64>) {
        if let Some(previous) = self.subject_of(id) {
            tracing::warn!(
                embedding_id = %id,
                previous_subject = %previous,
                subject = %subject,
                "Overwriting embedding id that already exists; ids are expected to be unique"
            );
            let previous = previous.to_string();
            self.remove_embedding(&previous, id);
        }
        self.subjects
            .entry(subject.to_string())
            .or_default()
            .insert(id, vector);
    }

    /// Remove one embedding. Returns false if either the subject or the id
    /// is absent; a miss is a no-op, not an error, so late or duplicated
    /// remote events cannot fail.
    pub fn remove_embedding(&mut self, subject: &str, id: EmbeddingId) -> bool {
        let Some(embeddings) = self.subjects.get_mut(subject) else {
            return false;
        };
        let removed = embeddings.remove(&id).is_some();
        if embeddings.is_empty() {
            self.subjects.remove(subject);
        }
        removed
    }

    /// Drop a subject and all its embeddings. No-op if absent.
    pub fn remove_subject(&mut self, subject: &str) {
        self.subjects.remove(subject);
    }

    /// Move all embeddings from `old` to `new`. If `new` already exists the
    /// two mappings merge, and on an id collision the entry already under
    /// `new` wins. No-op if `old` is absent.
    pub fn rename_subject(&mut self, old: &str, new: &str) {
        if old == new {
            return;
        }
        let Some(moved) = self.subjects.remove(old) else {
            return;
        };
        let target = self.subjects.entry(new.to_string()).or_default();
        for (id, vector) in moved {
            target.entry(id).or_insert(vector);
        }
    }

    /// Find one embedding by id, scanning all subjects.
    ///
    /// A nil id is a caller contract violation, distinct from an id that is
    /// simply absent (`Ok(None)`).
    pub fn lookup_by_id(
        &self,
        id: EmbeddingId,
    ) -> Result<Option<(&SubjectName, &[f64])>, CacheError> {
        if id.is_nil() {
            return Err(CacheError::InvalidEmbeddingId);
        }
        Ok(self.subjects.iter().find_map(|(subject, embeddings)| {
            embeddings
                .get(&id)
                .map(|vector| (subject, vector.as_slice()))
        }))
    }

    /// All embeddings of one subject, or `None` if the subject is absent.
    pub fn lookup_by_subject(&self, subject: &str) -> Option<&BTreeMap<EmbeddingId, Vec<f64>>> {
        self.subjects.get(subject)
    }

    /// Read-only iteration over every (subject, id, vector) triple in
    /// deterministic order.
    pub fn iter(&self) -> impl Iterator<Item = (&SubjectName, EmbeddingId, &[f64])> {
        self.subjects.iter().flat_map(|(subject, embeddings)| {
            embeddings
                .iter()
                .map(move |(id, vector)| (subject, *id, vector.as_slice()))
        })
    }

    /// Total number of embeddings across all subjects.
    pub fn len(&self) -> usize {
        self.subjects.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty()
    }

    pub fn subject_count(&self) -> usize {
        self.subjects.len()
    }

    fn subject_of(&self, id: EmbeddingId) -> Option<&SubjectName> {
        self.subjects
            .iter()
            .find(|(_, embeddings)| embeddings.contains_key(&id))
            .map(|(subject, _)| subject)
    }
}

// =============================================================================
// TESTS
// =============================================================================
