//! Cross-instance cache-mutation wire events.
//!
//! Every local cache mutation produces exactly one [`CacheNotification`]
//! that peer instances replay against their own caches. The JSON field names
//! (`cacheAction`, `apiKey`, `uuid`, `payload`, `subjectsNamesMapping`) are
//! frozen: instances running different versions must keep understanding each
//! other during a rolling upgrade, so the schema only ever grows and unknown
//! payload fields are ignored on decode.

use crate::error::CoherenceError;
use crate::types::{EmbeddingId, SubjectName, TenantKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Discriminator for cache-mutation notifications.
///
/// `Update` and `Delete` are the coarse-grained legacy actions: peers on
/// older versions still emit them, so they stay accepted indefinitely.
/// They have no sunset date until the last pre-granular release is retired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CacheAction {
    /// Deprecated: whole-tenant reload. Superseded by the granular actions.
    Update,
    /// Deprecated: whole-tenant invalidate. Superseded by `Invalidate`.
    Delete,
    RemoveEmbeddings,
    RemoveSubjects,
    AddEmbeddings,
    RenameSubjects,
    Invalidate,
}

/// One cache-mutation event, immutable after construction.
///
/// `payload` stays an untyped JSON value at this level; the receiver decodes
/// it into the action-specific payload struct and drops the whole event if
/// that fails. `Invalidate` and the legacy actions carry no payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheNotification {
    pub cache_action: CacheAction,
    pub api_key: TenantKey,
    /// Identifier of the originating instance.
    #[serde(rename = "uuid")]
    pub server_uuid: Uuid,
    #[serde(default)]
    pub payload: Option<Value>,
}

impl CacheNotification {
    fn new(
        cache_action: CacheAction,
        api_key: TenantKey,
        server_uuid: Uuid,
        payload: Option<Value>,
    ) -> Self {
        Self {
            cache_action,
            api_key,
            server_uuid,
            payload,
        }
    }

    pub fn add_embeddings(api_key: TenantKey, server_uuid: Uuid, ids: Vec<EmbeddingId>) -> Self {
        let payload = AddEmbeddings { embeddings: ids };
        Self::new(
            CacheAction::AddEmbeddings,
            api_key,
            server_uuid,
            serde_json::to_value(payload).ok(),
        )
    }

    pub fn remove_embeddings(
        api_key: TenantKey,
        server_uuid: Uuid,
        embeddings: BTreeMap<SubjectName, Vec<EmbeddingId>>,
    ) -> Self {
        let payload = RemoveEmbeddings { embeddings };
        Self::new(
            CacheAction::RemoveEmbeddings,
            api_key,
            server_uuid,
            serde_json::to_value(payload).ok(),
        )
    }

    pub fn remove_subjects(
        api_key: TenantKey,
        server_uuid: Uuid,
        subjects: Vec<SubjectName>,
    ) -> Self {
        let payload = RemoveSubjects { subjects };
        Self::new(
            CacheAction::RemoveSubjects,
            api_key,
            server_uuid,
            serde_json::to_value(payload).ok(),
        )
    }

    pub fn rename_subjects(
        api_key: TenantKey,
        server_uuid: Uuid,
        mapping: BTreeMap<SubjectName, SubjectName>,
    ) -> Self {
        let payload = RenameSubjects {
            subjects_names_mapping: mapping,
        };
        Self::new(
            CacheAction::RenameSubjects,
            api_key,
            server_uuid,
            serde_json::to_value(payload).ok(),
        )
    }

    pub fn invalidate(api_key: TenantKey, server_uuid: Uuid) -> Self {
        Self::new(CacheAction::Invalidate, api_key, server_uuid, None)
    }
}

/// Payload of `ADD_EMBEDDINGS`: ids only. The receiver fetches the vectors
/// from the shared backing store, so the event stays small.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddEmbeddings {
    pub embeddings: Vec<EmbeddingId>,
}

/// Payload of `REMOVE_EMBEDDINGS`: subject name to ids removed under it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveEmbeddings {
    pub embeddings: BTreeMap<SubjectName, Vec<EmbeddingId>>,
}

/// Payload of `REMOVE_SUBJECTS`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveSubjects {
    pub subjects: Vec<SubjectName>,
}

/// Payload of `RENAME_SUBJECTS`: old name to new name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameSubjects {
    pub subjects_names_mapping: BTreeMap<SubjectName, SubjectName>,
}

/// Contract for sending cache-mutation events to peer instances.
///
/// The local mutation is already applied when `publish` is called; a failed
/// publish is logged by the caller and never rolls local state back.
/// Cross-instance consistency is best effort.
pub trait CoherencePublisher: Send + Sync {
    fn publish(&self, notification: &CacheNotification) -> Result<(), CoherenceError>;
}

/// Publisher that drops every event. For single-instance deployments and
/// tests that do not exercise coherence.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPublisher;

impl CoherencePublisher for NoopPublisher {
    fn publish(&self, _notification: &CacheNotification) -> Result<(), CoherenceError> {
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    fn action_strategy() -> impl Strategy<Value = CacheAction> {
        prop_oneof![
            Just(CacheAction::Update),
            Just(CacheAction::Delete),
            Just(CacheAction::RemoveEmbeddings),
            Just(CacheAction::RemoveSubjects),
            Just(CacheAction::AddEmbeddings),
            Just(CacheAction::RenameSubjects),
            Just(CacheAction::Invalidate),
        ]
    }

    proptest! {
        /// Every action tag survives an encode/decode roundtrip, including
        /// the deprecated ones a rolling upgrade still delivers.
        #[test]
        fn prop_action_roundtrip(action in action_strategy()) {
            let encoded = serde_json::to_string(&action).unwrap();
            let decoded: CacheAction = serde_json::from_str(&encoded).unwrap();
            prop_assert_eq!(action, decoded);
        }

        /// Notification encoding never loses the tenant key, whatever it is.
        #[test]
        fn prop_tenant_key_preserved(key in "[ -~]{1,64}") {
            let event = CacheNotification::invalidate(
                TenantKey::from(key.clone()),
                Uuid::new_v4(),
            );
            let raw = serde_json::to_string(&event).unwrap();
            let back: CacheNotification = serde_json::from_str(&raw).unwrap();
            prop_assert_eq!(back.api_key.as_str(), key.as_str());
        }
    }
}
