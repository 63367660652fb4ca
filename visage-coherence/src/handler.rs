//! Applies peer cache-mutation events to the local cache.

use serde::de::DeserializeOwned;
use std::sync::Arc;
use uuid::Uuid;
use visage_cache::EmbeddingCacheProvider;
use visage_core::{
    AddEmbeddings, CacheAction, CacheNotification, CoherenceError, RemoveEmbeddings,
    RemoveSubjects, RenameSubjects, VisageResult,
};

/// Replays [`CacheNotification`]s from peers against the local cache.
///
/// Every event is handled through the provider's `apply_*` methods, which
/// never republish. A malformed or partially invalid event is logged and
/// dropped; the local cache is left as it was. No error ever propagates to
/// the transport, so a bad frame cannot stall the subscription.
pub struct NotificationHandler {
    provider: Arc<EmbeddingCacheProvider>,
}

impl NotificationHandler {
    pub fn new(provider: Arc<EmbeddingCacheProvider>) -> Self {
        Self { provider }
    }

    /// Decode one raw JSON frame and handle it. Frames that do not parse as
    /// a notification are dropped with a warning.
    pub fn handle_raw(&self, raw: &str) {
        match serde_json::from_str::<CacheNotification>(raw) {
            Ok(notification) => self.handle(notification),
            Err(error) => {
                tracing::warn!(error = %error, "Dropping undecodable coherence frame");
            }
        }
    }

    /// Apply one notification to the local cache.
    pub fn handle(&self, notification: CacheNotification) {
        if notification.api_key.is_blank() {
            tracing::warn!(
                action = ?notification.cache_action,
                "Dropping coherence event with blank tenant key"
            );
            return;
        }

        if let Err(error) = self.dispatch(&notification) {
            tracing::warn!(
                action = ?notification.cache_action,
                tenant = %notification.api_key,
                error = %error,
                "Failed to apply coherence event"
            );
        }
    }

    fn dispatch(&self, notification: &CacheNotification) -> VisageResult<()> {
        let tenant = &notification.api_key;
        match notification.cache_action {
            CacheAction::AddEmbeddings => {
                let payload: AddEmbeddings = decode_payload(notification)?;
                let ids: Vec<Uuid> = payload
                    .embeddings
                    .into_iter()
                    .filter(|id| !id.is_nil())
                    .collect();
                if ids.is_empty() {
                    return Ok(());
                }
                self.provider.apply_add(tenant, &ids)
            }
            CacheAction::RemoveEmbeddings => {
                let payload: RemoveEmbeddings = decode_payload(notification)?;
                for (subject, ids) in payload.embeddings {
                    if subject.trim().is_empty() {
                        continue;
                    }
                    for id in ids {
                        if id.is_nil() {
                            continue;
                        }
                        self.provider.apply_remove_embedding(tenant, &subject, id)?;
                    }
                }
                Ok(())
            }
            CacheAction::RemoveSubjects => {
                let payload: RemoveSubjects = decode_payload(notification)?;
                for subject in payload.subjects {
                    if subject.trim().is_empty() {
                        continue;
                    }
                    self.provider.apply_remove_subject(tenant, &subject)?;
                }
                Ok(())
            }
            CacheAction::RenameSubjects => {
                let payload: RenameSubjects = decode_payload(notification)?;
                for (old, new) in payload.subjects_names_mapping {
                    if old.trim().is_empty() || new.trim().is_empty() {
                        continue;
                    }
                    self.provider.apply_rename_subject(tenant, &old, &new)?;
                }
                Ok(())
            }
            CacheAction::Invalidate | CacheAction::Delete => {
                self.provider.apply_invalidate(tenant)
            }
            CacheAction::Update => self.provider.apply_reload(tenant),
        }
    }
}

fn decode_payload<T: DeserializeOwned>(
    notification: &CacheNotification,
) -> Result<T, CoherenceError> {
    let value = notification
        .payload
        .clone()
        .ok_or_else(|| CoherenceError::MalformedEvent {
            reason: "missing payload".to_string(),
        })?;
    serde_json::from_value(value).map_err(|error| CoherenceError::MalformedEvent {
        reason: error.to_string(),
    })
}

// =============================================================================
// TESTS
// =============================================================================
