//! Façade gluing the cache store to the coherence protocol.

use crate::collection::EmbeddingCollection;
use crate::loader::EmbeddingLoader;
use crate::store::CacheStore;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;
use visage_core::{
    CacheNotification, CacheSettings, CoherencePublisher, ConfigError, EmbeddingId,
    EmbeddingRecord, TenantKey, VisageResult,
};

/// The mutation and query surface request handlers use.
///
/// Every local mutation is applied to the resident collection and then
/// published as exactly one [`CacheNotification`] carrying this instance's
/// identifier; peers replay it through the `apply_*` methods, which never
/// re-publish (that is what stops events from propagating forever). A
/// failed publish is logged and the local mutation stands - cross-instance
/// consistency is best effort, the shared backing store is the source of
/// truth on the next reload.
///
/// The provider is an explicitly constructed value owned by the service's
/// composition root; there is no process-wide instance.
pub struct EmbeddingCacheProvider {
    store: CacheStore,
    loader: Arc<dyn EmbeddingLoader>,
    publisher: Arc<dyn CoherencePublisher>,
    instance_id: Uuid,
}

impl EmbeddingCacheProvider {
    pub fn new(
        settings: CacheSettings,
        loader: Arc<dyn EmbeddingLoader>,
        publisher: Arc<dyn CoherencePublisher>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            store: CacheStore::new(settings)?,
            loader,
            publisher,
            instance_id: Uuid::new_v4(),
        })
    }

    /// Identifier stamped on every event this instance publishes.
    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    /// Read access to a tenant's collection, loading it on a miss.
    pub fn with_collection<R>(
        &self,
        tenant: &TenantKey,
        f: impl FnOnce(&EmbeddingCollection) -> R,
    ) -> VisageResult<R> {
        self.store.with_collection(tenant, self.loader.as_ref(), f)
    }

    /// All embeddings of one subject, or `None` if the subject is unknown.
    pub fn embeddings_by_subject(
        &self,
        tenant: &TenantKey,
        subject: &str,
    ) -> VisageResult<Option<BTreeMap<EmbeddingId, Vec<f64>>>> {
        self.with_collection(tenant, |collection| {
            collection.lookup_by_subject(subject).cloned()
        })
    }

    /// Whether the tenant currently has a loaded collection.
    pub fn is_resident(&self, tenant: &TenantKey) -> VisageResult<bool> {
        self.store.is_resident(tenant)
    }

    /// Keys of all resident tenants.
    pub fn resident_tenants(&self) -> VisageResult<Vec<TenantKey>> {
        self.store.resident_tenants()
    }

    /// Insert one embedding and notify peers.
    pub fn add_embedding(&self, tenant: &TenantKey, record: EmbeddingRecord) -> VisageResult<()> {
        let EmbeddingRecord {
            id,
            subject,
            vector,
        } = record;
        self.store
            .with_collection_mut(tenant, self.loader.as_ref(), |collection| {
                collection.add_embedding(&subject, id, vector)
            })?;
        self.notify(CacheNotification::add_embeddings(
            tenant.clone(),
            self.instance_id,
            vec![id],
        ));
        Ok(())
    }

    /// Remove one embedding and notify peers. Returns whether the embedding
    /// was present; a miss is still published so peers that do hold it
    /// converge.
    pub fn remove_embedding(
        &self,
        tenant: &TenantKey,
        subject: &str,
        id: EmbeddingId,
    ) -> VisageResult<bool> {
        let removed = self
            .store
            .with_collection_mut(tenant, self.loader.as_ref(), |collection| {
                collection.remove_embedding(subject, id)
            })?;
        let mut embeddings = BTreeMap::new();
        embeddings.insert(subject.to_string(), vec![id]);
        self.notify(CacheNotification::remove_embeddings(
            tenant.clone(),
            self.instance_id,
            embeddings,
        ));
        Ok(removed)
    }

    /// Drop a subject with all its embeddings and notify peers.
    pub fn remove_subject(&self, tenant: &TenantKey, subject: &str) -> VisageResult<()> {
        self.store
            .with_collection_mut(tenant, self.loader.as_ref(), |collection| {
                collection.remove_subject(subject)
            })?;
        self.notify(CacheNotification::remove_subjects(
            tenant.clone(),
            self.instance_id,
            vec![subject.to_string()],
        ));
        Ok(())
    }

    /// Rename a subject and notify peers.
    pub fn rename_subject(&self, tenant: &TenantKey, old: &str, new: &str) -> VisageResult<()> {
        self.store
            .with_collection_mut(tenant, self.loader.as_ref(), |collection| {
                collection.rename_subject(old, new)
            })?;
        let mut mapping = BTreeMap::new();
        mapping.insert(old.to_string(), new.to_string());
        self.notify(CacheNotification::rename_subjects(
            tenant.clone(),
            self.instance_id,
            mapping,
        ));
        Ok(())
    }

    /// Drop the tenant's cached collection entirely and notify peers; the
    /// next access reloads from the backing store.
    pub fn invalidate(&self, tenant: &TenantKey) -> VisageResult<()> {
        self.store.invalidate(tenant)?;
        self.notify(CacheNotification::invalidate(
            tenant.clone(),
            self.instance_id,
        ));
        Ok(())
    }

    /// Mutate a tenant's collection without notifying peers.
    ///
    /// This deliberately breaks cross-instance coherence: the change is
    /// invisible to every other instance until that instance reloads the
    /// tenant. It exists for maintenance paths that reconcile against the
    /// backing store themselves. It must never be reachable from outside
    /// the process boundary.
    pub fn mutate_local_only<R>(
        &self,
        tenant: &TenantKey,
        f: impl FnOnce(&mut EmbeddingCollection) -> R,
    ) -> VisageResult<R> {
        self.store
            .with_collection_mut(tenant, self.loader.as_ref(), f)
    }

    /// Eagerly load the tenants named in the settings' pre-warm list. A
    /// tenant that fails to load is logged and skipped; pre-warming is never
    /// fatal.
    pub fn prewarm(&self) {
        let keys = self.store.settings().prewarm_keys.clone();
        for tenant in keys {
            match self.with_collection(&tenant, |collection| collection.len()) {
                Ok(count) => {
                    tracing::info!(tenant = %tenant, embeddings = count, "Pre-warmed tenant collection");
                }
                Err(error) => {
                    tracing::warn!(tenant = %tenant, error = %error, "Skipping pre-warm for tenant");
                }
            }
        }
    }

    // -------------------------------------------------------------------------
    // Remote-apply entry points, used by the coherence receiver. None of
    // them publish; a replayed event must not echo back onto the bus.
    // -------------------------------------------------------------------------

    /// Replay a remote add. The event carries ids only; vectors come from
    /// the shared backing store. Ids the store no longer knows are skipped.
    pub fn apply_add(&self, tenant: &TenantKey, ids: &[EmbeddingId]) -> VisageResult<()> {
        let records = self.loader.load_by_ids(ids)?;
        if records.len() < ids.len() {
            tracing::debug!(
                tenant = %tenant,
                requested = ids.len(),
                found = records.len(),
                "Some remotely added embeddings are already gone from the backing store"
            );
        }
        self.store
            .with_collection_mut(tenant, self.loader.as_ref(), |collection| {
                for record in records {
                    collection.add_embedding(&record.subject, record.id, record.vector);
                }
            })
    }

    /// Replay a remote remove of one embedding.
    pub fn apply_remove_embedding(
        &self,
        tenant: &TenantKey,
        subject: &str,
        id: EmbeddingId,
    ) -> VisageResult<()> {
        self.store
            .with_collection_mut(tenant, self.loader.as_ref(), |collection| {
                collection.remove_embedding(subject, id);
            })
    }

    /// Replay a remote subject removal.
    pub fn apply_remove_subject(&self, tenant: &TenantKey, subject: &str) -> VisageResult<()> {
        self.store
            .with_collection_mut(tenant, self.loader.as_ref(), |collection| {
                collection.remove_subject(subject);
            })
    }

    /// Replay a remote subject rename.
    pub fn apply_rename_subject(
        &self,
        tenant: &TenantKey,
        old: &str,
        new: &str,
    ) -> VisageResult<()> {
        self.store
            .with_collection_mut(tenant, self.loader.as_ref(), |collection| {
                collection.rename_subject(old, new);
            })
    }

    /// Replay a remote invalidate: drop locally, publish nothing.
    pub fn apply_invalidate(&self, tenant: &TenantKey) -> VisageResult<()> {
        self.store.invalidate(tenant)
    }

    /// Replay the deprecated whole-tenant refresh (`UPDATE`): reload from
    /// the backing store and install unconditionally.
    pub fn apply_reload(&self, tenant: &TenantKey) -> VisageResult<()> {
        self.store.reload(tenant, self.loader.as_ref())
    }

    fn notify(&self, notification: CacheNotification) {
        if let Err(error) = self.publisher.publish(&notification) {
            tracing::warn!(
                error = %error,
                action = ?notification.cache_action,
                tenant = %notification.api_key,
                "Publishing cache mutation failed; peers converge on their next reload"
            );
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
