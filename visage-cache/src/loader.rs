//! Contract for loading persisted embeddings into the cache.

use visage_core::{EmbeddingId, EmbeddingRecord, TenantKey, VisageResult};

/// Fetches persisted embeddings from the shared backing store.
///
/// Implementations usually page through the store internally; the cache only
/// requires the result be presentable as a finite sequence. `load_tenant` is
/// invoked while the tenant's exclusive lock is held, so it may block
/// same-tenant callers for the duration of the scan - callers for other
/// tenants are unaffected.
pub trait EmbeddingLoader: Send + Sync {
    /// All persisted embeddings of one tenant.
    fn load_tenant(&self, tenant: &TenantKey) -> VisageResult<Vec<EmbeddingRecord>>;

    /// Specific embeddings by id. Used when replaying a remote add event,
    /// which carries ids only; absent ids are simply not returned.
    fn load_by_ids(&self, ids: &[EmbeddingId]) -> VisageResult<Vec<EmbeddingRecord>>;
}
