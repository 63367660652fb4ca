//! Bounded, expiring keyed store of per-tenant embedding collections.

use crate::collection::EmbeddingCollection;
use crate::loader::EmbeddingLoader;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};
use visage_core::{CacheError, CacheSettings, ConfigError, TenantKey, VisageResult};

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// One resident tenant. The collection has its own reader/writer lock so a
/// tenant's reads and writes never block unrelated tenants; `None` means the
/// slot is installed but not loaded yet.
struct TenantSlot {
    collection: RwLock<Option<EmbeddingCollection>>,
    last_access: AtomicI64,
}

impl TenantSlot {
    fn empty() -> Self {
        Self {
            collection: RwLock::new(None),
            last_access: AtomicI64::new(now_millis()),
        }
    }

    fn touch(&self) {
        self.last_access.store(now_millis(), Ordering::Relaxed);
    }

    fn last_access(&self) -> i64 {
        self.last_access.load(Ordering::Relaxed)
    }
}

/// Lazily populated store of [`EmbeddingCollection`]s, one per tenant.
///
/// The store-level lock only guards the slot map itself (insert, evict,
/// lookup); collection content is guarded per slot. Lazy loading is
/// double-checked: a shared-lock probe first, escalation to the exclusive
/// map lock to install an empty slot, then a re-probe under the slot's
/// exclusive lock before the loader runs. At most one load per tenant
/// executes concurrently; loads for different tenants proceed in parallel.
///
/// Two independent eviction policies, checked opportunistically on access
/// (no sweeper thread): least-recently-accessed drop beyond
/// `max_tenants`, and an idle TTL. Whichever triggers first removes the
/// entry; staleness costs one extra reload, never correctness.
pub struct CacheStore {
    slots: RwLock<HashMap<TenantKey, Arc<TenantSlot>>>,
    settings: CacheSettings,
}

impl CacheStore {
    /// Build a store from the given settings. Settings with a zero bound
    /// are rejected up front rather than patched over at eviction time.
    pub fn new(settings: CacheSettings) -> Result<Self, ConfigError> {
        settings.validate()?;
        Ok(Self {
            slots: RwLock::new(HashMap::new()),
            settings,
        })
    }

    pub fn with_defaults() -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            settings: CacheSettings::default(),
        }
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    /// Run `f` against the tenant's collection under its read lock, loading
    /// the collection first if the tenant is not resident. Loader failures
    /// propagate; nothing is installed, so the next call retries.
    pub fn with_collection<L, R>(
        &self,
        tenant: &TenantKey,
        loader: &L,
        f: impl FnOnce(&EmbeddingCollection) -> R,
    ) -> VisageResult<R>
    where
        L: EmbeddingLoader + ?Sized,
    {
        let slot = self.get_or_load(tenant, loader)?;
        let guard = slot
            .collection
            .read()
            .map_err(|_| CacheError::LockPoisoned)?;
        match guard.as_ref() {
            Some(collection) => Ok(f(collection)),
            None => Err(self.vanished(tenant)),
        }
    }

    /// Run `f` against the tenant's collection under its write lock, loading
    /// first on a miss. Writers are serialized per tenant.
    pub fn with_collection_mut<L, R>(
        &self,
        tenant: &TenantKey,
        loader: &L,
        f: impl FnOnce(&mut EmbeddingCollection) -> R,
    ) -> VisageResult<R>
    where
        L: EmbeddingLoader + ?Sized,
    {
        let slot = self.get_or_load(tenant, loader)?;
        let mut guard = slot
            .collection
            .write()
            .map_err(|_| CacheError::LockPoisoned)?;
        match guard.as_mut() {
            Some(collection) => Ok(f(collection)),
            None => Err(self.vanished(tenant)),
        }
    }

    /// Remove the tenant's entry unconditionally. The next access reloads.
    pub fn invalidate(&self, tenant: &TenantKey) -> VisageResult<()> {
        let mut slots = self.slots.write().map_err(|_| CacheError::LockPoisoned)?;
        if slots.remove(tenant).is_some() {
            tracing::debug!(tenant = %tenant, "Invalidated tenant collection");
        }
        Ok(())
    }

    /// Load the tenant fresh and install it, replacing whatever is resident.
    /// This is the legacy whole-tenant refresh the deprecated `UPDATE`
    /// coherence action maps to.
    pub fn reload<L>(&self, tenant: &TenantKey, loader: &L) -> VisageResult<()>
    where
        L: EmbeddingLoader + ?Sized,
    {
        let records = loader.load_tenant(tenant)?;
        let collection = EmbeddingCollection::from_records(records);
        let slot = match self.lookup_slot(tenant)? {
            Some(slot) => slot,
            None => self.install_slot(tenant)?,
        };
        let mut guard = slot
            .collection
            .write()
            .map_err(|_| CacheError::LockPoisoned)?;
        *guard = Some(collection);
        slot.touch();
        Ok(())
    }

    /// Whether the tenant is resident with a loaded collection.
    pub fn is_resident(&self, tenant: &TenantKey) -> VisageResult<bool> {
        let slots = self.slots.read().map_err(|_| CacheError::LockPoisoned)?;
        match slots.get(tenant) {
            Some(slot) => {
                let guard = slot
                    .collection
                    .read()
                    .map_err(|_| CacheError::LockPoisoned)?;
                Ok(guard.is_some())
            }
            None => Ok(false),
        }
    }

    /// Keys of all resident tenants, loaded or mid-load.
    pub fn resident_tenants(&self) -> VisageResult<Vec<TenantKey>> {
        let slots = self.slots.read().map_err(|_| CacheError::LockPoisoned)?;
        Ok(slots.keys().cloned().collect())
    }

    fn get_or_load<L>(&self, tenant: &TenantKey, loader: &L) -> VisageResult<Arc<TenantSlot>>
    where
        L: EmbeddingLoader + ?Sized,
    {
        let slot = match self.lookup_slot(tenant)? {
            Some(slot) => slot,
            None => self.install_slot(tenant)?,
        };

        // Fast path: already loaded. The probe ends its borrow of the slot
        // before the slot is returned.
        let loaded = slot
            .collection
            .read()
            .map_err(|_| CacheError::LockPoisoned)?
            .is_some();
        if loaded {
            return Ok(slot);
        }

        // Slow path: exclusive slot lock, re-probe, then load. Concurrent
        // callers for this tenant block here; other tenants are unaffected.
        let mut guard = slot
            .collection
            .write()
            .map_err(|_| CacheError::LockPoisoned)?;
        if guard.is_none() {
            match loader.load_tenant(tenant) {
                Ok(records) => {
                    let collection = EmbeddingCollection::from_records(records);
                    tracing::debug!(
                        tenant = %tenant,
                        embeddings = collection.len(),
                        subjects = collection.subject_count(),
                        "Loaded tenant collection"
                    );
                    *guard = Some(collection);
                }
                Err(error) => {
                    drop(guard);
                    self.discard_if_unloaded(tenant, &slot);
                    return Err(error);
                }
            }
        }
        drop(guard);
        Ok(slot)
    }

    /// Shared-lock probe. An expired entry is treated as a miss and removed.
    fn lookup_slot(&self, tenant: &TenantKey) -> VisageResult<Option<Arc<TenantSlot>>> {
        let slot = {
            let slots = self.slots.read().map_err(|_| CacheError::LockPoisoned)?;
            match slots.get(tenant) {
                Some(slot) => Arc::clone(slot),
                None => return Ok(None),
            }
        };

        if self.is_expired(&slot) && !Self::load_in_flight(&slot) {
            let mut slots = self.slots.write().map_err(|_| CacheError::LockPoisoned)?;
            if let Some(current) = slots.get(tenant) {
                if Arc::ptr_eq(current, &slot) && self.is_expired(current) {
                    tracing::debug!(tenant = %tenant, "Evicting idle tenant collection");
                    slots.remove(tenant);
                }
            }
            return Ok(None);
        }

        slot.touch();
        Ok(Some(slot))
    }

    /// Install an empty slot under the exclusive map lock, evicting first if
    /// needed. Re-probes before inserting so racing installers converge on
    /// one slot.
    fn install_slot(&self, tenant: &TenantKey) -> VisageResult<Arc<TenantSlot>> {
        let mut slots = self.slots.write().map_err(|_| CacheError::LockPoisoned)?;

        if let Some(existing) = slots.get(tenant) {
            existing.touch();
            return Ok(Arc::clone(existing));
        }

        self.evict_for_capacity(&mut slots);

        let slot = Arc::new(TenantSlot::empty());
        slots.insert(tenant.clone(), Arc::clone(&slot));
        Ok(slot)
    }

    /// Drop expired entries, then least-recently-accessed entries until a
    /// new tenant fits. Slots with a load in flight are never candidates;
    /// the map may transiently exceed `max_tenants` instead.
    fn evict_for_capacity(&self, slots: &mut HashMap<TenantKey, Arc<TenantSlot>>) {
        let now = now_millis();
        let ttl = self.settings.entry_ttl.as_millis() as i64;
        slots.retain(|tenant, slot| {
            let expired = now - slot.last_access() > ttl && !Self::load_in_flight(slot);
            if expired {
                tracing::debug!(tenant = %tenant, "Evicting idle tenant collection");
            }
            !expired
        });

        while slots.len() >= self.settings.max_tenants {
            let victim = slots
                .iter()
                .filter(|(_, slot)| !Self::load_in_flight(slot))
                .min_by_key(|(_, slot)| slot.last_access())
                .map(|(tenant, _)| tenant.clone());
            match victim {
                Some(tenant) => {
                    tracing::debug!(tenant = %tenant, "Evicting least recently accessed tenant");
                    slots.remove(&tenant);
                }
                None => break,
            }
        }
    }

    /// Evicting a slot that is still loading would orphan the loading
    /// thread and let a fresh slot start a second load for the same
    /// tenant. Unloaded means in flight; a held write lock is either the
    /// load itself or a mutation, spared in both cases.
    fn load_in_flight(slot: &TenantSlot) -> bool {
        match slot.collection.try_read() {
            Ok(guard) => guard.is_none(),
            Err(_) => true,
        }
    }

    /// After a failed load, drop the slot if it is still unloaded so the
    /// tenant does not hold capacity it never earned.
    fn discard_if_unloaded(&self, tenant: &TenantKey, slot: &Arc<TenantSlot>) {
        let Ok(mut slots) = self.slots.write() else {
            return;
        };
        let unloaded = slots.get(tenant).is_some_and(|current| {
            Arc::ptr_eq(current, slot)
                && current
                    .collection
                    .read()
                    .map(|guard| guard.is_none())
                    .unwrap_or(false)
        });
        if unloaded {
            slots.remove(tenant);
        }
    }

    fn is_expired(&self, slot: &TenantSlot) -> bool {
        now_millis() - slot.last_access() > self.settings.entry_ttl.as_millis() as i64
    }

    /// A loaded slot never goes back to unloaded, so this is unreachable in
    /// practice; surfaced as a load failure rather than a panic.
    fn vanished(&self, tenant: &TenantKey) -> visage_core::VisageError {
        CacheError::LoaderFailed {
            tenant: tenant.clone(),
            reason: "collection vanished during access".to_string(),
        }
        .into()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Barrier, Mutex};
    use std::time::Duration;
    use uuid::Uuid;
    use visage_core::{EmbeddingId, EmbeddingRecord};

    /// Loader that counts invocations per tenant and serves canned records.
    struct CountingLoader {
        records: Mutex<StdHashMap<TenantKey, Vec<EmbeddingRecord>>>,
        calls: Mutex<StdHashMap<TenantKey, usize>>,
        total_calls: AtomicUsize,
        delay: Duration,
    }

    impl CountingLoader {
        fn new() -> Self {
            Self {
                records: Mutex::new(StdHashMap::new()),
                calls: Mutex::new(StdHashMap::new()),
                total_calls: AtomicUsize::new(0),
                delay: Duration::ZERO,
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn insert(&self, tenant: &TenantKey, records: Vec<EmbeddingRecord>) {
            self.records.lock().unwrap().insert(tenant.clone(), records);
        }

        fn calls_for(&self, tenant: &TenantKey) -> usize {
            self.calls.lock().unwrap().get(tenant).copied().unwrap_or(0)
        }
    }

    impl EmbeddingLoader for CountingLoader {
        fn load_tenant(&self, tenant: &TenantKey) -> VisageResult<Vec<EmbeddingRecord>> {
            *self.calls.lock().unwrap().entry(tenant.clone()).or_insert(0) += 1;
            self.total_calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                std::thread::sleep(self.delay);
            }
            Ok(self
                .records
                .lock()
                .unwrap()
                .get(tenant)
                .cloned()
                .unwrap_or_default())
        }

        fn load_by_ids(&self, ids: &[EmbeddingId]) -> VisageResult<Vec<EmbeddingRecord>> {
            let records = self.records.lock().unwrap();
            Ok(records
                .values()
                .flatten()
                .filter(|record| ids.contains(&record.id))
                .cloned()
                .collect())
        }
    }

    /// Loader that always fails.
    struct FailingLoader;

    impl EmbeddingLoader for FailingLoader {
        fn load_tenant(&self, tenant: &TenantKey) -> VisageResult<Vec<EmbeddingRecord>> {
            Err(CacheError::LoaderFailed {
                tenant: tenant.clone(),
                reason: "backing store down".to_string(),
            }
            .into())
        }

        fn load_by_ids(&self, _ids: &[EmbeddingId]) -> VisageResult<Vec<EmbeddingRecord>> {
            Ok(Vec::new())
        }
    }

    fn record(subject: &str) -> EmbeddingRecord {
        EmbeddingRecord::new(Uuid::new_v4(), subject, vec![1.0, 0.0])
    }

    #[test]
    fn test_miss_loads_and_hit_does_not() {
        let store = CacheStore::with_defaults();
        let loader = CountingLoader::new();
        let tenant = TenantKey::from("k1");
        loader.insert(&tenant, vec![record("alice")]);

        let len = store
            .with_collection(&tenant, &loader, |c| c.len())
            .unwrap();
        assert_eq!(len, 1);
        store.with_collection(&tenant, &loader, |_| ()).unwrap();

        assert_eq!(loader.calls_for(&tenant), 1);
    }

    #[test]
    fn test_parallel_first_access_invokes_loader_once() {
        let store = Arc::new(CacheStore::with_defaults());
        let loader = Arc::new(CountingLoader::new().with_delay(Duration::from_millis(30)));
        let tenant = TenantKey::from("k1");
        loader.insert(&tenant, vec![record("alice")]);

        let threads = 8;
        let barrier = Arc::new(Barrier::new(threads));
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let store = Arc::clone(&store);
                let loader = Arc::clone(&loader);
                let barrier = Arc::clone(&barrier);
                let tenant = tenant.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    store
                        .with_collection(&tenant, loader.as_ref(), |c| c.len())
                        .unwrap()
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), 1);
        }
        assert_eq!(loader.calls_for(&tenant), 1);
    }

    #[test]
    fn test_loads_for_distinct_tenants_run_in_parallel() {
        let store = Arc::new(CacheStore::with_defaults());
        let loader = Arc::new(CountingLoader::new().with_delay(Duration::from_millis(60)));
        let tenants: Vec<TenantKey> = (0..4).map(|i| TenantKey::from(format!("k{i}"))).collect();
        for tenant in &tenants {
            loader.insert(tenant, vec![record("alice")]);
        }

        let start = std::time::Instant::now();
        let handles: Vec<_> = tenants
            .iter()
            .map(|tenant| {
                let store = Arc::clone(&store);
                let loader = Arc::clone(&loader);
                let tenant = tenant.clone();
                std::thread::spawn(move || {
                    store
                        .with_collection(&tenant, loader.as_ref(), |c| c.len())
                        .unwrap()
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        // Serialized loads would take at least 4 * 60ms.
        assert!(start.elapsed() < Duration::from_millis(200));
    }

    #[test]
    fn test_lru_eviction_beyond_max_tenants() {
        let settings = CacheSettings::new().with_max_tenants(2);
        let store = CacheStore::new(settings).unwrap();
        let loader = CountingLoader::new();
        let (k1, k2, k3) = (
            TenantKey::from("k1"),
            TenantKey::from("k2"),
            TenantKey::from("k3"),
        );
        for tenant in [&k1, &k2, &k3] {
            loader.insert(tenant, vec![record("alice")]);
        }

        store.with_collection(&k1, &loader, |_| ()).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        store.with_collection(&k2, &loader, |_| ()).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        // Touch k1 so k2 is the least recently accessed.
        store.with_collection(&k1, &loader, |_| ()).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        store.with_collection(&k3, &loader, |_| ()).unwrap();

        assert!(store.is_resident(&k1).unwrap());
        assert!(!store.is_resident(&k2).unwrap());
        assert!(store.is_resident(&k3).unwrap());

        // Accessing the evicted tenant re-triggers its loader.
        store.with_collection(&k2, &loader, |_| ()).unwrap();
        assert_eq!(loader.calls_for(&k2), 2);
        assert_eq!(loader.calls_for(&k1), 1);
    }

    #[test]
    fn test_new_rejects_zero_bounds() {
        assert!(CacheStore::new(CacheSettings::new().with_max_tenants(0)).is_err());
        assert!(CacheStore::new(CacheSettings::new().with_entry_ttl(Duration::ZERO)).is_err());
    }

    #[test]
    fn test_capacity_pressure_spares_tenant_mid_load() {
        let settings = CacheSettings::new().with_max_tenants(1);
        let store = Arc::new(CacheStore::new(settings).unwrap());
        let loader = Arc::new(CountingLoader::new().with_delay(Duration::from_millis(80)));
        let (a, b) = (TenantKey::from("a"), TenantKey::from("b"));
        loader.insert(&a, vec![record("alice")]);
        loader.insert(&b, vec![record("bob")]);

        let slow = {
            let store = Arc::clone(&store);
            let loader = Arc::clone(&loader);
            let a = a.clone();
            std::thread::spawn(move || {
                store
                    .with_collection(&a, loader.as_ref(), |c| c.len())
                    .unwrap()
            })
        };
        // Let the first load begin, then install a second tenant under
        // capacity pressure while the load is still running.
        std::thread::sleep(Duration::from_millis(20));
        store.with_collection(&b, loader.as_ref(), |c| c.len()).unwrap();

        assert_eq!(slow.join().unwrap(), 1);
        assert_eq!(loader.calls_for(&a), 1);
    }

    #[test]
    fn test_idle_ttl_expiry_forces_reload() {
        let settings = CacheSettings::new().with_entry_ttl(Duration::from_millis(25));
        let store = CacheStore::new(settings).unwrap();
        let loader = CountingLoader::new();
        let tenant = TenantKey::from("k1");
        loader.insert(&tenant, vec![record("alice")]);

        store.with_collection(&tenant, &loader, |_| ()).unwrap();
        std::thread::sleep(Duration::from_millis(60));
        store.with_collection(&tenant, &loader, |_| ()).unwrap();

        assert_eq!(loader.calls_for(&tenant), 2);
    }

    #[test]
    fn test_invalidate_then_access_reloads_once() {
        let store = CacheStore::with_defaults();
        let loader = CountingLoader::new();
        let tenant = TenantKey::from("k1");
        loader.insert(&tenant, vec![record("alice")]);

        store.with_collection(&tenant, &loader, |_| ()).unwrap();
        store.invalidate(&tenant).unwrap();
        assert!(!store.is_resident(&tenant).unwrap());

        store.with_collection(&tenant, &loader, |_| ()).unwrap();
        assert_eq!(loader.calls_for(&tenant), 2);
    }

    #[test]
    fn test_loader_failure_installs_nothing_and_retries() {
        let store = CacheStore::with_defaults();
        let tenant = TenantKey::from("k1");

        let result = store.with_collection(&tenant, &FailingLoader, |_| ());
        assert!(result.is_err());
        assert!(store.resident_tenants().unwrap().is_empty());

        // Next access retries against a recovered loader.
        let loader = CountingLoader::new();
        loader.insert(&tenant, vec![record("alice")]);
        let len = store
            .with_collection(&tenant, &loader, |c| c.len())
            .unwrap();
        assert_eq!(len, 1);
    }

    #[test]
    fn test_mutation_survives_subsequent_reads() {
        let store = CacheStore::with_defaults();
        let loader = CountingLoader::new();
        let tenant = TenantKey::from("k1");
        loader.insert(&tenant, vec![record("alice")]);

        let id = Uuid::new_v4();
        store
            .with_collection_mut(&tenant, &loader, |c| {
                c.add_embedding("bob", id, vec![0.0, 1.0]);
            })
            .unwrap();

        let subjects = store
            .with_collection(&tenant, &loader, |c| c.subject_count())
            .unwrap();
        assert_eq!(subjects, 2);
        assert_eq!(loader.calls_for(&tenant), 1);
    }

    #[test]
    fn test_reload_replaces_resident_collection() {
        let store = CacheStore::with_defaults();
        let loader = CountingLoader::new();
        let tenant = TenantKey::from("k1");
        loader.insert(&tenant, vec![record("alice")]);

        store.with_collection(&tenant, &loader, |_| ()).unwrap();
        loader.insert(&tenant, vec![record("alice"), record("bob")]);

        store.reload(&tenant, &loader).unwrap();
        let len = store
            .with_collection(&tenant, &loader, |c| c.len())
            .unwrap();
        assert_eq!(len, 2);
    }
}
