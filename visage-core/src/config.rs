//! Configuration types

use crate::error::ConfigError;
use crate::types::TenantKey;
use std::time::Duration;

/// Default maximum number of resident tenant collections.
pub const DEFAULT_MAX_TENANTS: usize = 10;

/// Default idle TTL for a resident tenant collection.
pub const DEFAULT_ENTRY_TTL: Duration = Duration::from_secs(60 * 60 * 24);

/// Settings for the per-tenant embedding cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    /// Maximum number of tenants resident at once; the least recently
    /// accessed tenant is dropped when the limit is exceeded.
    pub max_tenants: usize,
    /// A tenant idle for longer than this is dropped regardless of size
    /// pressure. Checked opportunistically on access, no sweeper thread.
    pub entry_ttl: Duration,
    /// Tenants to load eagerly at startup. Invalid entries are skipped.
    pub prewarm_keys: Vec<TenantKey>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_tenants: DEFAULT_MAX_TENANTS,
            entry_ttl: DEFAULT_ENTRY_TTL,
            prewarm_keys: Vec::new(),
        }
    }
}

impl CacheSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of resident tenants. Must be at least 1.
    pub fn with_max_tenants(mut self, max: usize) -> Self {
        self.max_tenants = max;
        self
    }

    /// Set the idle TTL for resident tenants.
    pub fn with_entry_ttl(mut self, ttl: Duration) -> Self {
        self.entry_ttl = ttl;
        self
    }

    /// Set the tenants to pre-warm at startup.
    pub fn with_prewarm_keys(mut self, keys: Vec<TenantKey>) -> Self {
        self.prewarm_keys = keys;
        self
    }

    /// Set the pre-warm tenants from a comma-separated list, as found in
    /// deployment configuration. Blank entries are logged and skipped, not
    /// fatal.
    pub fn with_prewarm_csv(self, csv: &str) -> Self {
        let keys = parse_prewarm_keys(csv);
        self.with_prewarm_keys(keys)
    }

    /// Check the settings before handing them to a cache instance.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_tenants == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_tenants".to_string(),
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if self.entry_ttl.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "entry_ttl".to_string(),
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// Parse a comma-separated pre-warm tenant list, skipping unusable entries.
pub fn parse_prewarm_keys(csv: &str) -> Vec<TenantKey> {
    csv.split(',')
        .map(str::trim)
        .filter(|entry| {
            if entry.is_empty() {
                tracing::warn!("Skipping blank pre-warm tenant key");
                false
            } else {
                true
            }
        })
        .map(TenantKey::from)
        .collect()
}
