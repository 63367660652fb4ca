//! Visage Cache - Per-Tenant Embedding Index
//!
//! A lazily populated, size- and time-bounded cache of face-embedding
//! collections, one per tenant. The cache stays consistent across service
//! instances through the mutation events published by the provider façade;
//! nothing in this crate talks to a network.
//!
//! # Architecture
//!
//! - [`EmbeddingCollection`]: one tenant's subject -> id -> vector index,
//!   mutated only through its own API
//! - [`CacheStore`]: bounded, expiring keyed store of collections with a
//!   double-checked lazy-load contract
//! - [`EmbeddingLoader`]: contract for streaming persisted embeddings in
//! - [`EmbeddingCacheProvider`]: the façade request handlers use; every
//!   local mutation is applied then published, every remote event is
//!   applied without re-publishing

pub mod collection;
pub mod loader;
pub mod provider;
pub mod store;

pub use collection::EmbeddingCollection;
pub use loader::EmbeddingLoader;
pub use provider::EmbeddingCacheProvider;
pub use store::CacheStore;
