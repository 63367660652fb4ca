//! Visage Coherence - Cross-Instance Cache Synchronization
//!
//! Keeps the per-tenant embedding caches of multiple instances loosely
//! consistent. Every local mutation publishes one [`CacheNotification`];
//! peers replay it against their own cache without republishing, so events
//! never loop. Delivery is best effort: a dropped or malformed event costs
//! at most staleness until the tenant's next invalidate or reload, never
//! corruption.
//!
//! [`CacheNotification`]: visage_core::CacheNotification

pub mod bus;
pub mod handler;

pub use bus::BroadcastBus;
pub use handler::NotificationHandler;
