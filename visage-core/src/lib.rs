//! Visage Core - Shared Types and Contracts
//!
//! Identity types, the coherence wire-event schema, error enums, and
//! configuration. All other crates depend on this one; it contains no
//! business logic.
//!
//! # Key Types
//!
//! - [`TenantKey`]: opaque key partitioning all cached embedding data
//! - [`EmbeddingRecord`]: one persisted embedding row as the loader yields it
//! - [`CacheNotification`]: the cross-instance cache-mutation wire event
//! - [`VisageError`]: master error type folding the per-concern enums
//!
//! # Traits
//!
//! - [`CoherencePublisher`]: contract for sending mutation events to peers

pub mod config;
pub mod error;
pub mod event;
pub mod types;

pub use config::CacheSettings;
pub use error::{
    CacheError, CoherenceError, ConfigError, MatchError, VisageError, VisageResult,
};
pub use event::{
    AddEmbeddings, CacheAction, CacheNotification, CoherencePublisher, NoopPublisher,
    RemoveEmbeddings, RemoveSubjects, RenameSubjects,
};
pub use types::{EmbeddingId, EmbeddingRecord, SubjectName, TenantKey};
