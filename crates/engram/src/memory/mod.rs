//! Memory domain: item types, retention policies, and the service facade.

pub mod policy;
pub mod service;
pub mod types;

pub use policy::{DEFAULT_POLICY, PolicyRegistry, RetentionPolicy};
pub use service::{MemoryService, NamespaceStats, StoreRequest};
pub use types::{
    DeleteReport, MemoryItem, MetadataMap, MetadataValue, PruneReport, QueryHit, RetrievalOutcome,
    UpsertReport, VectorPayload, VectorRecord,
};
