//! Storage backends
//!
//! Two LanceDB-backed stores share one connection directory: `VectorStore`
//! holds embeddings with a denormalized payload for filtered similarity
//! search, and `MetadataStore` holds the full item rows. Both key physical
//! tables by namespace so tenants never share a table.

pub mod compaction;
pub mod filter;
pub mod lance;
pub mod meta;

pub use compaction::{CompactionReport, Compactor, cosine_similarity};
pub use filter::PayloadFilter;
pub use lance::{VectorScan, VectorStore};
pub use meta::MetadataStore;
