//! Engram - Tenant-isolated vector memory service
//!
//! This crate provides a storage layer that persists embeddings alongside
//! structured metadata, serves similarity queries through a TTL+LRU cache,
//! and maintains storage health via adaptive batch ingestion and
//! similarity-based deduplication. All data and cache entries are scoped
//! by a (tenant, workspace) namespace.

pub mod batching;
pub mod cache;
pub mod config;
pub mod embedding;
pub mod error;
pub mod memory;
pub mod namespace;
pub mod storage;
pub mod testing;

pub use error::{EngramError, Result};
pub use memory::service::MemoryService;
