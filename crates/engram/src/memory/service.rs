//! Service facade over the caches, sizer, stores, and compactor.
//!
//! Every public operation takes explicit tenant and workspace identifiers,
//! resolves them to a physical namespace up front, and only ever touches
//! that namespace's tables and cache keys. Backend calls run under a
//! configurable deadline; a deadline miss surfaces as a timeout error and
//! leaves already-committed chunks committed.

use std::collections::hash_map::DefaultHasher;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::batching::AdaptiveBatchSizer;
use crate::cache::{CacheStats, QueryCache};
use crate::config::Config;
use crate::embedding::EmbeddingProvider;
use crate::error::{EngramError, Result};
use crate::memory::policy::{DEFAULT_POLICY, PolicyRegistry, RetentionPolicy};
use crate::memory::types::{
    DeleteReport, MemoryItem, MetadataMap, PruneReport, RetrievalOutcome, UpsertReport,
    VectorPayload, VectorRecord,
};
use crate::namespace::{Namespace, NamespaceResolver};
use crate::storage::compaction::{CompactionReport, Compactor};
use crate::storage::filter::PayloadFilter;
use crate::storage::lance::VectorStore;
use crate::storage::meta::MetadataStore;

/// What to remember. Everything beyond the text is optional.
#[derive(Debug, Clone)]
pub struct StoreRequest {
    pub text: String,
    pub item_type: String,
    pub policy: String,
    pub metadata: MetadataMap,
    pub pinned: bool,
}

impl StoreRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            item_type: "note".to_string(),
            policy: DEFAULT_POLICY.to_string(),
            metadata: MetadataMap::new(),
            pinned: false,
        }
    }

    pub fn with_item_type(mut self, item_type: impl Into<String>) -> Self {
        self.item_type = item_type.into();
        self
    }

    pub fn with_policy(mut self, policy: impl Into<String>) -> Self {
        self.policy = policy.into();
        self
    }

    pub fn with_metadata(mut self, metadata: MetadataMap) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn pinned(mut self) -> Self {
        self.pinned = true;
        self
    }
}

/// Point-in-time counters for one namespace.
#[derive(Debug, Clone, Serialize)]
pub struct NamespaceStats {
    pub tenant: String,
    pub workspace: String,
    pub items: usize,
    pub vectors: usize,
    pub dimension: Option<i32>,
    pub cache: CacheStats,
}

/// Tenant-isolated semantic memory service.
///
/// Cheap to share: wrap in an `Arc` and call concurrently. Reads and writes
/// never block each other beyond what the backing stores require.
pub struct MemoryService {
    config: Config,
    resolver: NamespaceResolver,
    cache: Arc<QueryCache>,
    sizer: Arc<AdaptiveBatchSizer>,
    vectors: Arc<VectorStore>,
    metadata: Arc<MetadataStore>,
    compactor: Compactor,
    embedder: Arc<dyn EmbeddingProvider>,
    policies: PolicyRegistry,
}

impl MemoryService {
    /// Open (or create) the data directory and wire up all components.
    pub async fn new(config: Config, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        std::fs::create_dir_all(&config.storage.data_dir)?;

        let vectors = Arc::new(VectorStore::connect(&config.storage.data_dir).await?);
        let metadata = Arc::new(MetadataStore::connect(&config.storage.data_dir).await?);
        let sizer = Arc::new(AdaptiveBatchSizer::new(config.batching.clone()));
        let compactor = Compactor::new(
            Arc::clone(&vectors),
            Arc::clone(&metadata),
            Arc::clone(&sizer),
            config.compaction.clone(),
        );

        info!(data_dir = %config.storage.data_dir.display(), "memory service ready");

        Ok(Self {
            cache: Arc::new(QueryCache::new(config.cache.max_entries)),
            sizer,
            vectors,
            metadata,
            compactor,
            embedder,
            policies: PolicyRegistry::new(config.retention.default_ttl_days),
            resolver: NamespaceResolver::new(),
            config,
        })
    }

    /// Embed and persist one item, returning it with its generated id.
    #[instrument(skip(self, request), fields(tenant, workspace))]
    pub async fn store(
        &self,
        tenant: &str,
        workspace: &str,
        request: StoreRequest,
    ) -> Result<MemoryItem> {
        let ns = self.resolver.resolve(tenant, workspace)?;
        let (items, report) = self.store_into(&ns, vec![request]).await?;
        let item = items.into_iter().next().ok_or_else(|| {
            EngramError::Storage("Store produced no item".to_string())
        })?;
        if !report.is_complete() {
            // Remove the already-written metadata row so a retried store()
            // starts clean instead of stranding an orphan under a dead id.
            if let Err(e) = self
                .metadata
                .delete_batch(&ns, std::slice::from_ref(&item.id))
                .await
            {
                warn!(id = %item.id, error = %e, "failed to roll back metadata row");
            }
            return Err(EngramError::Storage(format!(
                "Vector write failed for item {}",
                item.id
            )));
        }
        Ok(item)
    }

    /// Embed and persist many items in one adaptive-chunked write.
    ///
    /// A failed record does not abort the rest; its id appears in the
    /// report's `failed_ids` and callers decide whether to retry.
    #[instrument(skip(self, requests), fields(tenant, workspace, count = requests.len()))]
    pub async fn store_many(
        &self,
        tenant: &str,
        workspace: &str,
        requests: Vec<StoreRequest>,
    ) -> Result<(Vec<MemoryItem>, UpsertReport)> {
        let ns = self.resolver.resolve(tenant, workspace)?;
        self.store_into(&ns, requests).await
    }

    async fn store_into(
        &self,
        ns: &Namespace,
        requests: Vec<StoreRequest>,
    ) -> Result<(Vec<MemoryItem>, UpsertReport)> {
        let mut items = Vec::with_capacity(requests.len());
        let mut records = Vec::with_capacity(requests.len());

        for request in requests {
            if request.text.trim().is_empty() {
                return Err(EngramError::Validation(
                    "Cannot store empty text".to_string(),
                ));
            }

            let vector = self
                .deadline(self.embedder.embed(&request.text))
                .await
                .map_err(|e| match e {
                    EngramError::Timeout(_) => e,
                    other => EngramError::Embedding(other.to_string()),
                })?;

            let mut item = MemoryItem::new(
                ns.tenant.clone(),
                ns.workspace.clone(),
                request.text,
                request.item_type,
                request.policy,
            );
            item.pinned = request.pinned;
            item.metadata = request.metadata;

            records.push(VectorRecord {
                id: item.id.clone(),
                vector,
                payload: VectorPayload::from_item(&item),
            });
            items.push(item);
        }

        // Metadata first: a vector-write failure leaves a findable item
        // rather than an orphaned vector, and both writes are id-keyed
        // upserts so a retry converges.
        for item in &items {
            self.deadline(self.metadata.upsert(ns, item)).await?;
        }
        let report = self
            .deadline(self.vectors.upsert_batch(ns, &records, &self.sizer))
            .await?;

        debug!(
            namespace = ns.physical_name(),
            written = report.written,
            failed = report.failed,
            "store complete"
        );
        Ok((items, report))
    }

    /// Similarity search over one namespace, with the repeated-query cache
    /// in front. `cache_hit` reports whether the results were served from
    /// cache; entries expire after the configured TTL rather than being
    /// invalidated by writes.
    #[instrument(skip(self, query, filter), fields(tenant, workspace, limit))]
    pub async fn retrieve(
        &self,
        tenant: &str,
        workspace: &str,
        query: &str,
        limit: usize,
        filter: &PayloadFilter,
    ) -> Result<RetrievalOutcome> {
        let ns = self.resolver.resolve(tenant, workspace)?;
        let vector = self.deadline(self.embedder.embed(query)).await?;

        let key = self.cache_key(&ns, &vector, limit, filter)?;
        if let Some(results) = self.cache.get(&key) {
            debug!(namespace = ns.physical_name(), "retrieval cache hit");
            return Ok(RetrievalOutcome {
                results,
                cache_hit: true,
            });
        }

        let results = self
            .deadline(self.vectors.query(&ns, &vector, limit, filter))
            .await?;
        self.cache.put(
            &key,
            results.clone(),
            Duration::from_secs(self.config.cache.ttl_secs),
        );

        Ok(RetrievalOutcome {
            results,
            cache_hit: false,
        })
    }

    /// Fetch one item by id. Absence is `Ok(None)`, not an error.
    pub async fn get(&self, tenant: &str, workspace: &str, id: &str) -> Result<Option<MemoryItem>> {
        let ns = self.resolver.resolve(tenant, workspace)?;
        self.deadline(self.metadata.get(&ns, id)).await
    }

    /// Delete items by id from both stores. Absent ids are not errors.
    #[instrument(skip(self, ids), fields(tenant, workspace, count = ids.len()))]
    pub async fn delete(
        &self,
        tenant: &str,
        workspace: &str,
        ids: &[String],
    ) -> Result<DeleteReport> {
        let ns = self.resolver.resolve(tenant, workspace)?;
        let report = self
            .deadline(self.vectors.delete_batch(&ns, ids, &self.sizer))
            .await?;
        self.deadline(self.metadata.delete_batch(&ns, ids)).await?;
        Ok(report)
    }

    /// Mark an item exempt from retention pruning. Returns whether the id
    /// existed.
    pub async fn pin(&self, tenant: &str, workspace: &str, id: &str) -> Result<bool> {
        let ns = self.resolver.resolve(tenant, workspace)?;
        self.deadline(self.metadata.set_pinned(&ns, id, true)).await
    }

    /// Clear an item's pin. Returns whether the id existed.
    pub async fn unpin(&self, tenant: &str, workspace: &str, id: &str) -> Result<bool> {
        let ns = self.resolver.resolve(tenant, workspace)?;
        self.deadline(self.metadata.set_pinned(&ns, id, false)).await
    }

    /// Register (or replace) a named retention policy for a tenant.
    pub fn register_policy(&self, policy: RetentionPolicy) {
        self.policies.register(policy);
    }

    /// Remove unpinned items whose retention policy has lapsed.
    #[instrument(skip(self), fields(tenant, workspace))]
    pub async fn prune(&self, tenant: &str, workspace: &str) -> Result<PruneReport> {
        let ns = self.resolver.resolve(tenant, workspace)?;
        let examined = self.deadline(self.metadata.count(&ns)).await?;
        let expired = self
            .deadline(self.metadata.list_expired(&ns, &self.policies, Utc::now()))
            .await?;

        if expired.is_empty() {
            return Ok(PruneReport {
                examined,
                removed: 0,
            });
        }

        let deleted = self
            .deadline(self.vectors.delete_batch(&ns, &expired, &self.sizer))
            .await?;
        let removed = self
            .deadline(self.metadata.delete_batch(&ns, &expired))
            .await?;

        info!(
            namespace = ns.physical_name(),
            examined,
            removed,
            vectors_removed = deleted.removed,
            "prune complete"
        );
        Ok(PruneReport { examined, removed })
    }

    /// Deduplicate a namespace's vectors. `threshold` overrides the
    /// configured similarity cutoff for this run.
    #[instrument(skip(self), fields(tenant, workspace))]
    pub async fn compact(
        &self,
        tenant: &str,
        workspace: &str,
        threshold: Option<f32>,
    ) -> Result<CompactionReport> {
        let ns = self.resolver.resolve(tenant, workspace)?;
        let threshold = threshold.unwrap_or(self.config.compaction.similarity_threshold);
        if !(0.0..=1.0).contains(&threshold) {
            return Err(EngramError::Validation(format!(
                "Similarity threshold must be in [0, 1], got {threshold}"
            )));
        }
        self.compactor.compact(&ns, threshold).await
    }

    /// Current counters for one namespace.
    pub async fn stats(&self, tenant: &str, workspace: &str) -> Result<NamespaceStats> {
        let ns = self.resolver.resolve(tenant, workspace)?;
        Ok(NamespaceStats {
            tenant: ns.tenant.clone(),
            workspace: ns.workspace.clone(),
            items: self.deadline(self.metadata.count(&ns)).await?,
            vectors: self.deadline(self.vectors.count(&ns)).await?,
            dimension: self.deadline(self.vectors.dimension(&ns)).await?,
            cache: self.cache.stats(),
        })
    }

    /// Fingerprint of (namespace, query vector, limit, filter). Namespaces
    /// prefix the key, so tenants can never read each other's cached
    /// results.
    fn cache_key(
        &self,
        ns: &Namespace,
        vector: &[f32],
        limit: usize,
        filter: &PayloadFilter,
    ) -> Result<String> {
        let mut hasher = DefaultHasher::new();
        for v in vector {
            v.to_bits().hash(&mut hasher);
        }
        let vector_hash = hasher.finish();

        let filter_json = serde_json::to_string(filter)
            .map_err(|e| EngramError::Serialization(e.to_string()))?;
        let mut hasher = DefaultHasher::new();
        filter_json.hash(&mut hasher);
        let filter_hash = hasher.finish();

        Ok(format!(
            "{}:{vector_hash:016x}:{limit}:{filter_hash:016x}",
            ns.cache_prefix()
        ))
    }

    /// Run a backend future under the configured operation deadline.
    async fn deadline<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        let limit = Duration::from_secs(self.config.service.op_timeout_secs.max(1));
        match tokio::time::timeout(limit, fut).await {
            Ok(result) => result,
            Err(_) => Err(EngramError::Timeout(format!(
                "Operation exceeded {}s deadline",
                limit.as_secs()
            ))),
        }
    }
}
