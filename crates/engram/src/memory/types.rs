//! Core data types for the Engram system
//!
//! Defines the metadata record, the vector record with its denormalized
//! payload, the typed metadata map, and the structured reports returned by
//! batch and maintenance operations.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single scalar metadata value.
///
/// Payload metadata is an open string-keyed map over this closed set of
/// variants so exact-match filtering stays well-defined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetadataValue {
    Str(String),
    Num(f64),
    Bool(bool),
    Time(DateTime<Utc>),
}

/// Open key/value metadata map. BTreeMap keeps serialization order stable,
/// which cache-key fingerprinting relies on.
pub type MetadataMap = BTreeMap<String, MetadataValue>;

/// Metadata record for one stored memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryItem {
    /// Unique within its namespace; assigned once at creation and never
    /// reused, even after deletion
    pub id: String,
    /// Tenant this item belongs to
    pub tenant: String,
    /// Workspace within the tenant
    pub workspace: String,
    /// Post-privacy-filtered content; stored as received
    pub text: String,
    /// Caller-defined classification tag (e.g. "long", "short")
    pub item_type: String,
    /// Name of the retention policy governing this item
    pub policy: String,
    /// When this item was created
    pub created_at: DateTime<Utc>,
    /// When this item was last mutated
    pub updated_at: DateTime<Utc>,
    /// Pinned items are exempt from retention pruning
    pub pinned: bool,
    /// Caller-supplied metadata
    pub metadata: MetadataMap,
}

impl MemoryItem {
    /// Create a new item with a fresh id and current timestamps.
    pub fn new(
        tenant: String,
        workspace: String,
        text: String,
        item_type: String,
        policy: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            tenant,
            workspace,
            text,
            item_type,
            policy,
            created_at: now,
            updated_at: now,
            pinned: false,
            metadata: MetadataMap::new(),
        }
    }

    /// Age of this item relative to `now`, in whole days.
    pub fn age_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_days()
    }
}

/// Denormalized copy of the fields needed for filtering a vector record
/// without consulting the metadata store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorPayload {
    pub tenant: String,
    pub workspace: String,
    pub item_type: String,
    pub policy: String,
    pub created_at: DateTime<Utc>,
    pub metadata: MetadataMap,
}

impl VectorPayload {
    /// Build the payload for an item.
    pub fn from_item(item: &MemoryItem) -> Self {
        Self {
            tenant: item.tenant.clone(),
            workspace: item.workspace.clone(),
            item_type: item.item_type.clone(),
            policy: item.policy.clone(),
            created_at: item.created_at,
            metadata: item.metadata.clone(),
        }
    }
}

/// One (id, vector, payload) record in a namespace's vector collection.
///
/// The vector length must equal the namespace's established dimension; a
/// mismatched write is rejected, never truncated.
#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: VectorPayload,
}

/// One ranked similarity-search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryHit {
    pub id: String,
    pub payload: VectorPayload,
    /// Cosine similarity against the query vector
    pub score: f32,
}

/// Outcome of a bulk vector write. A failed chunk does not abort the
/// remaining chunks; its ids are reported here instead.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpsertReport {
    pub written: usize,
    pub failed: usize,
    pub failed_ids: Vec<String>,
}

impl UpsertReport {
    /// True when every record was written.
    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }
}

/// Outcome of a bulk delete. Deleting an absent id is not an error and is
/// simply not counted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteReport {
    pub requested: usize,
    pub removed: usize,
}

/// Outcome of a retention pruning pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PruneReport {
    pub examined: usize,
    pub removed: usize,
}

/// Retrieval results plus the cache observability flag callers expect.
#[derive(Debug, Clone)]
pub struct RetrievalOutcome {
    pub results: Vec<QueryHit>,
    pub cache_hit: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn item() -> MemoryItem {
        MemoryItem::new(
            "acme".to_string(),
            "support".to_string(),
            "remember the milk".to_string(),
            "short".to_string(),
            "default".to_string(),
        )
    }

    #[test]
    fn test_new_item_defaults() {
        let item = item();
        assert!(!item.pinned);
        assert!(item.metadata.is_empty());
        assert_eq!(item.created_at, item.updated_at);
        assert!(!item.id.is_empty());
    }

    #[test]
    fn test_ids_are_unique() {
        let a = item();
        let b = item();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_age_days() {
        let mut item = item();
        let now = Utc::now();
        item.created_at = now - Duration::days(2);
        assert_eq!(item.age_days(now), 2);
    }

    #[test]
    fn test_item_serialization_round_trip() {
        let mut item = item();
        item.metadata
            .insert("priority".to_string(), MetadataValue::Num(3.0));
        item.metadata
            .insert("source".to_string(), MetadataValue::Str("chat".to_string()));

        let json = serde_json::to_string(&item).expect("Failed to serialize item");
        let back: MemoryItem = serde_json::from_str(&json).expect("Failed to deserialize item");

        assert_eq!(back.id, item.id);
        assert_eq!(back.metadata, item.metadata);
        assert_eq!(back.created_at, item.created_at);
    }

    #[test]
    fn test_payload_from_item() {
        let item = item();
        let payload = VectorPayload::from_item(&item);
        assert_eq!(payload.tenant, item.tenant);
        assert_eq!(payload.workspace, item.workspace);
        assert_eq!(payload.item_type, item.item_type);
        assert_eq!(payload.created_at, item.created_at);
    }

    #[test]
    fn test_metadata_value_round_trip() {
        let values = vec![
            MetadataValue::Str("x".to_string()),
            MetadataValue::Num(1.5),
            MetadataValue::Bool(true),
            MetadataValue::Time(Utc::now()),
        ];
        for value in values {
            let json = serde_json::to_string(&value).expect("Failed to serialize");
            let back: MetadataValue = serde_json::from_str(&json).expect("Failed to deserialize");
            assert_eq!(back, value);
        }
    }

    #[test]
    fn test_upsert_report_completeness() {
        let ok = UpsertReport {
            written: 3,
            failed: 0,
            failed_ids: vec![],
        };
        assert!(ok.is_complete());

        let partial = UpsertReport {
            written: 2,
            failed: 1,
            failed_ids: vec!["a".to_string()],
        };
        assert!(!partial.is_complete());
    }
}
