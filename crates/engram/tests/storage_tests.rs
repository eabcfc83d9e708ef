//! Integration tests for the LanceDB-backed stores
//!
//! Tests verify that:
//! - Namespace dimension is fixed at first write and enforced afterward
//! - Bulk upserts report per-record failures without aborting the batch
//! - Similarity queries order deterministically and honor filters
//! - Deletes are idempotent and scoped to one namespace
//! - Scans page through a namespace without loading it whole

use chrono::{Duration, Utc};
use tempfile::TempDir;

use engram::batching::AdaptiveBatchSizer;
use engram::config::BatchConfig;
use engram::memory::types::{MemoryItem, MetadataValue, VectorPayload, VectorRecord};
use engram::memory::PolicyRegistry;
use engram::namespace::{Namespace, NamespaceResolver};
use engram::storage::{MetadataStore, PayloadFilter, VectorStore};

fn ns(tenant: &str, workspace: &str) -> Namespace {
    NamespaceResolver::new()
        .resolve(tenant, workspace)
        .expect("valid namespace")
}

fn item(id: &str, tenant: &str, workspace: &str) -> MemoryItem {
    let mut item = MemoryItem::new(
        tenant.to_string(),
        workspace.to_string(),
        format!("text for {id}"),
        "note".to_string(),
        "default".to_string(),
    );
    item.id = id.to_string();
    item
}

fn record(id: &str, vector: Vec<f32>) -> VectorRecord {
    let item = item(id, "acme", "support");
    VectorRecord {
        id: id.to_string(),
        vector,
        payload: VectorPayload::from_item(&item),
    }
}

async fn store(dir: &TempDir) -> VectorStore {
    VectorStore::connect(dir.path())
        .await
        .expect("store should connect")
}

fn sizer() -> AdaptiveBatchSizer {
    AdaptiveBatchSizer::new(BatchConfig::default())
}

#[tokio::test]
async fn dimension_established_by_first_write() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir).await;
    let ns = ns("acme", "support");

    assert_eq!(store.dimension(&ns).await.unwrap(), None);

    let report = store
        .upsert_batch(&ns, &[record("a", vec![1.0, 0.0, 0.0])], &sizer())
        .await
        .unwrap();
    assert_eq!(report.written, 1);
    assert_eq!(store.dimension(&ns).await.unwrap(), Some(3));
}

#[tokio::test]
async fn mismatched_dimension_is_rejected_not_truncated() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir).await;
    let ns = ns("acme", "support");

    store
        .upsert_batch(&ns, &[record("a", vec![1.0, 0.0, 0.0])], &sizer())
        .await
        .unwrap();

    let report = store
        .upsert_batch(&ns, &[record("b", vec![1.0, 0.0, 0.0, 0.0])], &sizer())
        .await
        .unwrap();
    assert_eq!(report.written, 0);
    assert_eq!(report.failed, 1);
    assert_eq!(report.failed_ids, vec!["b".to_string()]);
    assert_eq!(store.count(&ns).await.unwrap(), 1);
}

#[tokio::test]
async fn partial_batch_failure_reports_failed_ids() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir).await;
    let ns = ns("acme", "support");

    let mut records: Vec<VectorRecord> = (0..9)
        .map(|i| record(&format!("ok-{i}"), vec![i as f32, 1.0, 0.0]))
        .collect();
    records.push(record("bad", vec![f32::NAN, 0.0, 0.0]));

    let report = store.upsert_batch(&ns, &records, &sizer()).await.unwrap();
    assert_eq!(report.written, 9);
    assert_eq!(report.failed, 1);
    assert_eq!(report.failed_ids, vec!["bad".to_string()]);
    assert!(!report.is_complete());
    assert_eq!(store.count(&ns).await.unwrap(), 9);
}

#[tokio::test]
async fn upsert_replaces_existing_id() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir).await;
    let ns = ns("acme", "support");

    store
        .upsert_batch(&ns, &[record("a", vec![1.0, 0.0, 0.0])], &sizer())
        .await
        .unwrap();
    store
        .upsert_batch(&ns, &[record("a", vec![0.0, 1.0, 0.0])], &sizer())
        .await
        .unwrap();

    assert_eq!(store.count(&ns).await.unwrap(), 1);
    let hits = store
        .query(&ns, &[0.0, 1.0, 0.0], 1, &PayloadFilter::new())
        .await
        .unwrap();
    assert_eq!(hits[0].id, "a");
    assert!(hits[0].score > 0.99);
}

#[tokio::test]
async fn query_orders_by_similarity_then_id() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir).await;
    let ns = ns("acme", "support");

    let records = vec![
        record("x", vec![1.0, 0.0, 0.0]),
        record("near", vec![0.9, 0.1, 0.0]),
        record("far", vec![0.0, 0.0, 1.0]),
    ];
    store.upsert_batch(&ns, &records, &sizer()).await.unwrap();

    let hits = store
        .query(&ns, &[1.0, 0.0, 0.0], 3, &PayloadFilter::new())
        .await
        .unwrap();
    let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
    assert_eq!(ids, vec!["x", "near", "far"]);
    assert!(hits[0].score >= hits[1].score);
    assert!(hits[1].score >= hits[2].score);
}

#[tokio::test]
async fn query_limit_zero_and_missing_namespace_are_empty() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir).await;
    let ns = ns("acme", "support");

    store
        .upsert_batch(&ns, &[record("a", vec![1.0, 0.0, 0.0])], &sizer())
        .await
        .unwrap();

    let none = store
        .query(&ns, &[1.0, 0.0, 0.0], 0, &PayloadFilter::new())
        .await
        .unwrap();
    assert!(none.is_empty());

    let other = self::ns("acme", "empty-workspace");
    let hits = store
        .query(&other, &[1.0, 0.0, 0.0], 5, &PayloadFilter::new())
        .await
        .unwrap();
    assert!(hits.is_empty());
}

#[tokio::test]
async fn query_filters_by_item_type() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir).await;
    let ns = ns("acme", "support");

    let mut short = record("short-1", vec![1.0, 0.0, 0.0]);
    short.payload.item_type = "short".to_string();
    let mut long = record("long-1", vec![1.0, 0.0, 0.0]);
    long.payload.item_type = "long".to_string();
    store
        .upsert_batch(&ns, &[short, long], &sizer())
        .await
        .unwrap();

    let filter = PayloadFilter::new().with_item_type("short");
    let hits = store
        .query(&ns, &[1.0, 0.0, 0.0], 5, &filter)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, "short-1");
}

#[tokio::test]
async fn query_filters_by_metadata_after_ranking() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir).await;
    let ns = ns("acme", "support");

    let mut en = record("en-1", vec![1.0, 0.0, 0.0]);
    en.payload
        .metadata
        .insert("lang".to_string(), MetadataValue::Str("en".to_string()));
    let mut fr = record("fr-1", vec![1.0, 0.0, 0.0]);
    fr.payload
        .metadata
        .insert("lang".to_string(), MetadataValue::Str("fr".to_string()));
    store.upsert_batch(&ns, &[en, fr], &sizer()).await.unwrap();

    let filter = PayloadFilter::new().with_metadata("lang", MetadataValue::Str("en".to_string()));
    let hits = store
        .query(&ns, &[1.0, 0.0, 0.0], 5, &filter)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, "en-1");
}

#[tokio::test]
async fn delete_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir).await;
    let ns = ns("acme", "support");

    store
        .upsert_batch(
            &ns,
            &[
                record("a", vec![1.0, 0.0, 0.0]),
                record("b", vec![0.0, 1.0, 0.0]),
            ],
            &sizer(),
        )
        .await
        .unwrap();

    let ids = vec!["a".to_string(), "absent".to_string()];
    let first = store.delete_batch(&ns, &ids, &sizer()).await.unwrap();
    assert_eq!(first.requested, 2);
    assert_eq!(first.removed, 1);

    let second = store.delete_batch(&ns, &ids, &sizer()).await.unwrap();
    assert_eq!(second.removed, 0);
    assert_eq!(store.count(&ns).await.unwrap(), 1);
}

#[tokio::test]
async fn namespaces_are_isolated() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir).await;
    let acme = ns("acme", "support");
    let globex = ns("globex", "support");

    store
        .upsert_batch(&acme, &[record("a", vec![1.0, 0.0, 0.0])], &sizer())
        .await
        .unwrap();

    assert_eq!(store.count(&acme).await.unwrap(), 1);
    assert_eq!(store.count(&globex).await.unwrap(), 0);
    let hits = store
        .query(&globex, &[1.0, 0.0, 0.0], 5, &PayloadFilter::new())
        .await
        .unwrap();
    assert!(hits.is_empty());

    // Deleting through the wrong namespace touches nothing.
    let report = store
        .delete_batch(&globex, &["a".to_string()], &sizer())
        .await
        .unwrap();
    assert_eq!(report.removed, 0);
    assert_eq!(store.count(&acme).await.unwrap(), 1);
}

#[tokio::test]
async fn scan_pages_through_all_records() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir).await;
    let ns = ns("acme", "support");

    let records: Vec<VectorRecord> = (0..5)
        .map(|i| record(&format!("r-{i}"), vec![i as f32, 1.0, 0.0]))
        .collect();
    store.upsert_batch(&ns, &records, &sizer()).await.unwrap();

    let empty = self::ns("acme", "nothing-here");
    let mut scan = store.open_scan(&ns, 2).await.unwrap().expect("table exists");
    let mut total = 0;
    let mut pages = 0;
    while let Some(page) = scan.next_page().await.unwrap() {
        assert!(page.len() <= 2);
        total += page.len();
        pages += 1;
    }
    assert_eq!(total, 5);
    assert_eq!(pages, 3);

    assert!(store.open_scan(&empty, 2).await.unwrap().is_none());
}

#[tokio::test]
async fn metadata_roundtrip_and_pinning() {
    let dir = TempDir::new().unwrap();
    let meta = MetadataStore::connect(dir.path()).await.unwrap();
    let ns = ns("acme", "support");

    let mut stored = item("m-1", "acme", "support");
    stored
        .metadata
        .insert("source".to_string(), MetadataValue::Str("chat".to_string()));
    meta.upsert(&ns, &stored).await.unwrap();

    let fetched = meta.get(&ns, "m-1").await.unwrap().expect("item exists");
    assert_eq!(fetched.text, stored.text);
    assert_eq!(fetched.metadata, stored.metadata);
    assert!(!fetched.pinned);

    assert!(meta.set_pinned(&ns, "m-1", true).await.unwrap());
    assert!(meta.get(&ns, "m-1").await.unwrap().unwrap().pinned);

    assert!(!meta.set_pinned(&ns, "absent", true).await.unwrap());
    assert_eq!(meta.get(&ns, "absent").await.unwrap(), None);
}

#[tokio::test]
async fn metadata_upsert_replaces_existing_id() {
    let dir = TempDir::new().unwrap();
    let meta = MetadataStore::connect(dir.path()).await.unwrap();
    let ns = ns("acme", "support");

    let mut stored = item("m-1", "acme", "support");
    meta.upsert(&ns, &stored).await.unwrap();

    stored.text = "revised text".to_string();
    stored.updated_at = Utc::now();
    meta.upsert(&ns, &stored).await.unwrap();

    assert_eq!(meta.count(&ns).await.unwrap(), 1);
    let fetched = meta.get(&ns, "m-1").await.unwrap().expect("item exists");
    assert_eq!(fetched.text, "revised text");
}

#[tokio::test]
async fn expired_items_are_listed_unless_pinned() {
    let dir = TempDir::new().unwrap();
    let meta = MetadataStore::connect(dir.path()).await.unwrap();
    let ns = ns("acme", "support");
    let policies = PolicyRegistry::new(30);

    let mut old = item("old-1", "acme", "support");
    old.created_at = Utc::now() - Duration::days(40);
    meta.upsert(&ns, &old).await.unwrap();

    let mut pinned = item("pinned-1", "acme", "support");
    pinned.created_at = Utc::now() - Duration::days(40);
    pinned.pinned = true;
    meta.upsert(&ns, &pinned).await.unwrap();

    meta.upsert(&ns, &item("fresh-1", "acme", "support"))
        .await
        .unwrap();

    let expired = meta.list_expired(&ns, &policies, Utc::now()).await.unwrap();
    assert_eq!(expired, vec!["old-1".to_string()]);
}
