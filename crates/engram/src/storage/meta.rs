//! LanceDB-backed metadata store
//!
//! One `.items` table per namespace holding the structured half of each
//! memory: retention policy, pin flag, timestamps, and caller metadata.
//! Lives beside the `.vectors` table so the two halves of an item share a
//! namespace and an id but can be written and repaired independently.

use std::path::Path;
use std::sync::Arc;

use arrow_array::{
    Array, BooleanArray, RecordBatch, RecordBatchIterator, StringArray, TimestampMicrosecondArray,
};
use arrow_schema::{DataType, Field, Schema, TimeUnit};
use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use futures::TryStreamExt;
use lancedb::Table;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};
use tracing::debug;

use crate::error::{EngramError, Result};
use crate::memory::policy::PolicyRegistry;
use crate::memory::types::{MemoryItem, MetadataMap};
use crate::namespace::Namespace;

/// Per-namespace store of [`MemoryItem`] records.
pub struct MetadataStore {
    connection: Connection,
    tables: DashMap<String, Table>,
}

impl MetadataStore {
    /// Connect to (or create) a LanceDB directory.
    pub async fn connect(path: &Path) -> Result<Self> {
        let uri = path
            .to_str()
            .ok_or_else(|| EngramError::Storage("Invalid path encoding".to_string()))?;

        let connection = lancedb::connect(uri)
            .execute()
            .await
            .map_err(|e| EngramError::Storage(format!("Failed to connect to LanceDB: {e}")))?;

        Ok(Self {
            connection,
            tables: DashMap::new(),
        })
    }

    fn items_schema() -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new("tenant", DataType::Utf8, false),
            Field::new("workspace", DataType::Utf8, false),
            Field::new("text", DataType::Utf8, false),
            Field::new("item_type", DataType::Utf8, false),
            Field::new("policy", DataType::Utf8, false),
            Field::new(
                "created_at",
                DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
                false,
            ),
            Field::new(
                "updated_at",
                DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
                false,
            ),
            Field::new("pinned", DataType::Boolean, false),
            Field::new("metadata", DataType::Utf8, false),
        ]))
    }

    fn empty_batch(schema: Arc<Schema>) -> RecordBatch {
        let empty_strings: Vec<Option<&str>> = vec![];
        let empty_timestamps: Vec<i64> = vec![];
        let empty_bools: Vec<bool> = vec![];

        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(empty_strings.clone())),
                Arc::new(StringArray::from(empty_strings.clone())),
                Arc::new(StringArray::from(empty_strings.clone())),
                Arc::new(StringArray::from(empty_strings.clone())),
                Arc::new(StringArray::from(empty_strings.clone())),
                Arc::new(StringArray::from(empty_strings.clone())),
                Arc::new(
                    TimestampMicrosecondArray::from(empty_timestamps.clone()).with_timezone("UTC"),
                ),
                Arc::new(TimestampMicrosecondArray::from(empty_timestamps).with_timezone("UTC")),
                Arc::new(BooleanArray::from(empty_bools)),
                Arc::new(StringArray::from(empty_strings)),
            ],
        )
        .expect("Schema matches columns")
    }

    async fn table_exists(&self, name: &str) -> Result<bool> {
        let names = self
            .connection
            .table_names()
            .execute()
            .await
            .map_err(|e| EngramError::Storage(format!("Failed to list tables: {e}")))?;
        Ok(names.contains(&name.to_string()))
    }

    async fn open_table(&self, ns: &Namespace) -> Result<Option<Table>> {
        let name = ns.items_table();
        if let Some(table) = self.tables.get(&name) {
            return Ok(Some(table.clone()));
        }
        if !self.table_exists(&name).await? {
            return Ok(None);
        }

        let table = self
            .connection
            .open_table(&name)
            .execute()
            .await
            .map_err(|e| EngramError::Storage(format!("Failed to open items table: {e}")))?;
        self.tables.insert(name, table.clone());
        Ok(Some(table))
    }

    async fn ensure_table(&self, ns: &Namespace) -> Result<Table> {
        if let Some(table) = self.open_table(ns).await? {
            return Ok(table);
        }

        let name = ns.items_table();
        let schema = Self::items_schema();
        let batch = Self::empty_batch(schema.clone());
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        match self
            .connection
            .create_table(&name, Box::new(batches))
            .execute()
            .await
        {
            Ok(table) => {
                self.tables.insert(name, table.clone());
                Ok(table)
            }
            Err(_) => self.open_table(ns).await?.ok_or_else(|| {
                EngramError::Storage(format!("Failed to create items table {name}"))
            }),
        }
    }

    /// Insert or replace an item as a single merge keyed on id.
    pub async fn upsert(&self, ns: &Namespace, item: &MemoryItem) -> Result<()> {
        let table = self.ensure_table(ns).await?;
        let schema = Self::items_schema();
        let batch = Self::items_to_batch(std::slice::from_ref(item), schema.clone())?;
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        let mut merge_insert = table.merge_insert(&["id"]);
        merge_insert
            .when_matched_update_all(None)
            .when_not_matched_insert_all();
        merge_insert
            .execute(Box::new(batches))
            .await
            .map_err(|e| EngramError::Storage(format!("Failed to upsert item: {e}")))?;
        Ok(())
    }

    /// Fetch an item by id; `Ok(None)` when absent.
    pub async fn get(&self, ns: &Namespace, id: &str) -> Result<Option<MemoryItem>> {
        let Some(table) = self.open_table(ns).await? else {
            return Ok(None);
        };

        let stream = table
            .query()
            .only_if(format!("id = '{}'", id.replace('\'', "''")))
            .execute()
            .await
            .map_err(|e| EngramError::Storage(format!("Failed to query item: {e}")))?;

        let batches: Vec<RecordBatch> = stream
            .try_collect()
            .await
            .map_err(|e| EngramError::Storage(format!("Failed to collect query results: {e}")))?;

        for batch in &batches {
            if batch.num_rows() > 0 {
                return Ok(Some(Self::item_from_batch(batch, 0)?));
            }
        }
        Ok(None)
    }

    /// Set the pin flag, bumping `updated_at`. Returns false when the id
    /// does not exist.
    pub async fn set_pinned(&self, ns: &Namespace, id: &str, pinned: bool) -> Result<bool> {
        let Some(table) = self.open_table(ns).await? else {
            return Ok(false);
        };

        let now = Utc::now().timestamp_micros();
        let result = table
            .update()
            .only_if(format!("id = '{}'", id.replace('\'', "''")))
            .column("pinned", if pinned { "true" } else { "false" })
            .column("updated_at", format!("{now}"))
            .execute()
            .await
            .map_err(|e| EngramError::Storage(format!("Failed to update pin flag: {e}")))?;

        Ok(result.rows_updated > 0)
    }

    /// Idempotent bulk delete; returns how many rows actually existed.
    pub async fn delete_batch(&self, ns: &Namespace, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let Some(table) = self.open_table(ns).await? else {
            return Ok(0);
        };

        let list = ids
            .iter()
            .map(|id| format!("'{}'", id.replace('\'', "''")))
            .collect::<Vec<_>>()
            .join(", ");
        let predicate = format!("id IN ({list})");

        let present = table
            .count_rows(Some(predicate.clone()))
            .await
            .map_err(|e| EngramError::Storage(format!("Failed to count items: {e}")))?;
        table
            .delete(&predicate)
            .await
            .map_err(|e| EngramError::Storage(format!("Failed to delete items: {e}")))?;
        Ok(present)
    }

    /// All items in the namespace. Used by retention pruning, which scans
    /// every unpinned row anyway.
    pub async fn list_all(&self, ns: &Namespace) -> Result<Vec<MemoryItem>> {
        let Some(table) = self.open_table(ns).await? else {
            return Ok(Vec::new());
        };

        let stream = table
            .query()
            .execute()
            .await
            .map_err(|e| EngramError::Storage(format!("Failed to list items: {e}")))?;

        let batches: Vec<RecordBatch> = stream
            .try_collect()
            .await
            .map_err(|e| EngramError::Storage(format!("Failed to collect items: {e}")))?;

        let mut items = Vec::new();
        for batch in &batches {
            for row in 0..batch.num_rows() {
                items.push(Self::item_from_batch(batch, row)?);
            }
        }
        Ok(items)
    }

    /// Ids of unpinned items whose retention policy has lapsed as of `now`.
    pub async fn list_expired(
        &self,
        ns: &Namespace,
        policies: &PolicyRegistry,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let items = self.list_all(ns).await?;
        let expired: Vec<String> = items
            .iter()
            .filter(|item| policies.is_expired(item, now))
            .map(|item| item.id.clone())
            .collect();

        debug!(
            namespace = ns.physical_name(),
            examined = items.len(),
            expired = expired.len(),
            "retention scan"
        );
        Ok(expired)
    }

    /// Number of items in the namespace.
    pub async fn count(&self, ns: &Namespace) -> Result<usize> {
        let Some(table) = self.open_table(ns).await? else {
            return Ok(0);
        };
        table
            .count_rows(None)
            .await
            .map_err(|e| EngramError::Storage(format!("Failed to count items: {e}")))
    }

    fn items_to_batch(items: &[MemoryItem], schema: Arc<Schema>) -> Result<RecordBatch> {
        let ids: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
        let tenants: Vec<&str> = items.iter().map(|i| i.tenant.as_str()).collect();
        let workspaces: Vec<&str> = items.iter().map(|i| i.workspace.as_str()).collect();
        let texts: Vec<&str> = items.iter().map(|i| i.text.as_str()).collect();
        let item_types: Vec<&str> = items.iter().map(|i| i.item_type.as_str()).collect();
        let policies: Vec<&str> = items.iter().map(|i| i.policy.as_str()).collect();
        let created_at: Vec<i64> = items.iter().map(|i| i.created_at.timestamp_micros()).collect();
        let updated_at: Vec<i64> = items.iter().map(|i| i.updated_at.timestamp_micros()).collect();
        let pinned: Vec<bool> = items.iter().map(|i| i.pinned).collect();
        let metadata: Vec<String> = items
            .iter()
            .map(|i| serde_json::to_string(&i.metadata))
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| EngramError::Serialization(format!("Failed to encode metadata: {e}")))?;
        let metadata_refs: Vec<&str> = metadata.iter().map(String::as_str).collect();

        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(ids)),
                Arc::new(StringArray::from(tenants)),
                Arc::new(StringArray::from(workspaces)),
                Arc::new(StringArray::from(texts)),
                Arc::new(StringArray::from(item_types)),
                Arc::new(StringArray::from(policies)),
                Arc::new(TimestampMicrosecondArray::from(created_at).with_timezone("UTC")),
                Arc::new(TimestampMicrosecondArray::from(updated_at).with_timezone("UTC")),
                Arc::new(BooleanArray::from(pinned)),
                Arc::new(StringArray::from(metadata_refs)),
            ],
        )
        .map_err(|e| EngramError::Storage(format!("Failed to create RecordBatch: {e}")))
    }

    fn item_from_batch(batch: &RecordBatch, row: usize) -> Result<MemoryItem> {
        let created_at = timestamp_column(batch, "created_at")?.value(row);
        let updated_at = timestamp_column(batch, "updated_at")?.value(row);

        let pinned_array = batch
            .column_by_name("pinned")
            .and_then(|c| c.as_any().downcast_ref::<BooleanArray>())
            .ok_or_else(|| EngramError::Storage("Failed to get pinned column".to_string()))?;

        let metadata_json = string_column(batch, "metadata")?.value(row);
        let metadata: MetadataMap = serde_json::from_str(metadata_json)
            .map_err(|e| EngramError::Serialization(format!("Failed to decode metadata: {e}")))?;

        Ok(MemoryItem {
            id: string_column(batch, "id")?.value(row).to_string(),
            tenant: string_column(batch, "tenant")?.value(row).to_string(),
            workspace: string_column(batch, "workspace")?.value(row).to_string(),
            text: string_column(batch, "text")?.value(row).to_string(),
            item_type: string_column(batch, "item_type")?.value(row).to_string(),
            policy: string_column(batch, "policy")?.value(row).to_string(),
            created_at: parse_micros(created_at)?,
            updated_at: parse_micros(updated_at)?,
            pinned: pinned_array.value(row),
            metadata,
        })
    }
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| EngramError::Storage(format!("Failed to get {name} column")))
}

fn timestamp_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a TimestampMicrosecondArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<TimestampMicrosecondArray>())
        .ok_or_else(|| EngramError::Storage(format!("Failed to get {name} column")))
}

fn parse_micros(micros: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_micros(micros)
        .single()
        .ok_or_else(|| EngramError::Storage("Failed to parse timestamp".to_string()))
}
