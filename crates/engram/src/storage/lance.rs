//! LanceDB-backed vector collection
//!
//! One `.vectors` table per namespace. The embedding dimension is fixed per
//! namespace at first write (recovered from the Arrow schema when an
//! existing table is reopened); writes with a mismatched dimension are
//! rejected, never truncated. Bulk writes are chunked by the adaptive batch
//! sizer and a failed chunk is reported rather than aborting the rest.

use std::collections::VecDeque;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use arrow_array::{
    Array, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray,
    TimestampMicrosecondArray,
};
use arrow_schema::{DataType, Field, Schema, TimeUnit};
use chrono::{TimeZone, Utc};
use dashmap::DashMap;
use futures::{Stream, TryStreamExt};
use lancedb::DistanceType;
use lancedb::Table;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};
use tracing::{debug, warn};

use crate::batching::{AdaptiveBatchSizer, OperationKind, PerformanceSample};
use crate::error::{EngramError, Result};
use crate::memory::types::{
    DeleteReport, MetadataMap, QueryHit, UpsertReport, VectorPayload, VectorRecord,
};
use crate::namespace::Namespace;
use crate::storage::filter::PayloadFilter;

/// Candidate widening applied when a metadata residue must be filtered
/// in-process after ranking.
const METADATA_FILTER_MULTIPLIER: usize = 4;

/// Per-namespace physical store of (id, vector, payload) records.
pub struct VectorStore {
    connection: Connection,
    tables: DashMap<String, Table>,
    dimensions: DashMap<String, i32>,
}

impl VectorStore {
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
            dimensions: DashMap::new(),
        })
    }

    fn vectors_schema(dim: i32) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new(
                "embedding",
                DataType::FixedSizeList(Arc::new(Field::new("item", DataType::Float32, true)), dim),
                false,
            ),
            Field::new("tenant", DataType::Utf8, false),
            Field::new("workspace", DataType::Utf8, false),
            Field::new("item_type", DataType::Utf8, false),
            Field::new("policy", DataType::Utf8, false),
            Field::new(
                "created_at",
                DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
                false,
            ),
            Field::new("metadata", DataType::Utf8, false),
        ]))
    }

    fn empty_batch(schema: Arc<Schema>, dim: i32) -> RecordBatch {
        let empty_strings: Vec<Option<&str>> = vec![];
        let empty_timestamps: Vec<i64> = vec![];
        let empty_embeddings: Vec<Option<Vec<Option<f32>>>> = vec![];

        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(empty_strings.clone())),
                Arc::new(FixedSizeListArray::from_iter_primitive::<
                    arrow_array::types::Float32Type,
                    _,
                    _,
                >(empty_embeddings, dim)),
                Arc::new(StringArray::from(empty_strings.clone())),
                Arc::new(StringArray::from(empty_strings.clone())),
                Arc::new(StringArray::from(empty_strings.clone())),
                Arc::new(StringArray::from(empty_strings.clone())),
                Arc::new(TimestampMicrosecondArray::from(empty_timestamps).with_timezone("UTC")),
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

    /// Dimension of a list-typed embedding field, from a table schema.
    fn dim_from_schema(schema: &Schema) -> Result<i32> {
        let field = schema
            .field_with_name("embedding")
            .map_err(|e| EngramError::Storage(format!("Missing embedding column: {e}")))?;
        match field.data_type() {
            DataType::FixedSizeList(_, size) => Ok(*size),
            other => Err(EngramError::Storage(format!(
                "Unexpected embedding type: {other}"
            ))),
        }
    }

    /// Open a namespace's table if it exists, caching the handle and its
    /// established dimension.
    async fn open_table(&self, ns: &Namespace) -> Result<Option<Table>> {
        let name = ns.vectors_table();
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
            .map_err(|e| EngramError::Storage(format!("Failed to open vectors table: {e}")))?;

        let schema = table
            .schema()
            .await
            .map_err(|e| EngramError::Storage(format!("Failed to read table schema: {e}")))?;
        let dim = Self::dim_from_schema(&schema)?;

        self.dimensions.insert(name.clone(), dim);
        self.tables.insert(name, table.clone());
        Ok(Some(table))
    }

    /// Open or create the namespace's table, establishing `dim` on first
    /// write and rejecting mismatches afterwards.
    async fn ensure_table(&self, ns: &Namespace, dim: i32) -> Result<Table> {
        if let Some(table) = self.open_table(ns).await? {
            let established = self.dimension(ns).await?.unwrap_or(dim);
            if established != dim {
                return Err(EngramError::Validation(format!(
                    "Vector dimension {dim} does not match established dimension {established} \
                     for namespace {}",
                    ns.physical_name()
                )));
            }
            return Ok(table);
        }

        let name = ns.vectors_table();
        let schema = Self::vectors_schema(dim);
        let batch = Self::empty_batch(schema.clone(), dim);
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        match self
            .connection
            .create_table(&name, Box::new(batches))
            .execute()
            .await
        {
            Ok(table) => {
                self.dimensions.insert(name.clone(), dim);
                self.tables.insert(name, table.clone());
                Ok(table)
            }
            // Lost a create race; the winner's dimension governs.
            Err(_) => self.open_table(ns).await?.ok_or_else(|| {
                EngramError::Storage(format!("Failed to create vectors table {name}"))
            }),
        }
    }

    /// The namespace's established dimension, if any write has occurred.
    pub async fn dimension(&self, ns: &Namespace) -> Result<Option<i32>> {
        let name = ns.vectors_table();
        if let Some(dim) = self.dimensions.get(&name) {
            return Ok(Some(*dim));
        }
        if self.open_table(ns).await?.is_some() {
            return Ok(self.dimensions.get(&name).map(|d| *d));
        }
        Ok(None)
    }

    /// Bulk upsert keyed by record id.
    ///
    /// Records failing validation (empty id, dimension mismatch, non-finite
    /// components) are reported in `failed_ids`; valid records are written
    /// in sizer-chosen chunks, in submission order, and a chunk failure does
    /// not abort the remaining chunks.
    pub async fn upsert_batch(
        &self,
        ns: &Namespace,
        records: &[VectorRecord],
        sizer: &AdaptiveBatchSizer,
    ) -> Result<UpsertReport> {
        let mut report = UpsertReport::default();
        if records.is_empty() {
            return Ok(report);
        }

        let dim = match self.dimension(ns).await? {
            Some(dim) => dim,
            None => {
                let first = records
                    .iter()
                    .find(|r| !r.vector.is_empty())
                    .ok_or_else(|| {
                        EngramError::Validation("Cannot establish dimension from empty vectors".to_string())
                    })?;
                first.vector.len() as i32
            }
        };

        let mut valid: Vec<&VectorRecord> = Vec::with_capacity(records.len());
        for record in records {
            if record.id.is_empty()
                || record.vector.len() as i32 != dim
                || record.vector.iter().any(|v| !v.is_finite())
            {
                report.failed += 1;
                report.failed_ids.push(record.id.clone());
            } else {
                valid.push(record);
            }
        }

        if valid.is_empty() {
            return Ok(report);
        }

        let table = self.ensure_table(ns, dim).await?;
        let schema = Self::vectors_schema(dim);

        let mut offset = 0;
        while offset < valid.len() {
            let size = sizer.next_batch_size(OperationKind::Upsert, dim as usize);
            let end = (offset + size).min(valid.len());
            let chunk = &valid[offset..end];

            let start = Instant::now();
            let outcome = self.write_chunk(&table, chunk, schema.clone()).await;
            sizer.record(PerformanceSample::new(
                OperationKind::Upsert,
                dim as usize,
                chunk.len(),
                start.elapsed().as_secs_f64() * 1000.0,
            ));

            match outcome {
                Ok(()) => report.written += chunk.len(),
                Err(e) => {
                    warn!(
                        namespace = ns.physical_name(),
                        chunk_len = chunk.len(),
                        error = %e,
                        "upsert chunk failed"
                    );
                    report.failed += chunk.len();
                    report
                        .failed_ids
                        .extend(chunk.iter().map(|r| r.id.clone()));
                }
            }
            offset = end;
        }

        debug!(
            namespace = ns.physical_name(),
            written = report.written,
            failed = report.failed,
            "upsert batch complete"
        );
        Ok(report)
    }

    /// Upsert one chunk as a single merge keyed on id, so a chunk either
    /// applies whole or leaves the previous versions in place.
    async fn write_chunk(
        &self,
        table: &Table,
        chunk: &[&VectorRecord],
        schema: Arc<Schema>,
    ) -> Result<()> {
        let batch = Self::records_to_batch(chunk, schema.clone())?;
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        let mut merge_insert = table.merge_insert(&["id"]);
        merge_insert
            .when_matched_update_all(None)
            .when_not_matched_insert_all();
        merge_insert
            .execute(Box::new(batches))
            .await
            .map_err(|e| EngramError::Storage(format!("Failed to upsert vectors: {e}")))?;
        Ok(())
    }

    /// Similarity query, ordered by descending cosine similarity with ties
    /// broken by ascending id. A `limit` of zero returns an empty list.
    pub async fn query(
        &self,
        ns: &Namespace,
        vector: &[f32],
        limit: usize,
        filter: &PayloadFilter,
    ) -> Result<Vec<QueryHit>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let Some(table) = self.open_table(ns).await? else {
            return Ok(Vec::new());
        };

        if let Some(dim) = self.dimension(ns).await? {
            if vector.len() as i32 != dim {
                return Err(EngramError::Validation(format!(
                    "Query vector dimension {} does not match established dimension {dim}",
                    vector.len()
                )));
            }
        }

        let candidates = if filter.has_metadata_constraints() {
            limit.saturating_mul(METADATA_FILTER_MULTIPLIER)
        } else {
            limit
        };

        let mut query = table
            .query()
            .nearest_to(vector)
            .map_err(|e| EngramError::Storage(format!("Failed to create vector query: {e}")))?
            .distance_type(DistanceType::Cosine)
            .limit(candidates);

        if let Some(sql_filter) = filter.to_sql_clause() {
            query = query.only_if(sql_filter);
        }

        let stream = query
            .execute()
            .await
            .map_err(|e| EngramError::Storage(format!("Failed to execute search: {e}")))?;

        let batches: Vec<RecordBatch> = stream
            .try_collect()
            .await
            .map_err(|e| EngramError::Storage(format!("Failed to collect search results: {e}")))?;

        let mut hits = Vec::new();
        for batch in &batches {
            let distances = batch
                .column_by_name("_distance")
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>().cloned())
                .ok_or_else(|| EngramError::Storage("Missing _distance column".to_string()))?;

            for row in 0..batch.num_rows() {
                let record = Self::record_from_batch(batch, row)?;
                if !filter.matches_metadata(&record.payload) {
                    continue;
                }
                // Cosine distance is 1 - similarity.
                hits.push(QueryHit {
                    id: record.id,
                    payload: record.payload,
                    score: 1.0 - distances.value(row),
                });
            }
        }

        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    /// Idempotent bulk delete. Absent ids are not errors and are not
    /// counted as removed.
    pub async fn delete_batch(
        &self,
        ns: &Namespace,
        ids: &[String],
        sizer: &AdaptiveBatchSizer,
    ) -> Result<DeleteReport> {
        let mut report = DeleteReport {
            requested: ids.len(),
            removed: 0,
        };
        if ids.is_empty() {
            return Ok(report);
        }

        let Some(table) = self.open_table(ns).await? else {
            return Ok(report);
        };
        let dim = self.dimension(ns).await?.unwrap_or(0) as usize;

        let mut offset = 0;
        while offset < ids.len() {
            let size = sizer.next_batch_size(OperationKind::Delete, dim);
            let end = (offset + size).min(ids.len());
            let chunk = &ids[offset..end];
            let predicate = id_list_predicate(chunk.iter().map(String::as_str));

            let start = Instant::now();
            let present = table
                .count_rows(Some(predicate.clone()))
                .await
                .map_err(|e| EngramError::Storage(format!("Failed to count rows: {e}")))?;
            table
                .delete(&predicate)
                .await
                .map_err(|e| EngramError::Storage(format!("Failed to delete vectors: {e}")))?;
            sizer.record(PerformanceSample::new(
                OperationKind::Delete,
                dim,
                chunk.len(),
                start.elapsed().as_secs_f64() * 1000.0,
            ));

            report.removed += present;
            offset = end;
        }

        Ok(report)
    }

    /// Number of records in the namespace.
    pub async fn count(&self, ns: &Namespace) -> Result<usize> {
        let Some(table) = self.open_table(ns).await? else {
            return Ok(0);
        };
        table
            .count_rows(None)
            .await
            .map_err(|e| EngramError::Storage(format!("Failed to count vectors: {e}")))
    }

    /// Open a fresh page-bounded scan over the namespace. Each call starts
    /// a new cursor from the beginning; `None` when the namespace has no
    /// table yet.
    pub async fn open_scan(&self, ns: &Namespace, page_size: usize) -> Result<Option<VectorScan>> {
        let Some(table) = self.open_table(ns).await? else {
            return Ok(None);
        };

        let stream = table
            .query()
            .execute()
            .await
            .map_err(|e| EngramError::Storage(format!("Failed to open scan: {e}")))?;

        Ok(Some(VectorScan {
            stream: Box::pin(stream),
            pending: VecDeque::new(),
            page_size: page_size.max(1),
            done: false,
        }))
    }

    /// Convert records to an Arrow RecordBatch.
    fn records_to_batch(records: &[&VectorRecord], schema: Arc<Schema>) -> Result<RecordBatch> {
        let dim = Self::dim_from_schema(&schema)?;

        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        let embeddings: Vec<Option<Vec<Option<f32>>>> = records
            .iter()
            .map(|r| Some(r.vector.iter().map(|&v| Some(v)).collect()))
            .collect();
        let tenants: Vec<&str> = records.iter().map(|r| r.payload.tenant.as_str()).collect();
        let workspaces: Vec<&str> = records
            .iter()
            .map(|r| r.payload.workspace.as_str())
            .collect();
        let item_types: Vec<&str> = records
            .iter()
            .map(|r| r.payload.item_type.as_str())
            .collect();
        let policies: Vec<&str> = records.iter().map(|r| r.payload.policy.as_str()).collect();
        let created_at: Vec<i64> = records
            .iter()
            .map(|r| r.payload.created_at.timestamp_micros())
            .collect();
        let metadata: Vec<String> = records
            .iter()
            .map(|r| serde_json::to_string(&r.payload.metadata))
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| EngramError::Serialization(format!("Failed to encode metadata: {e}")))?;
        let metadata_refs: Vec<&str> = metadata.iter().map(String::as_str).collect();

        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(ids)),
                Arc::new(FixedSizeListArray::from_iter_primitive::<
                    arrow_array::types::Float32Type,
                    _,
                    _,
                >(embeddings, dim)),
                Arc::new(StringArray::from(tenants)),
                Arc::new(StringArray::from(workspaces)),
                Arc::new(StringArray::from(item_types)),
                Arc::new(StringArray::from(policies)),
                Arc::new(TimestampMicrosecondArray::from(created_at).with_timezone("UTC")),
                Arc::new(StringArray::from(metadata_refs)),
            ],
        )
        .map_err(|e| EngramError::Storage(format!("Failed to create RecordBatch: {e}")))
    }

    /// Convert one RecordBatch row back to a VectorRecord.
    fn record_from_batch(batch: &RecordBatch, row: usize) -> Result<VectorRecord> {
        let id = string_column(batch, "id")?.value(row).to_string();

        let embedding_array = batch
            .column_by_name("embedding")
            .and_then(|c| c.as_any().downcast_ref::<FixedSizeListArray>())
            .ok_or_else(|| EngramError::Storage("Failed to get embedding column".to_string()))?;
        let embedding_list = embedding_array.value(row);
        let embedding_values = embedding_list
            .as_any()
            .downcast_ref::<Float32Array>()
            .ok_or_else(|| EngramError::Storage("Failed to get embedding values".to_string()))?;
        let vector: Vec<f32> = (0..embedding_values.len())
            .map(|i| embedding_values.value(i))
            .collect();

        let created_at_array = batch
            .column_by_name("created_at")
            .and_then(|c| c.as_any().downcast_ref::<TimestampMicrosecondArray>())
            .ok_or_else(|| EngramError::Storage("Failed to get created_at column".to_string()))?;
        let created_at = Utc
            .timestamp_micros(created_at_array.value(row))
            .single()
            .ok_or_else(|| {
                EngramError::Storage("Failed to parse created_at timestamp".to_string())
            })?;

        let metadata_json = string_column(batch, "metadata")?.value(row);
        let metadata: MetadataMap = serde_json::from_str(metadata_json)
            .map_err(|e| EngramError::Serialization(format!("Failed to decode metadata: {e}")))?;

        Ok(VectorRecord {
            id,
            vector,
            payload: VectorPayload {
                tenant: string_column(batch, "tenant")?.value(row).to_string(),
                workspace: string_column(batch, "workspace")?.value(row).to_string(),
                item_type: string_column(batch, "item_type")?.value(row).to_string(),
                policy: string_column(batch, "policy")?.value(row).to_string(),
                created_at,
                metadata,
            },
        })
    }
}

/// A restartable, page-bounded cursor over a namespace's vector records.
pub struct VectorScan {
    stream: Pin<Box<dyn Stream<Item = lancedb::error::Result<RecordBatch>> + Send>>,
    pending: VecDeque<VectorRecord>,
    page_size: usize,
    done: bool,
}

impl VectorScan {
    /// The next page of at most `page_size` records, or `None` when the
    /// scan is exhausted.
    pub async fn next_page(&mut self) -> Result<Option<Vec<VectorRecord>>> {
        while !self.done && self.pending.len() < self.page_size {
            match self
                .stream
                .try_next()
                .await
                .map_err(|e| EngramError::Storage(format!("Scan failed: {e}")))?
            {
                Some(batch) => {
                    for row in 0..batch.num_rows() {
                        self.pending
                            .push_back(VectorStore::record_from_batch(&batch, row)?);
                    }
                }
                None => self.done = true,
            }
        }

        if self.pending.is_empty() {
            return Ok(None);
        }
        let take = self.page_size.min(self.pending.len());
        Ok(Some(self.pending.drain(..take).collect()))
    }
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| EngramError::Storage(format!("Failed to get {name} column")))
}

fn id_list_predicate<'a>(ids: impl Iterator<Item = &'a str>) -> String {
    let list = ids
        .map(|id| format!("'{}'", id.replace('\'', "''")))
        .collect::<Vec<_>>()
        .join(", ");
    format!("id IN ({list})")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vectors_schema_has_expected_fields() {
        let schema = VectorStore::vectors_schema(3);
        assert_eq!(schema.fields().len(), 8);
        let names: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
        for expected in [
            "id",
            "embedding",
            "tenant",
            "workspace",
            "item_type",
            "policy",
            "created_at",
            "metadata",
        ] {
            assert!(names.contains(&expected), "missing field {expected}");
        }
    }

    #[test]
    fn test_embedding_field_uses_requested_dimension() {
        let schema = VectorStore::vectors_schema(384);
        assert_eq!(VectorStore::dim_from_schema(&schema).unwrap(), 384);
    }

    #[test]
    fn test_id_list_predicate_escapes_quotes() {
        let predicate = id_list_predicate(["a", "o'brien"].into_iter());
        assert_eq!(predicate, "id IN ('a', 'o''brien')");
    }
}
