//! Similarity-based deduplication
//!
//! Scans a namespace's vectors in bounded pages, finds near-duplicate pairs
//! by cosine similarity against a bounded window of previously seen records,
//! and removes the redundant half of each pair from both stores. Deletions
//! are committed page by page, so cancelling a long compaction simply
//! leaves the remaining duplicates for the next run. Readers are never
//! blocked: the scan runs on a snapshot and issues targeted, idempotent
//! deletes.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::batching::AdaptiveBatchSizer;
use crate::config::CompactionConfig;
use crate::error::Result;
use crate::memory::types::VectorRecord;
use crate::namespace::Namespace;
use crate::storage::lance::VectorStore;
use crate::storage::meta::MetadataStore;

/// Outcome of one compaction run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CompactionReport {
    pub vectors_analyzed: usize,
    pub duplicates_found: usize,
    pub vectors_removed: usize,
    pub space_saved_percent: f64,
}

/// A previously scanned record retained for cross-record comparison.
struct SeenRecord {
    id: String,
    vector: Vec<f32>,
    created_at: DateTime<Utc>,
}

/// Removes near-duplicate vector records from a namespace.
pub struct Compactor {
    vectors: Arc<VectorStore>,
    metadata: Arc<MetadataStore>,
    sizer: Arc<AdaptiveBatchSizer>,
    config: CompactionConfig,
}

impl Compactor {
    pub fn new(
        vectors: Arc<VectorStore>,
        metadata: Arc<MetadataStore>,
        sizer: Arc<AdaptiveBatchSizer>,
        config: CompactionConfig,
    ) -> Self {
        Self {
            vectors,
            metadata,
            sizer,
            config,
        }
    }

    /// Deduplicate `ns` using `similarity_threshold` as the duplicate
    /// cutoff. Running twice with no intervening writes finds nothing on
    /// the second pass.
    ///
    /// The cross-page comparison window is bounded by `max_seen`
    /// (configuration); duplicates farther apart than the window in scan
    /// order are left for a later run.
    pub async fn compact(
        &self,
        ns: &Namespace,
        similarity_threshold: f32,
    ) -> Result<CompactionReport> {
        let mut report = CompactionReport::default();
        let scan_started = Utc::now();

        let Some(mut scan) = self.vectors.open_scan(ns, self.config.page_size).await? else {
            return Ok(report);
        };

        let mut seen: VecDeque<SeenRecord> = VecDeque::new();

        while let Some(page) = scan.next_page().await? {
            let mut doomed: Vec<String> = Vec::new();

            for record in page {
                report.vectors_analyzed += 1;
                match self.find_duplicate(&seen, &record, similarity_threshold) {
                    Some(seen_idx) => {
                        report.duplicates_found += 1;
                        // The earlier-created record wins; ties go to the
                        // lower id.
                        let earlier = &seen[seen_idx];
                        let new_wins = (record.payload.created_at, record.id.as_str())
                            < (earlier.created_at, earlier.id.as_str());
                        if new_wins {
                            let loser = seen.remove(seen_idx).expect("index in bounds");
                            doomed.push(loser.id);
                            Self::push_seen(&mut seen, &record, self.config.max_seen);
                        } else {
                            doomed.push(record.id);
                        }
                    }
                    None => Self::push_seen(&mut seen, &record, self.config.max_seen),
                }
            }

            if doomed.is_empty() {
                continue;
            }

            // Committed per page: cancellation after this point never undoes
            // deletions already applied.
            let confirmed = self.revalidate(ns, doomed, scan_started).await?;
            let deleted = self.vectors.delete_batch(ns, &confirmed, &self.sizer).await?;
            self.metadata.delete_batch(ns, &confirmed).await?;
            report.vectors_removed += deleted.removed;

            debug!(
                namespace = ns.physical_name(),
                removed = deleted.removed,
                "compaction page committed"
            );
        }

        report.space_saved_percent = if report.vectors_analyzed == 0 {
            0.0
        } else {
            100.0 * report.vectors_removed as f64 / report.vectors_analyzed as f64
        };

        info!(
            namespace = ns.physical_name(),
            analyzed = report.vectors_analyzed,
            duplicates = report.duplicates_found,
            removed = report.vectors_removed,
            space_saved_percent = report.space_saved_percent,
            "compaction complete"
        );
        Ok(report)
    }

    /// Index of the first seen record that duplicates `record`.
    fn find_duplicate(
        &self,
        seen: &VecDeque<SeenRecord>,
        record: &VectorRecord,
        threshold: f32,
    ) -> Option<usize> {
        seen.iter()
            .position(|s| cosine_similarity(&s.vector, &record.vector) >= threshold)
    }

    fn push_seen(seen: &mut VecDeque<SeenRecord>, record: &VectorRecord, max_seen: usize) {
        seen.push_back(SeenRecord {
            id: record.id.clone(),
            vector: record.vector.clone(),
            created_at: record.payload.created_at,
        });
        while seen.len() > max_seen.max(1) {
            seen.pop_front();
        }
    }

    /// Drop candidates whose metadata row changed after the scan snapshot:
    /// an id overwritten mid-compaction may no longer hold the duplicate
    /// content the scan saw.
    async fn revalidate(
        &self,
        ns: &Namespace,
        doomed: Vec<String>,
        scan_started: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let mut confirmed = Vec::with_capacity(doomed.len());
        for id in doomed {
            match self.metadata.get(ns, &id).await? {
                Some(item) if item.updated_at > scan_started => {
                    debug!(id, "skipping delete of record updated mid-compaction");
                }
                _ => confirmed.push(id),
            }
        }
        Ok(confirmed)
    }
}

/// Cosine similarity of two vectors; 0 when either has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_identical_vectors() {
        let v = vec![0.3, 0.5, 0.2];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal_vectors() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_opposite_vectors() {
        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        assert!((cosine_similarity(&a, &b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_near_duplicates_score_high() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.001];
        assert!(cosine_similarity(&a, &b) > 0.98);
    }

    #[test]
    fn test_cosine_zero_norm_is_zero() {
        let a = vec![0.0, 0.0];
        let b = vec![1.0, 1.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn test_cosine_length_mismatch_is_zero() {
        let a = vec![1.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }
}
