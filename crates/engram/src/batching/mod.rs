//! Adaptive batch sizing
//!
//! A feedback-control loop for bulk-write chunk sizes. The starting size is
//! capped by vector dimensionality, then adjusted by the mean latency of
//! recent operations of the same kind: shrink when slow, grow when fast.
//! Every completed chunk reports a sample before the next size is computed,
//! so the sizer adapts across the chunks of a single large upsert as well as
//! across operations over time.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Instant;

use tracing::debug;

use crate::config::BatchConfig;

/// Kind of backend operation a sample was measured for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Upsert,
    Delete,
}

/// One latency observation. Held only in the in-process rolling window,
/// never persisted.
#[derive(Debug, Clone)]
pub struct PerformanceSample {
    pub operation: OperationKind,
    pub vector_dim: usize,
    pub batch_size: usize,
    pub duration_ms: f64,
    pub recorded_at: Instant,
}

impl PerformanceSample {
    pub fn new(
        operation: OperationKind,
        vector_dim: usize,
        batch_size: usize,
        duration_ms: f64,
    ) -> Self {
        Self {
            operation,
            vector_dim,
            batch_size,
            duration_ms,
            recorded_at: Instant::now(),
        }
    }
}

/// Computes bulk-write chunk sizes from dimension and latency history.
///
/// The rolling history is shared across concurrent batch operations;
/// approximate statistics under contention are acceptable since the sizer
/// is a heuristic, not a correctness path.
pub struct AdaptiveBatchSizer {
    config: BatchConfig,
    history: Mutex<VecDeque<PerformanceSample>>,
}

impl AdaptiveBatchSizer {
    pub fn new(config: BatchConfig) -> Self {
        Self {
            config,
            history: Mutex::new(VecDeque::new()),
        }
    }

    /// Record a completed-chunk sample, evicting the oldest beyond the
    /// retention bound.
    pub fn record(&self, sample: PerformanceSample) {
        let mut history = self.history.lock().unwrap();
        history.push_back(sample);
        // Keep enough for a full window per operation kind.
        let retain = self.config.window * 3;
        while history.len() > retain {
            history.pop_front();
        }
    }

    /// Compute the next chunk size for `operation` on vectors of
    /// `vector_dim` dimensions. Always in `[1, max_batch_size]`.
    pub fn next_batch_size(&self, operation: OperationKind, vector_dim: usize) -> usize {
        let mut size = self.config.base_batch_size;

        if vector_dim >= self.config.large_dim {
            size = size.min(self.config.large_cap);
        } else if vector_dim >= self.config.medium_dim {
            size = size.min(self.config.medium_cap);
        }

        if let Some(mean_ms) = self.recent_mean_ms(operation) {
            // A factor of 1 leaves the size unchanged; 0 would divide by
            // zero, so it is treated as 1.
            let factor = self.config.adjust_factor.max(1);
            if mean_ms > self.config.slow_ms {
                size /= factor;
            } else if mean_ms < self.config.fast_ms {
                size = size.saturating_mul(factor);
            }
        }

        let size = size.clamp(1, self.config.max_batch_size.max(1));
        debug!(?operation, vector_dim, size, "adaptive batch size");
        size
    }

    /// Mean duration of the last `window` samples matching `operation`.
    fn recent_mean_ms(&self, operation: OperationKind) -> Option<f64> {
        let history = self.history.lock().unwrap();
        let durations: Vec<f64> = history
            .iter()
            .rev()
            .filter(|s| s.operation == operation)
            .take(self.config.window)
            .map(|s| s.duration_ms)
            .collect();

        if durations.is_empty() {
            return None;
        }
        Some(durations.iter().sum::<f64>() / durations.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sizer() -> AdaptiveBatchSizer {
        AdaptiveBatchSizer::new(BatchConfig::default())
    }

    fn record_n(sizer: &AdaptiveBatchSizer, op: OperationKind, n: usize, duration_ms: f64) {
        for _ in 0..n {
            sizer.record(PerformanceSample::new(op, 384, 128, duration_ms));
        }
    }

    #[test]
    fn test_empty_history_returns_base_size() {
        let sizer = sizer();
        assert_eq!(sizer.next_batch_size(OperationKind::Upsert, 384), 128);
    }

    #[test]
    fn test_medium_dimension_caps_start() {
        let sizer = sizer();
        assert_eq!(sizer.next_batch_size(OperationKind::Upsert, 768), 64);
        assert_eq!(sizer.next_batch_size(OperationKind::Upsert, 1024), 64);
    }

    #[test]
    fn test_large_dimension_caps_start() {
        let sizer = sizer();
        assert_eq!(sizer.next_batch_size(OperationKind::Upsert, 1536), 32);
        assert_eq!(sizer.next_batch_size(OperationKind::Upsert, 3072), 32);
    }

    #[test]
    fn test_slow_history_shrinks_size() {
        let sizer = sizer();
        record_n(&sizer, OperationKind::Upsert, 8, 2000.0);
        assert_eq!(sizer.next_batch_size(OperationKind::Upsert, 384), 64);
    }

    #[test]
    fn test_fast_history_grows_size() {
        let sizer = sizer();
        record_n(&sizer, OperationKind::Upsert, 8, 10.0);
        assert_eq!(sizer.next_batch_size(OperationKind::Upsert, 384), 256);
    }

    #[test]
    fn test_growth_capped_at_max() {
        let config = BatchConfig {
            base_batch_size: 400,
            max_batch_size: 512,
            ..BatchConfig::default()
        };
        let sizer = AdaptiveBatchSizer::new(config);
        record_n(&sizer, OperationKind::Upsert, 8, 10.0);
        assert_eq!(sizer.next_batch_size(OperationKind::Upsert, 384), 512);
    }

    #[test]
    fn test_shrink_never_goes_below_one() {
        let config = BatchConfig {
            base_batch_size: 1,
            ..BatchConfig::default()
        };
        let sizer = AdaptiveBatchSizer::new(config);
        record_n(&sizer, OperationKind::Upsert, 8, 5000.0);
        assert_eq!(sizer.next_batch_size(OperationKind::Upsert, 384), 1);
    }

    #[test]
    fn test_factor_of_one_disables_adjustment() {
        let config = BatchConfig {
            adjust_factor: 1,
            ..BatchConfig::default()
        };
        let sizer = AdaptiveBatchSizer::new(config);
        record_n(&sizer, OperationKind::Upsert, 8, 5000.0);
        assert_eq!(sizer.next_batch_size(OperationKind::Upsert, 384), 128);

        record_n(&sizer, OperationKind::Delete, 8, 10.0);
        assert_eq!(sizer.next_batch_size(OperationKind::Delete, 384), 128);
    }

    #[test]
    fn test_samples_scoped_to_operation_kind() {
        let sizer = sizer();
        record_n(&sizer, OperationKind::Delete, 8, 5000.0);
        // Upsert sizing ignores the slow delete samples.
        assert_eq!(sizer.next_batch_size(OperationKind::Upsert, 384), 128);
        assert_eq!(sizer.next_batch_size(OperationKind::Delete, 384), 64);
    }

    #[test]
    fn test_window_uses_latest_samples() {
        let config = BatchConfig {
            window: 4,
            ..BatchConfig::default()
        };
        let sizer = AdaptiveBatchSizer::new(config);
        // Old slow samples displaced by fresh fast ones.
        record_n(&sizer, OperationKind::Upsert, 4, 5000.0);
        record_n(&sizer, OperationKind::Upsert, 4, 10.0);
        assert_eq!(sizer.next_batch_size(OperationKind::Upsert, 384), 256);
    }

    #[test]
    fn test_bounds_hold_for_any_history() {
        let sizer = sizer();
        for duration in [0.0, 1.0, 99.0, 100.0, 1000.0, 1001.0, 60_000.0] {
            sizer.record(PerformanceSample::new(
                OperationKind::Upsert,
                1536,
                32,
                duration,
            ));
            for dim in [1, 128, 768, 1536, 4096] {
                let size = sizer.next_batch_size(OperationKind::Upsert, dim);
                assert!(size >= 1);
                assert!(size <= 512);
            }
        }
    }
}
