//! Dispatch metrics for production monitoring
//!
//! Tracks how often each tile configuration is selected, how many
//! dispatches fail validation, and cumulative engine time. Counters are
//! relaxed atomics behind `Arc`, so a collector can be cloned into any
//! thread that dispatches and snapshotted from a monitoring loop without
//! locking.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::config::TileConfig;

/// Counters for grouped matmul dispatches
#[derive(Debug, Clone, Default)]
pub struct DispatchMetrics {
    /// Dispatches that passed validation and ran the engine
    completed: Arc<AtomicUsize>,
    /// Dispatches rejected at the validation boundary
    rejected: Arc<AtomicUsize>,
    /// Selections of the Small-M configuration
    small_m_selected: Arc<AtomicUsize>,
    /// Selections of the Large-N configuration
    large_n_selected: Arc<AtomicUsize>,
    /// Selections of the default configuration
    default_selected: Arc<AtomicUsize>,
    /// Total engine time in microseconds
    engine_time_us: Arc<AtomicU64>,
}

impl DispatchMetrics {
    /// Create a collector with all counters at zero
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed dispatch and the configuration it ran under
    #[allow(clippy::cast_possible_truncation)]
    pub fn record_completed(&self, config: &TileConfig, engine_time: Duration) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.engine_time_us
            .fetch_add(engine_time.as_micros() as u64, Ordering::Relaxed);
        let counter = match config.name {
            "small_m" => &self.small_m_selected,
            "large_n" => &self.large_n_selected,
            _ => &self.default_selected,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a dispatch rejected before any engine work
    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a consistent-enough snapshot for reporting
    ///
    /// Individual counters are read independently; totals may be off by
    /// in-flight dispatches, which is acceptable for monitoring.
    #[must_use]
    pub fn snapshot(&self) -> DispatchMetricsSnapshot {
        DispatchMetricsSnapshot {
            completed: self.completed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            small_m_selected: self.small_m_selected.load(Ordering::Relaxed),
            large_n_selected: self.large_n_selected.load(Ordering::Relaxed),
            default_selected: self.default_selected.load(Ordering::Relaxed),
            engine_time_us: self.engine_time_us.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of dispatch counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DispatchMetricsSnapshot {
    /// Dispatches that ran the engine
    pub completed: usize,
    /// Dispatches rejected at validation
    pub rejected: usize,
    /// Small-M selections
    pub small_m_selected: usize,
    /// Large-N selections
    pub large_n_selected: usize,
    /// Default selections
    pub default_selected: usize,
    /// Cumulative engine time in microseconds
    pub engine_time_us: u64,
}

impl DispatchMetricsSnapshot {
    /// Mean engine time per completed dispatch
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn mean_engine_time_us(&self) -> f64 {
        if self.completed == 0 {
            0.0
        } else {
            self.engine_time_us as f64 / self.completed as f64
        }
    }
}
