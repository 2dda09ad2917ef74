//! Tile configurations and shape-regime selection
//!
//! Three fixed configurations cover the shape regimes a mixture-of-experts
//! layer produces at inference time:
//!
//! | Config    | Regime            | Tile          | Cluster | Schedule          |
//! |-----------|-------------------|---------------|---------|-------------------|
//! | `SMALL_M` | decode, M <= 64   | 64x128x128    | 1x1x1   | single group      |
//! | `LARGE_N` | wide FFN, N >= 8K | 128x256x128   | 1x2x1   | dual cooperative  |
//! | `DEFAULT` | prefill, mid-size | 128x128x128   | 1x1x1   | single group      |
//!
//! Configurations are statically allocated and selected by reference; they
//! are never constructed or mutated at runtime.

use serde::Serialize;

/// Tile extents along the three matmul dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TileShape {
    /// Rows per tile
    pub m: u32,
    /// Columns per tile
    pub n: u32,
    /// Reduction depth per tile
    pub k: u32,
}

/// How many parallel execution groups cooperate on one tile, per axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClusterShape {
    /// Cooperating groups along M
    pub m: u32,
    /// Cooperating groups along N
    pub n: u32,
    /// Cooperating groups along K
    pub k: u32,
}

/// Scheduling variant: how execution groups are synchronized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Schedule {
    /// One execution group owns the whole tile
    SingleGroup,
    /// Two synchronized groups split the tile cooperatively
    DualGroupCooperative,
}

/// A fixed compute-tile / parallelization strategy
///
/// Bundles everything the engine needs to know about how to carve the
/// problem: tile extents, cluster topology, scheduling variant, and the
/// small-group iteration mode used when individual groups are tiny or
/// degenerate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TileConfig {
    /// Human-readable name, stable for metrics and diagnostics
    pub name: &'static str,
    /// Tile extents
    pub tile: TileShape,
    /// Parallel-execution-group topology
    pub cluster: ClusterShape,
    /// Scheduling variant
    pub schedule: Schedule,
    /// Iteration mode optimized for tiny or empty groups
    pub small_group_mode: bool,
}

/// Row-count bound for the latency regime (inclusive)
pub const SMALL_M_ROW_BOUND: usize = 64;

/// Feature-width bound for the throughput regime (inclusive)
pub const LARGE_N_COL_BOUND: usize = 8192;

/// Narrow-M configuration for latency-bound decode batches
///
/// With very few activation rows the cost is dominated by launch and
/// pipeline-fill overhead, not throughput, so the tile is narrow along M
/// and the small-group iteration mode is on.
pub static SMALL_M: TileConfig = TileConfig {
    name: "small_m",
    tile: TileShape { m: 64, n: 128, k: 128 },
    cluster: ClusterShape { m: 1, n: 1, k: 1 },
    schedule: Schedule::SingleGroup,
    small_group_mode: true,
};

/// Wide-N configuration for throughput-bound FFN widths
///
/// Two synchronized execution groups split the output dimension, which
/// improves utilization when N dominates the work.
pub static LARGE_N: TileConfig = TileConfig {
    name: "large_n",
    tile: TileShape { m: 128, n: 256, k: 128 },
    cluster: ClusterShape { m: 1, n: 2, k: 1 },
    schedule: Schedule::DualGroupCooperative,
    small_group_mode: false,
};

/// Balanced configuration for mid-size prefill problems
pub static DEFAULT: TileConfig = TileConfig {
    name: "default",
    tile: TileShape { m: 128, n: 128, k: 128 },
    cluster: ClusterShape { m: 1, n: 1, k: 1 },
    schedule: Schedule::SingleGroup,
    small_group_mode: false,
};

/// Select the tile configuration for an aggregate problem shape
///
/// Pure and total over `(m_total, n)`: same inputs always return the same
/// configuration. First match wins, in this order:
///
/// 1. `m_total <= 64` -> [`SMALL_M`]
/// 2. `n >= 8192` -> [`LARGE_N`]
/// 3. otherwise -> [`DEFAULT`]
///
/// The Small-M check runs strictly before the Large-N check: in the overlap
/// region (`m_total <= 64 && n >= 8192`) the latency regime wins. Swapping
/// the order changes behavior there.
///
/// # Arguments
///
/// * `m_total` - Total activation rows, summed over all groups
/// * `n` - Shared output feature width
///
/// # Examples
///
/// ```
/// use agrupar::config::{select_config, DEFAULT, LARGE_N, SMALL_M};
///
/// assert_eq!(select_config(64, 8192), &SMALL_M); // priority corner
/// assert_eq!(select_config(65, 8192), &LARGE_N);
/// assert_eq!(select_config(65, 100), &DEFAULT);
/// ```
#[must_use]
pub fn select_config(m_total: usize, n: usize) -> &'static TileConfig {
    if m_total <= SMALL_M_ROW_BOUND {
        &SMALL_M
    } else if n >= LARGE_N_COL_BOUND {
        &LARGE_N
    } else {
        &DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_small_m_boundary() {
        assert_eq!(select_config(1, 1), &SMALL_M);
        assert_eq!(select_config(64, 100), &SMALL_M);
        assert_eq!(select_config(64, 1_000_000), &SMALL_M);
        assert_eq!(select_config(65, 100), &DEFAULT);
    }

    #[test]
    fn test_select_large_n_boundary() {
        assert_eq!(select_config(65, 8191), &DEFAULT);
        assert_eq!(select_config(65, 8192), &LARGE_N);
        assert_eq!(select_config(10_000, 16_384), &LARGE_N);
    }

    #[test]
    fn test_small_m_outranks_large_n() {
        // Overlap region: latency regime wins over throughput regime.
        assert_eq!(select_config(64, 8192), &SMALL_M);
        assert_eq!(select_config(0, usize::MAX), &SMALL_M);
    }

    #[test]
    fn test_configs_are_distinct() {
        assert_ne!(SMALL_M, LARGE_N);
        assert_ne!(SMALL_M, DEFAULT);
        assert_ne!(LARGE_N, DEFAULT);
        assert!(SMALL_M.small_group_mode);
        assert!(!LARGE_N.small_group_mode);
        assert!(!DEFAULT.small_group_mode);
    }

    #[test]
    fn test_schedule_matches_cluster() {
        assert_eq!(LARGE_N.schedule, Schedule::DualGroupCooperative);
        assert_eq!(LARGE_N.cluster.n, 2);
        assert_eq!(SMALL_M.schedule, Schedule::SingleGroup);
        assert_eq!(DEFAULT.schedule, Schedule::SingleGroup);
    }
}
