//! Buffer views and per-group metadata for grouped matmuls
//!
//! All buffers are caller-owned: this crate borrows them for the duration
//! of one dispatch, reads the inputs, and overwrites the output in place.
//! Nothing here allocates or frees caller data.
//!
//! The stacked layout packs G independently-shaped sub-problems into shared
//! buffers: activations `[M, K]` (rows partitioned by expert offsets),
//! weights `[G, K, N]`, output `[M, N]`. Per-group leading dimensions come
//! in as separate stride slices so callers with padded layouts can describe
//! them without copying.

use half::{bf16, f16};
use serde::{Deserialize, Serialize};

use crate::error::{AgruparError, Result};
use crate::fp8::F8E4M3;

/// Shape of one sub-problem: `(M_i, N, K)`
///
/// N and K are constant across groups in this workload; M varies per group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupProblem {
    /// Activation rows routed to this expert
    pub m: usize,
    /// Output feature width (shared across groups)
    pub n: usize,
    /// Reduction depth (shared across groups)
    pub k: usize,
}

impl GroupProblem {
    /// Create a problem shape
    #[must_use]
    pub fn new(m: usize, n: usize, k: usize) -> Self {
        Self { m, n, k }
    }
}

/// Read-only row-major view of the stacked FP8 activation buffer `[M, K]`
#[derive(Debug, Clone, Copy)]
pub struct StackedMatrix<'a> {
    data: &'a [F8E4M3],
    rows: usize,
    cols: usize,
}

impl<'a> StackedMatrix<'a> {
    /// Create a view over a caller-owned buffer
    ///
    /// # Errors
    ///
    /// Returns `InvalidShape` if the buffer is smaller than `rows * cols`.
    pub fn new(data: &'a [F8E4M3], rows: usize, cols: usize) -> Result<Self> {
        if data.len() < rows * cols {
            return Err(AgruparError::InvalidShape {
                reason: format!(
                    "stacked matrix buffer holds {} elements, shape {}x{} needs {}",
                    data.len(),
                    rows,
                    cols,
                    rows * cols
                ),
            });
        }
        Ok(Self { data, rows, cols })
    }

    /// Underlying element slice
    #[must_use]
    pub fn data(&self) -> &'a [F8E4M3] {
        self.data
    }

    /// Total stacked rows (sum of all group `M_i`)
    #[must_use]
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Columns (the reduction depth K for activations)
    #[must_use]
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Whether the view covers zero elements
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows == 0 || self.cols == 0
    }
}

/// Read-only view of the stacked FP8 expert weights `[G, K, N]`
#[derive(Debug, Clone, Copy)]
pub struct ExpertWeights<'a> {
    data: &'a [F8E4M3],
    groups: usize,
    k: usize,
    n: usize,
}

impl<'a> ExpertWeights<'a> {
    /// Create a view over G stacked `[K, N]` weight matrices
    ///
    /// # Errors
    ///
    /// Returns `InvalidShape` if the buffer is smaller than `groups * k * n`.
    pub fn new(data: &'a [F8E4M3], groups: usize, k: usize, n: usize) -> Result<Self> {
        if data.len() < groups * k * n {
            return Err(AgruparError::InvalidShape {
                reason: format!(
                    "expert weight buffer holds {} elements, shape {}x{}x{} needs {}",
                    data.len(),
                    groups,
                    k,
                    n,
                    groups * k * n
                ),
            });
        }
        Ok(Self { data, groups, k, n })
    }

    /// Underlying element slice
    #[must_use]
    pub fn data(&self) -> &'a [F8E4M3] {
        self.data
    }

    /// Number of stacked expert matrices
    #[must_use]
    pub fn groups(&self) -> usize {
        self.groups
    }

    /// Reduction depth of each expert matrix
    #[must_use]
    pub fn k(&self) -> usize {
        self.k
    }

    /// Output feature width of each expert matrix
    #[must_use]
    pub fn n(&self) -> usize {
        self.n
    }
}

/// Output element formats supported by the epilogue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutDType {
    /// IEEE half precision
    F16,
    /// Brain float 16
    Bf16,
}

/// Mutable output buffer `[M, N]`, one of the two supported formats
///
/// The variant is the explicit output-dtype parameter for the whole call:
/// the format is fixed once per dispatch, never per element.
#[derive(Debug)]
pub enum OutputStorage<'a> {
    /// Half-precision output
    F16(&'a mut [f16]),
    /// Brain-float output
    Bf16(&'a mut [bf16]),
}

/// Mutable view of the stacked output buffer
#[derive(Debug)]
pub struct OutputBuffer<'a> {
    storage: OutputStorage<'a>,
    rows: usize,
    cols: usize,
}

impl<'a> OutputBuffer<'a> {
    /// Wrap a caller-owned f16 buffer
    ///
    /// # Errors
    ///
    /// Returns `InvalidShape` if the buffer is smaller than `rows * cols`.
    pub fn f16(data: &'a mut [f16], rows: usize, cols: usize) -> Result<Self> {
        Self::check_len(data.len(), rows, cols)?;
        Ok(Self {
            storage: OutputStorage::F16(data),
            rows,
            cols,
        })
    }

    /// Wrap a caller-owned bf16 buffer
    ///
    /// # Errors
    ///
    /// Returns `InvalidShape` if the buffer is smaller than `rows * cols`.
    pub fn bf16(data: &'a mut [bf16], rows: usize, cols: usize) -> Result<Self> {
        Self::check_len(data.len(), rows, cols)?;
        Ok(Self {
            storage: OutputStorage::Bf16(data),
            rows,
            cols,
        })
    }

    fn check_len(len: usize, rows: usize, cols: usize) -> Result<()> {
        if len < rows * cols {
            return Err(AgruparError::InvalidShape {
                reason: format!(
                    "output buffer holds {len} elements, shape {rows}x{cols} needs {}",
                    rows * cols
                ),
            });
        }
        Ok(())
    }

    /// Element format of this buffer
    #[must_use]
    pub fn dtype(&self) -> OutDType {
        match self.storage {
            OutputStorage::F16(_) => OutDType::F16,
            OutputStorage::Bf16(_) => OutDType::Bf16,
        }
    }

    /// Total output rows
    #[must_use]
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Output feature width N
    #[must_use]
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Whether the view covers zero elements
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows == 0 || self.cols == 0
    }

    /// Mutable access to the typed storage
    pub fn storage_mut(&mut self) -> &mut OutputStorage<'a> {
        &mut self.storage
    }
}

/// Dequantization scale factors with broadcast shape
///
/// Shape is one of `(1,1)`, `(M,1)`, `(1,N)`, `(M,N)` depending on whether
/// scaling is per-activation-token and/or per-output-channel. Consistency
/// with the `per_act_token` / `per_out_ch` flags is a caller contract
/// (debug-asserted in the epilogue, not validated per dispatch).
#[derive(Debug, Clone, Copy)]
pub struct ScaleTensor<'a> {
    data: &'a [f32],
    rows: usize,
    cols: usize,
}

impl<'a> ScaleTensor<'a> {
    /// Create a scale view
    ///
    /// # Errors
    ///
    /// Returns `InvalidShape` if the buffer length does not match
    /// `rows * cols` or the buffer is empty.
    pub fn new(data: &'a [f32], rows: usize, cols: usize) -> Result<Self> {
        if data.is_empty() {
            return Err(AgruparError::EmptyInput { arg: "scale tensor" });
        }
        if data.len() != rows * cols {
            return Err(AgruparError::InvalidShape {
                reason: format!(
                    "scale tensor holds {} elements, shape {}x{} needs {}",
                    data.len(),
                    rows,
                    cols,
                    rows * cols
                ),
            });
        }
        Ok(Self { data, rows, cols })
    }

    /// Scalar scale with shape `(1,1)`
    #[must_use]
    pub fn scalar(value: &'a [f32; 1]) -> Self {
        Self {
            data: value,
            rows: 1,
            cols: 1,
        }
    }

    /// Raw scale values
    #[must_use]
    pub fn data(&self) -> &'a [f32] {
        self.data
    }

    /// Declared rows
    #[must_use]
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Declared columns
    #[must_use]
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Scale value at a flat index
    ///
    /// # Panics
    ///
    /// Panics if `idx` is out of bounds (fatal abort per the engine
    /// contract, not a recoverable error).
    #[must_use]
    pub fn get(&self, idx: usize) -> f32 {
        self.data[idx]
    }
}

/// Per-group partition metadata: problem sizes, offsets, and stride sets
///
/// Bundles the five metadata slices the engine walks so they can be
/// validated once at the dispatch boundary and then trusted downstream.
#[derive(Debug, Clone, Copy)]
pub struct GroupPartition<'a> {
    /// `(M_i, N, K)` per group, length G
    pub problem_sizes: &'a [GroupProblem],
    /// Row offsets into the stacked activation buffer, length G+1
    pub expert_offsets: &'a [usize],
    /// Leading dimension of each group's activation slice, length G
    pub strides_a: &'a [usize],
    /// Leading dimension of each group's weight matrix, length G
    pub strides_b: &'a [usize],
    /// Leading dimension of each group's output slice, length G
    pub strides_c: &'a [usize],
}

impl GroupPartition<'_> {
    /// Number of groups G
    #[must_use]
    pub fn num_groups(&self) -> usize {
        self.problem_sizes.len()
    }

    /// Validate partition invariants against the stacked activation rows
    ///
    /// Checks, in order: G >= 1; `expert_offsets` has length G+1; the three
    /// stride slices have length G; offsets are monotonically non-decreasing
    /// with `offsets[i+1] - offsets[i] == M_i`; and the covered span equals
    /// `total_rows`. All checks are O(G), cheap against the O(M*N*K) engine
    /// call they guard.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant as a structured error.
    pub fn validate(&self, total_rows: usize) -> Result<()> {
        let g = self.num_groups();
        if g == 0 {
            return Err(AgruparError::EmptyInput { arg: "problem_sizes" });
        }
        if self.expert_offsets.len() != g + 1 {
            return Err(AgruparError::InvalidShape {
                reason: format!(
                    "expert_offsets has length {}, expected G+1 = {}",
                    self.expert_offsets.len(),
                    g + 1
                ),
            });
        }
        for (name, strides) in [
            ("strides_a", self.strides_a),
            ("strides_b", self.strides_b),
            ("strides_c", self.strides_c),
        ] {
            if strides.len() != g {
                return Err(AgruparError::InvalidShape {
                    reason: format!("{name} has length {}, expected G = {g}", strides.len()),
                });
            }
        }

        for (i, problem) in self.problem_sizes.iter().enumerate() {
            let lo = self.expert_offsets[i];
            let hi = self.expert_offsets[i + 1];
            if hi < lo {
                return Err(AgruparError::InvalidShape {
                    reason: format!(
                        "expert_offsets not monotone at group {i}: {lo} > {hi}"
                    ),
                });
            }
            let span = hi - lo;
            if span != problem.m {
                return Err(AgruparError::GroupRowMismatch {
                    group: i,
                    span,
                    m: problem.m,
                });
            }
        }

        let covered = self.expert_offsets[g] - self.expert_offsets[0];
        if covered != total_rows {
            return Err(AgruparError::PartitionMismatch {
                covered,
                rows: total_rows,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stacked_matrix_rejects_short_buffer() {
        let data = vec![F8E4M3::ZERO; 7];
        let err = StackedMatrix::new(&data, 2, 4).unwrap_err();
        assert!(matches!(err, AgruparError::InvalidShape { .. }));
    }

    #[test]
    fn test_expert_weights_shape() {
        let data = vec![F8E4M3::ZERO; 2 * 4 * 8];
        let w = ExpertWeights::new(&data, 2, 4, 8).unwrap();
        assert_eq!(w.groups(), 2);
        assert_eq!(w.k(), 4);
        assert_eq!(w.n(), 8);
    }

    #[test]
    fn test_output_buffer_dtype_branch() {
        let mut h = vec![f16::ZERO; 8];
        let out = OutputBuffer::f16(&mut h, 2, 4).unwrap();
        assert_eq!(out.dtype(), OutDType::F16);

        let mut b = vec![bf16::ZERO; 8];
        let out = OutputBuffer::bf16(&mut b, 2, 4).unwrap();
        assert_eq!(out.dtype(), OutDType::Bf16);
    }

    #[test]
    fn test_scale_tensor_rejects_empty_and_mismatch() {
        let err = ScaleTensor::new(&[], 0, 0).unwrap_err();
        assert!(matches!(err, AgruparError::EmptyInput { .. }));

        let data = [1.0f32, 2.0];
        let err = ScaleTensor::new(&data, 3, 1).unwrap_err();
        assert!(matches!(err, AgruparError::InvalidShape { .. }));
    }

    fn partition<'a>(
        problems: &'a [GroupProblem],
        offsets: &'a [usize],
        strides: &'a [usize],
    ) -> GroupPartition<'a> {
        GroupPartition {
            problem_sizes: problems,
            expert_offsets: offsets,
            strides_a: strides,
            strides_b: strides,
            strides_c: strides,
        }
    }

    #[test]
    fn test_partition_valid() {
        let problems = [GroupProblem::new(2, 8, 4), GroupProblem::new(3, 8, 4)];
        let offsets = [0usize, 2, 5];
        let strides = [8usize, 8];
        assert!(partition(&problems, &offsets, &strides).validate(5).is_ok());
    }

    #[test]
    fn test_partition_rejects_empty_groups() {
        let offsets = [0usize];
        let err = partition(&[], &offsets, &[]).validate(0).unwrap_err();
        assert_eq!(err, AgruparError::EmptyInput { arg: "problem_sizes" });
    }

    #[test]
    fn test_partition_rejects_row_mismatch() {
        let problems = [GroupProblem::new(2, 8, 4), GroupProblem::new(4, 8, 4)];
        let offsets = [0usize, 2, 5];
        let strides = [8usize, 8];
        let err = partition(&problems, &offsets, &strides)
            .validate(5)
            .unwrap_err();
        assert_eq!(err, AgruparError::GroupRowMismatch { group: 1, span: 3, m: 4 });
    }

    #[test]
    fn test_partition_rejects_total_mismatch() {
        let problems = [GroupProblem::new(2, 8, 4)];
        let offsets = [0usize, 2];
        let strides = [8usize];
        let err = partition(&problems, &offsets, &strides)
            .validate(4)
            .unwrap_err();
        assert_eq!(err, AgruparError::PartitionMismatch { covered: 2, rows: 4 });
    }

    #[test]
    fn test_partition_allows_degenerate_group() {
        // A group that received no tokens is legal: offsets repeat.
        let problems = [GroupProblem::new(0, 8, 4), GroupProblem::new(3, 8, 4)];
        let offsets = [0usize, 0, 3];
        let strides = [8usize, 8];
        assert!(partition(&problems, &offsets, &strides).validate(3).is_ok());
    }

    #[test]
    fn test_partition_rejects_non_monotone_offsets() {
        let problems = [GroupProblem::new(4, 8, 4), GroupProblem::new(2, 8, 4)];
        let offsets = [0usize, 4, 2];
        let strides = [8usize, 8];
        let err = partition(&problems, &offsets, &strides)
            .validate(4)
            .unwrap_err();
        assert!(matches!(err, AgruparError::InvalidShape { .. }));
    }
}
