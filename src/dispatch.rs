//! Dispatch boundary for grouped FP8 matmuls
//!
//! One logical operation per call: validate the packed metadata, resolve
//! the output format, pick a tile configuration from the aggregate shape,
//! and hand everything to the engine. The output buffer is fully
//! overwritten on success; on a validation error nothing has been
//! submitted and `out` is untouched. There is no partial-write guarantee
//! on an engine abort and no retry semantics anywhere.

use std::time::Instant;

use crate::config::select_config;
use crate::engine::{GroupedGemmEngine, ReferenceGroupedGemm};
use crate::epilogue::ScaleEpilogue;
use crate::error::{AgruparError, Result};
use crate::layout::{
    ExpertWeights, GroupPartition, GroupProblem, OutputBuffer, OutputStorage, ScaleTensor,
    StackedMatrix,
};
use crate::metrics::DispatchMetrics;

/// Execute a batch of grouped, quantized matrix multiplications
///
/// For every group `i`: `out[offsets[i]..offsets[i+1], :] =
/// convert(A[offsets[i]..offsets[i+1], :] x B_i * scale_a * scale_b)`,
/// accumulated in f32 and converted to `out`'s element format (f16 or
/// bf16, fixed for the whole call by the buffer variant).
///
/// Uses the in-tree reference engine; [`dispatch_with_engine`] accepts any
/// [`GroupedGemmEngine`].
///
/// # Arguments
///
/// * `out` - Stacked output `[M, N]`, overwritten in place
/// * `a` - Stacked FP8 activations `[M, K]`
/// * `b` - Stacked FP8 expert weights `[G, K, N]`
/// * `scale_a` - Activation dequant scales, `(M,1)` or `(1,1)`
/// * `scale_b` - Output-channel dequant scales, `(1,N)` or `(1,1)`
/// * `expert_offsets` - G+1 row offsets partitioning the stacked rows
/// * `problem_sizes` - `(M_i, N, K)` per group
/// * `strides_a` / `strides_b` / `strides_c` - Per-group leading dimensions
/// * `per_act_token` / `per_out_ch` - Scale broadcast flags
///
/// # Errors
///
/// Returns a structured error before any engine work if a buffer or
/// metadata sequence is empty, a declared shape disagrees with another, or
/// the expert offsets do not partition the stacked rows. Per-group stride
/// consistency beyond these checks is a caller contract; violations abort
/// inside the engine.
#[allow(clippy::too_many_arguments)]
pub fn dispatch_grouped_quantized_matmul(
    out: &mut OutputBuffer<'_>,
    a: &StackedMatrix<'_>,
    b: &ExpertWeights<'_>,
    scale_a: &ScaleTensor<'_>,
    scale_b: &ScaleTensor<'_>,
    expert_offsets: &[usize],
    problem_sizes: &[GroupProblem],
    strides_a: &[usize],
    strides_b: &[usize],
    strides_c: &[usize],
    per_act_token: bool,
    per_out_ch: bool,
) -> Result<()> {
    dispatch_with_engine(
        &ReferenceGroupedGemm::new(),
        out,
        a,
        b,
        scale_a,
        scale_b,
        expert_offsets,
        problem_sizes,
        strides_a,
        strides_b,
        strides_c,
        per_act_token,
        per_out_ch,
    )
}

/// [`dispatch_grouped_quantized_matmul`] with a caller-selected engine
///
/// # Errors
///
/// Same validation behavior as [`dispatch_grouped_quantized_matmul`].
#[allow(clippy::too_many_arguments)]
pub fn dispatch_with_engine<E: GroupedGemmEngine>(
    engine: &E,
    out: &mut OutputBuffer<'_>,
    a: &StackedMatrix<'_>,
    b: &ExpertWeights<'_>,
    scale_a: &ScaleTensor<'_>,
    scale_b: &ScaleTensor<'_>,
    expert_offsets: &[usize],
    problem_sizes: &[GroupProblem],
    strides_a: &[usize],
    strides_b: &[usize],
    strides_c: &[usize],
    per_act_token: bool,
    per_out_ch: bool,
) -> Result<()> {
    let partition = GroupPartition {
        problem_sizes,
        expert_offsets,
        strides_a,
        strides_b,
        strides_c,
    };
    validate(out, a, b, &partition)?;

    let m_total = a.rows();
    let n = out.cols();
    let config = select_config(m_total, n);
    let epilogue = ScaleEpilogue::new(*scale_a, *scale_b, per_act_token, per_out_ch);

    match out.storage_mut() {
        OutputStorage::F16(buf) => {
            engine.execute(config, a, b, &partition, &epilogue, &mut buf[..]);
        }
        OutputStorage::Bf16(buf) => {
            engine.execute(config, a, b, &partition, &epilogue, &mut buf[..]);
        }
    }
    Ok(())
}

/// Precondition checks, all O(G) or O(1), run before any engine work
fn validate(
    out: &OutputBuffer<'_>,
    a: &StackedMatrix<'_>,
    b: &ExpertWeights<'_>,
    partition: &GroupPartition<'_>,
) -> Result<()> {
    if a.is_empty() {
        return Err(AgruparError::EmptyInput { arg: "a" });
    }
    if b.data().is_empty() || b.groups() == 0 {
        return Err(AgruparError::EmptyInput { arg: "b" });
    }
    if out.is_empty() {
        return Err(AgruparError::EmptyInput { arg: "out" });
    }

    partition.validate(a.rows())?;

    let g = partition.num_groups();
    if b.groups() != g {
        return Err(AgruparError::InvalidShape {
            reason: format!("expert weights hold {} matrices for {g} groups", b.groups()),
        });
    }
    if out.rows() != a.rows() {
        return Err(AgruparError::InvalidShape {
            reason: format!(
                "output has {} rows, stacked activations have {}",
                out.rows(),
                a.rows()
            ),
        });
    }
    for (i, problem) in partition.problem_sizes.iter().enumerate() {
        if problem.k != a.cols() || problem.k != b.k() {
            return Err(AgruparError::InvalidShape {
                reason: format!(
                    "group {i} declares k={}, activations have k={}, weights k={}",
                    problem.k,
                    a.cols(),
                    b.k()
                ),
            });
        }
        if problem.n != out.cols() || problem.n != b.n() {
            return Err(AgruparError::InvalidShape {
                reason: format!(
                    "group {i} declares n={}, output has n={}, weights n={}",
                    problem.n,
                    out.cols(),
                    b.n()
                ),
            });
        }
    }
    Ok(())
}

/// Dispatcher with a held engine and production metrics
///
/// Thin stateful wrapper over [`dispatch_with_engine`] for serving loops
/// that want per-configuration selection counts and engine latency without
/// threading a collector through every call site.
#[derive(Debug, Default)]
pub struct Dispatcher<E = ReferenceGroupedGemm> {
    engine: E,
    metrics: DispatchMetrics,
}

impl Dispatcher<ReferenceGroupedGemm> {
    /// Dispatcher over the reference engine
    #[must_use]
    pub fn new() -> Self {
        Self::with_engine(ReferenceGroupedGemm::new())
    }
}

impl<E: GroupedGemmEngine> Dispatcher<E> {
    /// Dispatcher over a caller-selected engine
    #[must_use]
    pub fn with_engine(engine: E) -> Self {
        Self {
            engine,
            metrics: DispatchMetrics::new(),
        }
    }

    /// Metrics collector (cloneable, shared counters)
    #[must_use]
    pub fn metrics(&self) -> &DispatchMetrics {
        &self.metrics
    }

    /// Dispatch one grouped matmul, recording metrics
    ///
    /// # Errors
    ///
    /// Same validation behavior as [`dispatch_grouped_quantized_matmul`];
    /// rejected calls are counted separately from completed ones.
    #[allow(clippy::too_many_arguments)]
    pub fn dispatch(
        &self,
        out: &mut OutputBuffer<'_>,
        a: &StackedMatrix<'_>,
        b: &ExpertWeights<'_>,
        scale_a: &ScaleTensor<'_>,
        scale_b: &ScaleTensor<'_>,
        expert_offsets: &[usize],
        problem_sizes: &[GroupProblem],
        strides_a: &[usize],
        strides_b: &[usize],
        strides_c: &[usize],
        per_act_token: bool,
        per_out_ch: bool,
    ) -> Result<()> {
        let start = Instant::now();
        let result = dispatch_with_engine(
            &self.engine,
            out,
            a,
            b,
            scale_a,
            scale_b,
            expert_offsets,
            problem_sizes,
            strides_a,
            strides_b,
            strides_c,
            per_act_token,
            per_out_ch,
        );
        match &result {
            Ok(()) => {
                let config = select_config(a.rows(), out.cols());
                self.metrics.record_completed(config, start.elapsed());
            }
            Err(_) => self.metrics.record_rejected(),
        }
        result
    }
}
