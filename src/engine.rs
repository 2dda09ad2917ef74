//! Grouped matmul engine: execution contract and reference implementation
//!
//! The engine executes G independent matrix multiplications packed into
//! shared buffers. Group outputs are disjoint row bands of the output
//! buffer, so execution across groups is fully data-parallel with no
//! ordering guaranteed or required between them. Within a group, the
//! reduction order over K is serial and fixed, so repeated calls with
//! identical inputs produce bit-identical output.
//!
//! Shape/stride inconsistency at this level is a fatal abort (panic), not
//! a recoverable error: validation of per-group metadata happens once at
//! the dispatch boundary, and anything that slips past it here means the
//! caller broke the stride contract.

use rayon::prelude::*;

use crate::config::TileConfig;
use crate::epilogue::{OutputElement, ScaleEpilogue};
use crate::fp8::f8_to_f32_lut;
use crate::layout::{ExpertWeights, GroupPartition, StackedMatrix};

/// Execution contract for a grouped matmul engine
///
/// For every group `i` independently: multiply
/// `A[offset_i .. offset_i + M_i, 0..K] x B_i`, accumulating in f32 (wider
/// than the FP8 inputs), apply the scale epilogue per output element, and
/// write the converted result into group `i`'s row band of `out` using
/// `strides_c[i]` as the leading dimension.
///
/// The call is synchronous from the caller's perspective. Implementations
/// must not read `out`'s prior contents and must write every `[M_i, N]`
/// element of each band (full overwrite; no partial-write guarantee on
/// abort).
pub trait GroupedGemmEngine {
    /// Execute all groups under the given tile configuration
    ///
    /// # Panics
    ///
    /// Panics (fatal abort, by contract) if any group's declared shape is
    /// inconsistent with its stride set or the buffer extents.
    #[allow(clippy::too_many_arguments)]
    fn execute<T: OutputElement>(
        &self,
        config: &TileConfig,
        a: &StackedMatrix<'_>,
        b: &ExpertWeights<'_>,
        partition: &GroupPartition<'_>,
        epilogue: &ScaleEpilogue<'_>,
        out: &mut [T],
    );
}

/// Deterministic CPU engine
///
/// Parallelism follows the contract, not the accelerator: rayon splits the
/// output into per-group bands (disjoint `&mut` slices) and, unless the
/// configuration's small-group mode is set, rows within a band. The
/// configuration's tile N extent doubles as the column blocking factor so
/// each weight row is streamed through cache-sized chunks, the same
/// blocking scheme as the tiled quantized matvec kernels this engine is
/// modeled on.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReferenceGroupedGemm;

impl ReferenceGroupedGemm {
    /// Create the reference engine
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    #[allow(clippy::too_many_arguments)]
    fn compute_group<T: OutputElement>(
        config: &TileConfig,
        a: &StackedMatrix<'_>,
        b: &ExpertWeights<'_>,
        partition: &GroupPartition<'_>,
        epilogue: &ScaleEpilogue<'_>,
        group: usize,
        band: &mut [T],
    ) {
        let problem = partition.problem_sizes[group];
        let (m, n, k) = (problem.m, problem.n, problem.k);
        if m == 0 {
            return; // degenerate group: no rows routed to this expert
        }

        let stride_a = partition.strides_a[group];
        let stride_b = partition.strides_b[group];
        let stride_c = partition.strides_c[group];
        assert!(stride_a >= k, "group {group}: stride_a {stride_a} < k {k}");
        assert!(stride_b >= n, "group {group}: stride_b {stride_b} < n {n}");
        assert!(stride_c >= n, "group {group}: stride_c {stride_c} < n {n}");

        // Row index of this group's first activation row, relative to the
        // start of the stacked buffer. Doubles as the token base for
        // per-token scale lookups.
        let row_base = partition.expert_offsets[group] - partition.expert_offsets[0];

        let a_data = a.data();
        let b_data = b.data();
        let a_start = row_base * stride_a;
        let b_base = group * b.k() * stride_b;
        assert!(
            a_start + (m - 1) * stride_a + k <= a_data.len(),
            "group {group}: activation slice out of bounds"
        );
        if k > 0 {
            assert!(
                b_base + (k - 1) * stride_b + n <= b_data.len(),
                "group {group}: weight slice out of bounds"
            );
        }

        let tile_n = config.tile.n as usize;
        let compute_row = |row: usize, out_row: &mut [T]| {
            let token = row_base + row;
            let a_row = &a_data[a_start + row * stride_a..][..k];
            let scale_a = epilogue.scale_a(token);
            let lut = f8_to_f32_lut();

            let mut acc = vec![0.0f32; tile_n.min(n)];
            for tile_start in (0..n).step_by(tile_n) {
                let tile_len = tile_n.min(n - tile_start);
                let acc = &mut acc[..tile_len];
                acc.fill(0.0);

                for (kk, &aq) in a_row.iter().enumerate() {
                    let av = lut[usize::from(aq.to_bits())];
                    let b_tile = &b_data[b_base + kk * stride_b + tile_start..][..tile_len];
                    for (x, &bq) in b_tile.iter().enumerate() {
                        acc[x] += av * lut[usize::from(bq.to_bits())];
                    }
                }

                for (x, &sum) in acc.iter().enumerate() {
                    let channel = tile_start + x;
                    let scaled = sum * scale_a * epilogue.scale_b(channel);
                    out_row[channel] = T::from_accum(scaled);
                }
            }
        };

        if config.small_group_mode {
            // Tiny groups: row-level fan-out costs more than it buys.
            for (row, out_row) in band.chunks_mut(stride_c).enumerate() {
                compute_row(row, out_row);
            }
        } else {
            band.par_chunks_mut(stride_c)
                .enumerate()
                .for_each(|(row, out_row)| compute_row(row, out_row));
        }
    }
}

impl GroupedGemmEngine for ReferenceGroupedGemm {
    fn execute<T: OutputElement>(
        &self,
        config: &TileConfig,
        a: &StackedMatrix<'_>,
        b: &ExpertWeights<'_>,
        partition: &GroupPartition<'_>,
        epilogue: &ScaleEpilogue<'_>,
        out: &mut [T],
    ) {
        let g = partition.num_groups();
        assert_eq!(
            b.groups(),
            g,
            "expert weight stack holds {} matrices for {} groups",
            b.groups(),
            g
        );

        // Carve the output into disjoint per-group row bands up front so
        // groups can run without any synchronization between them.
        let mut bands: Vec<(usize, &mut [T])> = Vec::with_capacity(g);
        let mut rest = out;
        for i in 0..g {
            let len = partition.problem_sizes[i].m * partition.strides_c[i];
            assert!(
                len <= rest.len(),
                "output buffer too small for group {i}'s row band"
            );
            let (band, tail) = std::mem::take(&mut rest).split_at_mut(len);
            bands.push((i, band));
            rest = tail;
        }

        bands.into_par_iter().for_each(|(i, band)| {
            Self::compute_group(config, a, b, partition, epilogue, i, band);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT, SMALL_M};
    use crate::fp8::F8E4M3;
    use crate::layout::{GroupProblem, ScaleTensor};
    use half::f16;

    fn quantize(values: &[f32]) -> Vec<F8E4M3> {
        values.iter().map(|&v| F8E4M3::from_f32(v)).collect()
    }

    #[test]
    fn test_single_group_exact() {
        // 2x2 @ 2x2 with small integers: exact in FP8 and f16.
        let a_data = quantize(&[1.0, 2.0, 3.0, 4.0]);
        let b_data = quantize(&[5.0, 6.0, 7.0, 8.0]);
        let a = StackedMatrix::new(&a_data, 2, 2).unwrap();
        let b = ExpertWeights::new(&b_data, 1, 2, 2).unwrap();

        let problems = [GroupProblem::new(2, 2, 2)];
        let offsets = [0usize, 2];
        let strides = [2usize];
        let partition = GroupPartition {
            problem_sizes: &problems,
            expert_offsets: &offsets,
            strides_a: &strides,
            strides_b: &strides,
            strides_c: &strides,
        };
        let one = [1.0f32];
        let epilogue = ScaleEpilogue::new(
            ScaleTensor::scalar(&one),
            ScaleTensor::scalar(&one),
            false,
            false,
        );

        let mut out = vec![f16::ZERO; 4];
        ReferenceGroupedGemm::new().execute(&DEFAULT, &a, &b, &partition, &epilogue, &mut out);

        let got: Vec<f32> = out.iter().map(|v| v.to_f32()).collect();
        assert_eq!(got, vec![19.0, 22.0, 43.0, 50.0]);
    }

    #[test]
    fn test_degenerate_group_skipped() {
        // Group 0 has zero rows; group 1 gets everything.
        let a_data = quantize(&[1.0, 1.0]);
        let b_data = quantize(&[2.0, 3.0, 4.0, 5.0]); // two 1x2 experts
        let a = StackedMatrix::new(&a_data, 1, 2).unwrap();
        let b = ExpertWeights::new(&b_data, 2, 2, 1).unwrap();

        let problems = [GroupProblem::new(0, 1, 2), GroupProblem::new(1, 1, 2)];
        let offsets = [0usize, 0, 1];
        let strides_a = [2usize, 2];
        let strides_bc = [1usize, 1];
        let partition = GroupPartition {
            problem_sizes: &problems,
            expert_offsets: &offsets,
            strides_a: &strides_a,
            strides_b: &strides_bc,
            strides_c: &strides_bc,
        };
        let one = [1.0f32];
        let epilogue = ScaleEpilogue::new(
            ScaleTensor::scalar(&one),
            ScaleTensor::scalar(&one),
            false,
            false,
        );

        let mut out = vec![f16::ZERO; 1];
        ReferenceGroupedGemm::new().execute(&SMALL_M, &a, &b, &partition, &epilogue, &mut out);
        // Expert 1 is [[4.0], [5.0]]: 1*4 + 1*5 = 9
        assert_eq!(out[0].to_f32(), 9.0);
    }

    #[test]
    fn test_padded_output_stride_untouched() {
        // stride_c = 3 with n = 2: the padding column must keep its value.
        let a_data = quantize(&[1.0]);
        let b_data = quantize(&[2.0, 3.0]);
        let a = StackedMatrix::new(&a_data, 1, 1).unwrap();
        let b = ExpertWeights::new(&b_data, 1, 1, 2).unwrap();

        let problems = [GroupProblem::new(1, 2, 1)];
        let offsets = [0usize, 1];
        let partition = GroupPartition {
            problem_sizes: &problems,
            expert_offsets: &offsets,
            strides_a: &[1usize],
            strides_b: &[2usize],
            strides_c: &[3usize],
        };
        let one = [1.0f32];
        let epilogue = ScaleEpilogue::new(
            ScaleTensor::scalar(&one),
            ScaleTensor::scalar(&one),
            false,
            false,
        );

        let sentinel = f16::from_f32(-1.0);
        let mut out = vec![sentinel; 3];
        ReferenceGroupedGemm::new().execute(&SMALL_M, &a, &b, &partition, &epilogue, &mut out);
        assert_eq!(out[0].to_f32(), 2.0);
        assert_eq!(out[1].to_f32(), 3.0);
        assert_eq!(out[2], sentinel);
    }

    #[test]
    #[should_panic(expected = "stride_b")]
    fn test_inconsistent_stride_aborts() {
        let a_data = quantize(&[1.0, 1.0]);
        let b_data = quantize(&[1.0, 1.0, 1.0, 1.0]);
        let a = StackedMatrix::new(&a_data, 1, 2).unwrap();
        let b = ExpertWeights::new(&b_data, 1, 2, 2).unwrap();

        let problems = [GroupProblem::new(1, 2, 2)];
        let offsets = [0usize, 1];
        let partition = GroupPartition {
            problem_sizes: &problems,
            expert_offsets: &offsets,
            strides_a: &[2usize],
            strides_b: &[1usize], // stride_b < n: fatal
            strides_c: &[2usize],
        };
        let one = [1.0f32];
        let epilogue = ScaleEpilogue::new(
            ScaleTensor::scalar(&one),
            ScaleTensor::scalar(&one),
            false,
            false,
        );

        let mut out = vec![f16::ZERO; 2];
        ReferenceGroupedGemm::new().execute(&DEFAULT, &a, &b, &partition, &epilogue, &mut out);
    }
}
