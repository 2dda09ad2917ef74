//! # Agrupar
//!
//! Grouped FP8 matmul dispatch for mixture-of-experts inference.
//!
//! Agrupar (Spanish: "to group, to batch") executes a batch of G
//! independent, variable-shaped matrix multiplications — one per expert —
//! packed into shared buffers: stacked FP8 activations `[M, K]`, stacked
//! FP8 expert weights `[G, K, N]`, and a stacked f16/bf16 output `[M, N]`.
//! Each group's f32 accumulation is corrected by per-group dequantization
//! scales before conversion to the output format.
//!
//! ## Design
//!
//! - **Shape-regime selection**: a pure predicate maps the aggregate
//!   problem shape to one of three fixed tile configurations (latency,
//!   throughput, balanced). See [`config::select_config`].
//! - **Engine contract**: [`engine::GroupedGemmEngine`] is a narrow trait;
//!   accelerator internals stay behind it. The in-tree
//!   [`engine::ReferenceGroupedGemm`] is a deterministic rayon CPU engine.
//! - **Caller-owned buffers**: the crate borrows, never allocates or frees
//!   caller data; the only side effect is the full overwrite of `out`.
//!
//! ## Example
//!
//! ```rust
//! use agrupar::{
//!     dispatch_grouped_quantized_matmul, ExpertWeights, F8E4M3, GroupProblem,
//!     OutputBuffer, ScaleTensor, StackedMatrix,
//! };
//! use half::f16;
//!
//! // One expert, two activation rows, K = N = 2.
//! let a_data: Vec<F8E4M3> = [1.0f32, 2.0, 3.0, 4.0]
//!     .iter()
//!     .map(|&v| F8E4M3::from_f32(v))
//!     .collect();
//! let b_data: Vec<F8E4M3> = [1.0f32, 0.0, 0.0, 1.0]
//!     .iter()
//!     .map(|&v| F8E4M3::from_f32(v))
//!     .collect();
//! let a = StackedMatrix::new(&a_data, 2, 2)?;
//! let b = ExpertWeights::new(&b_data, 1, 2, 2)?;
//!
//! let one = [1.0f32];
//! let scale_a = ScaleTensor::scalar(&one);
//! let scale_b = ScaleTensor::scalar(&one);
//!
//! let mut buf = vec![f16::ZERO; 4];
//! let mut out = OutputBuffer::f16(&mut buf, 2, 2)?;
//!
//! dispatch_grouped_quantized_matmul(
//!     &mut out, &a, &b, &scale_a, &scale_b,
//!     &[0, 2],                         // expert offsets
//!     &[GroupProblem::new(2, 2, 2)],   // problem sizes
//!     &[2], &[2], &[2],                // strides for A, B, C
//!     false, false,                    // scalar scales
//! )?;
//!
//! assert_eq!(buf[0].to_f32(), 1.0);
//! assert_eq!(buf[3].to_f32(), 4.0);
//! # Ok::<(), agrupar::AgruparError>(())
//! ```

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
// Clippy allows (MUST come after deny/warn to override them)
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss)] // usize -> f32 in exponent/metric math is fine
#![allow(clippy::must_use_candidate)] // Not all methods need #[must_use]
#![allow(clippy::doc_markdown)] // Allow technical terms without backticks
#![allow(clippy::float_cmp)] // Exact float comparisons in tests are deliberate

pub mod config;
pub mod dispatch;
pub mod engine;
pub mod epilogue;
pub mod error;
pub mod fp8;
pub mod layout;
pub mod metrics;

pub use config::{select_config, TileConfig};
pub use dispatch::{dispatch_grouped_quantized_matmul, dispatch_with_engine, Dispatcher};
pub use engine::{GroupedGemmEngine, ReferenceGroupedGemm};
pub use epilogue::{OutputElement, ScaleEpilogue};
pub use error::{AgruparError, Result};
pub use fp8::F8E4M3;
pub use layout::{
    ExpertWeights, GroupPartition, GroupProblem, OutDType, OutputBuffer, ScaleTensor,
    StackedMatrix,
};
pub use metrics::{DispatchMetrics, DispatchMetricsSnapshot};
