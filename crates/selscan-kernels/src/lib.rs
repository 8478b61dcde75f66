//! # selscan-kernels
//!
//! CPU kernels for the selective state-space scan:
//!
//! ```text
//! x_t = exp(dt_t * A) * x_{t-1} + dt_t * B_t * u_t
//! y_t = C_t . x_t + D * u_t
//! ```
//!
//! - `discretize`: softplus / identity step discretization and derivatives
//! - `checkpoint`: write-once chunk-boundary state store
//! - `forward`: the scan, one worker per (batch, channel)
//! - `backward`: chunk-wise recompute plus reverse sweep for all gradients
//! - `step`: single-token state update for decoding
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use selscan_core::{ScanConfig, ScanDimensions, StridedView};
//! use selscan_kernels::{selective_scan, selective_scan_backward, ScanInputs};
//!
//! let dims = ScanDimensions::new(1, 2, 8, 4, 1);
//! let a = vec![-1.0f32; 2 * 4];
//! let bc = vec![0.5f32; 4 * 8];
//! let seq = vec![0.1f32; 2 * 8];
//! let inputs = ScanInputs {
//!     a: StridedView::contiguous(&a, &dims.a_dims()).unwrap(),
//!     b: StridedView::contiguous(&bc, &dims.bc_dims()).unwrap(),
//!     c: StridedView::contiguous(&bc, &dims.bc_dims()).unwrap(),
//!     d: None,
//!     u: StridedView::contiguous(&seq, &dims.seq_dims()).unwrap(),
//!     delta: StridedView::contiguous(&seq, &dims.seq_dims()).unwrap(),
//!     delta_bias: None,
//! };
//! let config = ScanConfig::default().with_softplus(true).with_chunk_size(4);
//! let out = selective_scan(&dims, &inputs, config.clone()).unwrap();
//!
//! let dy = vec![1.0f32; out.output.len()];
//! let dy = StridedView::contiguous(&dy, &dims.seq_dims()).unwrap();
//! let grads = selective_scan_backward(&dims, &inputs, &out.checkpoints, &dy, config).unwrap();
//! assert_eq!(grads.da.len(), 8);
//! ```

pub mod discretize;
pub mod checkpoint;
pub mod inputs;
pub mod engine;
pub mod forward;
pub mod backward;
pub mod step;

pub use discretize::{discretize, discretize_grad, sigmoid, softplus, Discretize, Identity, Softplus};
pub use checkpoint::CheckpointStore;
pub use inputs::{ScanGradViews, ScanGradients, ScanInputs, ScanOutput};
pub use engine::ScanEngine;
pub use forward::{forward_scan, replay_from_checkpoint, selective_scan};
pub use backward::{backward_scan, selective_scan_backward};
pub use step::{selective_state_update, StepInputs};

#[cfg(test)]
mod tests;
