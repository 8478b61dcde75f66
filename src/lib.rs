//! # selscan
//!
//! Selective state-space scan with chunked checkpointing and exact
//! reverse-mode gradients.
//!
//! - [`core`]: element trait, shapes, strided views, configuration, errors
//! - [`kernels`]: forward scan, backward pass, checkpoint store, decode step

pub use selscan_core as core;
pub use selscan_kernels as kernels;

pub use selscan_core::{
    Result, ScanConfig, ScanDimensions, ScanError, ScanFloat, StridedView, StridedViewMut,
};
pub use selscan_kernels::{
    backward_scan, forward_scan, replay_from_checkpoint, selective_scan, selective_scan_backward,
    selective_state_update, CheckpointStore, ScanEngine, ScanGradViews, ScanGradients,
    ScanInputs, ScanOutput, StepInputs,
};
