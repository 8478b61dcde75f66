//! # selscan-core
//!
//! Shared vocabulary for the selective scan kernels.
//!
//! Provides:
//! - `ScanFloat`, the element trait every tensor view carries
//! - `Shape` and `ScanDimensions` for extent bookkeeping
//! - `StridedView` / `StridedViewMut`, borrowed windows over caller-owned buffers
//! - `ScanConfig`, passed by value into every entry point
//! - `ScanError` and the crate-wide `Result`

pub mod element;
pub mod error;
pub mod shape;
pub mod dims;
pub mod view;
pub mod config;

pub use element::ScanFloat;
pub use error::ScanError;
pub use shape::Shape;
pub use dims::ScanDimensions;
pub use view::{StridedView, StridedViewMut};
pub use config::{ScanConfig, DEFAULT_CHUNK_SIZE};

pub type Result<T> = std::result::Result<T, ScanError>;
