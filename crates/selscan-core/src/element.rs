use std::fmt::Debug;

use num_traits::Float;

/// Scalar type carried by every scan tensor.
///
/// `f32` is the production element; `f64` is what the gradient checks run in.
/// Kernels only use `Float` methods, so no literal conversion can fail.
pub trait ScanFloat: Float + Send + Sync + Debug + 'static {
    /// Short name used in log lines.
    fn type_name() -> &'static str;
}

impl ScanFloat for f32 {
    fn type_name() -> &'static str {
        "f32"
    }
}

impl ScanFloat for f64 {
    fn type_name() -> &'static str {
        "f64"
    }
}
