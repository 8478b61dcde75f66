//! Tensor bundles handed to the scan entry points.

use selscan_core::{Result, ScanDimensions, ScanError, ScanFloat, StridedView, StridedViewMut};

use crate::checkpoint::CheckpointStore;

/// Forward inputs of a scan. `d` and `delta_bias` are optional by
/// configuration; their absence is not an error.
pub struct ScanInputs<'a, T> {
    /// Transition coefficients, `[channels, state_size]`.
    pub a: StridedView<'a, T>,
    /// Input projection, `[batch, num_groups, state_size, seq_len]`.
    pub b: StridedView<'a, T>,
    /// Output projection, `[batch, num_groups, state_size, seq_len]`.
    pub c: StridedView<'a, T>,
    /// Skip weight, `[channels]`.
    pub d: Option<StridedView<'a, T>>,
    /// Raw input, `[batch, channels, seq_len]`.
    pub u: StridedView<'a, T>,
    /// Raw step size, `[batch, channels, seq_len]`.
    pub delta: StridedView<'a, T>,
    /// Step bias, `[channels]`.
    pub delta_bias: Option<StridedView<'a, T>>,
}

impl<'a, T: ScanFloat> ScanInputs<'a, T> {
    pub fn validate(&self, dims: &ScanDimensions) -> Result<()> {
        self.a.expect_dims("A", &dims.a_dims())?;
        self.b.expect_dims("B", &dims.bc_dims())?;
        self.c.expect_dims("C", &dims.bc_dims())?;
        self.u.expect_dims("u", &dims.seq_dims())?;
        self.delta.expect_dims("delta", &dims.seq_dims())?;
        if let Some(d) = &self.d {
            d.expect_dims("D", &dims.channel_dims())?;
        }
        if let Some(bias) = &self.delta_bias {
            bias.expect_dims("delta_bias", &dims.channel_dims())?;
        }
        Ok(())
    }

    #[inline]
    pub(crate) fn bias(&self, channel: usize) -> T {
        self.delta_bias.as_ref().map_or_else(T::zero, |b| b.get1(channel))
    }
}

/// Gradient outputs of a backward pass, accumulated into (`+=`), so the
/// caller zero-initializes them for a fresh gradient.
pub struct ScanGradViews<'a, T> {
    pub da: StridedViewMut<'a, T>,
    pub db: StridedViewMut<'a, T>,
    pub dc: StridedViewMut<'a, T>,
    pub dd: Option<StridedViewMut<'a, T>>,
    pub du: StridedViewMut<'a, T>,
    pub ddelta: StridedViewMut<'a, T>,
    pub ddelta_bias: Option<StridedViewMut<'a, T>>,
}

impl<'a, T: ScanFloat> ScanGradViews<'a, T> {
    pub fn validate(&self, dims: &ScanDimensions, inputs: &ScanInputs<'_, T>) -> Result<()> {
        self.da.expect_dims("dA", &dims.a_dims())?;
        self.db.expect_dims("dB", &dims.bc_dims())?;
        self.dc.expect_dims("dC", &dims.bc_dims())?;
        self.du.expect_dims("du", &dims.seq_dims())?;
        self.ddelta.expect_dims("ddelta", &dims.seq_dims())?;
        match (&self.dd, &inputs.d) {
            (Some(dd), Some(_)) => dd.expect_dims("dD", &dims.channel_dims())?,
            (None, None) => {}
            _ => {
                return Err(ScanError::InvalidShape(
                    "dD must be requested exactly when D is supplied".into(),
                ))
            }
        }
        match (&self.ddelta_bias, &inputs.delta_bias) {
            (Some(db), Some(_)) => db.expect_dims("ddelta_bias", &dims.channel_dims())?,
            (None, None) => {}
            _ => {
                return Err(ScanError::InvalidShape(
                    "ddelta_bias must be requested exactly when delta_bias is supplied".into(),
                ))
            }
        }
        Ok(())
    }
}

/// Owned result of [`crate::selective_scan`].
#[derive(Clone, Debug)]
pub struct ScanOutput<T> {
    /// `y`, contiguous `[batch, channels, seq_len]`.
    pub output: Vec<T>,
    pub checkpoints: CheckpointStore<T>,
}

/// Owned, contiguous gradients of [`crate::selective_scan_backward`].
#[derive(Clone, Debug, PartialEq)]
pub struct ScanGradients<T> {
    pub da: Vec<T>,
    pub db: Vec<T>,
    pub dc: Vec<T>,
    pub dd: Option<Vec<T>>,
    pub du: Vec<T>,
    pub ddelta: Vec<T>,
    pub ddelta_bias: Option<Vec<T>>,
}

impl<T: ScanFloat> ScanGradients<T> {
    pub fn zeros(dims: &ScanDimensions, has_d: bool, has_bias: bool) -> Self {
        let zeros = |n: usize| vec![T::zero(); n];
        let bc = dims.bc_dims().iter().product();
        let seq = dims.seq_dims().iter().product();
        Self {
            da: zeros(dims.channels * dims.state_size),
            db: zeros(bc),
            dc: zeros(bc),
            dd: has_d.then(|| zeros(dims.channels)),
            du: zeros(seq),
            ddelta: zeros(seq),
            ddelta_bias: has_bias.then(|| zeros(dims.channels)),
        }
    }

    /// Contiguous writable views over every buffer.
    pub fn views_mut(&mut self, dims: &ScanDimensions) -> Result<ScanGradViews<'_, T>> {
        let channel = dims.channel_dims();
        Ok(ScanGradViews {
            da: StridedViewMut::contiguous(&mut self.da, &dims.a_dims())?,
            db: StridedViewMut::contiguous(&mut self.db, &dims.bc_dims())?,
            dc: StridedViewMut::contiguous(&mut self.dc, &dims.bc_dims())?,
            dd: self
                .dd
                .as_mut()
                .map(|v| StridedViewMut::contiguous(v, &channel))
                .transpose()?,
            du: StridedViewMut::contiguous(&mut self.du, &dims.seq_dims())?,
            ddelta: StridedViewMut::contiguous(&mut self.ddelta, &dims.seq_dims())?,
            ddelta_bias: self
                .ddelta_bias
                .as_mut()
                .map(|v| StridedViewMut::contiguous(v, &channel))
                .transpose()?,
        })
    }
}
