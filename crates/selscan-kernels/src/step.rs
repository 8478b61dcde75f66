//! Single-timestep state update for autoregressive decoding.
//!
//! Same recurrence and discretization as the scan, applied to a caller-held
//! `[batch, channels, state_size]` state one token at a time.

use selscan_core::{Result, ScanDimensions, ScanFloat, StridedView, StridedViewMut};

use crate::discretize::{carry, saturating_exp, Discretize};

/// Inputs of one decode step. `dims.seq_len` is ignored.
pub struct StepInputs<'a, T> {
    /// `[channels, state_size]`
    pub a: StridedView<'a, T>,
    /// `[batch, num_groups, state_size]`
    pub b: StridedView<'a, T>,
    /// `[batch, num_groups, state_size]`
    pub c: StridedView<'a, T>,
    /// `[channels]`
    pub d: Option<StridedView<'a, T>>,
    /// `[batch, channels]`
    pub u: StridedView<'a, T>,
    /// `[batch, channels]`
    pub delta: StridedView<'a, T>,
    /// `[channels]`
    pub delta_bias: Option<StridedView<'a, T>>,
}

impl<T: ScanFloat> StepInputs<'_, T> {
    pub fn validate(&self, dims: &ScanDimensions) -> Result<()> {
        let bc = [dims.batch, dims.num_groups, dims.state_size];
        let bd = [dims.batch, dims.channels];
        self.a.expect_dims("A", &dims.a_dims())?;
        self.b.expect_dims("B", &bc)?;
        self.c.expect_dims("C", &bc)?;
        self.u.expect_dims("u", &bd)?;
        self.delta.expect_dims("delta", &bd)?;
        if let Some(d) = &self.d {
            d.expect_dims("D", &dims.channel_dims())?;
        }
        if let Some(bias) = &self.delta_bias {
            bias.expect_dims("delta_bias", &dims.channel_dims())?;
        }
        Ok(())
    }
}

fn update<T: ScanFloat, D: Discretize>(
    dims: &ScanDimensions,
    inputs: &StepInputs<'_, T>,
    state: &mut StridedViewMut<'_, T>,
    y: &mut StridedViewMut<'_, T>,
) {
    for batch in 0..dims.batch {
        for channel in 0..dims.channels {
            let group = dims.group_of(channel);
            let bias = inputs.delta_bias.as_ref().map_or_else(T::zero, |b| b.get1(channel));
            let dt = D::apply(inputs.delta.get2(batch, channel) + bias);
            let u = inputs.u.get2(batch, channel);
            let dt_u = dt * u;
            let mut out = T::zero();
            for n in 0..dims.state_size {
                let decay = saturating_exp(dt * inputs.a.get2(channel, n));
                let x = carry(decay, state.get(&[batch, channel, n]))
                    + dt_u * inputs.b.get3(batch, group, n);
                state.set(&[batch, channel, n], x);
                out = out + inputs.c.get3(batch, group, n) * x;
            }
            if let Some(d) = &inputs.d {
                out = out + d.get1(channel) * u;
            }
            y.set(&[batch, channel], out);
        }
    }
}

/// Advance `state` by one timestep and write that step's output into `y`
/// (`[batch, channels]`).
pub fn selective_state_update<T: ScanFloat>(
    dims: &ScanDimensions,
    inputs: &StepInputs<'_, T>,
    state: &mut StridedViewMut<'_, T>,
    y: &mut StridedViewMut<'_, T>,
    delta_softplus: bool,
) -> Result<()> {
    dims.validate()?;
    inputs.validate(dims)?;
    state.expect_dims("state", &dims.state_dims())?;
    y.expect_dims("y", &[dims.batch, dims.channels])?;
    crate::discretize_switch!(delta_softplus, Disc, update::<T, Disc>(dims, inputs, state, y));
    Ok(())
}
