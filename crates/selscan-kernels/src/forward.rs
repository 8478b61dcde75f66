//! Forward selective scan.
//!
//! Per (batch, channel), starting from `x = 0`:
//!
//! ```text
//! dt    = discretize(delta[t] + bias)
//! x[n]  = exp(dt * A[n]) * x[n] + dt * u[t] * B[t, n]
//! y[t]  = sum_n C[t, n] * x[n] + D * u[t]
//! ```
//!
//! The decay saturates at the largest finite value and a zero state is never
//! scaled, so a large positive `dt * A` clamps instead of producing `NaN`.
//!
//! The state after the last step of every chunk goes to the checkpoint store.
//! Each (batch, channel) scan is an independent unit of work.

use selscan_core::{
    Result, ScanConfig, ScanDimensions, ScanError, ScanFloat, StridedViewMut,
};
use tracing::debug;

use crate::checkpoint::{CheckpointStore, UnitCheckpoints};
use crate::discretize::{carry, saturating_exp, Discretize};
use crate::engine::ScanEngine;
use crate::inputs::{ScanInputs, ScanOutput};

/// Advance `state` through timestep `t` of scan `(batch, channel)`.
///
/// Returns `(y_t, dt)`. The state axis is always reduced in ascending order;
/// backward recomputes through this same function, so replayed states are
/// bit-identical to the forward ones.
#[inline]
pub(crate) fn step<T: ScanFloat, D: Discretize>(
    inputs: &ScanInputs<'_, T>,
    batch: usize,
    channel: usize,
    group: usize,
    t: usize,
    state: &mut [T],
) -> (T, T) {
    let dt = D::apply(inputs.delta.get3(batch, channel, t) + inputs.bias(channel));
    let u = inputs.u.get3(batch, channel, t);
    let dt_u = dt * u;
    let mut y = T::zero();
    for (n, x) in state.iter_mut().enumerate() {
        let decay = saturating_exp(dt * inputs.a.get2(channel, n));
        *x = carry(decay, *x) + dt_u * inputs.b.get4(batch, group, n, t);
        y = y + inputs.c.get4(batch, group, n, t) * *x;
    }
    if let Some(d) = &inputs.d {
        y = y + d.get1(channel) * u;
    }
    (y, dt)
}

fn forward_unit<T: ScanFloat, D: Discretize>(
    dims: &ScanDimensions,
    inputs: &ScanInputs<'_, T>,
    batch: usize,
    channel: usize,
    slots: &mut UnitCheckpoints<'_, T>,
) -> Result<Vec<T>> {
    let group = dims.group_of(channel);
    let mut state = vec![T::zero(); dims.state_size];
    let mut row = Vec::with_capacity(dims.seq_len);
    if dims.seq_len == 0 {
        slots.snapshot_initial()?;
        return Ok(row);
    }
    for t in 0..dims.seq_len {
        let (y, _) = step::<T, D>(inputs, batch, channel, group, t, &mut state);
        row.push(y);
        if slots.closes_chunk(t) {
            slots.snapshot(t, &state)?;
        }
    }
    Ok(row)
}

impl ScanEngine {
    /// Run the forward scan, writing `y` and returning the checkpoints the
    /// backward pass needs.
    ///
    /// All shapes are checked before any element of `y` is written.
    pub fn forward<T: ScanFloat>(
        &self,
        dims: &ScanDimensions,
        inputs: &ScanInputs<'_, T>,
        y: &mut StridedViewMut<'_, T>,
    ) -> Result<CheckpointStore<T>> {
        dims.validate()?;
        inputs.validate(dims)?;
        y.expect_dims("y", &dims.seq_dims())?;

        let chunk_size = self.config().chunk_size;
        let mut store =
            CheckpointStore::new(dims, chunk_size)?.with_softplus(self.config().delta_softplus);
        debug!(
            "selective scan forward: {:?}, dtype={}, chunk_size={}, chunks={}, softplus={}",
            dims,
            T::type_name(),
            chunk_size,
            store.num_chunks(),
            self.config().delta_softplus
        );
        self.warn_if_oversubscribed(dims.num_units());

        let channels = dims.channels;
        let rows = crate::discretize_switch!(self.config().delta_softplus, Disc, {
            self.map_units(store.unit_writers(), |unit, mut slots| {
                forward_unit::<T, Disc>(dims, inputs, unit / channels, unit % channels, &mut slots)
            })
        });

        // Fail before touching y if any unit failed.
        let rows = rows.into_iter().collect::<Result<Vec<_>>>()?;
        for (unit, row) in rows.into_iter().enumerate() {
            let (batch, channel) = (unit / channels, unit % channels);
            for (t, value) in row.into_iter().enumerate() {
                y.set3(batch, channel, t, value);
            }
        }
        Ok(store)
    }
}

/// One-shot forward scan on a pool built from `config`.
pub fn forward_scan<T: ScanFloat>(
    dims: &ScanDimensions,
    inputs: &ScanInputs<'_, T>,
    y: &mut StridedViewMut<'_, T>,
    config: ScanConfig,
) -> Result<CheckpointStore<T>> {
    dims.validate()?;
    ScanEngine::new(config)?.forward(dims, inputs, y)
}

/// Forward scan into a freshly allocated contiguous `y`.
pub fn selective_scan<T: ScanFloat>(
    dims: &ScanDimensions,
    inputs: &ScanInputs<'_, T>,
    config: ScanConfig,
) -> Result<ScanOutput<T>> {
    dims.validate()?;
    inputs.validate(dims)?;
    let mut output = vec![T::zero(); dims.seq_dims().iter().product()];
    let checkpoints = {
        let mut y = StridedViewMut::contiguous(&mut output, &dims.seq_dims())?;
        forward_scan(dims, inputs, &mut y, config)?
    };
    Ok(ScanOutput { output, checkpoints })
}

/// Re-run scan `(batch, channel)` from the state entering `chunk` and return
/// the outputs for timesteps `chunk * chunk_size ..`.
///
/// Matches the tail of the full forward output exactly.
pub fn replay_from_checkpoint<T: ScanFloat>(
    dims: &ScanDimensions,
    inputs: &ScanInputs<'_, T>,
    store: &CheckpointStore<T>,
    batch: usize,
    channel: usize,
    chunk: usize,
    delta_softplus: bool,
) -> Result<Vec<T>> {
    dims.validate()?;
    inputs.validate(dims)?;
    store.validate_for(dims)?;
    store.check_mode(delta_softplus)?;
    if chunk >= store.num_chunks() {
        return Err(ScanError::InvalidShape(format!(
            "chunk {chunk} out of range ({} chunks)",
            store.num_chunks()
        )));
    }
    let mut state = vec![T::zero(); dims.state_size];
    store.chunk_start_state(batch, channel, chunk, &mut state)?;
    let group = dims.group_of(channel);
    let start = store.chunk_bounds(chunk).start;
    let tail: Vec<T> = crate::discretize_switch!(delta_softplus, Disc, {
        (start..dims.seq_len)
            .map(|t| step::<T, Disc>(inputs, batch, channel, group, t, &mut state).0)
            .collect()
    });
    Ok(tail)
}
