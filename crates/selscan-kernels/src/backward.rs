//! Backward selective scan.
//!
//! Walks each (batch, channel) scan from the last chunk to the first. For a
//! chunk, the entering state comes from the checkpoint store and the
//! forward recurrence is replayed through the chunk to regenerate `x_t` and
//! `dt`; then the chunk is swept in reverse with the running state gradient
//! `g = dL/dx_t`, which carries across chunk boundaries.
//!
//! Differentiating `x_t = exp(dt * A) * x_{t-1} + dt * B_t * u_t` with
//! `g' = g + dy_t * C_t`:
//!
//! ```text
//! dA      += g' * exp(dt * A) * x_{t-1} * dt
//! d dt    += g' * (exp(dt * A) * x_{t-1} * A + B_t * u_t)
//! dB_t    += g' * dt * u_t
//! du_t    += g' * dt * B_t
//! g        = g' * exp(dt * A)
//! ```
//!
//! `d dt` is chained through the discretization derivative to reach the raw
//! step and its bias.
//!
//! The parallel unit is (batch, group): one worker owns the `dB`/`dC` slices
//! shared by the group's channels, so the group reduction needs no atomics.
//! Per-channel partials are summed over batch in unit order afterwards, which
//! keeps the result deterministic. Until that scatter, the staged partials
//! hold one extra copy of `dB`, `dC`, `du` and `ddelta`.

use selscan_core::{Result, ScanConfig, ScanDimensions, ScanFloat, StridedView};
use tracing::{debug, trace};

use crate::checkpoint::CheckpointStore;
use crate::discretize::{carry, saturating_exp, Discretize};
use crate::engine::ScanEngine;
use crate::forward::step;
use crate::inputs::{ScanGradViews, ScanGradients, ScanInputs};

/// Gradients of one channel of one batch row.
struct ChannelGrads<T> {
    du: Vec<T>,
    ddelta: Vec<T>,
    da: Vec<T>,
    dd: T,
    dbias: T,
}

/// Gradients of one (batch, group) unit. `db`/`dc` are `[state_size, seq_len]`.
struct GroupGrads<T> {
    db: Vec<T>,
    dc: Vec<T>,
    channels: Vec<ChannelGrads<T>>,
}

struct UnitCtx<'s, 'i, T> {
    dims: &'s ScanDimensions,
    inputs: &'s ScanInputs<'i, T>,
    store: &'s CheckpointStore<T>,
    dy: &'s StridedView<'i, T>,
}

fn backward_channel<T: ScanFloat, D: Discretize>(
    ctx: &UnitCtx<'_, '_, T>,
    batch: usize,
    channel: usize,
    db: &mut [T],
    dc: &mut [T],
) -> Result<ChannelGrads<T>> {
    let (dims, inputs, store, dy) = (ctx.dims, ctx.inputs, ctx.store, ctx.dy);
    let n_state = dims.state_size;
    let seq_len = dims.seq_len;
    let group = dims.group_of(channel);
    let chunk_size = store.chunk_size().min(seq_len.max(1));

    let mut grads = ChannelGrads {
        du: vec![T::zero(); seq_len],
        ddelta: vec![T::zero(); seq_len],
        da: vec![T::zero(); n_state],
        dd: T::zero(),
        dbias: T::zero(),
    };
    let bias = inputs.bias(channel);
    let d_skip = inputs.d.as_ref().map(|d| d.get1(channel));

    // Row i holds the state before the i-th step of the chunk; row i + 1 after it.
    let mut states = vec![T::zero(); (chunk_size + 1) * n_state];
    let mut steps = vec![T::zero(); chunk_size];
    let mut g = vec![T::zero(); n_state];

    for chunk in (0..store.num_chunks()).rev() {
        let range = store.chunk_bounds(chunk);
        if range.is_empty() {
            continue;
        }
        store.chunk_start_state(batch, channel, chunk, &mut states[..n_state])?;
        for (i, t) in range.clone().enumerate() {
            let (prev, next) = states.split_at_mut((i + 1) * n_state);
            let next = &mut next[..n_state];
            next.copy_from_slice(&prev[i * n_state..]);
            steps[i] = step::<T, D>(inputs, batch, channel, group, t, next).1;
        }
        trace!(
            "backward (batch {}, channel {}): replayed chunk {} = {:?}",
            batch,
            channel,
            chunk,
            range
        );

        for (i, t) in range.enumerate().rev() {
            let dt = steps[i];
            let u = inputs.u.get3(batch, channel, t);
            let dy_t = dy.get3(batch, channel, t);
            let prev = &states[i * n_state..(i + 1) * n_state];
            let cur = &states[(i + 1) * n_state..(i + 2) * n_state];

            let mut d_dt = T::zero();
            let mut du = T::zero();
            if let Some(d) = d_skip {
                grads.dd = grads.dd + dy_t * u;
                du = du + dy_t * d;
            }
            for n in 0..n_state {
                let a = inputs.a.get2(channel, n);
                let b = inputs.b.get4(batch, group, n, t);
                let c = inputs.c.get4(batch, group, n, t);
                let slot = n * seq_len + t;

                dc[slot] = dc[slot] + dy_t * cur[n];
                let g_n = g[n] + dy_t * c;
                let decay = saturating_exp(dt * a);
                let carried = carry(decay, prev[n]);

                grads.da[n] = grads.da[n] + g_n * carried * dt;
                d_dt = d_dt + g_n * (carried * a + b * u);
                db[slot] = db[slot] + g_n * dt * u;
                du = du + g_n * dt * b;
                g[n] = g_n * decay;
            }

            let d_raw = d_dt * D::grad(inputs.delta.get3(batch, channel, t) + bias);
            grads.ddelta[t] = d_raw;
            grads.dbias = grads.dbias + d_raw;
            grads.du[t] = du;
        }
    }
    Ok(grads)
}

fn backward_group<T: ScanFloat, D: Discretize>(
    ctx: &UnitCtx<'_, '_, T>,
    batch: usize,
    group: usize,
) -> Result<GroupGrads<T>> {
    let dims = ctx.dims;
    let per_group = dims.channels_per_group();
    let mut db = vec![T::zero(); dims.state_size * dims.seq_len];
    let mut dc = vec![T::zero(); dims.state_size * dims.seq_len];
    let channels = (group * per_group..(group + 1) * per_group)
        .map(|channel| backward_channel::<T, D>(ctx, batch, channel, &mut db, &mut dc))
        .collect::<Result<Vec<_>>>()?;
    Ok(GroupGrads { db, dc, channels })
}

impl ScanEngine {
    /// Accumulate the gradients of every scan input into `grads`.
    ///
    /// `store` must come from the forward pass over the same `dims` and under
    /// the same discretization mode; its chunk size is authoritative. Shapes, optional-tensor presence and the
    /// checkpoint geometry are checked before anything is accumulated.
    pub fn backward<T: ScanFloat>(
        &self,
        dims: &ScanDimensions,
        inputs: &ScanInputs<'_, T>,
        store: &CheckpointStore<T>,
        dy: &StridedView<'_, T>,
        grads: &mut ScanGradViews<'_, T>,
    ) -> Result<()> {
        dims.validate()?;
        inputs.validate(dims)?;
        dy.expect_dims("dy", &dims.seq_dims())?;
        grads.validate(dims, inputs)?;
        store.validate_for(dims)?;
        store.check_mode(self.config().delta_softplus)?;

        debug!(
            "selective scan backward: {:?}, dtype={}, chunk_size={}, chunks={}, softplus={}",
            dims,
            T::type_name(),
            store.chunk_size(),
            store.num_chunks(),
            self.config().delta_softplus
        );
        let units = dims.batch * dims.num_groups;
        self.warn_if_oversubscribed(units);

        let ctx = UnitCtx { dims, inputs, store, dy };
        let num_groups = dims.num_groups;
        let results = crate::discretize_switch!(self.config().delta_softplus, Disc, {
            self.map_units(vec![(); units], |unit, ()| {
                backward_group::<T, Disc>(&ctx, unit / num_groups, unit % num_groups)
            })
        });
        let results = results.into_iter().collect::<Result<Vec<_>>>()?;

        // Every unit's partials are staged until all units succeed; each is
        // freed as soon as it has been scattered.
        let per_group = dims.channels_per_group();
        for (unit, group_grads) in results.into_iter().enumerate() {
            let (batch, group) = (unit / num_groups, unit % num_groups);
            for n in 0..dims.state_size {
                for t in 0..dims.seq_len {
                    let slot = n * dims.seq_len + t;
                    grads.db.add4(batch, group, n, t, group_grads.db[slot]);
                    grads.dc.add4(batch, group, n, t, group_grads.dc[slot]);
                }
            }
            for (offset, ch) in group_grads.channels.into_iter().enumerate() {
                let channel = group * per_group + offset;
                for t in 0..dims.seq_len {
                    grads.du.add3(batch, channel, t, ch.du[t]);
                    grads.ddelta.add3(batch, channel, t, ch.ddelta[t]);
                }
                for (n, &value) in ch.da.iter().enumerate() {
                    grads.da.add2(channel, n, value);
                }
                if let Some(dd) = grads.dd.as_mut() {
                    dd.add1(channel, ch.dd);
                }
                if let Some(dbias) = grads.ddelta_bias.as_mut() {
                    dbias.add1(channel, ch.dbias);
                }
            }
        }
        Ok(())
    }
}

/// One-shot backward pass on a pool built from `config`.
pub fn backward_scan<T: ScanFloat>(
    dims: &ScanDimensions,
    inputs: &ScanInputs<'_, T>,
    store: &CheckpointStore<T>,
    dy: &StridedView<'_, T>,
    grads: &mut ScanGradViews<'_, T>,
    config: ScanConfig,
) -> Result<()> {
    dims.validate()?;
    ScanEngine::new(config)?.backward(dims, inputs, store, dy, grads)
}

/// Backward pass into freshly zeroed, contiguous gradient buffers.
pub fn selective_scan_backward<T: ScanFloat>(
    dims: &ScanDimensions,
    inputs: &ScanInputs<'_, T>,
    store: &CheckpointStore<T>,
    dy: &StridedView<'_, T>,
    config: ScanConfig,
) -> Result<ScanGradients<T>> {
    dims.validate()?;
    inputs.validate(dims)?;
    let mut grads = ScanGradients::zeros(dims, inputs.d.is_some(), inputs.delta_bias.is_some());
    {
        let mut views = grads.views_mut(dims)?;
        backward_scan(dims, inputs, store, dy, &mut views, config)?;
    }
    Ok(grads)
}
