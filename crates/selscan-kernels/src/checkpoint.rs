//! Chunk-boundary state snapshots.
//!
//! The time axis is cut into chunks of `chunk_size` steps. Slot `k` of a
//! (batch, channel) scan holds the state after the last timestep of chunk
//! `k`, i.e. after `min((k + 1) * chunk_size, seq_len)` steps, so the final
//! state is always stored even when it is not on a chunk boundary. The state
//! entering chunk `k` is slot `k - 1`, or zeros for `k == 0`.
//!
//! Storage is `[batch, channels, num_chunks, state_size]`, independent of
//! `seq_len` beyond the chunk count. Each slot is written exactly once.

use std::ops::Range;

use selscan_core::{Result, ScanDimensions, ScanError, ScanFloat};

#[derive(Clone, Debug)]
pub struct CheckpointStore<T> {
    batch: usize,
    channels: usize,
    state_size: usize,
    seq_len: usize,
    chunk_size: usize,
    num_chunks: usize,
    delta_softplus: bool,
    states: Vec<T>,
    written: Vec<bool>,
}

impl<T: ScanFloat> CheckpointStore<T> {
    /// Zeroed store with every slot unwritten.
    pub fn new(dims: &ScanDimensions, chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(ScanError::InvalidConfig("chunk_size must be >= 1".into()));
        }
        let num_chunks = dims.num_checkpoints(chunk_size);
        let units = dims.num_units();
        Ok(Self {
            batch: dims.batch,
            channels: dims.channels,
            state_size: dims.state_size,
            seq_len: dims.seq_len,
            chunk_size,
            num_chunks,
            delta_softplus: false,
            states: vec![T::zero(); units * num_chunks * dims.state_size],
            written: vec![false; units * num_chunks],
        })
    }

    /// Record the discretization mode the snapshots are taken under.
    pub fn with_softplus(mut self, delta_softplus: bool) -> Self {
        self.delta_softplus = delta_softplus;
        self
    }

    pub fn delta_softplus(&self) -> bool {
        self.delta_softplus
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn num_chunks(&self) -> usize {
        self.num_chunks
    }

    pub fn seq_len(&self) -> usize {
        self.seq_len
    }

    pub fn state_size(&self) -> usize {
        self.state_size
    }

    /// Number of stored elements.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Timesteps covered by `chunk`. Empty for the single chunk of an empty
    /// sequence.
    pub fn chunk_bounds(&self, chunk: usize) -> Range<usize> {
        chunk_bounds(chunk, self.chunk_size, self.seq_len)
    }

    /// True once every slot of every scan has been written.
    pub fn is_complete(&self) -> bool {
        self.written.iter().all(|&w| w)
    }

    /// Record the state reached after timestep `t` of scan `(batch, channel)`.
    ///
    /// `t` must close a chunk (or the sequence). Writing a slot twice fails
    /// with `CheckpointOverwrite`.
    pub fn snapshot(&mut self, batch: usize, channel: usize, t: usize, state: &[T]) -> Result<()> {
        self.unit_writer(batch, channel)?.snapshot(t, state)
    }

    /// State stored in slot `chunk`, i.e. after the last timestep of that chunk.
    pub fn restore(&self, batch: usize, channel: usize, chunk: usize) -> Result<&[T]> {
        let unit = self.unit_index(batch, channel)?;
        if chunk >= self.num_chunks {
            return Err(ScanError::InvalidShape(format!(
                "checkpoint {chunk} out of range ({} chunks)",
                self.num_chunks
            )));
        }
        let slot = unit * self.num_chunks + chunk;
        if !self.written[slot] {
            return Err(ScanError::InvalidShape(format!(
                "checkpoint {chunk} of (batch {batch}, channel {channel}) was never written"
            )));
        }
        let base = slot * self.state_size;
        Ok(&self.states[base..base + self.state_size])
    }

    /// Copy the state entering `chunk` into `out`.
    pub fn chunk_start_state(
        &self,
        batch: usize,
        channel: usize,
        chunk: usize,
        out: &mut [T],
    ) -> Result<()> {
        if out.len() != self.state_size {
            return Err(ScanError::shape_mismatch("state", &[self.state_size], &[out.len()]));
        }
        if chunk == 0 {
            self.unit_index(batch, channel)?;
            out.fill(T::zero());
        } else {
            out.copy_from_slice(self.restore(batch, channel, chunk - 1)?);
        }
        Ok(())
    }

    /// Final state of scan `(batch, channel)`.
    pub fn last_state(&self, batch: usize, channel: usize) -> Result<&[T]> {
        self.restore(batch, channel, self.num_chunks - 1)
    }

    /// Check that this store was produced by a forward pass over `dims`.
    pub fn validate_for(&self, dims: &ScanDimensions) -> Result<()> {
        let got = [self.batch, self.channels, self.seq_len, self.state_size];
        let expected = [dims.batch, dims.channels, dims.seq_len, dims.state_size];
        if got != expected {
            return Err(ScanError::shape_mismatch(
                "checkpoints [batch, channels, seq_len, state_size]",
                &expected,
                &got,
            ));
        }
        let expected_chunks = dims.num_checkpoints(self.chunk_size);
        if self.num_chunks != expected_chunks
            || self.written.len() != dims.num_units() * expected_chunks
        {
            return Err(ScanError::InvalidShape(format!(
                "checkpoint count {} does not match ceil({} / {}) = {}",
                self.num_chunks, dims.seq_len, self.chunk_size, expected_chunks
            )));
        }
        if !self.is_complete() {
            return Err(ScanError::InvalidShape("checkpoint store is incomplete".into()));
        }
        Ok(())
    }

    /// Replaying under another discretization would regenerate different
    /// states, so the mode must match the forward pass.
    pub fn check_mode(&self, delta_softplus: bool) -> Result<()> {
        if self.delta_softplus != delta_softplus {
            return Err(ScanError::InvalidConfig(format!(
                "checkpoints were taken with delta_softplus={}, replay requested {}",
                self.delta_softplus, delta_softplus
            )));
        }
        Ok(())
    }

    /// One writer per (batch, channel) scan, in unit order. The writers own
    /// disjoint slices of the store, so they can run on separate workers.
    pub(crate) fn unit_writers(&mut self) -> Vec<UnitCheckpoints<'_, T>> {
        let slots = self.num_chunks;
        let stride = slots * self.state_size;
        let (channels, chunk_size, seq_len, state_size) =
            (self.channels, self.chunk_size, self.seq_len, self.state_size);
        if stride == 0 {
            // state_size == 0: nothing to store, only the written flags.
            return self
                .written
                .chunks_mut(slots.max(1))
                .enumerate()
                .map(|(unit, written)| UnitCheckpoints {
                    batch: unit / channels.max(1),
                    channel: unit % channels.max(1),
                    states: &mut [],
                    written,
                    chunk_size,
                    seq_len,
                    state_size,
                })
                .collect();
        }
        self.states
            .chunks_mut(stride)
            .zip(self.written.chunks_mut(slots))
            .enumerate()
            .map(|(unit, (states, written))| UnitCheckpoints {
                batch: unit / channels,
                channel: unit % channels,
                states,
                written,
                chunk_size,
                seq_len,
                state_size,
            })
            .collect()
    }

    fn unit_writer(&mut self, batch: usize, channel: usize) -> Result<UnitCheckpoints<'_, T>> {
        let unit = self.unit_index(batch, channel)?;
        let slots = self.num_chunks;
        let base = unit * slots * self.state_size;
        Ok(UnitCheckpoints {
            batch,
            channel,
            states: &mut self.states[base..base + slots * self.state_size],
            written: &mut self.written[unit * slots..(unit + 1) * slots],
            chunk_size: self.chunk_size,
            seq_len: self.seq_len,
            state_size: self.state_size,
        })
    }

    fn unit_index(&self, batch: usize, channel: usize) -> Result<usize> {
        if batch >= self.batch || channel >= self.channels {
            return Err(ScanError::InvalidShape(format!(
                "scan (batch {batch}, channel {channel}) outside [{}, {}]",
                self.batch, self.channels
            )));
        }
        Ok(batch * self.channels + channel)
    }
}

#[inline]
pub(crate) fn chunk_bounds(chunk: usize, chunk_size: usize, seq_len: usize) -> Range<usize> {
    let start = (chunk * chunk_size).min(seq_len);
    let end = (start + chunk_size).min(seq_len);
    start..end
}

/// Checkpoint slots of a single (batch, channel) scan.
pub(crate) struct UnitCheckpoints<'a, T> {
    batch: usize,
    channel: usize,
    states: &'a mut [T],
    written: &'a mut [bool],
    chunk_size: usize,
    seq_len: usize,
    state_size: usize,
}

impl<T: ScanFloat> UnitCheckpoints<'_, T> {
    /// True when timestep `t` closes a chunk or the sequence.
    #[inline]
    pub(crate) fn closes_chunk(&self, t: usize) -> bool {
        (t + 1) % self.chunk_size == 0 || t + 1 == self.seq_len
    }

    pub(crate) fn snapshot(&mut self, t: usize, state: &[T]) -> Result<()> {
        if !self.closes_chunk(t) || t >= self.seq_len {
            return Err(ScanError::InvalidShape(format!(
                "timestep {t} does not close a chunk of {} over {} steps",
                self.chunk_size, self.seq_len
            )));
        }
        self.write_slot(t / self.chunk_size, state)
    }

    /// The single slot of an empty sequence holds the initial zero state.
    pub(crate) fn snapshot_initial(&mut self) -> Result<()> {
        let zeros = vec![T::zero(); self.state_size];
        self.write_slot(0, &zeros)
    }

    fn write_slot(&mut self, slot: usize, state: &[T]) -> Result<()> {
        if state.len() != self.state_size {
            return Err(ScanError::shape_mismatch("state", &[self.state_size], &[state.len()]));
        }
        if self.written[slot] {
            return Err(ScanError::CheckpointOverwrite {
                batch: self.batch,
                channel: self.channel,
                slot,
            });
        }
        let base = slot * self.state_size;
        self.states[base..base + self.state_size].copy_from_slice(state);
        self.written[slot] = true;
        Ok(())
    }
}
