//! Extents of one scan invocation.

use serde::{Deserialize, Serialize};

use crate::{Result, ScanError};

/// Batch, channel, time, state and group extents of a scan.
///
/// `channels` must be a multiple of `num_groups`; channel `d` reads the
/// B/C slice of group `d / (channels / num_groups)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScanDimensions {
    pub batch: usize,
    pub channels: usize,
    pub seq_len: usize,
    pub state_size: usize,
    pub num_groups: usize,
}

impl ScanDimensions {
    pub fn new(
        batch: usize,
        channels: usize,
        seq_len: usize,
        state_size: usize,
        num_groups: usize,
    ) -> Self {
        Self { batch, channels, seq_len, state_size, num_groups }
    }

    /// Check the group invariant. Runs before any view is touched.
    pub fn validate(&self) -> Result<()> {
        if self.num_groups == 0 {
            return Err(ScanError::InvalidShape(
                "num_groups must be at least 1".into(),
            ));
        }
        if self.channels % self.num_groups != 0 {
            return Err(ScanError::InvalidShape(format!(
                "channels ({}) not divisible by num_groups ({})",
                self.channels, self.num_groups
            )));
        }
        Ok(())
    }

    pub fn channels_per_group(&self) -> usize {
        self.channels / self.num_groups
    }

    /// Group whose B/C slice channel `channel` reads.
    #[inline]
    pub fn group_of(&self, channel: usize) -> usize {
        channel / self.channels_per_group()
    }

    /// Independent (batch, channel) scans.
    pub fn num_units(&self) -> usize {
        self.batch * self.channels
    }

    /// Number of chunks the time axis splits into. At least one, so an empty
    /// sequence still has a slot for its (zero) final state.
    pub fn num_checkpoints(&self, chunk_size: usize) -> usize {
        if chunk_size == 0 {
            return 0;
        }
        self.seq_len.div_ceil(chunk_size).max(1)
    }

    /// Shape of A and dA, `[channels, state_size]`.
    pub fn a_dims(&self) -> [usize; 2] {
        [self.channels, self.state_size]
    }

    /// Shape of B, C and their gradients, `[batch, num_groups, state_size, seq_len]`.
    pub fn bc_dims(&self) -> [usize; 4] {
        [self.batch, self.num_groups, self.state_size, self.seq_len]
    }

    /// Shape of u, delta, y and their gradients, `[batch, channels, seq_len]`.
    pub fn seq_dims(&self) -> [usize; 3] {
        [self.batch, self.channels, self.seq_len]
    }

    /// Shape of D and the delta bias, `[channels]`.
    pub fn channel_dims(&self) -> [usize; 1] {
        [self.channels]
    }

    /// One latent state per scan, `[batch, channels, state_size]`.
    pub fn state_dims(&self) -> [usize; 3] {
        [self.batch, self.channels, self.state_size]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_mapping() {
        let dims = ScanDimensions::new(2, 8, 16, 4, 2);
        dims.validate().unwrap();
        assert_eq!(dims.channels_per_group(), 4);
        assert_eq!(dims.group_of(0), 0);
        assert_eq!(dims.group_of(3), 0);
        assert_eq!(dims.group_of(4), 1);
        assert_eq!(dims.group_of(7), 1);
        assert_eq!(dims.num_units(), 16);
    }

    #[test]
    fn test_non_divisible_groups_rejected() {
        let err = ScanDimensions::new(1, 6, 4, 2, 4).validate().unwrap_err();
        assert!(err.is_invalid_shape());
    }

    #[test]
    fn test_zero_groups_rejected() {
        assert!(ScanDimensions::new(1, 4, 4, 2, 0).validate().is_err());
    }

    #[test]
    fn test_num_checkpoints() {
        let dims = ScanDimensions::new(1, 1, 10, 1, 1);
        assert_eq!(dims.num_checkpoints(1), 10);
        assert_eq!(dims.num_checkpoints(3), 4);
        assert_eq!(dims.num_checkpoints(5), 2);
        assert_eq!(dims.num_checkpoints(64), 1);

        let empty = ScanDimensions::new(1, 1, 0, 1, 1);
        assert_eq!(empty.num_checkpoints(4), 1);
    }
}
