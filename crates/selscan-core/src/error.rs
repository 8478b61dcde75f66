use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScanError {
    #[error("Invalid shape: {0}")]
    InvalidShape(String),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Checkpoint slot {slot} for (batch {batch}, channel {channel}) already written")]
    CheckpointOverwrite {
        batch: usize,
        channel: usize,
        slot: usize,
    },

    #[error("Thread pool error: {0}")]
    ThreadPool(String),
}

impl ScanError {
    /// Shape mismatch for a named tensor.
    pub fn shape_mismatch(name: &str, expected: &[usize], got: &[usize]) -> Self {
        ScanError::InvalidShape(format!(
            "{name}: expected {expected:?}, got {got:?}"
        ))
    }

    /// True for every variant raised by up-front shape validation.
    pub fn is_invalid_shape(&self) -> bool {
        matches!(self, ScanError::InvalidShape(_))
    }
}
