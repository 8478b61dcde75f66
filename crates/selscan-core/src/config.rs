//! Per-call scan configuration.

use serde::{Deserialize, Serialize};

use crate::{Result, ScanError};

/// Default chunk width; one checkpoint per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 2048;

/// Options shared by the forward and backward entry points.
///
/// Passed by value; nothing here is global state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Discretize the step with `softplus(delta + bias)` instead of `delta + bias`.
    #[serde(default)]
    pub delta_softplus: bool,

    /// Timesteps per checkpointed chunk. Smaller chunks store more states and
    /// recompute less in backward.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Worker count of the scan thread pool. `None` uses the available
    /// parallelism of the host.
    #[serde(default)]
    pub num_threads: Option<usize>,
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            delta_softplus: false,
            chunk_size: DEFAULT_CHUNK_SIZE,
            num_threads: None,
        }
    }
}

impl ScanConfig {
    pub fn with_softplus(mut self, delta_softplus: bool) -> Self {
        self.delta_softplus = delta_softplus;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = Some(num_threads);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(ScanError::InvalidConfig("chunk_size must be >= 1".into()));
        }
        if self.num_threads == Some(0) {
            return Err(ScanError::InvalidConfig("num_threads must be >= 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = ScanConfig::default();
        assert!(!cfg.delta_softplus);
        assert_eq!(cfg.chunk_size, DEFAULT_CHUNK_SIZE);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let cfg = ScanConfig::default().with_softplus(true).with_chunk_size(16).with_threads(2);
        assert!(cfg.delta_softplus);
        assert_eq!(cfg.chunk_size, 16);
        assert_eq!(cfg.num_threads, Some(2));
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            ScanConfig::default().with_chunk_size(0).validate(),
            Err(ScanError::InvalidConfig(_))
        ));
        assert!(ScanConfig::default().with_threads(0).validate().is_err());
    }

    #[test]
    fn test_json_roundtrip_and_defaults() {
        let cfg = ScanConfig::default().with_softplus(true).with_chunk_size(128);
        let json = serde_json::to_string(&cfg).unwrap();
        let back: ScanConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg, back);

        let partial: ScanConfig = serde_json::from_str(r#"{"delta_softplus": true}"#).unwrap();
        assert_eq!(partial.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(partial.num_threads, None);
    }
}
