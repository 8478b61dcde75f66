//! Worker pool that runs independent scan units.

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use selscan_core::{Result, ScanConfig, ScanError};

/// Minimum unit count before work is handed to the pool.
const PAR_UNIT_THRESHOLD: usize = 4;

/// Explicit rayon pool plus the configuration both passes run under.
///
/// Every parallel loop goes through [`ScanEngine::map_units`], never the
/// implicit global pool. Results come back in unit order regardless of
/// which worker produced them.
pub struct ScanEngine {
    config: ScanConfig,
    pool: ThreadPool,
}

impl ScanEngine {
    pub fn new(config: ScanConfig) -> Result<Self> {
        config.validate()?;
        let mut builder =
            ThreadPoolBuilder::new().thread_name(|i| format!("selscan-worker-{i}"));
        if let Some(n) = config.num_threads {
            builder = builder.num_threads(n);
        }
        let pool = builder.build().map_err(|e| ScanError::ThreadPool(e.to_string()))?;
        Ok(Self { config, pool })
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Apply `f(unit_index, item)` to every item, in parallel when there is
    /// enough work. Output order matches input order.
    pub(crate) fn map_units<I, R, F>(&self, items: Vec<I>, f: F) -> Vec<R>
    where
        I: Send,
        R: Send,
        F: Fn(usize, I) -> R + Sync + Send,
    {
        if items.len() < PAR_UNIT_THRESHOLD || self.num_threads() == 1 {
            return items.into_iter().enumerate().map(|(i, item)| f(i, item)).collect();
        }
        self.pool.install(|| {
            items
                .into_par_iter()
                .enumerate()
                .map(|(i, item)| f(i, item))
                .collect()
        })
    }

    pub(crate) fn warn_if_oversubscribed(&self, units: usize) {
        if let Some(n) = self.config.num_threads {
            if n > units {
                tracing::warn!(
                    "{} worker threads requested for {} independent scan units",
                    n,
                    units
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_size_from_config() {
        let engine = ScanEngine::new(ScanConfig::default().with_threads(3)).unwrap();
        assert_eq!(engine.num_threads(), 3);
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(ScanEngine::new(ScanConfig::default().with_chunk_size(0)).is_err());
    }

    #[test]
    fn test_map_units_preserves_order() {
        let engine = ScanEngine::new(ScanConfig::default().with_threads(4)).unwrap();
        let items: Vec<usize> = (0..257).collect();
        let out = engine.map_units(items, |i, x| {
            assert_eq!(i, x);
            x * 2
        });
        assert_eq!(out, (0..257).map(|x| x * 2).collect::<Vec<_>>());

        let small = engine.map_units(vec![5, 6], |i, x| i + x);
        assert_eq!(small, vec![5, 7]);
    }
}
