//! Engine configuration.
//!
//! Whether loops may run multi-threaded is explicit state: callers hand the
//! manager an [`EngineConfig`] and the manager holds no global mutable state.

use serde::{Deserialize, Serialize};

/// Configuration for a [`LoopManager`](crate::LoopManager).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Number of worker slots for parallel loops. 0 means "use the rayon
    /// pool size".
    pub workers: usize,
    /// Runtime-wide opt-in for multi-threaded loops. Parallel execution
    /// requires both this flag and an explicit per-manager request.
    pub implicit_parallelism: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            implicit_parallelism: false,
        }
    }
}

impl EngineConfig {
    /// The worker count a parallel loop would actually use.
    pub fn resolved_workers(&self) -> usize {
        if self.workers == 0 {
            rayon::current_num_threads()
        } else {
            self.workers
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_sequential() {
        let config = EngineConfig::default();
        assert!(!config.implicit_parallelism);
        assert_eq!(config.workers, 0);
    }

    #[test]
    fn test_resolved_workers_prefers_explicit_count() {
        let config = EngineConfig {
            workers: 3,
            implicit_parallelism: true,
        };
        assert_eq!(config.resolved_workers(), 3);
    }

    #[test]
    fn test_resolved_workers_falls_back_to_pool_size() {
        let config = EngineConfig::default();
        assert_eq!(config.resolved_workers(), rayon::current_num_threads());
    }
}
