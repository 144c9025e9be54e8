//! Tuning knobs for the execution engine.

use std::time::Duration;

/// Default cap on concurrently running nodes within one execution.
pub const DEFAULT_MAX_CONCURRENCY: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Maximum number of nodes of a single execution running at once.
    /// `None` means unbounded.
    pub max_concurrency: Option<usize>,
    /// Wall-clock budget for a whole execution. When it elapses the engine
    /// fails every unfinished step and cancels the execution.
    pub execution_timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: Some(DEFAULT_MAX_CONCURRENCY),
            execution_timeout: None,
        }
    }
}

impl EngineConfig {
    /// No concurrency cap and no execution timeout.
    pub fn unbounded() -> Self {
        Self {
            max_concurrency: None,
            execution_timeout: None,
        }
    }

    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit);
        self
    }

    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = Some(timeout);
        self
    }

    /// Effective per-execution concurrency limit (never zero).
    pub(crate) fn concurrency_limit(&self) -> usize {
        self.max_concurrency.unwrap_or(usize::MAX).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_concurrency_still_makes_progress() {
        assert_eq!(EngineConfig::default().with_max_concurrency(0).concurrency_limit(), 1);
        assert_eq!(EngineConfig::unbounded().concurrency_limit(), usize::MAX);
        assert_eq!(EngineConfig::default().concurrency_limit(), DEFAULT_MAX_CONCURRENCY);
    }
}
