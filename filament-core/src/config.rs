//! Runtime configuration.
//!
//! Each thread owns its own reactive runtime, so configuration is per thread
//! as well. Call [`configure`] before creating any reactive values.

use crate::reactive::Runtime;

/// Default cap on node runs within a single flush.
pub const DEFAULT_MAX_FLUSH_ITERATIONS: usize = 100_000;

/// Tunables for the reactive runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Maximum number of computation runs a single flush may perform before
    /// it is aborted with [`ReactiveError::InfiniteLoop`](crate::ReactiveError::InfiniteLoop).
    pub max_flush_iterations: usize,

    /// Emit a `tracing` warning when a computation or cleanup is created
    /// outside any owner.
    pub warn_on_unowned: bool,
}

impl RuntimeConfig {
    /// Set the flush iteration cap.
    pub fn with_max_flush_iterations(mut self, limit: usize) -> Self {
        self.max_flush_iterations = limit;
        self
    }

    /// Enable or disable warnings for unowned computations.
    pub fn with_warn_on_unowned(mut self, warn: bool) -> Self {
        self.warn_on_unowned = warn;
        self
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_flush_iterations: DEFAULT_MAX_FLUSH_ITERATIONS,
            warn_on_unowned: true,
        }
    }
}

/// Install `config` for the current thread's runtime.
pub fn configure(config: RuntimeConfig) {
    Runtime::with(|rt| rt.config.set(config));
}

/// The configuration of the current thread's runtime.
pub fn current_config() -> RuntimeConfig {
    Runtime::with(|rt| rt.config.get())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let config = RuntimeConfig::default()
            .with_max_flush_iterations(8)
            .with_warn_on_unowned(false);

        assert_eq!(config.max_flush_iterations, 8);
        assert!(!config.warn_on_unowned);
    }

    #[test]
    fn configure_is_visible_on_the_same_thread() {
        assert_eq!(current_config(), RuntimeConfig::default());

        configure(RuntimeConfig::default().with_max_flush_iterations(42));
        assert_eq!(current_config().max_flush_iterations, 42);
    }
}
