//! Fluent builder for IoService construction.
//!
//! Provides a builder pattern interface for creating and configuring
//! [`IoService`] instances.

use crate::service::{IoService, IoServiceConfig};

use std::sync::Arc;
use std::time::Duration;

/// Builder for constructing [`IoService`] instances with fluent API.
///
/// Starts from [`IoServiceConfig::default`]; use
/// [`from_env`](Self::from_env) to start from the environment instead.
///
/// # Example
/// ```
/// use bytestream::IoServiceBuilder;
/// use std::time::Duration;
///
/// let service = IoServiceBuilder::new()
///     .run_timeout(Duration::from_secs(1))
///     .max_idle_ticks(10)
///     .thread_name("archive-io")
///     .build();
///
/// assert_eq!(service.config().max_idle_ticks, 10);
/// ```
pub struct IoServiceBuilder {
    config: IoServiceConfig,
}

impl Default for IoServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl IoServiceBuilder {
    /// Creates a builder holding the default configuration.
    pub fn new() -> Self {
        Self {
            config: IoServiceConfig::default(),
        }
    }

    /// Creates a builder holding [`IoServiceConfig::from_env`].
    pub fn from_env() -> Self {
        Self {
            config: IoServiceConfig::from_env(),
        }
    }

    /// Sets the upper bound of one blocking wait of the background loop.
    pub fn run_timeout(mut self, timeout: Duration) -> Self {
        self.config.run_timeout = timeout;
        self
    }

    /// Sets the pause between two runs of an empty loop.
    pub fn idle_tick(mut self, tick: Duration) -> Self {
        self.config.idle_tick = tick;
        self
    }

    /// Sets how many consecutive empty runs retire the thread.
    pub fn max_idle_ticks(mut self, ticks: u32) -> Self {
        self.config.max_idle_ticks = ticks;
        self
    }

    /// Sets the background thread's name.
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.config.thread_name = name.into();
        self
    }

    /// Builds and returns a configured service.
    ///
    /// No thread is started until a stream needs one.
    pub fn build(self) -> Arc<IoService> {
        IoService::new(self.config)
    }
}
