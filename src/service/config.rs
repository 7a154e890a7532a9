//! Tunables for the background I/O thread.

use std::env;
use std::time::Duration;

const RUN_TIMEOUT_ENV: &str = "BYTESTREAM_RUN_TIMEOUT_MS";
const IDLE_TICK_ENV: &str = "BYTESTREAM_IDLE_TICK_MS";
const MAX_IDLE_TICKS_ENV: &str = "BYTESTREAM_MAX_IDLE_TICKS";

/// Configuration of an [`IoService`](crate::IoService).
///
/// The defaults keep an idle thread around for roughly ten seconds
/// (`max_idle_ticks` × `idle_tick`) after the last stream closes.
#[derive(Clone, Debug)]
pub struct IoServiceConfig {
    /// Upper bound on a single blocking wait of the run loop.
    pub run_timeout: Duration,

    /// Pause between two runs of a loop that has nothing registered.
    pub idle_tick: Duration,

    /// Consecutive idle runs after which the thread retires.
    pub max_idle_ticks: u32,

    /// Name given to the background thread.
    pub thread_name: String,
}

impl Default for IoServiceConfig {
    fn default() -> Self {
        Self {
            run_timeout: Duration::from_secs(20),
            idle_tick: Duration::from_millis(10),
            max_idle_ticks: 1000,
            thread_name: "bytestream-io".to_string(),
        }
    }
}

impl IoServiceConfig {
    /// Defaults overridden by `BYTESTREAM_RUN_TIMEOUT_MS`,
    /// `BYTESTREAM_IDLE_TICK_MS` and `BYTESTREAM_MAX_IDLE_TICKS`.
    ///
    /// Unset or unparsable variables keep their default.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(ms) = read_env(RUN_TIMEOUT_ENV) {
            config.run_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = read_env(IDLE_TICK_ENV) {
            config.idle_tick = Duration::from_millis(ms);
        }
        if let Some(ticks) = read_env(MAX_IDLE_TICKS_ENV) {
            config.max_idle_ticks = u32::try_from(ticks).unwrap_or(u32::MAX);
        }

        config
    }
}

fn read_env(name: &str) -> Option<u64> {
    let value = env::var(name).ok()?;

    match value.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            tracing::warn!("ignoring {}={:?}: not an integer", name, value);
            None
        }
    }
}
