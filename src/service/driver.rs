//! Body of the background I/O thread.
//!
//! The thread owns one run loop and drives it with a bounded wait. When the
//! loop reports that nothing is registered, an idle counter goes up; any run
//! that did work, or timed out with streams still registered, resets it.
//! Once the counter reaches `max_idle_ticks` the thread asks its service to
//! retire it, which only succeeds while the loop is still empty.

use crate::runloop::{ExitReason, RunLoop};
use crate::service::IoService;
use crate::service::config::IoServiceConfig;

use std::sync::{Arc, Weak};
use std::thread;

/// Counts consecutive idle runs of the loop.
#[derive(Debug, Default)]
pub struct IdleCounter {
    ticks: u32,
}

impl IdleCounter {
    /// Feeds one run outcome; returns true once the retirement threshold is
    /// reached.
    pub fn record(&mut self, reason: ExitReason, max_idle_ticks: u32) -> bool {
        match reason {
            ExitReason::Finished => {
                self.ticks = self.ticks.saturating_add(1);
                self.ticks >= max_idle_ticks
            }
            ExitReason::HandledSource | ExitReason::TimedOut | ExitReason::Stopped => {
                self.ticks = 0;
                false
            }
        }
    }

    pub fn reset(&mut self) {
        self.ticks = 0;
    }

    pub fn ticks(&self) -> u32 {
        self.ticks
    }
}

/// Runs the loop until it is stopped or retired.
pub(crate) fn drive(
    service: Weak<IoService>,
    run_loop: Arc<RunLoop>,
    config: IoServiceConfig,
    generation: usize,
) {
    let mut idle = IdleCounter::default();

    loop {
        let reason = run_loop.run(true, config.run_timeout);

        if reason == ExitReason::Stopped {
            tracing::debug!(generation, "I/O thread stopped");
            break;
        }

        if !idle.record(reason, config.max_idle_ticks) {
            if reason == ExitReason::Finished {
                thread::sleep(config.idle_tick);
            }
            continue;
        }

        // The service is gone: nobody can register with this loop anymore.
        let Some(service) = service.upgrade() else {
            break;
        };

        if service.retire(&run_loop) {
            tracing::debug!(generation, "I/O thread retired after idling");
            break;
        }

        // A stream registered while we were deciding.
        idle.reset();
    }
}
