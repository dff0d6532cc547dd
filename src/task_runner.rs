//! Supervised periodic tasks with a circuit breaker.
//!
//! The simulation depends on its background loops (price ticks, the
//! expiration sweep, cleanup) actually running. Each loop iteration is
//! retried with exponential backoff on failure, and too many consecutive
//! failures bring the process down rather than letting the simulation
//! degrade silently.

use std::time::Duration;

use tokio::time::sleep;
use tracing::{error, warn};

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures tolerated before the task panics.
    pub max_consecutive_failures: u32,
    pub initial_retry_delay: Duration,
    pub max_retry_delay: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        CircuitBreakerConfig {
            max_consecutive_failures: 10,
            initial_retry_delay: Duration::from_millis(500),
            max_retry_delay: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    consecutive_failures: u32,
    current_retry_delay: Duration,
}

impl BreakerState {
    fn new(initial_delay: Duration) -> Self {
        BreakerState {
            consecutive_failures: 0,
            current_retry_delay: initial_delay,
        }
    }

    fn record_failure(&mut self, max_delay: Duration) {
        self.consecutive_failures += 1;
        self.current_retry_delay = std::cmp::min(self.current_retry_delay * 2, max_delay);
    }

    fn reset(&mut self, initial_delay: Duration) {
        self.consecutive_failures = 0;
        self.current_retry_delay = initial_delay;
    }
}

/// Run one task iteration every `interval`, forever.
///
/// Successful iterations sleep the full interval; failed iterations
/// retry after an exponentially growing delay instead.
///
/// # Panics
/// Panics after `max_consecutive_failures` consecutive failures so that a
/// broken critical loop is loud instead of silent.
pub async fn run_periodic<F, Fut>(
    task_name: &str,
    interval: Duration,
    config: CircuitBreakerConfig,
    mut task_fn: F,
) where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<(), String>>,
{
    let mut state = BreakerState::new(config.initial_retry_delay);

    loop {
        match task_fn().await {
            Ok(()) => {
                if state.consecutive_failures > 0 {
                    warn!(
                        "Task '{}' recovered after {} failures",
                        task_name, state.consecutive_failures
                    );
                }
                state.reset(config.initial_retry_delay);
                sleep(interval).await;
            }
            Err(e) => {
                state.record_failure(config.max_retry_delay);
                error!(
                    "Task '{}' failed (attempt {}/{}): {}",
                    task_name, state.consecutive_failures, config.max_consecutive_failures, e
                );

                if state.consecutive_failures >= config.max_consecutive_failures {
                    panic!(
                        "FATAL: Task '{}' exceeded maximum consecutive failures ({}). \
                         Last error: {}.",
                        task_name, config.max_consecutive_failures, e
                    );
                }

                warn!(
                    "Task '{}' will retry in {:?}",
                    task_name, state.current_retry_delay
                );
                sleep(state.current_retry_delay).await;
            }
        }
    }
}
