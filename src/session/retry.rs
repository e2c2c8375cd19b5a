//! Retry with exponential backoff for transient OS failures
//!
//! Only `Unknown` failures are retried. A classified failure (conflict,
//! missing precondition, missing entity, environment) will not change by
//! waiting.

use crate::error::{ErrorKind, Result};
use crate::manifest::RetryConfig;
use chrono_machines::{BackoffStrategy, ExponentialBackoff};
use rand::rng;
use std::thread;
use std::time::Duration;
use tracing::warn;

/// Create backoff strategy from RetryConfig
fn backoff_from_config(config: &RetryConfig) -> ExponentialBackoff {
    ExponentialBackoff::new()
        .base_delay_ms(config.base_delay_ms)
        .max_delay_ms(config.max_delay_ms)
        .multiplier(config.multiplier)
        .max_attempts(config.max_attempts)
        .jitter_factor(config.jitter_factor)
}

/// Run `op`, retrying `Unknown` failures until the backoff gives up
pub fn with_retry<T, F>(config: &RetryConfig, label: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let backoff = backoff_from_config(config);
    let mut rng = rng();
    let mut attempt: u8 = 0;

    loop {
        attempt = attempt.saturating_add(1);

        match op() {
            Ok(value) => return Ok(value),
            Err(e) if e.kind() == ErrorKind::Unknown => {
                if let Some(delay_ms) = backoff.delay(attempt, &mut rng) {
                    warn!(
                        step = label,
                        attempt,
                        delay_ms,
                        error = %e,
                        "transient failure, retrying"
                    );
                    thread::sleep(Duration::from_millis(delay_ms));
                } else {
                    return Err(e);
                }
            }
            Err(e) => return Err(e),
        }
    }
}
