// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry with exponential backoff for local start-up work.
//!
//! Remote calls are deliberately *not* retried here: a failed remote call
//! must reach the health tracker immediately so the request can fall back.
//!
//! ```
//! use cafe_sync::resilience::retry::RetryConfig;
//! use std::time::Duration;
//!
//! let startup = RetryConfig::startup();
//! assert_eq!(startup.max_attempts, 5);
//! assert_eq!(startup.delay_for(1), Duration::from_millis(400));
//! ```

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    /// Total attempts including the first one.
    pub max_attempts: usize,
}

impl RetryConfig {
    /// Opening the local store: a locked or briefly missing file settles
    /// within a couple of seconds, a bad path never does.
    #[must_use]
    pub fn startup() -> Self {
        Self {
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
            max_attempts: 5,
        }
    }

    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            factor: 2.0,
            max_attempts: 3,
        }
    }

    /// Delay to wait after the given number of failed attempts (0-based).
    #[must_use]
    pub fn delay_for(&self, failures: u32) -> Duration {
        let scaled = self.initial_delay.mul_f64(self.factor.powi(failures as i32));
        scaled.min(self.max_delay)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::startup()
    }
}

pub async fn retry<F, Fut, T, E>(operation: &str, config: &RetryConfig, mut attempt: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut failures: u32 = 0;
    loop {
        match attempt().await {
            Ok(value) => {
                if failures > 0 {
                    info!(operation, retries = failures, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) => {
                failures += 1;
                if failures as usize >= config.max_attempts {
                    warn!(operation, attempts = failures, error = %err, "Giving up");
                    return Err(err);
                }
                let delay = config.delay_for(failures - 1);
                warn!(
                    operation,
                    attempt = failures,
                    max_attempts = config.max_attempts,
                    error = %err,
                    ?delay,
                    "Operation failed, retrying"
                );
                sleep(delay).await;
            }
        }
    }
}
