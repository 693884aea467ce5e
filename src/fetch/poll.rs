use std::future::Future;
use std::time::{Duration, Instant};

use tracing::debug;

use super::{FetchError, Result};

/// Bounds for waiting on an external job.
#[derive(Debug, Clone, Copy)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
    pub timeout: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        PollPolicy {
            interval: Duration::from_secs(2),
            max_attempts: 60,
            timeout: Duration::from_secs(180),
        }
    }
}

/// Call `check` until it yields a value, sleeping `interval` between calls.
/// Stops with `PollTimeout` once either `max_attempts` or `timeout` runs out.
pub async fn poll_until<T, F, Fut>(policy: PollPolicy, mut check: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let start = Instant::now();
    let mut attempts = 0;

    while attempts < policy.max_attempts {
        attempts += 1;
        if let Some(value) = check(attempts).await? {
            return Ok(value);
        }
        if start.elapsed() + policy.interval > policy.timeout {
            break;
        }
        debug!(attempt = attempts, "job not ready, waiting");
        tokio::time::sleep(policy.interval).await;
    }

    Err(FetchError::PollTimeout { attempts })
}
