//! Reconnect pacing.

use std::time::Duration;

use tokio::sync::watch;

use crate::{Error, Result};

/// Default delay between connection attempts.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(5);

/// Fixed-interval retry policy used by the connection manager.
///
/// Attempts are unbounded: the connect loop keeps retrying every `interval`
/// until it succeeds or the client is shut down. There is no backoff growth
/// and no jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay before the next attempt.
    pub interval: Duration,
}

impl RetryPolicy {
    /// Creates a policy with the given interval.
    pub const fn fixed(interval: Duration) -> Self {
        Self { interval }
    }

    /// Sleeps for one interval, returning early with [`Error::Shutdown`]
    /// if `shutdown` fires first.
    pub async fn pause(&self, shutdown: &mut watch::Receiver<bool>) -> Result<()> {
        tokio::select! {
            () = tokio::time::sleep(self.interval) => Ok(()),
            _ = shutdown.wait_for(|stop| *stop) => Err(Error::Shutdown),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(DEFAULT_RECONNECT_INTERVAL)
    }
}
