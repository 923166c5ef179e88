//! Growing retry delay for the TCP readiness probe.

use std::time::Duration;

/// Delay between readiness probe attempts, doubling up to a ceiling.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    max: Duration,
    current: Duration,
}

impl ExponentialBackoff {
    /// First attempt waits `initial`; later ones never wait longer than `max`.
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            max,
            current: initial.min(max),
        }
    }

    /// Delay the next `wait` will sleep for.
    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn next(&mut self) {
        self.current = (self.current * 2).min(self.max);
    }

    /// Sleeps for the current delay and doubles it for the next probe.
    pub async fn wait(&mut self) {
        tokio::time::sleep(self.current).await;
        self.next();
    }
}
