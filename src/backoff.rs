//! Capped exponential backoff between empty queue receives.
//!
//! Both roles poll short-receive queues in a loop. Instead of spinning on
//! empty receives, the wait between them doubles from a floor up to a
//! ceiling and snaps back to the floor as soon as a receive returns traffic.

use std::time::Duration;

/// Bounds for the backoff schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffConfig {
    /// First wait after an empty receive.
    pub initial: Duration,
    /// Ceiling the wait never exceeds.
    pub max: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(200),
            max: Duration::from_secs(10),
        }
    }
}

impl BackoffConfig {
    /// Sets the initial wait.
    pub fn with_initial(mut self, initial: Duration) -> Self {
        self.initial = initial;
        self
    }

    /// Sets the ceiling.
    pub fn with_max(mut self, max: Duration) -> Self {
        self.max = max;
        self
    }
}

/// Doubling backoff state for one polling loop.
#[derive(Debug)]
pub struct Backoff {
    config: BackoffConfig,
    next: Duration,
}

impl Backoff {
    /// Creates a backoff starting at the configured floor.
    pub fn new(config: BackoffConfig) -> Self {
        let next = config.initial;
        Self { config, next }
    }

    /// Returns the wait that `wait()` would sleep for next.
    pub fn next_delay(&self) -> Duration {
        self.next
    }

    /// Sleeps for the current delay, then doubles it up to the ceiling.
    pub async fn wait(&mut self) {
        let delay = self.step();
        tokio::time::sleep(delay).await;
    }

    /// Snaps the delay back to the floor. Called on any non-empty receive.
    pub fn reset(&mut self) {
        self.next = self.config.initial;
    }

    fn step(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(self.config.max);
        delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doubles_up_to_cap() {
        let config = BackoffConfig::default()
            .with_initial(Duration::from_millis(100))
            .with_max(Duration::from_millis(350));
        let mut backoff = Backoff::new(config);

        assert_eq!(backoff.step(), Duration::from_millis(100));
        assert_eq!(backoff.step(), Duration::from_millis(200));
        // Capped, not 400.
        assert_eq!(backoff.step(), Duration::from_millis(350));
        assert_eq!(backoff.step(), Duration::from_millis(350));
    }

    #[test]
    fn test_reset_returns_to_floor() {
        let config = BackoffConfig::default()
            .with_initial(Duration::from_millis(50))
            .with_max(Duration::from_secs(1));
        let mut backoff = Backoff::new(config);

        backoff.step();
        backoff.step();
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(50));
    }
}
