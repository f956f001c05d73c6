use std::time::Duration;

use tokio::time::{sleep, Instant};

/// Bounded polling window. Each call to [`tick`](Waiter::tick) grants one
/// attempt; attempts after the first are spaced `step` apart, and the window
/// closes once `timeout` has elapsed.
///
/// Breaking out of the loop before the window closes leaves
/// [`expired`](Waiter::expired) reading `false`, so callers can tell an early
/// stop apart from a timeout.
pub struct Waiter {
    started: Instant,
    timeout: Duration,
    step: Duration,
    expired: bool,
    first: bool,
}

impl Waiter {
    pub fn new(timeout: Duration, step: Duration) -> Self {
        Waiter {
            started: Instant::now(),
            timeout,
            step,
            expired: false,
            first: true,
        }
    }

    /// Grant the next poll attempt, sleeping `step` first for every attempt
    /// after the first. Returns `false` once the window has closed.
    pub async fn tick(&mut self) -> bool {
        if self.expired {
            return false;
        }
        if self.first {
            // the body always runs at least once, even with a tiny timeout
            self.first = false;
            return true;
        }
        sleep(self.step).await;
        if self.started.elapsed() > self.timeout {
            self.expired = true;
            return false;
        }
        true
    }

    pub fn expired(&self) -> bool {
        self.expired
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(timeout: u64, step: u64) -> Waiter {
        Waiter::new(Duration::from_secs(timeout), Duration::from_secs(step))
    }

    #[tokio::test(start_paused = true)]
    async fn unbroken_loop_expires_after_window_closes() {
        // attempts land at 0s, 2s and 4s; the check after the next sleep
        // sees 6s > 5s and closes the window
        let mut waiter = secs(5, 2);
        let mut attempts = 0;
        while waiter.tick().await {
            attempts += 1;
        }
        assert_eq!(attempts, 3);
        assert!(waiter.expired());
    }

    #[tokio::test(start_paused = true)]
    async fn larger_window_iteration_count() {
        let mut waiter = secs(10, 3);
        let mut attempts = 0;
        while waiter.tick().await {
            attempts += 1;
        }
        // 0s, 3s, 6s, 9s
        assert_eq!(attempts, 4);
        assert!(waiter.expired());
    }

    #[tokio::test(start_paused = true)]
    async fn break_on_first_attempt_sleeps_zero_and_stays_unexpired() {
        let begin = Instant::now();
        let mut waiter = secs(1, 30);
        let mut attempts = 0;
        while waiter.tick().await {
            attempts += 1;
            break;
        }
        assert_eq!(attempts, 1);
        assert!(!waiter.expired());
        assert_eq!(begin.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn tick_after_expiry_keeps_returning_false() {
        let mut waiter = secs(1, 1);
        while waiter.tick().await {}
        assert!(waiter.expired());
        assert!(!waiter.tick().await);
        assert!(waiter.expired());
    }
}
