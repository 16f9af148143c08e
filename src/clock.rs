//! The timer wheel shared by the grow-timer and the retry queue.
//!
//! Both of those are "do something after a duration, unless reset first"
//! problems, so a single [`tokio_util::time::DelayQueue`] backs them both
//! rather than hand-rolling two separate interval tasks.

use std::time::{Duration, Instant};

use tokio_util::time::delay_queue::Key;
use tokio_util::time::DelayQueue;

/// Wraps a `DelayQueue` to give call sites a slightly higher-level API:
/// schedule something after a duration, reset it, or cancel it, without
/// reaching into `tokio_util`'s key bookkeeping directly.
#[derive(Debug, Default)]
pub struct TimerWheel<T> {
    queue: DelayQueue<T>,
}

impl<T> TimerWheel<T> {
    /// Creates an empty wheel.
    pub fn new() -> Self {
        TimerWheel {
            queue: DelayQueue::new(),
        }
    }

    /// Schedules `item` to fire after `delay`, returning a key that can be
    /// used to [`reset`](Self::reset) or [`remove`](Self::remove) it.
    pub fn schedule(&mut self, item: T, delay: Duration) -> Key {
        self.queue.insert(item, delay)
    }

    /// Re-arms an existing entry to fire `delay` from now.
    pub fn reset(&mut self, key: &Key, delay: Duration) {
        self.queue.reset(key, delay);
    }

    /// Cancels a previously scheduled entry. No-op if it already fired.
    pub fn remove(&mut self, key: &Key) {
        if self.queue.contains_key(key) {
            self.queue.remove(key);
        }
    }

    /// True if no entries are pending.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Polls the queue for its next expired entry. Intended to be awaited
    /// from inside `tokio::select!` in the Dispatcher loop.
    pub async fn next(&mut self) -> Option<T> {
        std::future::poll_fn(|cx| self.queue.poll_expired(cx))
            .await
            .map(|expired| expired.into_inner())
    }
}

/// Monotonic clock, trivially wrapping [`std::time::Instant`].
///
/// This exists as a named type (rather than calling `Instant::now()`
/// everywhere) so request timing and backoff math have one obvious place to
/// look, matching how the original fetcher centralizes "now" through its
/// reactor's clock.
#[derive(Debug, Clone, Copy)]
pub struct Clock;

impl Clock {
    /// Returns the current instant.
    pub fn now() -> Instant {
        Instant::now()
    }
}

/// Exponential backoff matching the original fetcher: `2 * 2^retries`
/// seconds, i.e. 2s, 4s, 8s, 16s, ...
pub fn backoff(retries: u32) -> Duration {
    Duration::from_secs(2u64.saturating_mul(1u64 << retries.min(32)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_each_retry() {
        assert_eq!(backoff(0), Duration::from_secs(2));
        assert_eq!(backoff(1), Duration::from_secs(4));
        assert_eq!(backoff(2), Duration::from_secs(8));
        assert_eq!(backoff(3), Duration::from_secs(16));
    }

    #[tokio::test]
    async fn wheel_fires_after_delay() {
        let mut wheel = TimerWheel::new();
        wheel.schedule("hello", Duration::from_millis(5));
        assert_eq!(wheel.next().await, Some("hello"));
    }

    #[tokio::test]
    async fn wheel_reset_extends_deadline() {
        let mut wheel = TimerWheel::new();
        let key = wheel.schedule("hello", Duration::from_millis(5));
        wheel.reset(&key, Duration::from_millis(30));
        let start = Instant::now();
        wheel.next().await;
        assert!(start.elapsed() >= Duration::from_millis(25));
    }
}
