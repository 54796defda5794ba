//! Retry policy for hotplug attempt sequences
//!
//! [`RetryState`] counts attempts against a fixed list of waits and turns
//! each attempt result into a [`Step`]. Sleeping is left to the caller
//! through a [`Clock`], so the policy can be driven without real time.

use async_trait::async_trait;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::CloudInitError;

/// Seconds to wait after each failed attempt
pub const WAIT_TIMES: [u64; 5] = [1, 3, 5, 10, 30];

/// What to do after an attempt
#[derive(Debug)]
pub enum Step {
    /// Wait, then try again
    Continue { wait: Duration, reason: String },
    Success,
    /// No attempts left; wait, then give up with the last error
    Exhausted { wait: Duration, error: CloudInitError },
}

/// Attempt counter for one attempt sequence
#[derive(Debug, Clone)]
pub struct RetryState {
    waits: Vec<Duration>,
    attempts: usize,
}

impl RetryState {
    pub fn new() -> Self {
        Self::with_waits(WAIT_TIMES.iter().map(|s| Duration::from_secs(*s)).collect())
    }

    /// One attempt per wait
    pub fn with_waits(waits: Vec<Duration>) -> Self {
        Self { waits, attempts: 0 }
    }

    pub fn max_attempts(&self) -> usize {
        self.waits.len()
    }

    /// Attempts recorded so far
    pub fn attempts(&self) -> usize {
        self.attempts
    }

    pub fn record_success(&mut self) -> Step {
        self.attempts += 1;
        Step::Success
    }

    /// Every failure waits, the final one included
    pub fn record_failure(&mut self, error: CloudInitError) -> Step {
        let wait = self.waits.get(self.attempts).copied().unwrap_or_default();
        self.attempts += 1;

        if self.attempts < self.max_attempts() {
            Step::Continue {
                wait,
                reason: error.to_string(),
            }
        } else {
            Step::Exhausted { wait, error }
        }
    }
}

impl Default for RetryState {
    fn default() -> Self {
        Self::new()
    }
}

/// Time source and sleeper
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    async fn sleep(&self, duration: Duration);
}

/// Clock backed by the tokio timer
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Clock that only moves when slept on
///
/// # Example
/// ```
/// use cloud_init_seed::hotplug::{Clock, ManualClock};
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let clock = ManualClock::new();
/// let start = clock.now();
/// clock.sleep(Duration::from_secs(3)).await;
/// assert_eq!(clock.now() - start, Duration::from_secs(3));
/// assert_eq!(clock.sleeps(), vec![Duration::from_secs(3)]);
/// # });
/// ```
#[derive(Debug)]
pub struct ManualClock {
    start: Instant,
    elapsed: Mutex<Duration>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            elapsed: Mutex::new(Duration::ZERO),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    /// Move time forward without recording a sleep
    pub fn advance(&self, duration: Duration) {
        if let Ok(mut elapsed) = self.elapsed.lock() {
            *elapsed += duration;
        }
    }

    /// Every sleep requested so far
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.start + self.elapsed.lock().map(|e| *e).unwrap_or_default()
    }

    async fn sleep(&self, duration: Duration) {
        if let Ok(mut sleeps) = self.sleeps.lock() {
            sleeps.push(duration);
        }
        self.advance(duration);
    }
}
