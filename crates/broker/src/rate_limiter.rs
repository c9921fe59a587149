//! Sliding-window rate limiter for vendor endpoints.
//!
//! Each endpoint category (option chains, market snapshots) gets its own limiter.
//! A limiter admits at most `max_calls` in any trailing `window`; callers past the
//! limit block until the oldest recorded call leaves the window.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// Slack added to every computed wait so the oldest call has really expired.
const EPSILON: Duration = Duration::from_millis(10);

/// A call budget: `max_calls` per `window`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    pub max_calls: usize,
    pub window: Duration,
}

impl RateLimit {
    pub const fn new(max_calls: usize, window: Duration) -> Self {
        Self { max_calls, window }
    }

    /// Option chain endpoint: 10 calls per 30 seconds.
    pub const fn option_chain() -> Self {
        Self::new(10, Duration::from_secs(30))
    }

    /// Market snapshot endpoint: 60 calls per 30 seconds.
    pub const fn market_snapshot() -> Self {
        Self::new(60, Duration::from_secs(30))
    }
}

impl fmt::Display for RateLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.max_calls, self.window.as_secs())
    }
}

/// Parses `"calls/seconds"`, e.g. `"10/30"`.
impl FromStr for RateLimit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (calls, secs) = s
            .split_once('/')
            .ok_or_else(|| format!("expected calls/seconds, got '{}'", s))?;
        let max_calls: usize = calls
            .trim()
            .parse()
            .map_err(|_| format!("invalid call count in '{}'", s))?;
        let secs: u64 = secs
            .trim()
            .parse()
            .map_err(|_| format!("invalid window in '{}'", s))?;
        if max_calls == 0 || secs == 0 {
            return Err(format!("rate limit '{}' must be positive", s));
        }
        Ok(Self::new(max_calls, Duration::from_secs(secs)))
    }
}

/// Blocking sliding-window limiter.
///
/// The lock is held across the wait, so concurrent callers queue behind each
/// other instead of racing for the same freed slot.
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    name: &'static str,
    limit: RateLimit,
    calls: Mutex<VecDeque<Instant>>,
}

impl SlidingWindowLimiter {
    pub fn new(name: &'static str, limit: RateLimit) -> Self {
        Self {
            name,
            limit,
            calls: Mutex::new(VecDeque::with_capacity(limit.max_calls)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn limit(&self) -> RateLimit {
        self.limit
    }

    fn lock_calls(&self) -> MutexGuard<'_, VecDeque<Instant>> {
        self.calls.lock().unwrap_or_else(|poisoned| {
            warn!("Rate limiter '{}' mutex was poisoned, recovering", self.name);
            poisoned.into_inner()
        })
    }

    /// Drops timestamps that fell out of the trailing window.
    fn evict(calls: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(oldest) = calls.front() {
            if now.duration_since(*oldest) >= window {
                calls.pop_front();
            } else {
                break;
            }
        }
    }

    /// Blocks the calling thread until a call is admitted, then records it.
    pub fn acquire(&self) {
        let mut calls = self.lock_calls();
        let window = self.limit.window;

        Self::evict(&mut calls, Instant::now(), window);

        if calls.len() >= self.limit.max_calls {
            if let Some(oldest) = calls.front().copied() {
                let wait = (oldest + window + EPSILON).saturating_duration_since(Instant::now());
                debug!(
                    "Rate limiter '{}': {} calls in window, waiting {:?}",
                    self.name,
                    calls.len(),
                    wait
                );
                std::thread::sleep(wait);
            }
            Self::evict(&mut calls, Instant::now(), window);
        }

        calls.push_back(Instant::now());
    }

    /// Number of calls recorded in the current window.
    pub fn in_window(&self) -> usize {
        let mut calls = self.lock_calls();
        Self::evict(&mut calls, Instant::now(), self.limit.window);
        calls.len()
    }
}
