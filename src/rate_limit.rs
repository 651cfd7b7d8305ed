//! Mirror of the server-reported rate limit usage.
//!
//! Limits are not enforced client-side; the tracker only records what the
//! venue reports in each response's `rateLimits` array.

use tokio::sync::watch;

/// Most recently reported usage counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub count: u32,
    pub limit: u32,
    pub remain: u32,
}

impl RateLimit {
    const DEFAULT_LIMIT: u32 = 1200;

    pub fn new(count: u32, limit: u32) -> Self {
        Self {
            count,
            limit,
            remain: limit.saturating_sub(count),
        }
    }
}

impl Default for RateLimit {
    fn default() -> Self {
        Self::new(0, Self::DEFAULT_LIMIT)
    }
}

/// Single-writer tracker; readers hold a [`watch::Receiver`].
#[derive(Debug)]
pub struct RateLimitTracker {
    tx: watch::Sender<RateLimit>,
}

impl RateLimitTracker {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(RateLimit::default());
        Self { tx }
    }

    /// Overwrite the counters; last write wins.
    pub fn update(&self, count: u32, limit: u32) -> RateLimit {
        let state = RateLimit::new(count, limit);
        self.tx.send_replace(state);
        state
    }

    pub fn snapshot(&self) -> RateLimit {
        *self.tx.borrow()
    }

    /// A read-only view that follows every update.
    pub fn reader(&self) -> watch::Receiver<RateLimit> {
        self.tx.subscribe()
    }
}

impl Default for RateLimitTracker {
    fn default() -> Self {
        Self::new()
    }
}
