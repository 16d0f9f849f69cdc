//! Sliding-window rate limiter for inbound mesh messages.
//!
//! Per-node timestamp lists, memory only; loss on restart fails open. A rejected
//! message does not consume a slot. A periodic sweep (piggybacked on `check`, not
//! a background task) drops nodes whose window has drained, bounding memory under
//! node churn.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use log::{debug, warn};

const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    /// Over the cap; `wait_secs` is how long until the oldest slot frees up.
    Limited { wait_secs: u64 },
}

pub struct RateLimiter {
    window: Duration,
    max_messages: usize,
    sweep_interval: Duration,
    timestamps: HashMap<String, Vec<Instant>>,
    last_sweep: Instant,
}

impl RateLimiter {
    pub fn new(window_secs: u64, max_messages: usize) -> Self {
        Self::with_sweep_interval(window_secs, max_messages, SWEEP_INTERVAL)
    }

    /// Like [`RateLimiter::new`] with an explicit sweep cadence.
    pub fn with_sweep_interval(
        window_secs: u64,
        max_messages: usize,
        sweep_interval: Duration,
    ) -> Self {
        Self {
            window: Duration::from_secs(window_secs),
            max_messages,
            sweep_interval,
            timestamps: HashMap::new(),
            last_sweep: Instant::now(),
        }
    }

    /// Check whether a node may send another message now. An allowed call
    /// records its timestamp; a limited call records nothing.
    pub fn check(&mut self, node_id: &str) -> RateDecision {
        let now = Instant::now();

        if now.duration_since(self.last_sweep) > self.sweep_interval {
            self.sweep(now);
            self.last_sweep = now;
        }

        let times = self.timestamps.entry(node_id.to_string()).or_default();
        times.retain(|t| now.duration_since(*t) < self.window);

        if times.len() >= self.max_messages {
            let oldest = times[0];
            let wait = self.window.saturating_sub(now.duration_since(oldest));
            warn!(
                "Rate limit exceeded for {}: {} message(s) in window",
                node_id,
                times.len()
            );
            return RateDecision::Limited {
                wait_secs: wait.as_secs(),
            };
        }

        times.push(now);
        RateDecision::Allowed
    }

    /// Drop tracking for nodes whose window has fully drained.
    fn sweep(&mut self, now: Instant) {
        let window = self.window;
        let before = self.timestamps.len();
        self.timestamps.retain(|_, times| {
            times.retain(|t| now.duration_since(*t) < window);
            !times.is_empty()
        });
        let removed = before - self.timestamps.len();
        if removed > 0 {
            debug!("Rate limiter swept {} inactive node(s)", removed);
        }
    }
}
