//! Restart budget and backoff tracking.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use sandboxd_config::RestartConfig;

/// Sliding-window restart budget with exponential backoff.
#[derive(Debug, Clone)]
pub struct RestartTracker {
    /// Timestamps of recent restarts.
    restarts: VecDeque<Instant>,
    policy: RestartConfig,
    total: u32,
}

impl RestartTracker {
    pub fn new(policy: RestartConfig) -> Self {
        Self {
            restarts: VecDeque::new(),
            policy,
            total: 0,
        }
    }

    /// Record a restart and check if the budget is exceeded.
    pub fn record_restart(&mut self) -> bool {
        let now = Instant::now();
        let window = self.policy.window();

        // Remove old restarts outside the window
        while let Some(front) = self.restarts.front() {
            if now.duration_since(*front) > window {
                self.restarts.pop_front();
            } else {
                break;
            }
        }

        self.restarts.push_back(now);
        self.total += 1;

        self.restarts.len() as u32 > self.policy.max_restarts
    }

    /// Delay before the next launch: `initial * multiplier^(n-1)` for the
    /// n-th restart in the window, capped at `max_backoff`.
    pub fn backoff(&self) -> Duration {
        let n = self.restarts.len().max(1) as i32;
        let max = self.policy.max_backoff().as_secs_f64();
        let secs = self.policy.initial_backoff().as_secs_f64()
            * self.policy.backoff_multiplier.powi(n - 1);
        Duration::from_secs_f64(secs.min(max))
    }

    /// Forget the failure window after a sustained healthy period.
    pub fn reset(&mut self) {
        self.restarts.clear();
    }

    /// Restarts inside the current window.
    pub fn count(&self) -> u32 {
        self.restarts.len() as u32
    }

    /// Restarts over the whole session.
    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn policy(&self) -> &RestartConfig {
        &self.policy
    }
}
