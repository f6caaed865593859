//! Whole-pipeline wall-clock budget.

use std::time::{Duration, Instant};

/// Longest budget a deadline represents; larger requests are clamped.
const MAX_BUDGET: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Point in time after which no further external work may start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget.min(MAX_BUDGET),
        }
    }

    /// Remaining budget, or `None` once the deadline has passed.
    pub fn remaining(&self) -> Option<Duration> {
        let left = self.at.saturating_duration_since(Instant::now());
        if left.is_zero() { None } else { Some(left) }
    }
}
