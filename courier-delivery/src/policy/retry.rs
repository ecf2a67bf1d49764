//! Retry schedule configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// When failed units are retried, and when the sender hears about it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Wait after the n-th failed attempt before attempt n + 1, in seconds.
    /// A unit gets one attempt more than there are periods.
    ///
    /// Default: 3m, 27m, 30m, ten times 2h, then 3h (about a day in total)
    #[serde(default = "defaults::retry_periods_secs")]
    pub retry_periods_secs: Vec<u64>,

    /// Attempt counts after which recipients still being retried are
    /// reported to the sender as delayed.
    ///
    /// Default: none
    #[serde(default)]
    pub delay_report_points: Vec<u32>,

    /// Consecutive postponements allowed before the attempt counts as a
    /// transient failure.
    ///
    /// Default: 3
    #[serde(default = "defaults::max_postpones")]
    pub max_postpones: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retry_periods_secs: defaults::retry_periods_secs(),
            delay_report_points: Vec::new(),
            max_postpones: defaults::max_postpones(),
        }
    }
}

impl RetryConfig {
    /// Attempts a unit gets before transient failures count as permanent
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        u32::try_from(self.retry_periods_secs.len())
            .unwrap_or(u32::MAX)
            .saturating_add(1)
    }

    /// Whether a transient failure on attempt `attempts` is the last one
    /// allowed.
    #[must_use]
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts()
    }

    /// Wait before the next attempt, after `attempts` attempts failed.
    ///
    /// Counts beyond the schedule reuse its last period.
    #[must_use]
    pub fn retry_period(&self, attempts: u32) -> Duration {
        let index = usize::try_from(attempts.saturating_sub(1)).unwrap_or(usize::MAX);

        self.retry_periods_secs
            .get(index)
            .or_else(|| self.retry_periods_secs.last())
            .map_or(Duration::ZERO, |secs| Duration::from_secs(*secs))
    }

    #[must_use]
    pub fn is_delay_report_point(&self, attempts: u32) -> bool {
        self.delay_report_points.contains(&attempts)
    }
}

mod defaults {
    const MINUTE: u64 = 60;
    const HOUR: u64 = 60 * MINUTE;

    pub fn retry_periods_secs() -> Vec<u64> {
        let mut periods = vec![3 * MINUTE, 27 * MINUTE, 30 * MINUTE];
        periods.extend([2 * HOUR; 10]);
        periods.push(3 * HOUR);
        periods
    }

    pub const fn max_postpones() -> u32 {
        3
    }
}
